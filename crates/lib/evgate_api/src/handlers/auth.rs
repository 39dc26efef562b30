//! Authentication request handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use evgate_core::auth::AuthError;
use evgate_core::models::auth::Registration;
use tracing::{debug, error, warn};

use crate::AppState;
use crate::error::{AppError, AppResult, INVALID_TOKEN};
use crate::middleware::auth::{AuthenticatedUser, bearer_token};
use crate::models::{
    AuthResponse, ForgotPasswordRequest, LoginRequest, LogoutRequest, MessageResponse,
    RefreshRequest, RegisterRequest, ResetPasswordRequest, TokenResponse, UserResponse,
};

/// Answer to every forgot-password request, known email or not.
pub const RESET_REQUESTED: &str =
    "If an account exists for this email, a password reset link has been sent";

/// `POST /auth/register`: create an account and sign it in.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let session = state
        .tokens
        .register(Registration {
            email: body.email,
            password: body.password,
            first_name: body.first_name,
            last_name: body.last_name,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: session.user.into(),
            tokens: session.tokens.into(),
        }),
    ))
}

/// `POST /auth/login`: authenticate with email and password.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let session = state.tokens.login(&body.email, &body.password).await?;
    Ok(Json(AuthResponse {
        user: session.user.into(),
        tokens: session.tokens.into(),
    }))
}

/// `POST /auth/refresh`: exchange a refresh token for a new pair.
///
/// The presented token is consumed. Any failure tied to the token or its
/// owner is a plain `401`.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    match state.tokens.refresh(&body.refresh_token).await {
        Ok(pair) => Ok(Json(pair.into())),
        Err(AuthError::InvalidToken(reason)) => {
            debug!(%reason, "refresh refused");
            Err(AppError::Unauthorized(INVALID_TOKEN.into()))
        }
        Err(AuthError::UserNotFound) => Err(AppError::Unauthorized(INVALID_TOKEN.into())),
        Err(e) => Err(e.into()),
    }
}

/// `POST /auth/logout`: revoke the bearer token, and the refresh token if
/// the body names one.
///
/// Idempotent: a token that is already revoked or already expired still
/// logs out successfully. The bearer token is checked here rather than by
/// `require_auth`, which would refuse a revoked token.
pub async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<MessageResponse>> {
    let token = bearer_token(&headers)?;
    let body: LogoutRequest = if body.iter().all(u8::is_ascii_whitespace) {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Invalid request body: {e}")))?
    };

    state.tokens.logout(token).await?;

    if let Some(refresh) = body.refresh_token.as_deref() {
        match state.tokens.logout(refresh).await {
            Ok(()) => {}
            Err(AuthError::InvalidToken(reason)) => {
                debug!(%reason, "companion refresh token ignored on logout");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Json(MessageResponse::ok("Successfully logged out")))
}

/// `GET /auth/me`: profile of the authenticated caller.
pub async fn me_handler(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    let profile = state.tokens.current_user(&user.0.user_id).await?;
    Ok(Json(profile.into()))
}

/// `POST /auth/forgot-password`: start a password reset.
///
/// Always answers `200` with the same message so the response cannot be
/// used to probe which emails have accounts.
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> Json<MessageResponse> {
    match state.tokens.create_reset_token(&body.email).await {
        Ok(_) => {}
        Err(AuthError::UserNotFound | AuthError::UserNotActive) => {
            debug!("password reset requested for unknown or inactive account");
        }
        Err(e @ (AuthError::StoreUnavailable(_) | AuthError::Timeout(_))) => {
            warn!(error = %e, "password reset could not be issued");
        }
        Err(e) => error!(error = %e, "password reset failed"),
    }
    Json(MessageResponse::ok(RESET_REQUESTED))
}

/// `POST /auth/reset-password`: set a new password with a reset token.
pub async fn reset_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .tokens
        .reset_password(&body.token, &body.new_password)
        .await?;
    Ok(Json(MessageResponse::ok("Password has been reset successfully")))
}
