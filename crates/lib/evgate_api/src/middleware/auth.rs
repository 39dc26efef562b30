//! Authentication gate: bearer extraction, token validation, role checks.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use evgate_core::models::auth::AuthenticatedIdentity;
use tracing::debug;

use crate::AppState;
use crate::error::{AppError, INVALID_TOKEN};

/// Identity of the caller, stored in request extensions by [`require_auth`].
///
/// Also usable as an extractor; extraction fails with `401` when the request
/// never went through the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub AuthenticatedIdentity);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
///
/// The scheme is case-sensitive and followed by exactly one space. Empty
/// tokens and tokens containing whitespace are refused.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthorized("Authorization header is required".into()))?
        .to_str()
        .map_err(|_| AppError::Unauthorized(BAD_SCHEME.into()))?;

    match header.strip_prefix("Bearer ") {
        Some(token) if !token.is_empty() && !token.contains(char::is_whitespace) => Ok(token),
        _ => Err(AppError::Unauthorized(BAD_SCHEME.into())),
    }
}

const BAD_SCHEME: &str = "Authorization header format must be Bearer {token}";

/// Axum middleware: validates the bearer token and injects
/// [`AuthenticatedUser`] and the validated claims into request extensions.
///
/// Any failure short-circuits; the inner service never runs.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers())?.to_owned();

    let claims = state.tokens.validate(&token).await.map_err(|e| {
        if let evgate_core::auth::AuthError::InvalidToken(reason) = &e {
            debug!(%reason, path = %request.uri().path(), "token rejected");
            AppError::Unauthorized(INVALID_TOKEN.into())
        } else {
            AppError::from(e)
        }
    })?;

    request
        .extensions_mut()
        .insert(AuthenticatedUser(claims.identity()));
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Axum middleware: requires an admin caller. Must run after [`require_auth`].
///
/// A request with no identity is `401`, so authentication always takes
/// precedence over authorization.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;
    if !user.0.is_admin() {
        debug!(user_id = %user.0.user_id, "admin route refused");
        return Err(AppError::Forbidden("Admin privileges required".into()));
    }
    Ok(next.run(request).await)
}
