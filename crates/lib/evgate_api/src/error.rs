//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use evgate_core::auth::AuthError;
use thiserror::Error;
use tracing::{error, warn};

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Message for every token failure, whatever the reason.
pub const INVALID_TOKEN: &str = "Invalid or expired token";

/// Application-level errors with HTTP status mapping.
///
/// Messages are client-facing. Variants that wrap internal detail render a
/// fixed message and log the detail instead.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream unavailable: {0}")]
    BadGateway(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Upstream timed out: {0}")]
    GatewayTimeout(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str()),
            AppError::BadGateway(cause) => {
                warn!(%cause, "upstream unavailable");
                (
                    StatusCode::BAD_GATEWAY,
                    "bad_gateway",
                    "Upstream service unavailable",
                )
            }
            AppError::ServiceUnavailable(cause) => {
                error!(%cause, "dependency unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service_unavailable",
                    "Service temporarily unavailable",
                )
            }
            AppError::GatewayTimeout(cause) => {
                warn!(%cause, "timed out");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "gateway_timeout",
                    "Upstream service timed out",
                )
            }
            AppError::Internal(cause) => {
                error!(%cause, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidToken(_) => AppError::Unauthorized(INVALID_TOKEN.into()),
            AuthError::InvalidCredentials => {
                AppError::Unauthorized("Invalid email or password".into())
            }
            AuthError::UserNotFound => AppError::NotFound("User not found".into()),
            AuthError::UserNotActive => AppError::Forbidden("User account is not active".into()),
            AuthError::EmailAlreadyExists => {
                AppError::Conflict("User with this email already exists".into())
            }
            AuthError::InvalidResetToken => {
                AppError::Validation("Invalid or expired reset token".into())
            }
            AuthError::Validation(msg) => AppError::Validation(msg),
            AuthError::StoreUnavailable(msg) => AppError::ServiceUnavailable(msg),
            AuthError::Timeout(what) => AppError::GatewayTimeout(what.to_string()),
            AuthError::Signing(msg) | AuthError::Internal(msg) => AppError::Internal(msg),
            AuthError::Db(e) => AppError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use evgate_core::auth::TokenRejection;

    use super::*;

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn every_token_rejection_looks_the_same() {
        let mut seen = Vec::new();
        for reason in [
            TokenRejection::Malformed,
            TokenRejection::SignatureInvalid,
            TokenRejection::Expired,
            TokenRejection::NotYetValid,
            TokenRejection::Revoked,
            TokenRejection::WrongKind,
        ] {
            seen.push(body_of(AuthError::InvalidToken(reason).into()).await);
        }
        assert!(seen.iter().all(|s| s == &seen[0]));
        assert_eq!(seen[0].0, StatusCode::UNAUTHORIZED);
        assert_eq!(seen[0].1["message"], INVALID_TOKEN);
    }

    #[tokio::test]
    async fn internal_detail_is_not_leaked() {
        let (status, body) = body_of(AppError::Internal("pool exhausted at 10.0.0.3".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.to_string().contains("10.0.0.3"));

        let (status, body) = body_of(AppError::BadGateway("connection refused".into())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!body.to_string().contains("refused"));
    }

    #[tokio::test]
    async fn store_outage_is_503() {
        let (status, _) = body_of(AuthError::StoreUnavailable("down".into()).into()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = body_of(AuthError::Timeout("user directory").into()).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }
}
