//! Authentication and token lifecycle.
//!
//! Provides the token codec, password hashing, reset-token plumbing and the
//! [`service::TokenService`] that ties them to a token store and a user
//! directory.

pub mod jwt;
pub mod password;
pub mod reset;
pub mod service;

use std::fmt;

use thiserror::Error;

use crate::store::StoreError;

/// Why a presented token was not accepted.
///
/// Kept for logs and tests only. Every variant renders identically to
/// clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Malformed,
    SignatureInvalid,
    Expired,
    NotYetValid,
    Revoked,
    WrongKind,
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenRejection::Malformed => "malformed",
            TokenRejection::SignatureInvalid => "signature invalid",
            TokenRejection::Expired => "expired",
            TokenRejection::NotYetValid => "not yet valid",
            TokenRejection::Revoked => "revoked",
            TokenRejection::WrongKind => "wrong token kind",
        };
        f.write_str(s)
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token ({0})")]
    InvalidToken(TokenRejection),

    #[error("Token signing failed: {0}")]
    Signing(String),

    #[error("User not found")]
    UserNotFound,

    #[error("User is not active")]
    UserNotActive,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired reset token")]
    InvalidResetToken,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Token store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// True for every token-level failure, whatever the underlying reason.
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, AuthError::InvalidToken(_))
    }
}

impl From<jwt::CodecError> for AuthError {
    fn from(e: jwt::CodecError) -> Self {
        match e {
            jwt::CodecError::Malformed => AuthError::InvalidToken(TokenRejection::Malformed),
            jwt::CodecError::SignatureInvalid => {
                AuthError::InvalidToken(TokenRejection::SignatureInvalid)
            }
            jwt::CodecError::Expired => AuthError::InvalidToken(TokenRejection::Expired),
            jwt::CodecError::NotYetValid => AuthError::InvalidToken(TokenRejection::NotYetValid),
            jwt::CodecError::Signing(msg) => AuthError::Signing(msg),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidResetToken => AuthError::InvalidResetToken,
            StoreError::Unavailable(msg) => AuthError::StoreUnavailable(msg),
        }
    }
}
