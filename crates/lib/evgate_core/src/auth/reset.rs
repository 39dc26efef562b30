//! Password-reset token generation and delivery.

use async_trait::async_trait;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::models::auth::User;

/// Generate a cryptographically random reset token (64 alphanumeric chars).
pub fn generate_reset_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// SHA-256 hash a reset token for storage.
///
/// The cache only ever sees the hash.
pub fn hash_reset_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Delivers a freshly issued reset token to its owner.
///
/// Email rendering lives in the notification service; implementations only
/// hand the token over.
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn reset_requested(&self, user: &User, token: &str);
}

/// Notifier that records the event in the log without the token itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl ResetNotifier for LogNotifier {
    async fn reset_requested(&self, user: &User, _token: &str) {
        info!(user_id = %user.id, "password reset token issued");
    }
}
