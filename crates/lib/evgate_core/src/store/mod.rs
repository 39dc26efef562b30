//! Token store: revocation markers and one-time reset tokens with TTLs.
//!
//! Every state change is a single `SET`/`GETDEL`/`DEL` against the backing
//! cache, so cross-request coordination rests on the cache's own per-command
//! atomicity.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::reset::hash_reset_token;

pub use memory::MemoryTokenStore;
pub use self::redis::RedisTokenStore;

/// Token store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The cache could not be reached, after a retry where one is safe.
    #[error("token store unavailable: {0}")]
    Unavailable(String),

    /// The reset token is unknown, expired or already used.
    #[error("invalid reset token")]
    InvalidResetToken,
}

/// Revocation and reset-token storage.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Mark `token_id` revoked for `ttl`. Idempotent.
    async fn revoke(&self, token_id: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Revoke `token_id` only if it is not revoked yet.
    ///
    /// Returns `true` when this call placed the marker. Used to consume
    /// single-use tokens without a check-then-set race.
    async fn revoke_once(&self, token_id: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Whether `token_id` is currently revoked.
    async fn is_revoked(&self, token_id: &str) -> Result<bool, StoreError>;

    /// Drop a revocation marker early.
    async fn unrevoke(&self, token_id: &str) -> Result<(), StoreError>;

    /// Remember `token` as a reset token for `user_id` for `ttl`.
    async fn put_reset_token(
        &self,
        token: &str,
        user_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Read and delete a reset token, returning the user ID it was issued for.
    async fn consume_reset_token(&self, token: &str) -> Result<String, StoreError>;
}

/// Cache key of a revocation marker.
pub fn revoked_key(token_id: &str) -> String {
    format!("revoked:{token_id}")
}

/// Cache key of a reset entry. Only the token hash is stored.
pub fn reset_key(token: &str) -> String {
    format!("reset:{}", hash_reset_token(token))
}

/// Longest TTL handed to the cache. Redis refuses larger `EX` values.
pub const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Whole-second TTL, at least one second so the entry is never immortal.
pub fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().clamp(1, MAX_TTL_SECS)
}
