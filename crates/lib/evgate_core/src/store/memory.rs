//! In-process token store.
//!
//! Used by tests and single-node development runs. Expiry follows the tokio
//! clock, so paused-time tests can step through TTLs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{StoreError, TokenStore, reset_key, revoked_key, ttl_secs};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// DashMap-backed [`TokenStore`] with an outage switch.
#[derive(Debug)]
pub struct MemoryTokenStore {
    entries: DashMap<String, Entry>,
    available: AtomicBool,
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the cache going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".into()))
        }
    }

    fn set(&self, key: String, value: String, ttl: Duration) {
        let now = Instant::now();
        self.sweep(now);
        let expires_at = expiry(now, ttl);
        self.entries.insert(key, Entry { value, expires_at });
    }

    /// Drop every expired entry. Runs on writes so the map stays bounded by
    /// the live set.
    fn sweep(&self, now: Instant) {
        self.entries.retain(|_, e| e.is_live(now));
    }

    fn get_live(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .map(|e| e.is_live(now).then(|| e.value.clone()));
        match live {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }
}

fn expiry(now: Instant, ttl: Duration) -> Instant {
    let ttl = Duration::from_secs(ttl_secs(ttl));
    now.checked_add(ttl).unwrap_or(now + Duration::from_secs(24 * 60 * 60))
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn revoke(&self, token_id: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.set(revoked_key(token_id), "1".into(), ttl);
        Ok(())
    }

    async fn revoke_once(&self, token_id: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        let now = Instant::now();
        self.sweep(now);
        let expires_at = expiry(now, ttl);
        let mut placed = false;
        self.entries
            .entry(revoked_key(token_id))
            .and_modify(|e| {
                if !e.is_live(now) {
                    *e = Entry {
                        value: "1".into(),
                        expires_at,
                    };
                    placed = true;
                }
            })
            .or_insert_with(|| {
                placed = true;
                Entry {
                    value: "1".into(),
                    expires_at,
                }
            });
        Ok(placed)
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.get_live(&revoked_key(token_id)).is_some())
    }

    async fn unrevoke(&self, token_id: &str) -> Result<(), StoreError> {
        self.check()?;
        self.entries.remove(&revoked_key(token_id));
        Ok(())
    }

    async fn put_reset_token(
        &self,
        token: &str,
        user_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.set(reset_key(token), user_id.to_string(), ttl);
        Ok(())
    }

    async fn consume_reset_token(&self, token: &str) -> Result<String, StoreError> {
        self.check()?;
        let now = Instant::now();
        match self.entries.remove(&reset_key(token)) {
            Some((_, entry)) if entry.is_live(now) => Ok(entry.value),
            _ => Err(StoreError::InvalidResetToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn revocation_holds_for_its_ttl_then_lapses() {
        let store = MemoryTokenStore::new();
        store.revoke("jti-1", Duration::from_secs(60)).await.unwrap();

        for _ in 0..5 {
            assert!(store.is_revoked("jti-1").await.unwrap());
            tokio::time::advance(Duration::from_secs(10)).await;
        }
        assert!(store.is_revoked("jti-1").await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!store.is_revoked("jti-1").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = MemoryTokenStore::new();
        store.revoke("jti", Duration::from_secs(5)).await.unwrap();
        store.revoke("jti", Duration::from_secs(5)).await.unwrap();
        assert!(store.is_revoked("jti").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn revoke_once_only_wins_the_first_time() {
        let store = MemoryTokenStore::new();
        assert!(store.revoke_once("jti", Duration::from_secs(5)).await.unwrap());
        assert!(!store.revoke_once("jti", Duration::from_secs(5)).await.unwrap());
        assert!(store.is_revoked("jti").await.unwrap());
    }

    #[tokio::test]
    async fn unrevoke_clears_marker() {
        let store = MemoryTokenStore::new();
        store.revoke("jti", Duration::from_secs(5)).await.unwrap();
        store.unrevoke("jti").await.unwrap();
        assert!(!store.is_revoked("jti").await.unwrap());
    }

    #[tokio::test]
    async fn reset_token_is_single_use() {
        let store = MemoryTokenStore::new();
        store
            .put_reset_token("tok", "user-1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.consume_reset_token("tok").await.unwrap(), "user-1");
        assert_eq!(
            store.consume_reset_token("tok").await,
            Err(StoreError::InvalidResetToken)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_reset_token_is_invalid() {
        let store = MemoryTokenStore::new();
        store
            .put_reset_token("tok", "user-1", Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            store.consume_reset_token("tok").await,
            Err(StoreError::InvalidResetToken)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn writes_drop_expired_entries() {
        let store = MemoryTokenStore::new();
        for i in 0..10 {
            store.revoke(&format!("old-{i}"), Duration::from_secs(5)).await.unwrap();
        }
        assert_eq!(store.entries.len(), 10);

        tokio::time::advance(Duration::from_secs(6)).await;
        store.revoke("fresh", Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.entries.len(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.revoke_once("other", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.entries.len(), 1);
    }

    #[tokio::test]
    async fn huge_ttl_does_not_overflow_the_clock() {
        let store = MemoryTokenStore::new();
        store.revoke("jti", Duration::MAX).await.unwrap();
        assert!(store.revoke_once("other", Duration::MAX).await.unwrap());
        assert!(store.is_revoked("jti").await.unwrap());
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let store = MemoryTokenStore::new();
        store.set_available(false);
        assert!(matches!(
            store.is_revoked("jti").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.revoke("jti", Duration::from_secs(1)).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.consume_reset_token("tok").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
