//! Redis-backed token store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{StoreError, TokenStore, reset_key, revoked_key, ttl_secs};

/// Delay before the single retry of a failed cache call.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Token store over a shared Redis instance.
#[derive(Clone)]
pub struct RedisTokenStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisTokenStore {
    /// Connect to `redis_url`, bounding the handshake by `timeout`.
    ///
    /// `timeout` also bounds every later command.
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("redis url: {e}")))?;

        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Unavailable("redis connect timed out".into()))?
            .map_err(|e| StoreError::Unavailable(format!("redis connect: {e}")))?;

        Ok(Self { conn, timeout })
    }

    /// Run `op` under the per-call timeout and the given replay policy.
    async fn run<T, F, Fut>(
        &self,
        name: &'static str,
        replay: Replay,
        mut op: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = &self.conn;
        with_retry(name, self.timeout, replay, || op(conn.clone())).await
    }
}

/// Whether a failed call may be sent a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// Repeating the command cannot change its outcome.
    Safe,
    /// Repeat only when the first attempt never reached the server.
    Unsent,
}

#[derive(Debug)]
struct Failure {
    message: String,
    unsent: bool,
}

/// Run `op` with a `timeout` per attempt, retrying once after a short pause
/// when `replay` allows it.
async fn with_retry<T, F, Fut>(
    name: &'static str,
    timeout: Duration,
    replay: Replay,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RedisResult<T>>,
{
    let first = match attempt(timeout, op()).await {
        Ok(value) => return Ok(value),
        Err(failure) => failure,
    };
    if replay == Replay::Unsent && !first.unsent {
        error!(op = name, error = %first.message, "token store call failed, not retried");
        return Err(StoreError::Unavailable(first.message));
    }

    warn!(op = name, error = %first.message, "token store call failed, retrying once");
    tokio::time::sleep(RETRY_BACKOFF).await;
    attempt(timeout, op()).await.map_err(|failure| {
        error!(op = name, error = %failure.message, "token store unavailable");
        StoreError::Unavailable(failure.message)
    })
}

async fn attempt<T>(
    timeout: Duration,
    call: impl Future<Output = RedisResult<T>>,
) -> Result<T, Failure> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Failure {
            unsent: e.is_connection_refusal(),
            message: e.to_string(),
        }),
        // The command may have run even though the reply never arrived.
        Err(_) => Err(Failure {
            message: format!("timed out after {timeout:?}"),
            unsent: false,
        }),
    }
}

/// `SET key nonce NX EX secs`, treating a key that already holds `nonce` as
/// our own earlier write.
async fn claim(
    mut conn: ConnectionManager,
    key: String,
    nonce: String,
    secs: u64,
) -> RedisResult<bool> {
    let written: Option<String> = redis::cmd("SET")
        .arg(&key)
        .arg(&nonce)
        .arg("NX")
        .arg("EX")
        .arg(secs)
        .query_async(&mut conn)
        .await?;
    if written.is_some() {
        return Ok(true);
    }
    let holder: Option<String> = conn.get(&key).await?;
    Ok(holder.as_deref() == Some(nonce.as_str()))
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn revoke(&self, token_id: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = revoked_key(token_id);
        let secs = ttl_secs(ttl);
        self.run("revoke", Replay::Safe, |mut conn| {
            let key = key.clone();
            async move { conn.set_ex::<_, _, ()>(key, 1u8, secs).await }
        })
        .await?;
        debug!(token_id, ttl_secs = secs, "token revoked");
        Ok(())
    }

    async fn revoke_once(&self, token_id: &str, ttl: Duration) -> Result<bool, StoreError> {
        let key = revoked_key(token_id);
        let secs = ttl_secs(ttl);
        // The nonce lets a retried call recognise a write whose reply was lost.
        let nonce = Uuid::new_v4().to_string();
        self.run("revoke_once", Replay::Safe, |conn| {
            claim(conn, key.clone(), nonce.clone(), secs)
        })
        .await
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool, StoreError> {
        let key = revoked_key(token_id);
        self.run("is_revoked", Replay::Safe, |mut conn| {
            let key = key.clone();
            async move { conn.exists::<_, bool>(key).await }
        })
        .await
    }

    async fn unrevoke(&self, token_id: &str) -> Result<(), StoreError> {
        let key = revoked_key(token_id);
        self.run("unrevoke", Replay::Safe, |mut conn| {
            let key = key.clone();
            async move { conn.del::<_, ()>(key).await }
        })
        .await
    }

    async fn put_reset_token(
        &self,
        token: &str,
        user_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let key = reset_key(token);
        let secs = ttl_secs(ttl);
        self.run("put_reset_token", Replay::Safe, |mut conn| {
            let key = key.clone();
            let user_id = user_id.to_string();
            async move { conn.set_ex::<_, _, ()>(key, user_id, secs).await }
        })
        .await
    }

    async fn consume_reset_token(&self, token: &str) -> Result<String, StoreError> {
        let key = reset_key(token);
        let user_id: Option<String> = self
            // GETDEL is not replayable: a lost reply already burned the token.
            .run("consume_reset_token", Replay::Unsent, |mut conn| {
                let key = key.clone();
                async move { conn.get_del::<_, Option<String>>(key).await }
            })
            .await?;
        user_id.ok_or(StoreError::InvalidResetToken)
    }
}
