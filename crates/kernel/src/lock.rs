//! Advisory lock serialising startup reconciliation across processes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::Client as RedisClient;
use thiserror::Error;
use tracing::debug;

/// Default lock key for plugin reconciliation.
pub const RECONCILE_LOCK_KEY: &str = "datacat:reconcile:lock";

/// How long a held lock survives a crashed holder.
pub const RECONCILE_LOCK_TTL: Duration = Duration::from_secs(300);

const RETRY_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {0:?} waiting for lock '{1}'")]
    Timeout(Duration, String),

    #[error("lock backend error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

/// Proof of holding a lock; pass back to `release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub key: String,
    pub value: String,
}

#[async_trait]
pub trait AdvisoryLock: Send + Sync {
    /// Take the lock if free. `None` when another holder has it.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, LockError>;

    /// Release the lock if `token` still owns it.
    async fn release(&self, token: &LockToken) -> Result<(), LockError>;
}

/// Retry `try_acquire` until it succeeds or `wait` elapses.
pub async fn acquire(
    lock: &dyn AdvisoryLock,
    key: &str,
    ttl: Duration,
    wait: Duration,
) -> Result<LockToken, LockError> {
    let deadline = Instant::now() + wait;
    loop {
        if let Some(token) = lock.try_acquire(key, ttl).await? {
            return Ok(token);
        }
        if Instant::now() >= deadline {
            return Err(LockError::Timeout(wait, key.to_string()));
        }
        debug!(key = %key, "lock held elsewhere, waiting");
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

/// Identifies this process as a lock holder.
fn holder_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{host}:{}", std::process::id())
}

/// Lock value unique to one acquisition.
fn token_value() -> String {
    format!("{}:{}", holder_id(), uuid::Uuid::now_v7())
}

/// Redis lock: `SET NX EX` to take, compare-and-delete to release.
pub struct RedisLock {
    redis: RedisClient,
}

impl RedisLock {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl AdvisoryLock for RedisLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, LockError> {
        let value = token_value();

        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .context("failed to get Redis connection")?;

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .context("failed to acquire lock")?;

        Ok(result.map(|_| LockToken {
            key: key.to_string(),
            value,
        }))
    }

    async fn release(&self, token: &LockToken) -> Result<(), LockError> {
        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .context("failed to get Redis connection")?;

        redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(&token.key)
            .arg(&token.value)
            .invoke_async::<()>(&mut conn)
            .await
            .context("failed to release lock")?;

        debug!(key = %token.key, "released lock");
        Ok(())
    }
}

impl std::fmt::Debug for RedisLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLock").finish()
    }
}

/// Release only if the stored value is still ours.
const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// In-process lock with TTL expiry.
#[derive(Debug, Default)]
pub struct MemoryLock {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdvisoryLock for MemoryLock {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, LockError> {
        let mut held = self.held.lock();
        let now = Instant::now();
        if let Some((_, expires)) = held.get(key)
            && *expires > now
        {
            return Ok(None);
        }
        let value = token_value();
        held.insert(key.to_string(), (value.clone(), now + ttl));
        Ok(Some(LockToken {
            key: key.to_string(),
            value,
        }))
    }

    async fn release(&self, token: &LockToken) -> Result<(), LockError> {
        let mut held = self.held.lock();
        if held.get(&token.key).is_some_and(|(v, _)| *v == token.value) {
            held.remove(&token.key);
        }
        Ok(())
    }
}
