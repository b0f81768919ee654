//! Queues carrying job ids from `apply_async` to workers.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{AsyncCommands, Client as RedisClient};
use tokio::sync::Notify;
use tracing::debug;

/// A named FIFO queue of string payloads.
#[async_trait]
pub trait Queue: Send + Sync {
    /// Push an item onto the queue.
    async fn push(&self, queue: &str, item: &str) -> Result<()>;

    /// Pop an item, waiting up to `timeout`. A zero timeout does not block.
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>>;

    /// Get the number of items in the queue.
    async fn len(&self, queue: &str) -> Result<u64>;

    /// Check if the queue is empty.
    async fn is_empty(&self, queue: &str) -> Result<bool> {
        Ok(self.len(queue).await? == 0)
    }
}

/// Redis list queue (RPUSH / BLPOP).
pub struct RedisQueue {
    redis: RedisClient,
}

impl RedisQueue {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    fn queue_key(&self, queue: &str) -> String {
        format!("queue:{queue}")
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn push(&self, queue: &str, item: &str) -> Result<()> {
        let key = self.queue_key(queue);

        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .context("failed to get Redis connection")?;

        conn.rpush::<_, _, ()>(&key, item)
            .await
            .context("failed to push to queue")?;

        debug!(queue = %queue, "pushed job onto queue");
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let key = self.queue_key(queue);

        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .context("failed to get Redis connection")?;

        let result: Option<(String, String)> = if timeout.is_zero() {
            conn.lpop(&key, None)
                .await
                .map(|v: Option<String>| v.map(|s| (key.clone(), s)))
                .context("failed to pop from queue")?
        } else {
            conn.blpop(&key, timeout.as_secs_f64())
                .await
                .context("failed to pop from queue")?
        };

        Ok(result.map(|(_, value)| value))
    }

    async fn len(&self, queue: &str) -> Result<u64> {
        let key = self.queue_key(queue);

        let mut conn = self
            .redis
            .get_multiplexed_async_connection()
            .await
            .context("failed to get Redis connection")?;

        let len: u64 = conn.llen(&key).await.context("failed to get queue length")?;
        Ok(len)
    }
}

impl std::fmt::Debug for RedisQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisQueue").finish()
    }
}

/// In-process queue. Blocking pops wake on push.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_pop(&self, queue: &str) -> Option<String> {
        self.queues.lock().get_mut(queue).and_then(|q| q.pop_front())
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn push(&self, queue: &str, item: &str) -> Result<()> {
        self.queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(item.to_string());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop(queue) {
                return Ok(Some(item));
            }
            if timeout.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.try_pop(queue));
            }
        }
    }

    async fn len(&self, queue: &str) -> Result<u64> {
        Ok(self.queues.lock().get(queue).map_or(0, |q| q.len() as u64))
    }
}
