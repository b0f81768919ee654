//! Persistence collaborators.
//!
//! Two stores back the kernel: a JSON key-value store used for plugin
//! bookkeeping and a job store owning jobs, runs and run logs. Both are
//! traits so the runtime can be assembled over PostgreSQL or in memory.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::jobs::{Job, JobRun};
use crate::joblog::{LogLevel, LogRecord};

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Durable string-keyed map of JSON values with insert-or-update writes.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value stored under `key`, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Insert or replace the value under `key`.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// All keys, sorted.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// All entries, sorted by key.
    async fn entries(&self) -> Result<Vec<(String, Value)>, StoreError>;
}

/// Storage for jobs, their runs and the runs' log records.
///
/// Every read goes to the backend; callers must not cache rows.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Delete a job with its runs and logs (logs first, then runs, then the
    /// job). Returns whether the job existed.
    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn insert_run(&self, run: &JobRun) -> Result<(), StoreError>;

    /// Mark an unfinished run finished. Returns `false` if the run does not
    /// exist or was already finished; a finished run is never rewritten.
    async fn finish_run(
        &self,
        id: Uuid,
        end_time: DateTime<Utc>,
        success: bool,
    ) -> Result<bool, StoreError>;

    /// Record progress on an unfinished run.
    async fn update_progress(&self, id: Uuid, current: i64, total: i64)
    -> Result<bool, StoreError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<JobRun>, StoreError>;

    /// Runs of a job, oldest first.
    async fn list_runs(&self, job_id: Uuid) -> Result<Vec<JobRun>, StoreError>;

    /// Delete a run and its logs. Returns whether the run existed.
    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn insert_log(&self, record: &LogRecord) -> Result<(), StoreError>;

    /// Log records of a run, in emission order.
    async fn list_logs(&self, run_id: Uuid) -> Result<Vec<LogRecord>, StoreError>;

    /// Delete records of exactly `level` created before `before`.
    async fn delete_logs_at_level(
        &self,
        level: LogLevel,
        before: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Delete records of any level created before `before`.
    async fn delete_logs_before(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}
