//! Persisting sink for job-run log records.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use super::context;
use super::record::{ExceptionInfo, LogEntry, LogLevel, LogRecord};
use crate::error::ErrorKind;
use crate::store::{JobStore, StoreError};

/// Errors raised when emitting a job log record.
#[derive(Debug, Error)]
pub enum LogError {
    /// Emission outside of a job execution; the record would be untagged.
    #[error("no job context: log records can only be emitted while a job run executes")]
    NoContext,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LogError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Writes log records tagged with the current job run to the job store.
///
/// Every record is also mirrored to `tracing` at the matching level.
#[derive(Clone)]
pub struct JobLog {
    store: Arc<dyn JobStore>,
}

impl JobLog {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Tag `entry` with the current job context and persist it.
    pub async fn emit(&self, entry: LogEntry) -> Result<LogRecord, LogError> {
        let tag = context::current().ok_or(LogError::NoContext)?;
        let record = entry.into_record(tag, Utc::now());
        mirror(&record);
        self.store.insert_log(&record).await?;
        Ok(record)
    }

    #[track_caller]
    pub fn debug(
        &self,
        message: impl Into<String>,
    ) -> impl Future<Output = Result<LogRecord, LogError>> {
        self.emit(LogEntry::new(LogLevel::Debug, message))
    }

    #[track_caller]
    pub fn info(
        &self,
        message: impl Into<String>,
    ) -> impl Future<Output = Result<LogRecord, LogError>> {
        self.emit(LogEntry::new(LogLevel::Info, message))
    }

    #[track_caller]
    pub fn warning(
        &self,
        message: impl Into<String>,
    ) -> impl Future<Output = Result<LogRecord, LogError>> {
        self.emit(LogEntry::new(LogLevel::Warning, message))
    }

    #[track_caller]
    pub fn error(
        &self,
        message: impl Into<String>,
    ) -> impl Future<Output = Result<LogRecord, LogError>> {
        self.emit(LogEntry::new(LogLevel::Error, message))
    }

    #[track_caller]
    pub fn critical(
        &self,
        message: impl Into<String>,
    ) -> impl Future<Output = Result<LogRecord, LogError>> {
        self.emit(LogEntry::new(LogLevel::Critical, message))
    }

    /// Error-level record carrying captured failure details.
    #[track_caller]
    pub fn exception(
        &self,
        message: impl Into<String>,
        info: ExceptionInfo,
    ) -> impl Future<Output = Result<LogRecord, LogError>> {
        self.emit(LogEntry::new(LogLevel::Error, message).exception(info))
    }
}

impl std::fmt::Debug for JobLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLog").finish()
    }
}

fn mirror(record: &LogRecord) {
    let exc_class = record.exception.as_ref().map(|e| e.class.as_str());
    match record.level {
        LogLevel::Debug => tracing::debug!(
            job_id = %record.job_id,
            job_run_id = %record.job_run_id,
            source = %record.target,
            "{}", record.message
        ),
        LogLevel::Info => tracing::info!(
            job_id = %record.job_id,
            job_run_id = %record.job_run_id,
            source = %record.target,
            "{}", record.message
        ),
        LogLevel::Warning => tracing::warn!(
            job_id = %record.job_id,
            job_run_id = %record.job_run_id,
            source = %record.target,
            "{}", record.message
        ),
        LogLevel::Error | LogLevel::Critical => tracing::error!(
            job_id = %record.job_id,
            job_run_id = %record.job_run_id,
            source = %record.target,
            level = %record.level,
            exception = ?exc_class,
            "{}", record.message
        ),
    }
}
