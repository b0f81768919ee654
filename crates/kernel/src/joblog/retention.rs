//! Severity-keyed retention of job-run log records.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use super::record::{LogEntry, LogLevel, LogRecord};
use super::sink::{JobLog, LogError};
use crate::store::JobStore;

/// Maximum age per severity, plus a global cap applied to every level.
///
/// Each entry governs records of exactly its own level; levels do not
/// inherit a neighbour's policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    levels: Vec<(LogLevel, TimeDelta)>,
    global: TimeDelta,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            levels: vec![
                (LogLevel::Debug, TimeDelta::days(15)),
                (LogLevel::Info, TimeDelta::days(30)),
                (LogLevel::Warning, TimeDelta::days(90)),
                (LogLevel::Error, TimeDelta::days(180)),
                (LogLevel::Critical, TimeDelta::days(180)),
            ],
            global: TimeDelta::days(365),
        }
    }
}

impl RetentionPolicy {
    /// A policy with no per-level entries and the given global cap.
    pub fn global_only(global: TimeDelta) -> Self {
        Self {
            levels: Vec::new(),
            global,
        }
    }

    /// Set (or replace) the maximum age for `level`.
    pub fn with_level(mut self, level: LogLevel, max_age: TimeDelta) -> Self {
        match self.levels.iter_mut().find(|(l, _)| *l == level) {
            Some(entry) => entry.1 = max_age,
            None => self.levels.push((level, max_age)),
        }
        self
    }

    pub fn with_global(mut self, max_age: TimeDelta) -> Self {
        self.global = max_age;
        self
    }

    pub fn max_age(&self, level: LogLevel) -> Option<TimeDelta> {
        self.levels
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, age)| *age)
    }

    pub fn global(&self) -> TimeDelta {
        self.global
    }

    pub fn levels(&self) -> &[(LogLevel, TimeDelta)] {
        &self.levels
    }
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records deleted by each per-level pass that succeeded.
    pub deleted: Vec<(LogLevel, u64)>,

    /// Records deleted by the global cap pass.
    pub expired: u64,

    /// Passes that failed, as `pass: error` strings.
    pub failures: Vec<String>,
}

impl SweepReport {
    pub fn total(&self) -> u64 {
        self.deleted.iter().map(|(_, n)| n).sum::<u64>() + self.expired
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Persists job-run log records and purges them by age and severity.
#[derive(Clone)]
pub struct LogRetentionSweeper {
    store: Arc<dyn JobStore>,
    sink: JobLog,
    policy: RetentionPolicy,
}

impl LogRetentionSweeper {
    pub fn new(store: Arc<dyn JobStore>, policy: RetentionPolicy) -> Self {
        Self {
            sink: JobLog::new(store.clone()),
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// The sink runner bodies log through.
    pub fn sink(&self) -> &JobLog {
        &self.sink
    }

    /// Tag and persist a record for the current job run.
    pub async fn emit(&self, entry: LogEntry) -> Result<LogRecord, LogError> {
        self.sink.emit(entry).await
    }

    /// Run one sweep relative to the current time.
    pub async fn cleanup_old_messages(&self) -> SweepReport {
        self.cleanup_at(Utc::now()).await
    }

    /// Run one sweep relative to `now`.
    ///
    /// A failing pass is logged and recorded; the remaining passes still run.
    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for (level, max_age) in &self.policy.levels {
            let cutoff = now - *max_age;
            match self.store.delete_logs_at_level(*level, cutoff).await {
                Ok(count) => {
                    debug!(level = %level, deleted = count, cutoff = %cutoff, "swept job logs");
                    report.deleted.push((*level, count));
                }
                Err(e) => {
                    warn!(level = %level, error = %e, "failed to sweep job logs");
                    report.failures.push(format!("{level}: {e}"));
                }
            }
        }

        let cutoff = now - self.policy.global;
        match self.store.delete_logs_before(cutoff).await {
            Ok(count) => report.expired = count,
            Err(e) => {
                warn!(error = %e, "failed to sweep expired job logs");
                report.failures.push(format!("global: {e}"));
            }
        }

        if report.total() > 0 || !report.is_clean() {
            info!(
                deleted = report.total(),
                failures = report.failures.len(),
                "job log retention sweep finished"
            );
        }
        report
    }
}

impl std::fmt::Debug for LogRetentionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRetentionSweeper")
            .field("policy", &self.policy)
            .finish()
    }
}
