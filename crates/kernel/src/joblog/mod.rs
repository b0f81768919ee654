//! Structured logging for background job runs.
//!
//! Records emitted while a job run executes are tagged with the run's
//! identity (see [`context`]), persisted as rows, and later purged by the
//! [`LogRetentionSweeper`] according to a per-severity retention policy.

pub mod context;
mod record;
mod retention;
mod sink;

pub use context::JobTag;
pub use record::{ExceptionInfo, LogEntry, LogLevel, LogRecord};
pub use retention::{LogRetentionSweeper, RetentionPolicy, SweepReport};
pub use sink::{JobLog, LogError};
