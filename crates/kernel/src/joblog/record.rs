//! Structured job-run log records.

use std::fmt;
use std::panic::Location;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::context::JobTag;

/// Severity of a job log record. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warning,
        LogLevel::Error,
        LogLevel::Critical,
    ];

    /// Numeric level as stored in the `levelno` column.
    pub fn levelno(self) -> i32 {
        match self {
            LogLevel::Debug => 10,
            LogLevel::Info => 20,
            LogLevel::Warning => 30,
            LogLevel::Error => 40,
            LogLevel::Critical => 50,
        }
    }

    pub fn from_levelno(levelno: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.levelno() == levelno)
    }

    /// Upper-case level name as stored in the `levelname` column.
    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Captured failure details, kept as separate fields rather than folded
/// into the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Type name of the failure (e.g. `std::io::Error`, `panic`).
    pub class: String,
    /// `Display` rendering.
    pub message: String,
    /// `Debug` rendering.
    pub repr: String,
    /// Full cause chain, one cause per line.
    pub traceback: String,
}

/// A persisted log record, tagged with the job and run it was emitted in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub job_run_id: Uuid,
    pub created: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Logical source of the record (module path or component name).
    pub target: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub thread_id: String,
    pub thread_name: Option<String>,
    /// Free-form structured fields attached by the caller.
    #[serde(default)]
    pub fields: Map<String, Value>,
    pub exception: Option<ExceptionInfo>,
}

/// A log event that has not been tagged or persisted yet.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub target: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub fields: Map<String, Value>,
    pub exception: Option<ExceptionInfo>,
}

impl LogEntry {
    /// Start an entry, recording the caller's source location.
    #[track_caller]
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        let location = Location::caller();
        Self {
            level,
            message: message.into(),
            target: module_of(location.file()),
            file: Some(location.file().to_string()),
            line: Some(location.line()),
            fields: Map::new(),
            exception: None,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn exception(mut self, info: ExceptionInfo) -> Self {
        self.exception = Some(info);
        self
    }

    /// Tag the entry with a job context, producing a storable record.
    pub fn into_record(self, tag: JobTag, created: DateTime<Utc>) -> LogRecord {
        let thread = std::thread::current();
        LogRecord {
            id: Uuid::now_v7(),
            job_id: tag.job_id,
            job_run_id: tag.job_run_id,
            created,
            level: self.level,
            message: self.message,
            target: self.target,
            file: self.file,
            line: self.line,
            thread_id: format!("{:?}", thread.id()),
            thread_name: thread.name().map(String::from),
            fields: self.fields,
            exception: self.exception,
        }
    }
}

/// Derive a short module name from a source path (`src/jobs/runner.rs` -> `runner`).
fn module_of(file: &str) -> String {
    std::path::Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}
