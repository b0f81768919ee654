//! Job and job-run records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A persisted unit of deferred work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID.
    pub id: Uuid,

    /// When the job was created.
    pub ctime: DateTime<Utc>,

    /// Runner reference, `<namespace>:<identifier>`.
    pub runner: String,

    /// Positional arguments handed to the runner.
    #[serde(default)]
    pub args: Vec<Value>,

    /// Keyword arguments handed to the runner.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Job {
    /// Build a new job definition with a fresh ID and the current time.
    pub fn new(runner: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            id: Uuid::now_v7(),
            ctime: Utc::now(),
            runner: runner.into(),
            args,
            kwargs,
        }
    }

    /// The configuration a runner is constructed from.
    pub fn spec(&self) -> JobSpec {
        JobSpec {
            job_id: self.id,
            args: self.args.clone(),
            kwargs: self.kwargs.clone(),
        }
    }
}

/// Persisted job configuration handed to a runner factory.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub job_id: Uuid,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl JobSpec {
    /// Positional argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Keyword argument by name, if present.
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }
}

/// One execution attempt of a [`Job`].
///
/// A run row is created already started; `finished` and `success` are
/// written together exactly once, after which the row is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub started: bool,
    pub finished: bool,
    pub success: Option<bool>,
    pub progress_current: Option<i64>,
    pub progress_total: Option<i64>,
}

impl JobRun {
    /// A freshly started run for `job_id`.
    pub fn started(job_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id,
            start_time: Utc::now(),
            end_time: None,
            started: true,
            finished: false,
            success: None,
            progress_current: None,
            progress_total: None,
        }
    }

    /// Where this run sits in its lifecycle.
    pub fn state(&self) -> RunState {
        match (self.finished, self.success) {
            (true, Some(true)) => RunState::Succeeded,
            (true, _) => RunState::Failed,
            (false, _) => RunState::Running,
        }
    }
}

/// Lifecycle state of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Started, not yet finished.
    Running,

    /// Finished, runner returned normally.
    Succeeded,

    /// Finished, runner failed or panicked.
    Failed,
}

/// Aggregate status of a job as seen through its most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// No run has started yet.
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl From<RunState> for JobStatus {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Running => JobStatus::Running,
            RunState::Succeeded => JobStatus::Succeeded,
            RunState::Failed => JobStatus::Failed,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        })
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.pad("pending"),
            JobStatus::Running => RunState::Running.fmt(f),
            JobStatus::Succeeded => RunState::Succeeded.fmt(f),
            JobStatus::Failed => RunState::Failed.fmt(f),
        }
    }
}
