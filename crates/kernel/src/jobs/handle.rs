//! Deferred handles for observing scheduled jobs.

use uuid::Uuid;

use super::error::JobError;
use super::runner::JobRunner;
use super::types::{Job, JobRun, JobStatus, RunState};
use crate::joblog::LogRecord;

/// Returned by `apply_async`. Holds only the job id; every query goes to
/// the store.
#[derive(Debug, Clone)]
pub struct JobHandle {
    jobs: JobRunner,
    job_id: Uuid,
}

impl JobHandle {
    pub(crate) fn new(jobs: JobRunner, job_id: Uuid) -> Self {
        Self { jobs, job_id }
    }

    pub fn id(&self) -> Uuid {
        self.job_id
    }

    pub async fn job_def(&self) -> Result<Job, JobError> {
        self.jobs.get_job_def(self.job_id).await
    }

    /// All runs so far, oldest first.
    pub async fn runs(&self) -> Result<Vec<JobRunHandle>, JobError> {
        let runs = self.jobs.list_job_runs(self.job_id).await?;
        Ok(runs.into_iter().map(|r| self.jobs.run_handle(r)).collect())
    }

    pub async fn latest_run(&self) -> Result<Option<JobRunHandle>, JobError> {
        Ok(self.runs().await?.pop())
    }

    /// `Pending` until a run has started, then the latest run's state.
    pub async fn get_status(&self) -> Result<JobStatus, JobError> {
        self.jobs.get_job_status(self.job_id).await
    }
}

/// A snapshot of one run. `get_status` answers from the snapshot;
/// `update` refreshes it from the store.
#[derive(Debug, Clone)]
pub struct JobRunHandle {
    jobs: JobRunner,
    run: JobRun,
}

impl JobRunHandle {
    pub(crate) fn new(jobs: JobRunner, run: JobRun) -> Self {
        Self { jobs, run }
    }

    pub fn id(&self) -> Uuid {
        self.run.id
    }

    pub fn run(&self) -> &JobRun {
        &self.run
    }

    pub fn get_status(&self) -> RunState {
        self.run.state()
    }

    /// Re-read the run and return its current state.
    pub async fn update(&mut self) -> Result<RunState, JobError> {
        self.run = self.jobs.get_job_run(self.run.id).await?;
        Ok(self.run.state())
    }

    pub async fn get_logs(&self) -> Result<Vec<LogRecord>, JobError> {
        self.jobs.list_run_logs(self.run.id).await
    }
}
