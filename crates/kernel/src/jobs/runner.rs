//! Job creation, execution and bookkeeping.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::JobError;
use super::failure::JobFailure;
use super::handle::{JobHandle, JobRunHandle};
use super::queue::Queue;
use super::registry::{JobContext, RunnerRegistry};
use super::types::{Job, JobRun, JobStatus, RunState};
use crate::joblog::{self, JobLog, JobTag, LogRecord};
use crate::reference::Reference;
use crate::store::JobStore;

/// How `apply_async` gets a job executed.
#[derive(Clone)]
pub enum Dispatch {
    /// Execute immediately, before `apply_async` returns.
    Eager,

    /// Push the job id onto a queue for a worker to pick up.
    Queue { queue: Arc<dyn Queue>, name: String },
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Eager => f.write_str("Eager"),
            Dispatch::Queue { name, .. } => f.debug_struct("Queue").field("name", name).finish(),
        }
    }
}

/// Result of one `start_job` call. A failing runner is reported here,
/// not as an error.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub job_id: Uuid,
    pub run_id: Uuid,
    pub success: bool,
    pub failure: Option<JobFailure>,
}

/// Creates, runs and inspects background jobs.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<JobRunnerInner>,
}

struct JobRunnerInner {
    store: Arc<dyn JobStore>,
    runners: Arc<RunnerRegistry>,
    dispatch: Dispatch,
    log: JobLog,
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStore>, runners: Arc<RunnerRegistry>, dispatch: Dispatch) -> Self {
        let log = JobLog::new(store.clone());
        Self {
            inner: Arc::new(JobRunnerInner {
                store,
                runners,
                dispatch,
                log,
            }),
        }
    }

    pub fn runners(&self) -> &Arc<RunnerRegistry> {
        &self.inner.runners
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.inner.dispatch
    }

    /// Persist a new job definition. Only the reference format is checked;
    /// the runner is resolved when the job starts.
    pub async fn create_job(
        &self,
        runner: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Uuid, JobError> {
        let reference = Reference::parse(runner)?;
        let job = Job::new(reference, args, kwargs);
        self.inner.store.insert_job(&job).await?;
        debug!(job_id = %job.id, runner = %job.runner, "created job");
        Ok(job.id)
    }

    pub async fn get_job_def(&self, job_id: Uuid) -> Result<Job, JobError> {
        self.inner
            .store
            .get_job(job_id)
            .await?
            .ok_or(JobError::JobNotFound(job_id))
    }

    /// Delete a job together with its runs and their logs.
    pub async fn delete_job(&self, job_id: Uuid) -> Result<(), JobError> {
        if !self.inner.store.delete_job(job_id).await? {
            return Err(JobError::JobNotFound(job_id));
        }
        info!(job_id = %job_id, "deleted job");
        Ok(())
    }

    /// Runs of a job, oldest first.
    pub async fn list_job_runs(&self, job_id: Uuid) -> Result<Vec<JobRun>, JobError> {
        self.get_job_def(job_id).await?;
        Ok(self.inner.store.list_runs(job_id).await?)
    }

    pub async fn get_job_run(&self, run_id: Uuid) -> Result<JobRun, JobError> {
        self.inner
            .store
            .get_run(run_id)
            .await?
            .ok_or(JobError::RunNotFound(run_id))
    }

    pub async fn get_job_run_status(&self, run_id: Uuid) -> Result<RunState, JobError> {
        Ok(self.get_job_run(run_id).await?.state())
    }

    /// Status of a job through its most recent run.
    pub async fn get_job_status(&self, job_id: Uuid) -> Result<JobStatus, JobError> {
        let runs = self.list_job_runs(job_id).await?;
        Ok(runs
            .last()
            .map_or(JobStatus::Pending, |run| run.state().into()))
    }

    /// Delete a run and its logs.
    pub async fn delete_job_run(&self, run_id: Uuid) -> Result<(), JobError> {
        if !self.inner.store.delete_run(run_id).await? {
            return Err(JobError::RunNotFound(run_id));
        }
        info!(job_run_id = %run_id, "deleted job run");
        Ok(())
    }

    pub async fn list_run_logs(&self, run_id: Uuid) -> Result<Vec<LogRecord>, JobError> {
        self.get_job_run(run_id).await?;
        Ok(self.inner.store.list_logs(run_id).await?)
    }

    /// Record progress on an unfinished run. Returns `false` once the run
    /// has finished.
    pub async fn update_progress(
        &self,
        run_id: Uuid,
        current: i64,
        total: i64,
    ) -> Result<bool, JobError> {
        self.get_job_run(run_id).await?;
        Ok(self
            .inner
            .store
            .update_progress(run_id, current, total)
            .await?)
    }

    /// Execute a job once, recording a new run.
    ///
    /// Fails only when the job or its runner cannot be found, or the store
    /// fails. A runner that errors or panics yields `success = false` in the
    /// returned outcome and an error record in the run's log.
    pub async fn start_job(&self, job_id: Uuid) -> Result<RunOutcome, JobError> {
        let job = self.get_job_def(job_id).await?;
        let factory = self.inner.runners.resolve(&job.runner)?;

        let run = JobRun::started(job.id);
        self.inner.store.insert_run(&run).await?;
        let mut guard = RunGuard::new(self.inner.store.clone(), &run);

        let tag = JobTag {
            job_id: job.id,
            job_run_id: run.id,
        };
        info!(job_id = %job.id, job_run_id = %run.id, runner = %job.runner, "starting job run");

        let log = self.inner.log.clone();
        let ctx = JobContext::new(tag, log.clone(), self.inner.store.clone());
        let spec = job.spec();
        let runner_ref = job.runner.clone();

        let result = joblog::context::scope(tag, async move {
            if let Err(e) = log.debug(format!("Creating runner {runner_ref}")).await {
                warn!(error = %e, "failed to write job log");
            }

            let body = tokio::spawn(joblog::context::scope(tag, async move {
                let runnable = factory(spec)?;
                runnable.run(ctx).await
            }));

            let result = match body.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(JobFailure::panic(e.into_panic())),
                Err(e) => Err(JobFailure::msg(format!("runner task did not complete: {e}"))),
            };

            let logged = match &result {
                Ok(()) => log.info("Job run succeeded").await,
                Err(failure) => {
                    log.exception(format!("Job run failed: {failure}"), failure.clone().into())
                        .await
                }
            };
            if let Err(e) = logged {
                warn!(error = %e, "failed to write job log");
            }
            result
        })
        .await;

        let success = result.is_ok();
        guard.finish(success).await?;

        match &result {
            Ok(()) => info!(job_id = %job.id, job_run_id = %run.id, "job run succeeded"),
            Err(f) => warn!(
                job_id = %job.id,
                job_run_id = %run.id,
                class = %f.class,
                error = %f.message,
                "job run failed"
            ),
        }

        Ok(RunOutcome {
            job_id: job.id,
            run_id: run.id,
            success,
            failure: result.err(),
        })
    }

    /// Create a job and hand it to the dispatcher without waiting on a
    /// result. The handle observes the job later.
    ///
    /// An unknown runner is rejected before the job is stored. Once the job
    /// exists, a failed eager start is logged and the handle still returned.
    pub async fn apply_async(
        &self,
        runner: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<JobHandle, JobError> {
        self.inner.runners.resolve(runner)?;
        let job_id = self.create_job(runner, args, kwargs).await?;

        match &self.inner.dispatch {
            Dispatch::Eager => {
                if let Err(e) = self.start_job(job_id).await {
                    warn!(job_id = %job_id, error = %e, "failed to start job");
                }
            }
            Dispatch::Queue { queue, name } => {
                queue
                    .push(name, &job_id.to_string())
                    .await
                    .map_err(|e| JobError::Dispatch {
                        job_id,
                        reason: format!("{e:#}"),
                    })?;
                debug!(job_id = %job_id, queue = %name, "queued job");
            }
        }

        Ok(JobHandle::new(self.clone(), job_id))
    }

    /// A reusable handle for scheduling jobs of one runner.
    pub fn task(&self, runner: &str) -> Result<Task, JobError> {
        let reference = Reference::parse(runner)?;
        Ok(Task {
            jobs: self.clone(),
            reference,
        })
    }

    pub(crate) fn run_handle(&self, run: JobRun) -> JobRunHandle {
        JobRunHandle::new(self.clone(), run)
    }
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("dispatch", &self.inner.dispatch)
            .finish()
    }
}

/// A runner reference bound to a [`JobRunner`].
#[derive(Debug, Clone)]
pub struct Task {
    jobs: JobRunner,
    reference: Reference,
}

impl Task {
    pub fn reference(&self) -> &str {
        self.reference.as_str()
    }

    /// Schedule with positional arguments only.
    pub async fn delay(&self, args: Vec<Value>) -> Result<JobHandle, JobError> {
        self.apply_async(args, Map::new()).await
    }

    pub async fn apply_async(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<JobHandle, JobError> {
        self.jobs
            .apply_async(self.reference.as_str(), args, kwargs)
            .await
    }
}

/// Marks its run finished exactly once. If dropped before `finish`
/// succeeded (the caller was cancelled or the store write failed), a
/// background task records the run as failed.
struct RunGuard {
    store: Arc<dyn JobStore>,
    run_id: Uuid,
    start_time: chrono::DateTime<Utc>,
    pending: bool,
}

impl RunGuard {
    fn new(store: Arc<dyn JobStore>, run: &JobRun) -> Self {
        Self {
            store,
            run_id: run.id,
            start_time: run.start_time,
            pending: true,
        }
    }

    async fn finish(&mut self, success: bool) -> Result<(), JobError> {
        let end_time = Utc::now().max(self.start_time);
        let updated = self.store.finish_run(self.run_id, end_time, success).await?;
        self.pending = false;
        if !updated {
            warn!(job_run_id = %self.run_id, "job run was already finished");
        }
        Ok(())
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(job_run_id = %self.run_id, "job run left unfinished: no runtime");
            return;
        };
        let store = self.store.clone();
        let run_id = self.run_id;
        let end_time = Utc::now().max(self.start_time);
        handle.spawn(async move {
            match store.finish_run(run_id, end_time, false).await {
                Ok(_) => warn!(job_run_id = %run_id, "job run abandoned, marked failed"),
                Err(e) => warn!(job_run_id = %run_id, error = %e, "failed to mark abandoned run"),
            }
        });
    }
}
