//! Queue consumer executing deferred jobs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::queue::Queue;
use super::runner::{JobRunner, RunOutcome};
use crate::joblog::LogRetentionSweeper;

/// Pops job ids from a queue and runs them one at a time, sweeping old
/// job logs on a fixed interval.
pub struct Worker {
    jobs: JobRunner,
    queue: Arc<dyn Queue>,
    queue_name: String,
    poll: Duration,
    sweep: Option<(LogRetentionSweeper, Duration)>,
}

impl Worker {
    pub fn new(
        jobs: JobRunner,
        queue: Arc<dyn Queue>,
        queue_name: impl Into<String>,
        poll: Duration,
    ) -> Self {
        Self {
            jobs,
            queue,
            queue_name: queue_name.into(),
            poll,
            sweep: None,
        }
    }

    /// Run `sweeper` every `interval` while the worker loop is running.
    pub fn with_sweeper(mut self, sweeper: LogRetentionSweeper, interval: Duration) -> Self {
        self.sweep = Some((sweeper, interval));
        self
    }

    /// Pop one job id, waiting up to the poll interval, and run it.
    ///
    /// Returns `Ok(None)` when the queue stayed empty.
    pub async fn process_next(&self) -> Result<Option<RunOutcome>> {
        let item = self
            .queue
            .pop(&self.queue_name, self.poll)
            .await
            .context("failed to pop job queue")?;

        match item {
            Some(item) => self.execute(&item).await.map(Some),
            None => Ok(None),
        }
    }

    async fn execute(&self, item: &str) -> Result<RunOutcome> {
        let job_id: Uuid = item
            .parse()
            .with_context(|| format!("queued item is not a job id: {item:?}"))?;
        let outcome = self
            .jobs
            .start_job(job_id)
            .await
            .with_context(|| format!("failed to start job {job_id}"))?;
        Ok(outcome)
    }

    /// Run until `shutdown` becomes true or its sender is dropped.
    ///
    /// Shutdown is checked between pops. A pop in flight is never cancelled,
    /// and a job it returns runs to completion first.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queue_name, "worker started");
        let mut next_sweep = Instant::now();

        loop {
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            if let Some((sweeper, interval)) = &self.sweep
                && Instant::now() >= next_sweep
            {
                let report = sweeper.cleanup_old_messages().await;
                debug!(deleted = report.total(), "periodic job log sweep");
                next_sweep = Instant::now() + *interval;
            }

            let popped = self.queue.pop(&self.queue_name, self.poll).await;

            match popped {
                Ok(Some(item)) => match self.execute(&item).await {
                    Ok(outcome) => debug!(
                        job_id = %outcome.job_id,
                        job_run_id = %outcome.run_id,
                        success = outcome.success,
                        "worker finished job"
                    ),
                    Err(e) => warn!(error = %format!("{e:#}"), "worker could not run job"),
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "failed to pop job queue");
                    tokio::time::sleep(self.poll.max(Duration::from_millis(100))).await;
                }
            }
        }

        info!(queue = %self.queue_name, "worker stopped");
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("queue", &self.queue_name)
            .field("poll", &self.poll)
            .finish()
    }
}
