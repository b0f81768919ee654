//! Background jobs.
//!
//! A [`Job`] is a persisted runner reference plus arguments. Each call to
//! [`JobRunner::start_job`] records one [`JobRun`], executes the runner with
//! the run's identity in the log context, and always marks the run finished
//! with a success flag, whether the runner returned, failed or panicked.

mod error;
mod failure;
mod handle;
mod queue;
mod registry;
mod runner;
mod types;
mod worker;

pub use error::JobError;
pub use failure::JobFailure;
pub use handle::{JobHandle, JobRunHandle};
pub use queue::{MemoryQueue, Queue, RedisQueue};
pub use registry::{JobContext, JobRunnable, RunnerFactory, RunnerRegistry};
pub use runner::{Dispatch, JobRunner, RunOutcome, Task};
pub use types::{Job, JobRun, JobSpec, JobStatus, RunState};
pub use worker::Worker;
