//! Per-execution job identity used to tag log records.
//!
//! The identity lives in a tokio task-local, so it is scoped to one run's
//! future and never visible to unrelated concurrent executions. A spawned
//! task does not inherit it; wrap the spawned future in [`scope`] again.

use std::future::Future;

use uuid::Uuid;

tokio::task_local! {
    static CURRENT_JOB: JobTag;
}

/// Identity of the job run currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobTag {
    pub job_id: Uuid,
    pub job_run_id: Uuid,
}

/// The tag of the enclosing job execution, if any.
pub fn current() -> Option<JobTag> {
    CURRENT_JOB.try_with(|tag| *tag).ok()
}

/// Run `fut` with `tag` as the current job identity.
pub async fn scope<F: Future>(tag: JobTag, fut: F) -> F::Output {
    CURRENT_JOB.scope(tag, fut).await
}
