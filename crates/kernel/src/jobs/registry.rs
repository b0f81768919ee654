//! Static registry of job runners, keyed by reference string.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::error::JobError;
use super::failure::JobFailure;
use super::types::JobSpec;
use crate::joblog::{JobLog, JobTag};
use crate::reference::{InvalidReference, Reference};
use crate::store::{JobStore, StoreError};

/// An executable job body, constructed from a job's persisted arguments.
#[async_trait]
pub trait JobRunnable: Send {
    async fn run(self: Box<Self>, ctx: JobContext) -> Result<(), JobFailure>;
}

/// Builds a runnable from a job's persisted configuration.
pub type RunnerFactory =
    Arc<dyn Fn(JobSpec) -> Result<Box<dyn JobRunnable>, JobFailure> + Send + Sync>;

/// What a runner body sees of the run it executes in.
#[derive(Clone)]
pub struct JobContext {
    tag: JobTag,
    log: JobLog,
    store: Arc<dyn JobStore>,
}

impl JobContext {
    pub(crate) fn new(tag: JobTag, log: JobLog, store: Arc<dyn JobStore>) -> Self {
        Self { tag, log, store }
    }

    pub fn job_id(&self) -> Uuid {
        self.tag.job_id
    }

    pub fn run_id(&self) -> Uuid {
        self.tag.job_run_id
    }

    /// Log sink tagged with this run.
    pub fn log(&self) -> &JobLog {
        &self.log
    }

    /// Report progress on this run.
    pub async fn progress(&self, current: i64, total: i64) -> Result<(), StoreError> {
        self.store
            .update_progress(self.tag.job_run_id, current, total)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext").field("tag", &self.tag).finish()
    }
}

struct FnRunnable<F> {
    body: Arc<F>,
    spec: JobSpec,
}

#[async_trait]
impl<F, Fut> JobRunnable for FnRunnable<F>
where
    F: Fn(JobContext, JobSpec) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobFailure>> + Send + 'static,
{
    async fn run(self: Box<Self>, ctx: JobContext) -> Result<(), JobFailure> {
        let FnRunnable { body, spec } = *self;
        body(ctx, spec).await
    }
}

/// Reference string to runner factory.
#[derive(Default)]
pub struct RunnerRegistry {
    factories: RwLock<HashMap<String, RunnerFactory>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `reference`, replacing any previous one.
    pub fn register(&self, reference: &str, factory: RunnerFactory) -> Result<(), InvalidReference> {
        let reference = Reference::parse(reference)?;
        debug!(runner = %reference, "registered job runner");
        self.factories.write().insert(reference.into(), factory);
        Ok(())
    }

    /// Register an async function as a runner.
    pub fn register_fn<F, Fut>(&self, reference: &str, body: F) -> Result<(), InvalidReference>
    where
        F: Fn(JobContext, JobSpec) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobFailure>> + Send + 'static,
    {
        let body = Arc::new(body);
        let factory: RunnerFactory = Arc::new(move |spec| {
            Ok(Box::new(FnRunnable {
                body: body.clone(),
                spec,
            }) as Box<dyn JobRunnable>)
        });
        self.register(reference, factory)
    }

    /// Look up the factory for `reference`.
    pub fn resolve(&self, reference: &str) -> Result<RunnerFactory, JobError> {
        Reference::parse(reference)?;
        self.factories
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| JobError::UnknownRunner(reference.to_string()))
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.factories.read().contains_key(reference)
    }

    /// Registered references, sorted.
    pub fn references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.factories.read().keys().cloned().collect();
        refs.sort();
        refs
    }
}

impl std::fmt::Debug for RunnerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerRegistry")
            .field("runners", &self.references())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn register_validates_reference() {
        let registry = RunnerRegistry::new();
        let err = registry
            .register_fn("no_separator", |_, _| async { Ok(()) })
            .unwrap_err();
        assert_eq!(err, InvalidReference("no_separator".into()));
        assert!(registry.references().is_empty());
    }

    #[test]
    fn resolve_distinguishes_invalid_from_unknown() {
        let registry = RunnerRegistry::new();
        registry
            .register_fn("pkg:Known", |_, _| async { Ok(()) })
            .unwrap();

        assert!(registry.resolve("pkg:Known").is_ok());
        assert!(matches!(
            registry.resolve("pkg:Missing"),
            Err(JobError::UnknownRunner(r)) if r == "pkg:Missing"
        ));
        assert!(matches!(
            registry.resolve("pkg.Missing"),
            Err(JobError::InvalidReference(_))
        ));
    }

    #[test]
    fn references_are_sorted() {
        let registry = RunnerRegistry::new();
        registry.register_fn("b:two", |_, _| async { Ok(()) }).unwrap();
        registry.register_fn("a:one", |_, _| async { Ok(()) }).unwrap();
        assert_eq!(registry.references(), vec!["a:one", "b:two"]);
        assert!(registry.contains("a:one"));
    }
}
