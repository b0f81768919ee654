//! What plugins are built with and what they declare during setup.

use std::future::Future;
use std::sync::Arc;

use crate::jobs::{JobContext, JobFailure, JobRunner, JobSpec, RunnerFactory, RunnerRegistry};
use crate::reference::{InvalidReference, Reference};
use crate::store::KeyValueStore;

/// Prefix the HTTP layer mounts plugin routes under.
pub const API_PREFIX: &str = "/api/1";

/// Services handed to plugin factories.
#[derive(Clone)]
pub struct PluginContext {
    pub store: Arc<dyn KeyValueStore>,
    pub jobs: JobRunner,
    /// Public base URL, without trailing slash.
    pub site_url: String,
}

impl PluginContext {
    pub fn new(store: Arc<dyn KeyValueStore>, jobs: JobRunner, site_url: &str) -> Self {
        Self {
            store,
            jobs,
            site_url: site_url.trim_end_matches('/').to_string(),
        }
    }

    /// Absolute URL for an API path.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.site_url)
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("site_url", &self.site_url)
            .finish()
    }
}

/// A route a plugin asks the HTTP layer to mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecl {
    pub plugin: String,
    pub method: String,
    pub path: String,
}

/// A job runner a plugin registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDecl {
    pub plugin: String,
    pub reference: String,
}

/// Collects routes and tasks while plugins run `setup`.
#[derive(Debug)]
pub struct PluginHost {
    current: String,
    routes: Vec<RouteDecl>,
    tasks: Vec<TaskDecl>,
    runners: Arc<RunnerRegistry>,
}

impl PluginHost {
    pub fn new(runners: Arc<RunnerRegistry>) -> Self {
        Self {
            current: String::new(),
            routes: Vec::new(),
            tasks: Vec::new(),
            runners,
        }
    }

    /// Attribute following declarations to `plugin`.
    pub(crate) fn begin(&mut self, plugin: &str) {
        self.current = plugin.to_string();
    }

    /// Declare a route; `path` is relative to the API prefix.
    pub fn add_route(&mut self, method: &str, path: &str) -> &mut Self {
        self.routes.push(RouteDecl {
            plugin: self.current.clone(),
            method: method.to_ascii_uppercase(),
            path: format!("{API_PREFIX}{path}"),
        });
        self
    }

    /// Register an async function as a job runner.
    pub fn add_task<F, Fut>(&mut self, reference: &str, body: F) -> Result<(), InvalidReference>
    where
        F: Fn(JobContext, JobSpec) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobFailure>> + Send + 'static,
    {
        self.runners.register_fn(reference, body)?;
        self.record_task(reference)
    }

    /// Register a runner factory.
    pub fn add_task_factory(
        &mut self,
        reference: &str,
        factory: RunnerFactory,
    ) -> Result<(), InvalidReference> {
        self.runners.register(reference, factory)?;
        self.record_task(reference)
    }

    fn record_task(&mut self, reference: &str) -> Result<(), InvalidReference> {
        let reference = Reference::parse(reference)?;
        self.tasks.push(TaskDecl {
            plugin: self.current.clone(),
            reference: reference.into(),
        });
        Ok(())
    }

    pub fn routes(&self) -> &[RouteDecl] {
        &self.routes
    }

    pub fn tasks(&self) -> &[TaskDecl] {
        &self.tasks
    }

    pub fn runners(&self) -> &Arc<RunnerRegistry> {
        &self.runners
    }
}
