//! Runtime context shared by the binary, workers and tests.
//!
//! Owns the stores, the loaded plugins and the job runner. Nothing in the
//! kernel is process-global; everything is reached through a `Runtime`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use redis::Client as RedisClient;
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::jobs::{Dispatch, JobRunner, MemoryQueue, Queue, RedisQueue, RunnerRegistry, Worker};
use crate::joblog::{LogRetentionSweeper, RetentionPolicy};
use crate::lock::{self, AdvisoryLock, MemoryLock, RECONCILE_LOCK_KEY, RECONCILE_LOCK_TTL, RedisLock};
use crate::plugin::{
    PluginContext, PluginError, PluginHost, PluginManager, PluginRegistry, PluginStatus,
    ReconcileReport, status,
};
use crate::store::{JobStore, KeyValueStore, MemoryStore, PgStore};

/// Cheaply clonable handle to the kernel's services.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    kv: Arc<dyn KeyValueStore>,
    job_store: Arc<dyn JobStore>,
    lock: Arc<dyn AdvisoryLock>,
    registry: PluginRegistry,
    ctx: PluginContext,
    plugins: PluginManager,
    jobs: JobRunner,
    host: PluginHost,
    sweeper: LogRetentionSweeper,
    queue: Option<(Arc<dyn Queue>, String)>,
    lock_wait: Duration,
    worker_poll: Duration,
    log_cleanup_interval: Duration,
}

impl Runtime {
    /// A builder preset with in-memory collaborators and eager job dispatch.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Build the production stack: PostgreSQL stores, Redis queue and lock.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = db::create_pool(config).await?;
        db::run_migrations(&pool).await?;
        let store = Arc::new(PgStore::new(pool));

        let redis = RedisClient::open(config.redis_url.as_str())
            .context("failed to create Redis client")?;
        let queue: Arc<dyn Queue> = Arc::new(RedisQueue::new(redis.clone()));

        let runtime = Self::builder()
            .stores(store.clone(), store)
            .lock(Arc::new(RedisLock::new(redis)))
            .queue(queue, &config.job_queue)
            .plugins(config.plugins.clone())
            .site_url(&config.site_url)
            .lock_wait(config.reconcile_lock_wait)
            .worker_poll(config.worker_poll)
            .log_cleanup_interval(config.log_cleanup_interval)
            .build()
            .context("failed to load plugins")?;

        info!(plugins = runtime.plugins().len(), "runtime connected");
        Ok(runtime)
    }

    /// Reconcile plugin state under the advisory lock. Must complete before
    /// the service handles requests.
    pub async fn start(&self) -> Result<ReconcileReport> {
        let inner = &self.inner;
        let token = lock::acquire(
            inner.lock.as_ref(),
            RECONCILE_LOCK_KEY,
            RECONCILE_LOCK_TTL,
            inner.lock_wait,
        )
        .await
        .context("failed to acquire reconciliation lock")?;

        let result = inner.plugins.reconcile(&inner.registry, &inner.ctx).await;

        if let Err(e) = inner.lock.release(&token).await {
            warn!(error = %e, "failed to release reconciliation lock");
        }
        Ok(result?)
    }

    /// Uninstall a plugin that was removed from configuration. Returns
    /// whether its `uninstall` callback ran.
    pub async fn uninstall_plugin(&self, name: &str) -> Result<bool> {
        let inner = &self.inner;
        let token = lock::acquire(
            inner.lock.as_ref(),
            RECONCILE_LOCK_KEY,
            RECONCILE_LOCK_TTL,
            inner.lock_wait,
        )
        .await
        .context("failed to acquire reconciliation lock")?;

        let result = inner.plugins.uninstall(&inner.registry, &inner.ctx, name).await;

        if let Err(e) = inner.lock.release(&token).await {
            warn!(error = %e, "failed to release reconciliation lock");
        }
        Ok(result?)
    }

    /// Persisted status of every configured plugin.
    pub async fn plugin_status(&self) -> Result<Vec<PluginStatus>, PluginError> {
        status::plugin_status(self.inner.kv.as_ref(), &self.inner.plugins.names()).await
    }

    /// A queue worker, if jobs are dispatched through a queue.
    pub fn worker(&self) -> Option<Worker> {
        let (queue, name) = self.inner.queue.as_ref()?;
        Some(
            Worker::new(
                self.inner.jobs.clone(),
                queue.clone(),
                name.clone(),
                self.inner.worker_poll,
            )
            .with_sweeper(self.inner.sweeper.clone(), self.inner.log_cleanup_interval),
        )
    }

    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.kv
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.inner.job_store
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.inner.plugins
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.inner.registry
    }

    pub fn context(&self) -> &PluginContext {
        &self.inner.ctx
    }

    pub fn jobs(&self) -> &JobRunner {
        &self.inner.jobs
    }

    /// Routes and tasks declared by plugins during setup.
    pub fn host(&self) -> &PluginHost {
        &self.inner.host
    }

    pub fn sweeper(&self) -> &LogRetentionSweeper {
        &self.inner.sweeper
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("plugins", &self.inner.plugins.names())
            .field("queue", &self.inner.queue.as_ref().map(|(_, name)| name))
            .finish()
    }
}

/// Assembles a [`Runtime`] from arbitrary collaborators.
pub struct RuntimeBuilder {
    kv: Arc<dyn KeyValueStore>,
    job_store: Arc<dyn JobStore>,
    lock: Arc<dyn AdvisoryLock>,
    registry: Option<PluginRegistry>,
    plugins: Vec<String>,
    site_url: String,
    queue: Option<(Arc<dyn Queue>, String)>,
    retention: RetentionPolicy,
    lock_wait: Duration,
    worker_poll: Duration,
    log_cleanup_interval: Duration,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            kv: store.clone(),
            job_store: store,
            lock: Arc::new(MemoryLock::new()),
            registry: None,
            plugins: Vec::new(),
            site_url: "http://localhost:8080".to_string(),
            queue: None,
            retention: RetentionPolicy::default(),
            lock_wait: Duration::from_secs(60),
            worker_poll: Duration::from_secs(5),
            log_cleanup_interval: Duration::from_secs(3600),
        }
    }
}

impl RuntimeBuilder {
    pub fn stores(mut self, kv: Arc<dyn KeyValueStore>, jobs: Arc<dyn JobStore>) -> Self {
        self.kv = kv;
        self.job_store = jobs;
        self
    }

    pub fn lock(mut self, lock: Arc<dyn AdvisoryLock>) -> Self {
        self.lock = lock;
        self
    }

    /// Plugin registry to build from. Defaults to the bundled plugins.
    pub fn registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Configured plugin references, in dispatch order.
    pub fn plugins(mut self, names: Vec<String>) -> Self {
        self.plugins = names;
        self
    }

    pub fn site_url(mut self, url: &str) -> Self {
        self.site_url = url.to_string();
        self
    }

    /// Dispatch `apply_async` through `queue` instead of running eagerly.
    pub fn queue(mut self, queue: Arc<dyn Queue>, name: &str) -> Self {
        self.queue = Some((queue, name.to_string()));
        self
    }

    /// Dispatch through a fresh in-process queue.
    pub fn memory_queue(self, name: &str) -> Self {
        self.queue(Arc::new(MemoryQueue::new()), name)
    }

    pub fn retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = policy;
        self
    }

    pub fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn worker_poll(mut self, poll: Duration) -> Self {
        self.worker_poll = poll;
        self
    }

    pub fn log_cleanup_interval(mut self, interval: Duration) -> Self {
        self.log_cleanup_interval = interval;
        self
    }

    /// Load the configured plugins and run their setup.
    pub fn build(self) -> Result<Runtime, PluginError> {
        let runners = Arc::new(RunnerRegistry::new());
        let dispatch = match &self.queue {
            Some((queue, name)) => Dispatch::Queue {
                queue: queue.clone(),
                name: name.clone(),
            },
            None => Dispatch::Eager,
        };
        let jobs = JobRunner::new(self.job_store.clone(), runners.clone(), dispatch);
        let ctx = PluginContext::new(self.kv.clone(), jobs.clone(), &self.site_url);

        let registry = match self.registry {
            Some(registry) => registry,
            None => PluginRegistry::with_builtins()?,
        };
        let plugins = PluginManager::load(&registry, &self.plugins, &ctx)?;

        let mut host = PluginHost::new(runners);
        plugins.setup(&mut host)?;

        let sweeper = LogRetentionSweeper::new(self.job_store.clone(), self.retention);

        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                kv: self.kv,
                job_store: self.job_store,
                lock: self.lock,
                registry,
                ctx,
                plugins,
                jobs,
                host,
                sweeper,
                queue: self.queue,
                lock_wait: self.lock_wait,
                worker_poll: self.worker_poll,
                log_cleanup_interval: self.log_cleanup_interval,
            }),
        })
    }
}
