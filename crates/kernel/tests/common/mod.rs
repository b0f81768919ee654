#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Tests run the real kernel against the in-memory store, queue and lock,
//! so no PostgreSQL or Redis instance is needed.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use datacat_kernel::plugin::{
    DatasetHook, HookRegistry, Plugin, PluginContext, PluginRegistry, UpgradeStep,
};
use datacat_kernel::store::MemoryStore;
use datacat_kernel::{Runtime, RuntimeBuilder};

/// Shared, ordered record of lifecycle callbacks and upgrade steps.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }
}

/// Test plugin that journals its callbacks.
///
/// Its dataset hooks return `{"plugin": <name>, "dataset": <id>}`.
pub struct TestPlugin {
    name: String,
    journal: Journal,
    hooks: HookRegistry,
    steps: Vec<UpgradeStep>,
    fail_install: bool,
}

impl TestPlugin {
    pub fn new(name: &str, journal: &Journal) -> Self {
        let mut hooks = HookRegistry::new();
        let plugin = name.to_string();
        hooks.on_dataset(
            &[DatasetHook::Create, DatasetHook::Update, DatasetHook::Delete],
            move |event| {
                let plugin = plugin.clone();
                async move { Ok(json!({ "plugin": plugin, "dataset": event.dataset_id() })) }
            },
        );
        Self {
            name: name.to_string(),
            journal: journal.clone(),
            hooks,
            steps: Vec::new(),
            fail_install: false,
        }
    }

    /// Add journaled upgrade steps with the given ids.
    pub fn with_steps(mut self, ids: &[u32]) -> Self {
        for &id in ids {
            let journal = self.journal.clone();
            let name = self.name.clone();
            self.steps.push(UpgradeStep::new(id, format!("step {id}"), move || {
                let journal = journal.clone();
                let name = name.clone();
                async move {
                    journal.record(format!("{name}:upgrade:{id}"));
                    Ok(())
                }
            }));
        }
        self
    }

    /// Add an upgrade step that journals its attempt and then fails.
    pub fn with_failing_step(mut self, id: u32) -> Self {
        let journal = self.journal.clone();
        let name = self.name.clone();
        self.steps.push(UpgradeStep::new(id, format!("step {id}"), move || {
            let journal = journal.clone();
            let name = name.clone();
            async move {
                journal.record(format!("{name}:upgrade:{id}"));
                Err(anyhow::anyhow!("step {id} broke"))
            }
        }));
        self
    }

    /// Replace the dataset hooks with one that always fails.
    pub fn with_failing_hook(mut self) -> Self {
        let mut hooks = HookRegistry::new();
        hooks.on_dataset(&[DatasetHook::Create], |_event| async {
            Err::<Value, _>(anyhow::anyhow!("hook exploded"))
        });
        self.hooks = hooks;
        self
    }

    /// Append `{"url": <url>}` to `metadata.resources`.
    pub fn with_metadata_link(mut self, url: &str) -> Self {
        let url = url.to_string();
        self.hooks.on_make_dataset_metadata(move |_dataset_id, _config, metadata| {
            let resources = metadata
                .entry("resources")
                .or_insert_with(|| Value::Array(Vec::new()));
            match resources.as_array_mut() {
                Some(list) => {
                    list.push(json!({ "url": url.clone() }));
                    Ok(())
                }
                None => anyhow::bail!("resources is not a list"),
            }
        });
        self
    }

    pub fn failing_install(mut self) -> Self {
        self.fail_install = true;
        self
    }

    pub fn into_dyn(self) -> Arc<dyn Plugin> {
        Arc::new(self)
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    fn upgrade_steps(&self) -> &[UpgradeStep] {
        &self.steps
    }

    async fn install(&self) -> anyhow::Result<()> {
        if self.fail_install {
            anyhow::bail!("install refused");
        }
        self.journal.record(format!("{}:install", self.name));
        Ok(())
    }

    async fn uninstall(&self) -> anyhow::Result<()> {
        self.journal.record(format!("{}:uninstall", self.name));
        Ok(())
    }

    async fn enable(&self) -> anyhow::Result<()> {
        self.journal.record(format!("{}:enable", self.name));
        Ok(())
    }

    async fn disable(&self) -> anyhow::Result<()> {
        self.journal.record(format!("{}:disable", self.name));
        Ok(())
    }
}

/// Registry with a plain [`TestPlugin`] under each name.
pub fn test_registry(journal: &Journal, names: &[&str]) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    for name in names {
        register(&mut registry, name, {
            let journal = journal.clone();
            move |name, _ctx| TestPlugin::new(name, &journal)
        });
    }
    registry
}

/// Register a [`TestPlugin`] built by `build` under `name`.
pub fn register<F>(registry: &mut PluginRegistry, name: &str, build: F)
where
    F: Fn(&str, &PluginContext) -> TestPlugin + Send + Sync + 'static,
{
    let reference = name.to_string();
    registry
        .register(name, move |ctx| Ok(build(&reference, ctx).into_dyn()))
        .unwrap();
}

/// Builder over `store` for the given registry and configured plugins.
pub fn builder(store: &Arc<MemoryStore>, registry: PluginRegistry, plugins: &[&str]) -> RuntimeBuilder {
    Runtime::builder()
        .stores(store.clone(), store.clone())
        .registry(registry)
        .plugins(plugins.iter().map(|s| s.to_string()).collect())
        .site_url("http://data.test/")
}

/// Build and reconcile a runtime, as a process start would.
pub async fn start(store: &Arc<MemoryStore>, registry: PluginRegistry, plugins: &[&str]) -> Runtime {
    let runtime = builder(store, registry, plugins).build().unwrap();
    runtime.start().await.unwrap();
    runtime
}

pub fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
