//! Active plugin set: startup reconciliation and hook fan-out.

use std::collections::HashSet;
use std::sync::Arc;

use async_stream::try_stream;
use futures_core::Stream;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::context::{PluginContext, PluginHost};
use super::error::{HookError, Lifecycle, PluginError};
use super::hooks::{DatasetEvent, Hook};
use super::plugin::Plugin;
use super::registry::PluginRegistry;
use super::status::{self, ENABLED_KEY, INSTALLED_KEY};
use super::upgrade::{self, UpgradeReport};

/// Set differences driving reconciliation. All lists keep the order of the
/// set they were drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub configured: Vec<String>,
    pub to_install: Vec<String>,
    pub to_enable: Vec<String>,
    pub to_disable: Vec<String>,
    /// Persisted enabled set afterwards: exactly the configured plugins.
    pub enabled_after: Vec<String>,
    /// Persisted installed set afterwards: never shrinks.
    pub installed_after: Vec<String>,
}

impl ReconcilePlan {
    pub fn compute(configured: &[String], installed: &[String], enabled: &[String]) -> Self {
        let minus = |a: &[String], b: &[String]| -> Vec<String> {
            a.iter().filter(|n| !b.contains(n)).cloned().collect()
        };

        let mut installed_after = installed.to_vec();
        installed_after.extend(minus(configured, installed));

        Self {
            configured: configured.to_vec(),
            to_install: minus(configured, installed),
            to_enable: minus(configured, enabled),
            to_disable: minus(enabled, configured),
            enabled_after: configured.to_vec(),
            installed_after,
        }
    }
}

/// What reconciliation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub plan: ReconcilePlan,
    pub installed: Vec<String>,
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
    /// Plugins to disable that could no longer be built; only their
    /// enabled flag was dropped.
    pub disable_skipped: Vec<String>,
    pub upgrades: Vec<UpgradeReport>,
}

/// One value returned by a hook handler.
#[derive(Debug, Clone, PartialEq)]
pub struct HookOutput {
    pub plugin: String,
    pub value: Value,
}

/// One handler's outcome under isolated dispatch.
#[derive(Debug)]
pub struct HookExecution {
    pub plugin: String,
    pub result: Option<Value>,
    pub error: Option<anyhow::Error>,
}

impl HookExecution {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Arguments of one hook invocation.
#[derive(Debug)]
pub enum HookCall<'a> {
    Dataset(DatasetEvent),
    MakeDatasetMetadata {
        dataset_id: i64,
        config: &'a Value,
        metadata: &'a mut Map<String, Value>,
    },
}

impl HookCall<'_> {
    pub fn hook(&self) -> Hook {
        match self {
            HookCall::Dataset(event) => event.hook(),
            HookCall::MakeDatasetMetadata { .. } => Hook::MakeDatasetMetadata,
        }
    }
}

/// The configured plugins, in configuration order.
///
/// Order is dispatch order: the first configured plugin's handlers run
/// first.
#[derive(Clone, Default)]
pub struct PluginManager {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginManager {
    /// Wrap already-built plugins. Names must be unique.
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Result<Self, PluginError> {
        let mut seen = HashSet::new();
        for plugin in &plugins {
            if !seen.insert(plugin.name().to_string()) {
                return Err(PluginError::DuplicatePlugin(plugin.name().to_string()));
            }
        }
        Ok(Self { plugins })
    }

    /// Instantiate each configured reference, preserving order.
    pub fn load(
        registry: &PluginRegistry,
        names: &[String],
        ctx: &PluginContext,
    ) -> Result<Self, PluginError> {
        let mut plugins = Vec::with_capacity(names.len());
        for name in names {
            let plugin = registry.instantiate(name, ctx)?;
            debug!(plugin = %name, "loaded plugin");
            plugins.push(plugin);
        }
        Self::new(plugins)
    }

    /// Let every plugin declare its routes and tasks.
    pub fn setup(&self, host: &mut PluginHost) -> Result<(), PluginError> {
        for plugin in &self.plugins {
            host.begin(plugin.name());
            plugin.setup(host).map_err(|source| PluginError::Setup {
                plugin: plugin.name().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.iter()
    }

    /// Bring persisted plugin state in line with the configured set.
    ///
    /// Each configured plugin is installed if never installed, enabled if
    /// not enabled, then upgraded. Previously enabled plugins that are no
    /// longer configured are disabled; nothing is uninstalled. The first
    /// failing callback aborts the whole pass, and the persisted sets are
    /// only written once every step succeeded.
    ///
    /// Not safe to run from two processes at once; the runtime holds an
    /// advisory lock around it.
    pub async fn reconcile(
        &self,
        registry: &PluginRegistry,
        ctx: &PluginContext,
    ) -> Result<ReconcileReport, PluginError> {
        let kv = ctx.store.as_ref();
        let configured = self.names();
        let installed = status::read_set(kv, INSTALLED_KEY).await?;
        let enabled = status::read_set(kv, ENABLED_KEY).await?;
        let plan = ReconcilePlan::compute(&configured, &installed, &enabled);

        let mut report = ReconcileReport {
            plan: plan.clone(),
            installed: Vec::new(),
            enabled: Vec::new(),
            disabled: Vec::new(),
            disable_skipped: Vec::new(),
            upgrades: Vec::new(),
        };

        for plugin in &self.plugins {
            let name = plugin.name();

            if plan.to_install.iter().any(|n| n == name) {
                info!(plugin = %name, "installing plugin");
                plugin
                    .install()
                    .await
                    .map_err(|e| PluginError::lifecycle(name, Lifecycle::Install, e))?;
                report.installed.push(name.to_string());
            }

            if plan.to_enable.iter().any(|n| n == name) {
                info!(plugin = %name, "enabling plugin");
                plugin
                    .enable()
                    .await
                    .map_err(|e| PluginError::lifecycle(name, Lifecycle::Enable, e))?;
                report.enabled.push(name.to_string());
            }

            report.upgrades.push(upgrade::upgrade(plugin.as_ref(), kv).await?);
        }

        for name in &plan.to_disable {
            let plugin = match registry.instantiate(name, ctx) {
                Ok(plugin) => plugin,
                Err(e) => {
                    warn!(plugin = %name, error = %e, "cannot build removed plugin, dropping enabled flag only");
                    report.disable_skipped.push(name.clone());
                    continue;
                }
            };
            info!(plugin = %name, "disabling plugin");
            plugin
                .disable()
                .await
                .map_err(|e| PluginError::lifecycle(name, Lifecycle::Disable, e))?;
            report.disabled.push(name.clone());
        }

        status::write_set(kv, ENABLED_KEY, &plan.enabled_after).await?;
        status::write_set(kv, INSTALLED_KEY, &plan.installed_after).await?;

        info!(
            configured = configured.len(),
            installed = report.installed.len(),
            enabled = report.enabled.len(),
            disabled = report.disabled.len(),
            "plugin reconciliation complete"
        );
        Ok(report)
    }

    /// Explicitly uninstall a plugin that is no longer configured.
    ///
    /// Runs its `uninstall` callback, removes it from the installed set and
    /// forgets its schema version. A plugin that can no longer be built only
    /// loses its bookkeeping.
    ///
    /// Returns whether the callback ran.
    pub async fn uninstall(
        &self,
        registry: &PluginRegistry,
        ctx: &PluginContext,
        name: &str,
    ) -> Result<bool, PluginError> {
        if self.contains(name) {
            return Err(PluginError::StillConfigured(name.to_string()));
        }
        let kv = ctx.store.as_ref();
        let mut installed = status::read_set(kv, INSTALLED_KEY).await?;
        if !installed.iter().any(|n| n == name) {
            return Err(PluginError::NotInstalled(name.to_string()));
        }

        let callback_ran = match registry.instantiate(name, ctx) {
            Ok(plugin) => {
                info!(plugin = %name, "uninstalling plugin");
                plugin
                    .uninstall()
                    .await
                    .map_err(|e| PluginError::lifecycle(name, Lifecycle::Uninstall, e))?;
                true
            }
            Err(e) => {
                warn!(plugin = %name, error = %e, "cannot build removed plugin, dropping its records only");
                false
            }
        };

        installed.retain(|n| n != name);
        status::write_set(kv, INSTALLED_KEY, &installed).await?;

        let mut enabled = status::read_set(kv, ENABLED_KEY).await?;
        if enabled.iter().any(|n| n == name) {
            enabled.retain(|n| n != name);
            status::write_set(kv, ENABLED_KEY, &enabled).await?;
        }
        kv.delete(&status::schema_version_key(name)).await?;
        Ok(callback_ran)
    }

    /// Call a hook on every plugin in order and concatenate the results.
    ///
    /// The first failing handler aborts the call; later handlers do not run.
    /// Metadata handlers return nothing, so each contributes `null`.
    pub async fn call_hook(&self, call: HookCall<'_>) -> Result<Vec<HookOutput>, HookError> {
        let hook = call.hook();
        let mut outputs = Vec::new();

        match call {
            HookCall::Dataset(event) => {
                for plugin in &self.plugins {
                    let values = plugin
                        .hooks()
                        .call_dataset(&event)
                        .await
                        .map_err(|e| HookError::new(plugin.name(), hook, e))?;
                    outputs.extend(values.into_iter().map(|value| HookOutput {
                        plugin: plugin.name().to_string(),
                        value,
                    }));
                }
            }
            HookCall::MakeDatasetMetadata {
                dataset_id,
                config,
                metadata,
            } => {
                for plugin in &self.plugins {
                    let ran = plugin
                        .hooks()
                        .call_make_dataset_metadata(dataset_id, config, &mut *metadata)
                        .map_err(|e| HookError::new(plugin.name(), hook, e))?;
                    outputs.extend((0..ran).map(|_| HookOutput {
                        plugin: plugin.name().to_string(),
                        value: Value::Null,
                    }));
                }
            }
        }

        debug!(hook = %hook, results = outputs.len(), "hook dispatched");
        Ok(outputs)
    }

    /// Fire a dataset lifecycle hook.
    pub async fn dataset_event(&self, event: DatasetEvent) -> Result<Vec<HookOutput>, HookError> {
        self.call_hook(HookCall::Dataset(event)).await
    }

    /// Build a dataset's metadata document through every plugin in order.
    pub async fn make_dataset_metadata(
        &self,
        dataset_id: i64,
        config: &Value,
        metadata: &mut Map<String, Value>,
    ) -> Result<(), HookError> {
        self.call_hook(HookCall::MakeDatasetMetadata {
            dataset_id,
            config,
            metadata,
        })
        .await?;
        Ok(())
    }

    /// Lazily yield the results of a dataset hook, one handler at a time.
    ///
    /// Handlers run as the stream is polled; dropping the stream stops the
    /// fan-out. Stops after the first error.
    pub fn call_hook_stream(
        &self,
        event: DatasetEvent,
    ) -> impl Stream<Item = Result<HookOutput, HookError>> + '_ {
        try_stream! {
            let hook = event.hook();
            for plugin in &self.plugins {
                for handler in plugin.hooks().dataset_handlers(hook) {
                    let value = handler(event.clone())
                        .await
                        .map_err(|e| HookError::new(plugin.name(), hook, e))?;
                    yield HookOutput {
                        plugin: plugin.name().to_string(),
                        value,
                    };
                }
            }
        }
    }

    /// Call a hook with every handler isolated: a failure is recorded and
    /// the remaining handlers still run.
    pub async fn call_hook_isolated(&self, call: HookCall<'_>) -> Vec<HookExecution> {
        let hook = call.hook();
        let mut executions = Vec::new();

        match call {
            HookCall::Dataset(event) => {
                for plugin in &self.plugins {
                    for handler in plugin.hooks().dataset_handlers(hook) {
                        let execution = match handler(event.clone()).await {
                            Ok(value) => HookExecution {
                                plugin: plugin.name().to_string(),
                                result: Some(value),
                                error: None,
                            },
                            Err(e) => {
                                warn!(plugin = %plugin.name(), hook = %hook, error = %format!("{e:#}"), "hook handler failed");
                                HookExecution {
                                    plugin: plugin.name().to_string(),
                                    result: None,
                                    error: Some(e),
                                }
                            }
                        };
                        executions.push(execution);
                    }
                }
            }
            HookCall::MakeDatasetMetadata {
                dataset_id,
                config,
                metadata,
            } => {
                for plugin in &self.plugins {
                    for handler in plugin.hooks().metadata_handlers() {
                        let (result, error) = match handler(dataset_id, config, &mut *metadata) {
                            Ok(()) => (Some(Value::Null), None),
                            Err(e) => {
                                warn!(plugin = %plugin.name(), hook = %hook, error = %format!("{e:#}"), "hook handler failed");
                                (None, Some(e))
                            }
                        };
                        executions.push(HookExecution {
                            plugin: plugin.name().to_string(),
                            result,
                            error,
                        });
                    }
                }
            }
        }
        executions
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.names())
            .finish()
    }
}
