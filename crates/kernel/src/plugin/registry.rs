//! Static plugin registry.
//!
//! Configuration names plugins by reference string; the registry maps each
//! reference to a factory. It is filled once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use super::context::PluginContext;
use super::error::PluginError;
use super::plugin::Plugin;
use crate::reference::Reference;

pub type PluginFactory =
    Arc<dyn Fn(&PluginContext) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync>;

#[derive(Default, Clone)]
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the bundled plugins.
    pub fn with_builtins() -> Result<Self, PluginError> {
        let mut registry = Self::new();
        crate::builtin::register(&mut registry)?;
        Ok(registry)
    }

    pub fn register<F>(&mut self, reference: &str, factory: F) -> Result<(), PluginError>
    where
        F: Fn(&PluginContext) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        let reference = Reference::parse(reference)?;
        self.factories.insert(reference.into(), Arc::new(factory));
        Ok(())
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.factories.contains_key(reference)
    }

    /// Registered references, sorted.
    pub fn references(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.factories.keys().cloned().collect();
        refs.sort();
        refs
    }

    /// Build the plugin registered under `reference`.
    pub fn instantiate(
        &self,
        reference: &str,
        ctx: &PluginContext,
    ) -> Result<Arc<dyn Plugin>, PluginError> {
        Reference::parse(reference)?;
        let factory = self
            .factories
            .get(reference)
            .ok_or_else(|| PluginError::UnknownPlugin(reference.to_string()))?;

        let plugin = factory(ctx).map_err(|source| PluginError::Instantiate {
            plugin: reference.to_string(),
            source,
        })?;

        if plugin.name() != reference {
            return Err(PluginError::NameMismatch {
                reference: reference.to_string(),
                name: plugin.name().to_string(),
            });
        }
        Ok(plugin)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.references())
            .finish()
    }
}
