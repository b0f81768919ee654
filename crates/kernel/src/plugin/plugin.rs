//! The plugin trait.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::future::BoxFuture;

use super::context::PluginHost;
use super::hooks::HookRegistry;

pub type UpgradeFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// One versioned, idempotent migration of a plugin's persistent state.
#[derive(Clone)]
pub struct UpgradeStep {
    pub id: u32,
    pub description: String,
    run: UpgradeFn,
}

impl UpgradeStep {
    pub fn new<F, Fut>(id: u32, description: impl Into<String>, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            id,
            description: description.into(),
            run: Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(run()) }),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        (self.run)().await
    }
}

impl std::fmt::Debug for UpgradeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeStep")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish()
    }
}

/// A unit of optional functionality.
///
/// The name is the plugin's reference string and the key its persisted
/// state is stored under. Lifecycle callbacks default to no-ops and must be
/// safe to run more than once.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn hooks(&self) -> &HookRegistry;

    /// Upgrade steps in any order; they are applied ascending by id.
    fn upgrade_steps(&self) -> &[UpgradeStep] {
        &[]
    }

    /// Declare routes and job tasks. Called once, before lifecycle callbacks.
    fn setup(&self, _host: &mut PluginHost) -> anyhow::Result<()> {
        Ok(())
    }

    async fn install(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn uninstall(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn enable(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn disable(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
