//! Plugin system.
//!
//! Plugins are built from a static [`PluginRegistry`] by reference string,
//! in configuration order. At startup the [`PluginManager`] reconciles the
//! configured set against the persisted installed/enabled sets (install,
//! enable, upgrade, disable) and afterwards fans hook calls out across the
//! active plugins in that same order.

mod context;
mod error;
mod hooks;
mod manager;
#[allow(clippy::module_inception)]
mod plugin;
mod registry;
pub mod status;
mod upgrade;

pub use context::{API_PREFIX, PluginContext, PluginHost, RouteDecl, TaskDecl};
pub use error::{HookError, Lifecycle, PluginError};
pub use hooks::{DatasetEvent, DatasetHandler, DatasetHook, Hook, HookRegistry, MetadataHandler};
pub use manager::{
    HookCall, HookExecution, HookOutput, PluginManager, ReconcilePlan, ReconcileReport,
};
pub use plugin::{Plugin, UpgradeFn, UpgradeStep};
pub use registry::{PluginFactory, PluginRegistry};
pub use status::PluginStatus;
pub use upgrade::{UpgradeReport, pending_steps, upgrade};
