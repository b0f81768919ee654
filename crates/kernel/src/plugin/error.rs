//! Plugin system error types.
//!
//! Every error names the plugin (or persisted key) involved so a failed
//! startup points straight at the culprit.

use std::fmt;

use thiserror::Error;

use super::hooks::Hook;
use crate::error::ErrorKind;
use crate::reference::InvalidReference;
use crate::store::StoreError;

/// Lifecycle callback being run when a plugin failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Install,
    Uninstall,
    Enable,
    Disable,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lifecycle::Install => "install",
            Lifecycle::Uninstall => "uninstall",
            Lifecycle::Enable => "enable",
            Lifecycle::Disable => "disable",
        })
    }
}

/// Errors from plugin loading, setup, reconciliation and upgrades.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error(transparent)]
    InvalidReference(#[from] InvalidReference),

    /// No factory is registered under the reference.
    #[error("plugin '{0}' is not registered")]
    UnknownPlugin(String),

    /// The same plugin is configured twice.
    #[error("plugin '{0}' is configured more than once")]
    DuplicatePlugin(String),

    /// A factory produced a plugin whose name differs from its reference.
    #[error("plugin registered as '{reference}' reports name '{name}'")]
    NameMismatch { reference: String, name: String },

    #[error("plugin '{plugin}': failed to instantiate: {source:#}")]
    Instantiate {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("plugin '{plugin}': setup failed: {source:#}")]
    Setup {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("plugin '{plugin}': {action} failed: {source:#}")]
    Lifecycle {
        plugin: String,
        action: Lifecycle,
        #[source]
        source: anyhow::Error,
    },

    #[error("plugin '{plugin}': upgrade step {id} is declared more than once")]
    DuplicateUpgradeStep { plugin: String, id: u32 },

    /// An upgrade step failed; the schema version stays at the last
    /// step that succeeded.
    #[error("plugin '{plugin}': upgrade step {step} failed: {source:#}")]
    Upgrade {
        plugin: String,
        step: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Explicit uninstall of a plugin that is still configured.
    #[error("plugin '{0}' is still configured; remove it from PLUGINS before uninstalling")]
    StillConfigured(String),

    #[error("plugin '{0}' is not installed")]
    NotInstalled(String),

    #[error("persisted value under '{key}' is malformed: {details}")]
    CorruptState { key: String, details: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PluginError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PluginError::InvalidReference(_) | PluginError::StillConfigured(_) => {
                ErrorKind::Validation
            }
            PluginError::UnknownPlugin(_) | PluginError::NotInstalled(_) => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }

    pub(crate) fn lifecycle(plugin: &str, action: Lifecycle, source: anyhow::Error) -> Self {
        Self::Lifecycle {
            plugin: plugin.to_string(),
            action,
            source,
        }
    }
}

/// A hook handler failed. Carries the plugin and hook so a fan-out abort
/// is attributable.
#[derive(Debug, Error)]
#[error("plugin '{plugin}': hook '{hook}' failed: {source:#}")]
pub struct HookError {
    pub plugin: String,
    pub hook: Hook,
    #[source]
    pub source: anyhow::Error,
}

impl HookError {
    pub fn new(plugin: &str, hook: Hook, source: anyhow::Error) -> Self {
        Self {
            plugin: plugin.to_string(),
            hook,
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}
