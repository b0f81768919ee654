//! Versioned plugin upgrades.
//!
//! Steps newer than the persisted schema version run in ascending id order.
//! The version is written after each step, so an interrupted upgrade
//! resumes from the last step that completed.

use std::collections::HashSet;

use tracing::{debug, info};

use super::error::PluginError;
use super::plugin::{Plugin, UpgradeStep};
use super::status;
use crate::store::KeyValueStore;

/// What one `upgrade` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    pub plugin: String,
    pub from_version: i64,
    pub to_version: i64,
    /// Step ids applied, in order.
    pub applied: Vec<u32>,
}

impl UpgradeReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Steps with id above `current`, ascending. Rejects duplicate ids.
pub fn pending_steps<'a>(
    plugin: &str,
    steps: &'a [UpgradeStep],
    current: i64,
) -> Result<Vec<&'a UpgradeStep>, PluginError> {
    let mut seen = HashSet::new();
    for step in steps {
        if !seen.insert(step.id) {
            return Err(PluginError::DuplicateUpgradeStep {
                plugin: plugin.to_string(),
                id: step.id,
            });
        }
    }

    let mut pending: Vec<&UpgradeStep> = steps
        .iter()
        .filter(|s| i64::from(s.id) > current)
        .collect();
    pending.sort_by_key(|s| s.id);
    Ok(pending)
}

/// Apply every pending upgrade step of `plugin`.
pub async fn upgrade(
    plugin: &dyn Plugin,
    kv: &dyn KeyValueStore,
) -> Result<UpgradeReport, PluginError> {
    let name = plugin.name();
    let from_version = status::schema_version(kv, name).await?;
    let pending = pending_steps(name, plugin.upgrade_steps(), from_version)?;

    let mut report = UpgradeReport {
        plugin: name.to_string(),
        from_version,
        to_version: from_version,
        applied: Vec::with_capacity(pending.len()),
    };

    if pending.is_empty() {
        debug!(plugin = %name, version = from_version, "plugin schema up to date");
        return Ok(report);
    }

    for step in pending {
        info!(plugin = %name, step = step.id, description = %step.description, "applying upgrade step");
        step.run().await.map_err(|source| PluginError::Upgrade {
            plugin: name.to_string(),
            step: step.id,
            source,
        })?;
        status::set_schema_version(kv, name, i64::from(step.id)).await?;
        report.applied.push(step.id);
        report.to_version = i64::from(step.id);
    }

    info!(
        plugin = %name,
        from = report.from_version,
        to = report.to_version,
        "plugin upgraded"
    );
    Ok(report)
}
