//! Persisted plugin bookkeeping.
//!
//! | key                            | value                     |
//! |--------------------------------|---------------------------|
//! | `core.plugins_installed`       | array of plugin names     |
//! | `core.plugins_enabled`         | array of plugin names     |
//! | `plugin.<name>.schema_version` | integer, absent means -1  |

use serde_json::Value;

use super::error::PluginError;
use crate::store::KeyValueStore;

pub const INSTALLED_KEY: &str = "core.plugins_installed";
pub const ENABLED_KEY: &str = "core.plugins_enabled";

/// Schema version of a plugin that was never upgraded.
pub const NEVER_UPGRADED: i64 = -1;

pub fn schema_version_key(plugin: &str) -> String {
    format!("plugin.{plugin}.schema_version")
}

/// Prefix for free-form state a plugin keeps in the key-value store.
pub fn plugin_key(plugin: &str, suffix: &str) -> String {
    format!("plugin.{plugin}.{suffix}")
}

/// Read a name set, preserving stored order. Absent means empty.
pub async fn read_set(kv: &dyn KeyValueStore, key: &str) -> Result<Vec<String>, PluginError> {
    let Some(value) = kv.get(key).await? else {
        return Ok(Vec::new());
    };
    let corrupt = |details: String| PluginError::CorruptState {
        key: key.to_string(),
        details,
    };
    let items = match value {
        Value::Array(items) => items,
        other => return Err(corrupt(format!("expected an array, found {other}"))),
    };

    let mut names: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(name) => {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
            other => return Err(corrupt(format!("expected plugin names, found {other}"))),
        }
    }
    Ok(names)
}

pub async fn write_set(
    kv: &dyn KeyValueStore,
    key: &str,
    names: &[String],
) -> Result<(), PluginError> {
    let value = Value::Array(names.iter().cloned().map(Value::String).collect());
    kv.set(key, value).await?;
    Ok(())
}

pub async fn schema_version(kv: &dyn KeyValueStore, plugin: &str) -> Result<i64, PluginError> {
    let key = schema_version_key(plugin);
    match kv.get(&key).await? {
        None => Ok(NEVER_UPGRADED),
        Some(value) => value.as_i64().ok_or_else(|| PluginError::CorruptState {
            key,
            details: format!("expected an integer, found {value}"),
        }),
    }
}

pub async fn set_schema_version(
    kv: &dyn KeyValueStore,
    plugin: &str,
    version: i64,
) -> Result<(), PluginError> {
    kv.set(&schema_version_key(plugin), Value::from(version))
        .await?;
    Ok(())
}

/// Installed, enabled and schema version of one plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginStatus {
    pub name: String,
    pub installed: bool,
    pub enabled: bool,
    pub schema_version: i64,
}

pub async fn plugin_status(
    kv: &dyn KeyValueStore,
    names: &[String],
) -> Result<Vec<PluginStatus>, PluginError> {
    let installed = read_set(kv, INSTALLED_KEY).await?;
    let enabled = read_set(kv, ENABLED_KEY).await?;
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        out.push(PluginStatus {
            name: name.clone(),
            installed: installed.contains(name),
            enabled: enabled.contains(name),
            schema_version: schema_version(kv, name).await?,
        });
    }
    Ok(out)
}
