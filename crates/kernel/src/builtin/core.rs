//! Core plugin: standard dataset metadata.

use serde_json::{Map, Value, json};

use crate::plugin::{HookRegistry, Plugin, PluginContext, PluginHost};

pub const CORE_PLUGIN: &str = "datacat.ext.core:core_plugin";

/// Copies `config.metadata` into the rendered metadata and links each
/// configured resource through the resource redirect route.
pub struct CorePlugin {
    hooks: HookRegistry,
}

impl CorePlugin {
    pub fn new(ctx: &PluginContext) -> Self {
        let ctx = ctx.clone();
        let mut hooks = HookRegistry::new();
        hooks.on_make_dataset_metadata(move |dataset_id, config, metadata| {
            apply_metadata(&ctx, dataset_id, config, metadata);
            Ok(())
        });
        Self { hooks }
    }
}

fn apply_metadata(
    ctx: &PluginContext,
    dataset_id: i64,
    config: &Value,
    metadata: &mut Map<String, Value>,
) {
    if let Some(Value::Object(extra)) = config.get("metadata") {
        for (k, v) in extra {
            metadata.insert(k.clone(), v.clone());
        }
    }

    if let Some(Value::Array(resources)) = config.get("resources") {
        let links: Vec<Value> = (0..resources.len())
            .map(|index| {
                json!({
                    "url": ctx.api_url(&format!("/data/{dataset_id}/resource/{index}")),
                })
            })
            .collect();
        metadata.insert("resources".to_string(), Value::Array(links));
    }
}

impl Plugin for CorePlugin {
    fn name(&self) -> &str {
        CORE_PLUGIN
    }

    fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    fn setup(&self, host: &mut PluginHost) -> anyhow::Result<()> {
        host.add_route("GET", "/data/{dataset_id}/resource/{resource_id}");
        Ok(())
    }
}
