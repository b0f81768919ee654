//! Geographical plugin.
//!
//! Datasets whose configuration sets `geo.enabled` get their resources
//! imported into layers by a background job on create/update, and their
//! metadata gains GeoJSON and Shapefile export links.

use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::jobs::{JobContext, JobFailure, JobRunner, JobSpec};
use crate::plugin::{
    DatasetEvent, DatasetHook, HookRegistry, Plugin, PluginContext, PluginHost, UpgradeStep,
    status,
};
use crate::store::KeyValueStore;

pub const GEO_PLUGIN: &str = "datacat.ext.geo:geo_plugin";

/// Job importing a dataset's resources. Args: `[dataset_id, config]`.
pub const IMPORT_GEO_DATASET: &str = "datacat.ext.geo:import_geo_dataset";

const EXPORT_FORMATS: [&str; 2] = ["geojson", "shp"];

/// Key of the layer index: dataset id -> layer names.
pub fn layers_key() -> String {
    status::plugin_key(GEO_PLUGIN, "layers")
}

/// Key of one dataset's import record.
pub fn dataset_key(dataset_id: i64) -> String {
    status::plugin_key(GEO_PLUGIN, &format!("dataset.{dataset_id}"))
}

fn is_geo(config: &Value) -> bool {
    config
        .pointer("/geo/enabled")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

pub struct GeoPlugin {
    hooks: HookRegistry,
    steps: Vec<UpgradeStep>,
    store: Arc<dyn KeyValueStore>,
}

impl GeoPlugin {
    pub fn new(ctx: &PluginContext) -> Self {
        let mut hooks = HookRegistry::new();

        let jobs = ctx.jobs.clone();
        hooks.on_dataset(&[DatasetHook::Create, DatasetHook::Update], move |event| {
            schedule_import(jobs.clone(), event)
        });

        let store = ctx.store.clone();
        hooks.on_dataset(&[DatasetHook::Delete], move |event| {
            forget_dataset(store.clone(), event.dataset_id())
        });

        let links = ctx.clone();
        hooks.on_make_dataset_metadata(move |dataset_id, config, metadata| {
            add_export_links(&links, dataset_id, config, metadata)
        });

        let store = ctx.store.clone();
        let steps = vec![UpgradeStep::new(0, "normalise layer index", move || {
            normalise_layer_index(store.clone())
        })];

        Self {
            hooks,
            steps,
            store: ctx.store.clone(),
        }
    }
}

async fn schedule_import(jobs: JobRunner, event: DatasetEvent) -> anyhow::Result<Value> {
    let Some(config) = event.config().filter(|c| is_geo(c)) else {
        return Ok(Value::Null);
    };
    let dataset_id = event.dataset_id();
    let handle = jobs
        .apply_async(
            IMPORT_GEO_DATASET,
            vec![json!(dataset_id), config.clone()],
            Map::new(),
        )
        .await
        .with_context(|| format!("failed to schedule geo import for dataset {dataset_id}"))?;
    debug!(dataset_id, job_id = %handle.id(), "scheduled geo import");
    Ok(json!({ "job_id": handle.id() }))
}

async fn forget_dataset(store: Arc<dyn KeyValueStore>, dataset_id: i64) -> anyhow::Result<Value> {
    let removed = store.delete(&dataset_key(dataset_id)).await?;

    if let Some(Value::Object(mut index)) = store.get(&layers_key()).await?
        && index.remove(&dataset_id.to_string()).is_some()
    {
        store.set(&layers_key(), Value::Object(index)).await?;
    }
    Ok(json!({ "removed": removed }))
}

fn add_export_links(
    ctx: &PluginContext,
    dataset_id: i64,
    config: &Value,
    metadata: &mut Map<String, Value>,
) -> anyhow::Result<()> {
    if !is_geo(config) {
        return Ok(());
    }
    let resources = metadata
        .entry("resources")
        .or_insert_with(|| Value::Array(Vec::new()));
    let Value::Array(resources) = resources else {
        bail!("metadata 'resources' is not a list");
    };
    for format in EXPORT_FORMATS {
        resources.push(json!({
            "url": ctx.api_url(&format!("/data/{dataset_id}/export/{format}")),
            "format": format,
        }));
    }
    Ok(())
}

async fn normalise_layer_index(store: Arc<dyn KeyValueStore>) -> anyhow::Result<()> {
    let index = match store.get(&layers_key()).await? {
        Some(Value::Object(map)) => map,
        // Early installs kept a bare list of dataset ids.
        Some(Value::Array(ids)) => ids
            .into_iter()
            .filter_map(|id| match id {
                Value::Number(n) => Some((n.to_string(), json!([]))),
                Value::String(s) => Some((s, json!([]))),
                _ => None,
            })
            .collect(),
        _ => Map::new(),
    };
    store.set(&layers_key(), Value::Object(index)).await?;
    Ok(())
}

/// Record a layer per configured resource and index them.
async fn import_geo_dataset(
    store: Arc<dyn KeyValueStore>,
    ctx: JobContext,
    spec: JobSpec,
) -> Result<(), JobFailure> {
    let dataset_id = spec
        .arg(0)
        .and_then(Value::as_i64)
        .ok_or_else(|| JobFailure::msg("expected a dataset id as first argument"))?;
    let resources = spec
        .arg(1)
        .and_then(|c| c.get("resources"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    ctx.log()
        .info(format!(
            "Importing {} resources of dataset {dataset_id}",
            resources.len()
        ))
        .await?;

    let total = resources.len() as i64;
    let mut layers = Vec::with_capacity(resources.len());
    for (index, resource) in resources.iter().enumerate() {
        let layer = format!("dataset_{dataset_id}_{index}");
        ctx.log()
            .debug(format!("Importing resource {index} into layer {layer}"))
            .await?;
        layers.push(json!({ "layer": layer, "resource": index, "source": resource }));
        ctx.progress(index as i64 + 1, total).await?;
    }

    let names: Vec<Value> = layers.iter().map(|l| l["layer"].clone()).collect();
    store
        .set(
            &dataset_key(dataset_id),
            json!({ "dataset_id": dataset_id, "layers": layers }),
        )
        .await?;

    let mut index = match store.get(&layers_key()).await? {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    index.insert(dataset_id.to_string(), Value::Array(names));
    store.set(&layers_key(), Value::Object(index)).await?;

    ctx.log()
        .info(format!("Imported {total} layers for dataset {dataset_id}"))
        .await?;
    Ok(())
}

#[async_trait]
impl Plugin for GeoPlugin {
    fn name(&self) -> &str {
        GEO_PLUGIN
    }

    fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    fn upgrade_steps(&self) -> &[UpgradeStep] {
        &self.steps
    }

    fn setup(&self, host: &mut PluginHost) -> anyhow::Result<()> {
        host.add_route("GET", "/data/{dataset_id}/export/shp");
        host.add_route("GET", "/data/{dataset_id}/export/geojson");

        let store = self.store.clone();
        host.add_task(IMPORT_GEO_DATASET, move |ctx, spec| {
            import_geo_dataset(store.clone(), ctx, spec)
        })?;
        Ok(())
    }

    async fn install(&self) -> anyhow::Result<()> {
        if self.store.get(&layers_key()).await?.is_none() {
            self.store.set(&layers_key(), json!({})).await?;
        }
        Ok(())
    }

    async fn uninstall(&self) -> anyhow::Result<()> {
        let prefix = status::plugin_key(GEO_PLUGIN, "dataset.");
        for key in self.store.keys().await? {
            if key.starts_with(&prefix) {
                self.store.delete(&key).await?;
            }
        }
        self.store.delete(&layers_key()).await?;
        Ok(())
    }
}
