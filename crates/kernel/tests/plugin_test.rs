#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Plugin lifecycle and hook dispatch integration tests.

mod common;

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio_stream::StreamExt;

use common::{Journal, TestPlugin, builder, names, register, start, test_registry};
use datacat_kernel::builtin::{self, CORE_PLUGIN, GEO_PLUGIN, IMPORT_GEO_DATASET};
use datacat_kernel::error::ErrorKind;
use datacat_kernel::jobs::JobStatus;
use datacat_kernel::plugin::{
    DatasetEvent, HookCall, Lifecycle, PluginError, PluginManager, PluginRegistry, status,
    upgrade,
};
use datacat_kernel::store::{KeyValueStore, MemoryStore};

const A: &str = "test.plugins:a";
const B: &str = "test.plugins:b";
const C: &str = "test.plugins:c";

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_first_start_installs_and_enables_in_order() {
    let store = Arc::new(MemoryStore::new());
    let journal = Journal::default();
    let registry = test_registry(&journal, &[A, B]);

    let runtime = builder(&store, registry, &[A, B]).build().unwrap();
    let report = runtime.start().await.unwrap();

    assert_eq!(report.installed, names(&[A, B]));
    assert_eq!(report.enabled, names(&[A, B]));
    assert_eq!(
        journal.entries(),
        vec![
            format!("{A}:install"),
            format!("{A}:enable"),
            format!("{B}:install"),
            format!("{B}:enable"),
        ]
    );

    let kv: &dyn KeyValueStore = &*store;
    assert_eq!(status::read_set(kv, status::INSTALLED_KEY).await.unwrap(), names(&[A, B]));
    assert_eq!(status::read_set(kv, status::ENABLED_KEY).await.unwrap(), names(&[A, B]));
}

#[tokio::test]
async fn test_restart_runs_no_lifecycle_callbacks() {
    let store = Arc::new(MemoryStore::new());
    let journal = Journal::default();

    start(&store, test_registry(&journal, &[A, B]), &[A, B]).await;
    journal.take();

    let runtime = builder(&store, test_registry(&journal, &[A, B]), &[A, B])
        .build()
        .unwrap();
    let report = runtime.start().await.unwrap();

    assert!(journal.entries().is_empty());
    assert!(report.installed.is_empty());
    assert!(report.enabled.is_empty());
    assert!(report.disabled.is_empty());
}

#[tokio::test]
async fn test_reconcile_set_algebra() {
    let store = Arc::new(MemoryStore::new());
    let journal = Journal::default();

    start(&store, test_registry(&journal, &[A, B, C]), &[A, B]).await;
    journal.take();

    // Drop A, add C.
    let runtime = builder(&store, test_registry(&journal, &[A, B, C]), &[B, C])
        .build()
        .unwrap();
    let report = runtime.start().await.unwrap();

    assert_eq!(report.plan.to_install, names(&[C]));
    assert_eq!(report.plan.to_enable, names(&[C]));
    assert_eq!(report.plan.to_disable, names(&[A]));
    assert_eq!(report.disabled, names(&[A]));
    assert!(journal.entries().contains(&format!("{A}:disable")));
    assert!(!journal.entries().contains(&format!("{A}:uninstall")));

    let kv: &dyn KeyValueStore = &*store;
    let mut enabled = status::read_set(kv, status::ENABLED_KEY).await.unwrap();
    let mut installed = status::read_set(kv, status::INSTALLED_KEY).await.unwrap();
    enabled.sort();
    installed.sort();
    assert_eq!(enabled, names(&[B, C]));
    assert_eq!(installed, names(&[A, B, C]));
}

#[tokio::test]
async fn test_removed_plugin_missing_from_registry_is_dropped() {
    let store = Arc::new(MemoryStore::new());
    let journal = Journal::default();
    start(&store, test_registry(&journal, &[A, B]), &[A, B]).await;

    // A is no longer even registered.
    let runtime = builder(&store, test_registry(&journal, &[B]), &[B])
        .build()
        .unwrap();
    let report = runtime.start().await.unwrap();

    assert_eq!(report.disable_skipped, names(&[A]));
    let kv: &dyn KeyValueStore = &*store;
    assert_eq!(status::read_set(kv, status::ENABLED_KEY).await.unwrap(), names(&[B]));
}

#[tokio::test]
async fn test_failed_install_leaves_sets_untouched() {
    let store = Arc::new(MemoryStore::new());
    let journal = Journal::default();
    let mut registry = test_registry(&journal, &[A]);
    register(&mut registry, B, {
        let journal = journal.clone();
        move |name, _ctx| TestPlugin::new(name, &journal).failing_install()
    });

    let runtime = builder(&store, registry, &[A, B]).build().unwrap();
    let err = runtime.start().await.unwrap_err();
    let err = err.downcast_ref::<PluginError>().unwrap();
    assert!(matches!(
        err,
        PluginError::Lifecycle { plugin, action: Lifecycle::Install, .. } if plugin == B
    ));
    assert_eq!(err.kind(), ErrorKind::Internal);

    let kv: &dyn KeyValueStore = &*store;
    assert!(status::read_set(kv, status::INSTALLED_KEY).await.unwrap().is_empty());
    assert!(status::read_set(kv, status::ENABLED_KEY).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_configured_plugin_fails_build() {
    let store = Arc::new(MemoryStore::new());
    let journal = Journal::default();

    let err = builder(&store, test_registry(&journal, &[A]), &[A, "test.plugins:ghost"])
        .build()
        .unwrap_err();
    assert!(matches!(err, PluginError::UnknownPlugin(ref name) if name == "test.plugins:ghost"));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = builder(&store, test_registry(&journal, &[A]), &["not-a-reference"])
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_uninstall_removed_plugin() {
    let store = Arc::new(MemoryStore::new());
    let journal = Journal::default();
    start(&store, test_registry(&journal, &[A, B]), &[A, B]).await;
    let runtime = start(&store, test_registry(&journal, &[A, B]), &[B]).await;
    journal.take();

    assert!(runtime.uninstall_plugin(A).await.unwrap());
    assert_eq!(journal.entries(), vec![format!("{A}:uninstall")]);

    let kv: &dyn KeyValueStore = &*store;
    assert_eq!(status::read_set(kv, status::INSTALLED_KEY).await.unwrap(), names(&[B]));

    // Configured plugins cannot be uninstalled.
    let err = runtime.uninstall_plugin(B).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PluginError>(),
        Some(PluginError::StillConfigured(_))
    ));
}

#[tokio::test]
async fn test_uninstall_unregistered_plugin_drops_records() {
    let store = Arc::new(MemoryStore::new());
    let journal = Journal::default();
    let mut registry = test_registry(&journal, &[B]);
    register(&mut registry, A, {
        let journal = journal.clone();
        move |name, _ctx| TestPlugin::new(name, &journal).with_steps(&[0])
    });
    start(&store, registry, &[A, B]).await;
    let kv: &dyn KeyValueStore = &*store;
    assert_eq!(status::schema_version(kv, A).await.unwrap(), 0);

    // A is neither configured nor registered any more.
    let runtime = start(&store, test_registry(&journal, &[B]), &[B]).await;
    journal.take();

    assert!(!runtime.uninstall_plugin(A).await.unwrap());
    assert!(journal.entries().is_empty());
    assert_eq!(status::read_set(kv, status::INSTALLED_KEY).await.unwrap(), names(&[B]));
    assert_eq!(status::read_set(kv, status::ENABLED_KEY).await.unwrap(), names(&[B]));
    assert!(kv.get(&status::schema_version_key(A)).await.unwrap().is_none());

    let err = runtime.uninstall_plugin(A).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PluginError>(),
        Some(PluginError::NotInstalled(_))
    ));
}

// =============================================================================
// Upgrades
// =============================================================================

#[tokio::test]
async fn test_upgrade_applies_steps_once_in_order() {
    let store = MemoryStore::new();
    let journal = Journal::default();
    let plugin = TestPlugin::new(A, &journal).with_steps(&[5, 0, 2, 1]);

    let report = upgrade(&plugin, &store).await.unwrap();
    assert_eq!(report.from_version, -1);
    assert_eq!(report.to_version, 5);
    assert_eq!(report.applied, vec![0, 1, 2, 5]);
    assert_eq!(
        journal.take(),
        vec![
            format!("{A}:upgrade:0"),
            format!("{A}:upgrade:1"),
            format!("{A}:upgrade:2"),
            format!("{A}:upgrade:5"),
        ]
    );
    assert_eq!(status::schema_version(&store, A).await.unwrap(), 5);

    let again = upgrade(&plugin, &store).await.unwrap();
    assert!(again.is_noop());
    assert!(journal.entries().is_empty());
    assert_eq!(status::schema_version(&store, A).await.unwrap(), 5);
}

#[tokio::test]
async fn test_upgrade_skips_applied_ids() {
    let store = MemoryStore::new();
    let journal = Journal::default();
    let plugin = TestPlugin::new(A, &journal).with_steps(&[0, 1, 2, 5]);
    status::set_schema_version(&store, A, 2).await.unwrap();

    let report = upgrade(&plugin, &store).await.unwrap();
    assert_eq!(report.applied, vec![5]);
    assert_eq!(journal.entries(), vec![format!("{A}:upgrade:5")]);
}

#[tokio::test]
async fn test_failed_upgrade_step_keeps_last_completed_version() {
    let store = MemoryStore::new();
    let journal = Journal::default();
    let plugin = TestPlugin::new(A, &journal)
        .with_steps(&[0, 1, 5])
        .with_failing_step(2);

    let err = upgrade(&plugin, &store).await.unwrap_err();
    assert!(matches!(
        &err,
        PluginError::Upgrade { plugin, step: 2, .. } if plugin == A
    ));
    assert_eq!(status::schema_version(&store, A).await.unwrap(), 1);
    assert_eq!(
        journal.take(),
        vec![
            format!("{A}:upgrade:0"),
            format!("{A}:upgrade:1"),
            format!("{A}:upgrade:2"),
        ]
    );

    // A retry resumes at the failed step, not at the start.
    let err = upgrade(&plugin, &store).await.unwrap_err();
    assert!(matches!(err, PluginError::Upgrade { step: 2, .. }));
    assert_eq!(journal.entries(), vec![format!("{A}:upgrade:2")]);
}

#[tokio::test]
async fn test_reconcile_runs_upgrades_after_enable() {
    let store = Arc::new(MemoryStore::new());
    let journal = Journal::default();
    let mut registry = PluginRegistry::new();
    register(&mut registry, A, {
        let journal = journal.clone();
        move |name, _ctx| TestPlugin::new(name, &journal).with_steps(&[0, 1])
    });

    let runtime = builder(&store, registry, &[A]).build().unwrap();
    let report = runtime.start().await.unwrap();

    assert_eq!(
        journal.entries(),
        vec![
            format!("{A}:install"),
            format!("{A}:enable"),
            format!("{A}:upgrade:0"),
            format!("{A}:upgrade:1"),
        ]
    );
    assert_eq!(report.upgrades.len(), 1);
    assert_eq!(report.upgrades[0].to_version, 1);
}

// =============================================================================
// Hook dispatch
// =============================================================================

#[tokio::test]
async fn test_hook_results_follow_registration_order() {
    let store = Arc::new(MemoryStore::new());
    let journal = Journal::default();
    let runtime = start(&store, test_registry(&journal, &[C, A, B]), &[C, A, B]).await;

    let outputs = runtime
        .plugins()
        .dataset_event(DatasetEvent::Created {
            dataset_id: 9,
            config: json!({}),
        })
        .await
        .unwrap();

    let order: Vec<&str> = outputs.iter().map(|o| o.plugin.as_str()).collect();
    assert_eq!(order, vec![C, A, B]);
    for output in &outputs {
        assert_eq!(output.value["dataset"], json!(9));
        assert_eq!(output.value["plugin"], json!(output.plugin));
    }
}

#[tokio::test]
async fn test_metadata_hook_appends_resource() {
    let store = Arc::new(MemoryStore::new());
    let journal = Journal::default();
    let mut registry = PluginRegistry::new();
    register(&mut registry, A, {
        let journal = journal.clone();
        move |name, _ctx| TestPlugin::new(name, &journal).with_metadata_link("http://x/export")
    });
    let runtime = start(&store, registry, &[A]).await;

    let config = json!({ "resources": ["r1"] });
    let mut out = Map::new();
    runtime
        .plugins()
        .make_dataset_metadata(1, &config, &mut out)
        .await
        .unwrap();

    assert_eq!(out["resources"], json!([{ "url": "http://x/export" }]));
}

#[tokio::test]
async fn test_hook_failure_aborts_call() {
    let store = Arc::new(MemoryStore::new());
    let journal = Journal::default();
    let mut registry = test_registry(&journal, &[A, C]);
    register(&mut registry, B, {
        let journal = journal.clone();
        move |name, _ctx| TestPlugin::new(name, &journal).with_failing_hook()
    });
    let runtime = start(&store, registry, &[A, B, C]).await;

    let event = DatasetEvent::Created {
        dataset_id: 1,
        config: json!({}),
    };
    let err = runtime.plugins().dataset_event(event.clone()).await.unwrap_err();
    assert_eq!(err.plugin, B);

    let executions = runtime
        .plugins()
        .call_hook_isolated(HookCall::Dataset(event))
        .await;
    let summary: Vec<(&str, bool)> = executions
        .iter()
        .map(|e| (e.plugin.as_str(), e.is_ok()))
        .collect();
    assert_eq!(summary, vec![(A, true), (B, false), (C, true)]);
}

#[tokio::test]
async fn test_hook_stream_is_lazy() {
    let journal = Journal::default();
    let manager = PluginManager::new(vec![
        TestPlugin::new(A, &journal).into_dyn(),
        TestPlugin::new(B, &journal).with_failing_hook().into_dyn(),
        TestPlugin::new(C, &journal).into_dyn(),
    ])
    .unwrap();

    let stream = manager.call_hook_stream(DatasetEvent::Created {
        dataset_id: 3,
        config: json!({}),
    });
    tokio::pin!(stream);

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.plugin, A);
    let second = stream.next().await.unwrap();
    assert!(second.is_err());
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_duplicate_plugins_rejected() {
    let journal = Journal::default();
    let result = PluginManager::new(vec![
        TestPlugin::new(A, &journal).into_dyn(),
        TestPlugin::new(A, &journal).into_dyn(),
    ]);
    assert!(matches!(result, Err(PluginError::DuplicatePlugin(_))));
}

// =============================================================================
// Bundled plugins
// =============================================================================

#[tokio::test]
async fn test_geo_dataset_import_runs_job() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = PluginRegistry::new();
    builtin::register(&mut registry).unwrap();
    let runtime = start(&store, registry, &[CORE_PLUGIN, GEO_PLUGIN]).await;

    assert!(runtime.jobs().runners().contains(IMPORT_GEO_DATASET));
    assert_eq!(
        store.get(&builtin::geo::layers_key()).await.unwrap(),
        Some(json!({}))
    );

    let config = json!({
        "geo": { "enabled": true },
        "resources": ["a.csv", "b.csv"],
        "metadata": { "title": "Parks" },
    });
    let outputs = runtime
        .plugins()
        .dataset_event(DatasetEvent::Created {
            dataset_id: 7,
            config: config.clone(),
        })
        .await
        .unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].plugin, GEO_PLUGIN);

    let job_id: uuid::Uuid = serde_json::from_value(outputs[0].value["job_id"].clone()).unwrap();
    assert_eq!(
        runtime.jobs().get_job_status(job_id).await.unwrap(),
        JobStatus::Succeeded
    );
    let record = store.get(&builtin::geo::dataset_key(7)).await.unwrap().unwrap();
    assert_eq!(record["layers"].as_array().unwrap().len(), 2);

    let runs = runtime.jobs().list_job_runs(job_id).await.unwrap();
    assert_eq!(runs[0].progress_current, Some(2));
    assert_eq!(runs[0].progress_total, Some(2));
    let logs = runtime.jobs().list_run_logs(runs[0].id).await.unwrap();
    assert!(logs.iter().all(|l| l.job_id == job_id));
    assert!(logs.len() >= 2);

    let mut metadata = Map::new();
    runtime
        .plugins()
        .make_dataset_metadata(7, &config, &mut metadata)
        .await
        .unwrap();
    assert_eq!(metadata["title"], json!("Parks"));
    let urls: Vec<&str> = metadata["resources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["url"].as_str().unwrap())
        .collect();
    assert_eq!(
        urls,
        vec![
            "http://data.test/api/1/data/7/resource/0",
            "http://data.test/api/1/data/7/resource/1",
            "http://data.test/api/1/data/7/export/geojson",
            "http://data.test/api/1/data/7/export/shp",
        ]
    );

    runtime
        .plugins()
        .dataset_event(DatasetEvent::Deleted { dataset_id: 7 })
        .await
        .unwrap();
    assert!(store.get(&builtin::geo::dataset_key(7)).await.unwrap().is_none());
    assert_eq!(
        store.get(&builtin::geo::layers_key()).await.unwrap(),
        Some(json!({}))
    );
}

#[tokio::test]
async fn test_geo_ignores_plain_datasets() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = PluginRegistry::new();
    builtin::register(&mut registry).unwrap();
    let runtime = start(&store, registry, &[GEO_PLUGIN]).await;

    let outputs = runtime
        .plugins()
        .dataset_event(DatasetEvent::Updated {
            dataset_id: 4,
            config: json!({ "resources": ["a.csv"] }),
        })
        .await
        .unwrap();
    assert_eq!(outputs[0].value, Value::Null);
    assert!(store.get(&builtin::geo::dataset_key(4)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_geo_upgrade_normalises_legacy_index() {
    let store = Arc::new(MemoryStore::new());
    store
        .set(&builtin::geo::layers_key(), json!([3, "8"]))
        .await
        .unwrap();
    let mut registry = PluginRegistry::new();
    builtin::register(&mut registry).unwrap();
    start(&store, registry, &[GEO_PLUGIN]).await;

    assert_eq!(
        store.get(&builtin::geo::layers_key()).await.unwrap(),
        Some(json!({ "3": [], "8": [] }))
    );
    assert_eq!(status::schema_version(&*store, GEO_PLUGIN).await.unwrap(), 0);
}

#[tokio::test]
async fn test_plugin_routes_declared_at_setup() {
    let store = Arc::new(MemoryStore::new());
    let runtime = builder(&store, PluginRegistry::with_builtins().unwrap(), &[CORE_PLUGIN, GEO_PLUGIN])
        .build()
        .unwrap();

    let routes: Vec<(&str, &str)> = runtime
        .host()
        .routes()
        .iter()
        .map(|r| (r.plugin.as_str(), r.path.as_str()))
        .collect();
    assert_eq!(
        routes,
        vec![
            (CORE_PLUGIN, "/api/1/data/{dataset_id}/resource/{resource_id}"),
            (GEO_PLUGIN, "/api/1/data/{dataset_id}/export/shp"),
            (GEO_PLUGIN, "/api/1/data/{dataset_id}/export/geojson"),
        ]
    );
    assert_eq!(runtime.host().tasks().len(), 1);
    assert_eq!(runtime.host().tasks()[0].reference, IMPORT_GEO_DATASET);
}
