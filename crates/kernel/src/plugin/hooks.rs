//! Typed hook registry.
//!
//! The set of hooks is closed: each event the request layer fires has its
//! own handler signature. Handlers run in registration order; a failing
//! handler stops the call and its error reaches the caller.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use futures_core::future::BoxFuture;
use serde_json::{Map, Value};

/// Extension points fired by the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    DatasetCreate,
    DatasetUpdate,
    DatasetDelete,
    MakeDatasetMetadata,
}

impl Hook {
    pub const ALL: [Hook; 4] = [
        Hook::DatasetCreate,
        Hook::DatasetUpdate,
        Hook::DatasetDelete,
        Hook::MakeDatasetMetadata,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Hook::DatasetCreate => "dataset_create",
            Hook::DatasetUpdate => "dataset_update",
            Hook::DatasetDelete => "dataset_delete",
            Hook::MakeDatasetMetadata => "make_dataset_metadata",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Hook {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hook::ALL
            .into_iter()
            .find(|h| h.name() == s)
            .ok_or_else(|| format!("unknown hook '{s}'"))
    }
}

/// The dataset lifecycle hooks, for registering one handler under several.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetHook {
    Create,
    Update,
    Delete,
}

impl From<DatasetHook> for Hook {
    fn from(h: DatasetHook) -> Self {
        match h {
            DatasetHook::Create => Hook::DatasetCreate,
            DatasetHook::Update => Hook::DatasetUpdate,
            DatasetHook::Delete => Hook::DatasetDelete,
        }
    }
}

/// Arguments of a dataset lifecycle hook.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetEvent {
    Created { dataset_id: i64, config: Value },
    Updated { dataset_id: i64, config: Value },
    Deleted { dataset_id: i64 },
}

impl DatasetEvent {
    pub fn hook(&self) -> Hook {
        match self {
            DatasetEvent::Created { .. } => Hook::DatasetCreate,
            DatasetEvent::Updated { .. } => Hook::DatasetUpdate,
            DatasetEvent::Deleted { .. } => Hook::DatasetDelete,
        }
    }

    pub fn dataset_id(&self) -> i64 {
        match self {
            DatasetEvent::Created { dataset_id, .. }
            | DatasetEvent::Updated { dataset_id, .. }
            | DatasetEvent::Deleted { dataset_id } => *dataset_id,
        }
    }

    /// Dataset configuration, absent for deletions.
    pub fn config(&self) -> Option<&Value> {
        match self {
            DatasetEvent::Created { config, .. } | DatasetEvent::Updated { config, .. } => {
                Some(config)
            }
            DatasetEvent::Deleted { .. } => None,
        }
    }
}

pub type DatasetHandler =
    Arc<dyn Fn(DatasetEvent) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Mutates the shared metadata document in place.
pub type MetadataHandler =
    Arc<dyn Fn(i64, &Value, &mut Map<String, Value>) -> anyhow::Result<()> + Send + Sync>;

/// One plugin's hook handlers.
#[derive(Clone, Default)]
pub struct HookRegistry {
    dataset_create: Vec<DatasetHandler>,
    dataset_update: Vec<DatasetHandler>,
    dataset_delete: Vec<DatasetHandler>,
    make_dataset_metadata: Vec<MetadataHandler>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `handler` to each of `hooks`. Registering twice calls twice.
    pub fn on_dataset<F, Fut>(&mut self, hooks: &[DatasetHook], handler: F) -> &mut Self
    where
        F: Fn(DatasetEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: DatasetHandler =
            Arc::new(move |event| -> BoxFuture<'static, anyhow::Result<Value>> {
                Box::pin(handler(event))
            });
        for hook in hooks {
            let list = match hook {
                DatasetHook::Create => &mut self.dataset_create,
                DatasetHook::Update => &mut self.dataset_update,
                DatasetHook::Delete => &mut self.dataset_delete,
            };
            list.push(handler.clone());
        }
        self
    }

    pub fn on_make_dataset_metadata<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(i64, &Value, &mut Map<String, Value>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.make_dataset_metadata.push(Arc::new(handler));
        self
    }

    /// Dataset handlers for `hook`, in call order.
    pub fn dataset_handlers(&self, hook: Hook) -> &[DatasetHandler] {
        match hook {
            Hook::DatasetCreate => &self.dataset_create,
            Hook::DatasetUpdate => &self.dataset_update,
            Hook::DatasetDelete => &self.dataset_delete,
            Hook::MakeDatasetMetadata => &[],
        }
    }

    pub fn metadata_handlers(&self) -> &[MetadataHandler] {
        &self.make_dataset_metadata
    }

    pub fn handler_count(&self, hook: Hook) -> usize {
        match hook {
            Hook::MakeDatasetMetadata => self.make_dataset_metadata.len(),
            other => self.dataset_handlers(other).len(),
        }
    }

    /// Hooks with at least one handler.
    pub fn implemented(&self) -> Vec<Hook> {
        Hook::ALL
            .into_iter()
            .filter(|h| self.handler_count(*h) > 0)
            .collect()
    }

    /// Call every handler for the event's hook with the same arguments.
    /// No handlers yields an empty result.
    pub async fn call_dataset(&self, event: &DatasetEvent) -> anyhow::Result<Vec<Value>> {
        let handlers = self.dataset_handlers(event.hook());
        let mut results = Vec::with_capacity(handlers.len());
        for handler in handlers {
            results.push(handler(event.clone()).await?);
        }
        Ok(results)
    }

    /// Run every metadata handler over `metadata`. Returns how many ran.
    pub fn call_make_dataset_metadata(
        &self,
        dataset_id: i64,
        config: &Value,
        metadata: &mut Map<String, Value>,
    ) -> anyhow::Result<usize> {
        for handler in &self.make_dataset_metadata {
            handler(dataset_id, config, metadata)?;
        }
        Ok(self.make_dataset_metadata.len())
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<(&str, usize)> = Hook::ALL
            .into_iter()
            .map(|h| (h.name(), self.handler_count(h)))
            .collect();
        f.debug_struct("HookRegistry")
            .field("handlers", &counts)
            .finish()
    }
}
