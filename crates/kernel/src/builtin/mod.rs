//! Plugins shipped with the kernel.

pub mod core;
pub mod geo;

use std::sync::Arc;

use crate::plugin::{Plugin, PluginError, PluginRegistry};

pub use self::core::{CORE_PLUGIN, CorePlugin};
pub use self::geo::{GEO_PLUGIN, GeoPlugin, IMPORT_GEO_DATASET};

/// Register the bundled plugins under their reference strings.
pub fn register(registry: &mut PluginRegistry) -> Result<(), PluginError> {
    registry.register(CORE_PLUGIN, |ctx| {
        let plugin: Arc<dyn Plugin> = Arc::new(CorePlugin::new(ctx));
        Ok(plugin)
    })?;
    registry.register(GEO_PLUGIN, |ctx| {
        let plugin: Arc<dyn Plugin> = Arc::new(GeoPlugin::new(ctx));
        Ok(plugin)
    })?;
    Ok(())
}
