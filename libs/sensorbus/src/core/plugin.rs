// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Plugin entry points.

use crate::core::error::Result;
use crate::core::plugin_service::PluginService;

/// A sensor-device plugin registered with the [`Context`].
///
/// `initialize` receives the producer facade and is where the plugin
/// registers its sets, streams and bins. `update` is pumped by
/// [`Context::update`] for plugins that poll their device instead of
/// running their own thread. `terminate` should destroy what `initialize`
/// created; readers are already torn down when it runs.
///
/// [`Context`]: crate::core::context::Context
/// [`Context::update`]: crate::core::context::Context::update
pub trait SensorPlugin: Send {
    fn name(&self) -> &str;

    fn initialize(&mut self, service: PluginService) -> Result<()>;

    fn update(&mut self) -> Result<()> {
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }
}
