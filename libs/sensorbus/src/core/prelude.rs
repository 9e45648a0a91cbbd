// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Commonly used types for `use sensorbus::prelude::*`.

pub use crate::core::{
    // Errors
    error::{BusError, Result},

    // Stream identity and frame timing
    descriptors::{FrameTimeout, ParameterId, StreamDescription, StreamSubtype, StreamType},

    // Plugin authoring
    plugin::SensorPlugin,
    plugin_service::PluginService,
    stream::StreamCallbacks,

    // Orchestration
    context::Context,
};
