// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Synthetic device plugin producing a moving gradient.
//!
//! Serves a COLOR stream (optionally DEPTH) without any hardware, driven by
//! the context's `update` pump. Useful for demos and as the reference for
//! how a device plugin wires streams, bins, connection hooks and parameters
//! together.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::bin::BinHandle;
use crate::core::connection::ConnectionHandle;
use crate::core::descriptors::{
    HostEventId, ParameterId, StreamDescription, StreamSubtype, StreamType,
};
use crate::core::error::{BusError, Result};
use crate::core::plugin::SensorPlugin;
use crate::core::plugin_service::PluginService;
use crate::core::stream::StreamCallbacks;
use crate::core::streamset::StreamSetHandle;

/// Resolution parameter: 8 bytes, width then height, little-endian u32s.
pub const PARAM_RESOLUTION: ParameterId = ParameterId(100);

/// Raised once the plugin's stream set is registered and serving.
pub const HOST_EVENT_DEVICE_READY: HostEventId = HostEventId(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestPatternConfig {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub with_depth: bool,
}

impl Default for TestPatternConfig {
    fn default() -> Self {
        TestPatternConfig {
            uri: "device/0".to_string(),
            width: 640,
            height: 480,
            channels: 3,
            with_depth: false,
        }
    }
}

impl TestPatternConfig {
    pub fn color_byte_length(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    pub fn depth_byte_length(&self) -> usize {
        self.width as usize * self.height as usize * 2
    }
}

/// Links consumers to the stream's bin as they start, and serves the
/// resolution parameter. The bin handle arrives after stream registration,
/// so it lives behind a cell; a connection that starts before the bin exists
/// is simply not linked yet.
struct PatternStreamCallbacks {
    service: PluginService,
    bin: Mutex<Option<BinHandle>>,
    width: u32,
    height: u32,
}

impl PatternStreamCallbacks {
    fn new(service: PluginService, width: u32, height: u32) -> Arc<PatternStreamCallbacks> {
        Arc::new(PatternStreamCallbacks {
            service,
            bin: Mutex::new(None),
            width,
            height,
        })
    }

    fn set_bin(&self, bin: BinHandle) {
        *self.bin.lock() = Some(bin);
    }
}

impl StreamCallbacks for PatternStreamCallbacks {
    fn connection_started(&self, connection: ConnectionHandle) {
        if let Some(bin) = *self.bin.lock() {
            if let Err(err) = self.service.link_connection_to_bin(connection, Some(bin)) {
                tracing::warn!(connection = ?connection, error = %err, "failed to link consumer");
            }
        }
    }

    fn connection_stopped(&self, connection: ConnectionHandle) {
        if let Err(err) = self.service.link_connection_to_bin(connection, None) {
            tracing::warn!(connection = ?connection, error = %err, "failed to unlink consumer");
        }
    }

    fn set_parameter(&self, _connection: ConnectionHandle, id: ParameterId, _data: &[u8]) -> Result<()> {
        if id == PARAM_RESOLUTION {
            return Err(BusError::InvalidParameter("resolution is read-only".into()));
        }
        Err(BusError::InvalidParameter(format!("unknown parameter {}", id.0)))
    }

    fn get_parameter_size(&self, _connection: ConnectionHandle, id: ParameterId) -> Result<usize> {
        if id == PARAM_RESOLUTION {
            return Ok(8);
        }
        Err(BusError::InvalidParameter(format!("unknown parameter {}", id.0)))
    }

    fn get_parameter_data(
        &self,
        _connection: ConnectionHandle,
        id: ParameterId,
        out: &mut [u8],
    ) -> Result<()> {
        if id != PARAM_RESOLUTION {
            return Err(BusError::InvalidParameter(format!("unknown parameter {}", id.0)));
        }
        if out.len() != 8 {
            return Err(BusError::InvalidParameter(format!(
                "resolution is 8 bytes, caller provided {}",
                out.len()
            )));
        }
        out[..4].copy_from_slice(&self.width.to_le_bytes());
        out[4..].copy_from_slice(&self.height.to_le_bytes());
        Ok(())
    }
}

struct PluginState {
    service: PluginService,
    set: StreamSetHandle,
    color_bin: BinHandle,
    depth_bin: Option<BinHandle>,
    frames_produced: u64,
}

/// See the module docs.
pub struct TestPatternPlugin {
    config: TestPatternConfig,
    state: Option<PluginState>,
}

impl TestPatternPlugin {
    pub fn new(config: TestPatternConfig) -> TestPatternPlugin {
        TestPatternPlugin {
            config,
            state: None,
        }
    }
}

impl Default for TestPatternPlugin {
    fn default() -> Self {
        TestPatternPlugin::new(TestPatternConfig::default())
    }
}

impl SensorPlugin for TestPatternPlugin {
    fn name(&self) -> &str {
        "test-pattern"
    }

    fn initialize(&mut self, service: PluginService) -> Result<()> {
        if self.config.width == 0 || self.config.height == 0 || self.config.channels == 0 {
            return Err(BusError::InvalidParameter(
                "pattern dimensions must be non-zero".into(),
            ));
        }

        let set = service.create_stream_set(&self.config.uri)?;

        let color_callbacks =
            PatternStreamCallbacks::new(service.clone(), self.config.width, self.config.height);
        let color_stream = service.create_stream(
            set,
            StreamDescription::new(StreamType::COLOR, StreamSubtype::DEFAULT),
            color_callbacks.clone(),
        )?;
        let color_bin = service.create_stream_bin(color_stream, self.config.color_byte_length())?;
        color_callbacks.set_bin(color_bin);

        let depth_bin = if self.config.with_depth {
            let depth_callbacks =
                PatternStreamCallbacks::new(service.clone(), self.config.width, self.config.height);
            let depth_stream = service.create_stream(
                set,
                StreamDescription::new(StreamType::DEPTH, StreamSubtype::DEFAULT),
                depth_callbacks.clone(),
            )?;
            let depth_bin =
                service.create_stream_bin(depth_stream, self.config.depth_byte_length())?;
            depth_callbacks.set_bin(depth_bin);
            Some(depth_bin)
        } else {
            None
        };

        service.notify_host_event(HOST_EVENT_DEVICE_READY, self.config.uri.as_bytes());
        tracing::info!(
            uri = %self.config.uri,
            width = self.config.width,
            height = self.config.height,
            with_depth = self.config.with_depth,
            "test pattern device ready"
        );

        self.state = Some(PluginState {
            service,
            set,
            color_bin,
            depth_bin,
            frames_produced: 0,
        });
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        let Some(state) = &mut self.state else {
            return Ok(());
        };
        state.frames_produced += 1;
        let frame_index = state.frames_produced;

        // Render only for connected consumers; the pattern phase advances
        // regardless, like a free-running sensor.
        if state.service.has_clients_connected(state.color_bin)? {
            let width = self.config.width;
            let channels = self.config.channels;
            state.service.with_back_buffer(state.color_bin, |data| {
                render_color(data, width, channels, frame_index);
            })?;
            state.service.cycle_stream_bin(state.color_bin)?;
        }

        if let Some(depth_bin) = state.depth_bin {
            if state.service.has_clients_connected(depth_bin)? {
                let width = self.config.width;
                state.service.with_back_buffer(depth_bin, |data| {
                    render_depth(data, width, frame_index);
                })?;
                state.service.cycle_stream_bin(depth_bin)?;
            }
        }
        Ok(())
    }

    fn terminate(&mut self) -> Result<()> {
        if let Some(state) = self.state.take() {
            state.service.destroy_stream_set(state.set)?;
            tracing::info!(uri = %self.config.uri, "test pattern device stopped");
        }
        Ok(())
    }
}

/// Diagonal gradient, all channels equal, scrolling with the frame index.
fn render_color(data: &mut [u8], width: u32, channels: u32, frame_index: u64) {
    let stride = width as usize * channels as usize;
    for (row, line) in data.chunks_exact_mut(stride).enumerate() {
        for (col, px) in line.chunks_exact_mut(channels as usize).enumerate() {
            px.fill((row + col + frame_index as usize) as u8);
        }
    }
}

/// Same gradient as u16 millimeters, little-endian.
fn render_depth(data: &mut [u8], width: u32, frame_index: u64) {
    let stride = width as usize * 2;
    for (row, line) in data.chunks_exact_mut(stride).enumerate() {
        for (col, px) in line.chunks_exact_mut(2).enumerate() {
            let depth = (row + col + frame_index as usize) as u16;
            px.copy_from_slice(&depth.to_le_bytes());
        }
    }
}
