// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod core;
pub mod plugins;

pub use core::prelude;

pub use core::{
    BinHandle,
    BusError,
    CallbackId,
    ConnectionHandle,
    Context,
    Frame,
    FrameRef,
    FrameTimeout,
    HostEvent,
    HostEventId,
    ParameterId,
    PluginService,
    ReaderHandle,
    Result,
    SensorPlugin,
    StreamCallbacks,
    StreamDescription,
    StreamEvent,
    StreamHandle,
    StreamSetHandle,
    StreamSubtype,
    StreamType,
};

pub use plugins::test_pattern::{TestPatternConfig, TestPatternPlugin};
