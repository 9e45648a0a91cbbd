// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod bin;
pub mod connection;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod handles;
pub mod parameters;
pub mod plugin;
pub mod plugin_service;
pub mod prelude;
pub mod reader;
pub mod signal;
pub mod stream;
pub mod streamset;

pub use bin::*;
pub use connection::*;
pub use context::*;
pub use descriptors::*;
pub use error::*;
pub use handles::*;
pub use parameters::*;
pub use plugin::*;
pub use plugin_service::*;
pub use reader::*;
pub use signal::*;
pub use stream::*;
pub use streamset::*;
