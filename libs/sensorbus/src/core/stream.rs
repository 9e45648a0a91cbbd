// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Stream objects and the plugin-supplied per-stream callback table.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::bin::{BinHandle, StreamBin};
use crate::core::connection::{ConnectionHandle, StreamConnection};
use crate::core::descriptors::{ParameterId, StreamDescription};
use crate::core::error::{BusError, Result};
use crate::core::handles::Handle;

pub type StreamHandle = Handle<Stream>;

/// Per-stream hooks a plugin attaches at registration.
///
/// Connection lifecycle hooks fire when a consumer starts or stops a
/// connection; the usual producer reaction is to link or unlink a bin.
/// Parameter traffic is forwarded verbatim, ids and payload bytes are
/// plugin-defined. Every method has a default so a plugin only implements
/// what its device supports.
pub trait StreamCallbacks: Send + Sync {
    fn connection_started(&self, _connection: ConnectionHandle) {}

    fn connection_stopped(&self, _connection: ConnectionHandle) {}

    fn set_parameter(
        &self,
        _connection: ConnectionHandle,
        id: ParameterId,
        _data: &[u8],
    ) -> Result<()> {
        Err(BusError::InvalidParameter(format!("unknown parameter {id}")))
    }

    fn get_parameter_size(&self, _connection: ConnectionHandle, id: ParameterId) -> Result<usize> {
        Err(BusError::InvalidParameter(format!("unknown parameter {id}")))
    }

    fn get_parameter_data(
        &self,
        _connection: ConnectionHandle,
        id: ParameterId,
        _out: &mut [u8],
    ) -> Result<()> {
        Err(BusError::InvalidParameter(format!("unknown parameter {id}")))
    }
}

struct StreamState {
    bins: HashMap<BinHandle, Arc<StreamBin>>,
    connections: Vec<Weak<StreamConnection>>,
}

/// A typed, named data source registered under one stream set.
pub struct Stream {
    handle: StreamHandle,
    description: StreamDescription,
    callbacks: Arc<dyn StreamCallbacks>,
    state: Mutex<StreamState>,
}

impl Stream {
    pub(crate) fn new(
        handle: StreamHandle,
        description: StreamDescription,
        callbacks: Arc<dyn StreamCallbacks>,
    ) -> Stream {
        Stream {
            handle,
            description,
            callbacks,
            state: Mutex::new(StreamState {
                bins: HashMap::new(),
                connections: Vec::new(),
            }),
        }
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    pub fn description(&self) -> StreamDescription {
        self.description
    }

    pub(crate) fn callbacks(&self) -> &Arc<dyn StreamCallbacks> {
        &self.callbacks
    }

    pub(crate) fn add_bin(&self, bin: Arc<StreamBin>) {
        self.state.lock().bins.insert(bin.handle(), bin);
    }

    pub(crate) fn remove_bin(&self, handle: BinHandle) -> Option<Arc<StreamBin>> {
        self.state.lock().bins.remove(&handle)
    }

    pub(crate) fn bins(&self) -> Vec<Arc<StreamBin>> {
        self.state.lock().bins.values().cloned().collect()
    }

    pub(crate) fn track_connection(&self, connection: &Arc<StreamConnection>) {
        let mut st = self.state.lock();
        st.connections.retain(|weak| weak.strong_count() > 0);
        st.connections.push(Arc::downgrade(connection));
    }

    pub(crate) fn untrack_connection(&self, handle: ConnectionHandle) {
        let mut st = self.state.lock();
        st.connections.retain(|weak| match weak.upgrade() {
            Some(connection) => connection.handle() != handle,
            None => false,
        });
    }

    pub fn connection_count(&self) -> usize {
        self.state
            .lock()
            .connections
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Unbinds every live connection (stream teardown). Detached
    /// connections stay resolvable through their handles but refuse further
    /// traffic.
    pub(crate) fn detach_all_connections(&self) {
        let live: Vec<Arc<StreamConnection>> = {
            let mut st = self.state.lock();
            let live = st
                .connections
                .iter()
                .filter_map(|weak| weak.upgrade())
                .collect();
            st.connections.clear();
            live
        };
        for connection in live {
            connection.detach();
        }
    }
}
