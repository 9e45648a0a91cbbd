// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Producer-facing facade.
//!
//! Every producer operation that mutates shared catalog, bin or connection
//! state funnels through [`PluginService`] so the host-side notifications
//! fire at the correct point: stream-added strictly after the stream is
//! fully constructed and resolvable, stream-removing strictly before
//! teardown begins. Registration of a stream-added subscriber replays the
//! existing catalog synchronously (catch-up), under the same topology guard
//! that serializes stream creation, so a late subscriber sees every stream
//! exactly once.
//!
//! Stream-added and stream-removing callbacks run under the topology guard:
//! they may resolve handles and inspect streams, but must not create or
//! destroy streams, or register further topology callbacks.

use std::sync::Arc;

use crate::core::bin::{BinHandle, StreamBin};
use crate::core::connection::ConnectionHandle;
use crate::core::context::ContextShared;
use crate::core::descriptors::{HostEventId, StreamDescription};
use crate::core::error::{BusError, Result};
use crate::core::parameters::{ParameterBin, ParameterBinHandle};
use crate::core::signal::CallbackId;
use crate::core::stream::{Stream, StreamCallbacks, StreamHandle};
use crate::core::streamset::{StreamEvent, StreamSetHandle};

/// Opaque broadcast from a plugin to the host application (device arrival,
/// errors, vendor notifications).
#[derive(Debug, Clone)]
pub struct HostEvent {
    pub id: HostEventId,
    pub data: Vec<u8>,
}

/// Cheap-to-clone producer handle onto the shared context state. One is
/// passed to every plugin's `initialize`; clones may cross threads.
#[derive(Clone)]
pub struct PluginService {
    shared: Arc<ContextShared>,
}

impl PluginService {
    pub(crate) fn new(shared: Arc<ContextShared>) -> PluginService {
        PluginService { shared }
    }

    /// Existing set for `uri`, or a freshly created one.
    pub fn create_stream_set(&self, uri: &str) -> Result<StreamSetHandle> {
        let set = self.shared.catalog.get_or_add(&self.shared.sets, uri);
        Ok(set.handle())
    }

    /// Destroys the set and every stream it still owns.
    pub fn destroy_stream_set(&self, set: StreamSetHandle) -> Result<()> {
        let set = self.shared.sets.get(set)?;
        for stream in set.streams() {
            self.destroy_stream(stream.handle())?;
        }
        self.shared.catalog.remove(set.uri());
        self.shared.sets.remove(set.handle())?;
        tracing::info!(uri = set.uri(), set = ?set.handle(), "destroyed stream set");
        Ok(())
    }

    /// Registers a stream under `set` and raises stream-added.
    ///
    /// The stream is resolvable through its handle before the notification
    /// fires; subscribers never observe a half-constructed stream.
    pub fn create_stream(
        &self,
        set: StreamSetHandle,
        description: StreamDescription,
        callbacks: Arc<dyn StreamCallbacks>,
    ) -> Result<StreamHandle> {
        let set = self.shared.sets.get(set)?;
        let _topology = self.shared.topology.lock();
        let (handle, stream) = self
            .shared
            .streams
            .insert_with(|h| Arc::new(Stream::new(h, description, callbacks)));
        set.add_stream(stream);
        tracing::info!(
            set = ?set.handle(),
            stream = ?handle,
            description = %description,
            "registered stream"
        );
        self.shared.stream_added.raise(&StreamEvent {
            set: set.handle(),
            stream: handle,
            description,
        });
        Ok(handle)
    }

    /// Raises stream-removing, then tears the stream down: bound
    /// connections are detached, owned bins destroyed, handles retired.
    pub fn destroy_stream(&self, stream: StreamHandle) -> Result<()> {
        let stream_obj = self.shared.streams.get(stream)?;
        let set = self
            .shared
            .catalog
            .find_streamset_for_stream(stream)
            .ok_or_else(|| {
                BusError::InvalidParameter("stream is not registered in any set".into())
            })?;
        {
            let _topology = self.shared.topology.lock();
            self.shared.stream_removing.raise(&StreamEvent {
                set: set.handle(),
                stream,
                description: stream_obj.description(),
            });
            set.remove_stream(stream);
        }
        stream_obj.detach_all_connections();
        for bin in stream_obj.bins() {
            stream_obj.remove_bin(bin.handle());
            let _ = self.shared.bins.remove(bin.handle());
        }
        self.shared.streams.remove(stream)?;
        tracing::info!(
            set = ?set.handle(),
            stream = ?stream,
            description = %stream_obj.description(),
            "destroyed stream"
        );
        Ok(())
    }

    /// Allocates a double-buffered bin of `byte_length` under `stream`.
    /// Nothing is registered if allocation fails.
    pub fn create_stream_bin(&self, stream: StreamHandle, byte_length: usize) -> Result<BinHandle> {
        let stream = self.shared.streams.get(stream)?;
        let (handle, bin) = self
            .shared
            .bins
            .try_insert_with(|h| StreamBin::new(h, byte_length).map(Arc::new))?;
        stream.add_bin(bin);
        tracing::info!(
            stream = ?stream.handle(),
            bin = ?handle,
            byte_length,
            "created stream bin"
        );
        Ok(handle)
    }

    /// Refused while connections are still linked; unlink them first.
    pub fn destroy_stream_bin(&self, stream: StreamHandle, bin: BinHandle) -> Result<()> {
        let stream = self.shared.streams.get(stream)?;
        let bin_obj = self.shared.bins.get(bin)?;
        if bin_obj.has_clients_connected() {
            return Err(BusError::BinInUse);
        }
        stream.remove_bin(bin);
        self.shared.bins.remove(bin)?;
        tracing::info!(stream = ?stream.handle(), bin = ?bin, "destroyed stream bin");
        Ok(())
    }

    /// Producer write access to the bin's back buffer.
    pub fn with_back_buffer<R>(
        &self,
        bin: BinHandle,
        write: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        Ok(self.shared.bins.get(bin)?.with_back_buffer(write))
    }

    /// Publishes the back buffer as the new front. Returns the frame index.
    pub fn cycle_stream_bin(&self, bin: BinHandle) -> Result<u64> {
        self.shared.bins.get(bin)?.cycle_buffers()
    }

    /// True while at least one connection links to the bin; producers skip
    /// rendering when false.
    pub fn has_clients_connected(&self, bin: BinHandle) -> Result<bool> {
        Ok(self.shared.bins.get(bin)?.has_clients_connected())
    }

    /// Links (`Some`) or unlinks (`None`) a connection's bin.
    pub fn link_connection_to_bin(
        &self,
        connection: ConnectionHandle,
        bin: Option<BinHandle>,
    ) -> Result<()> {
        let connection = self.shared.connections.get(connection)?;
        let bin = match bin {
            Some(handle) => Some(self.shared.bins.get(handle)?),
            None => None,
        };
        let linked = bin.is_some();
        connection.set_bin(bin)?;
        tracing::debug!(connection = ?connection.handle(), linked, "relinked connection");
        Ok(())
    }

    pub fn get_stream_description(&self, connection: ConnectionHandle) -> Result<StreamDescription> {
        Ok(self.shared.connections.get(connection)?.description())
    }

    /// Subscribes to stream-added and synchronously replays every stream
    /// already in the catalog before returning.
    pub fn register_stream_added_callback(
        &self,
        callback: impl FnMut(&StreamEvent) + Send + 'static,
    ) -> CallbackId {
        let _topology = self.shared.topology.lock();
        let id = self.shared.stream_added.subscribe(callback);
        for event in self.shared.catalog.stream_events() {
            self.shared.stream_added.raise_for(id, &event);
        }
        id
    }

    pub fn unregister_stream_added_callback(&self, id: CallbackId) -> bool {
        self.shared.stream_added.unsubscribe(id)
    }

    pub fn register_stream_removing_callback(
        &self,
        callback: impl FnMut(&StreamEvent) + Send + 'static,
    ) -> CallbackId {
        self.shared.stream_removing.subscribe(callback)
    }

    pub fn unregister_stream_removing_callback(&self, id: CallbackId) -> bool {
        self.shared.stream_removing.unsubscribe(id)
    }

    pub fn create_parameter_bin(&self, byte_length: usize) -> Result<ParameterBinHandle> {
        let (handle, _) = self
            .shared
            .parameter_bins
            .try_insert_with(|h| ParameterBin::new(h, byte_length).map(Arc::new))?;
        Ok(handle)
    }

    pub fn with_parameter_bin_buffer<R>(
        &self,
        bin: ParameterBinHandle,
        access: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        Ok(self.shared.parameter_bins.get(bin)?.with_buffer(access))
    }

    pub fn release_parameter_bin(&self, bin: ParameterBinHandle) -> Result<()> {
        self.shared.parameter_bins.remove(bin)?;
        Ok(())
    }

    /// Broadcasts an opaque event to host-side subscribers.
    pub fn notify_host_event(&self, id: HostEventId, data: &[u8]) {
        self.shared.host_events.raise(&HostEvent {
            id,
            data: data.to_vec(),
        });
    }

    pub fn register_host_event_callback(
        &self,
        callback: impl FnMut(&HostEvent) + Send + 'static,
    ) -> CallbackId {
        self.shared.host_events.subscribe(callback)
    }

    pub fn unregister_host_event_callback(&self, id: CallbackId) -> bool {
        self.shared.host_events.unsubscribe(id)
    }
}
