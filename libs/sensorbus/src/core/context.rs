// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The orchestrator owning all shared state.
//!
//! A [`Context`] is the single entry point for host applications: it loads
//! plugins, pumps them, and exposes the consumer surface (stream sets,
//! readers, frames, parameters). There is no ambient global; everything an
//! operation touches hangs off the context the caller holds.
//!
//! Lifecycle is two-phase. `initialize` hands each registered plugin a
//! [`PluginService`] clone; `terminate` unwinds in the reverse direction of
//! data flow: consumers (readers and their connections) first, then plugin
//! teardown hooks, then whatever catalog state plugins left behind. `Drop`
//! calls `terminate` as a backstop, so a context that falls out of scope
//! never strands producer threads behind live-looking handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::bin::{FrameRef, StreamBin};
use crate::core::connection::{ConnectionHandle, StreamConnection};
use crate::core::descriptors::{FrameTimeout, ParameterId, StreamDescription};
use crate::core::error::Result;
use crate::core::handles::HandleTable;
use crate::core::parameters::ParameterBin;
use crate::core::plugin::SensorPlugin;
use crate::core::plugin_service::{HostEvent, PluginService};
use crate::core::reader::{ReaderHandle, StreamReader};
use crate::core::signal::{CallbackId, Signal};
use crate::core::stream::Stream;
use crate::core::streamset::{StreamEvent, StreamSet, StreamSetCatalog, StreamSetHandle};

/// Everything shared between the context, its plugin services, and the
/// objects they create. Handle tables give out generation-checked handles;
/// the catalog maps URIs to sets; the topology guard serializes stream
/// registration against catch-up replay.
pub(crate) struct ContextShared {
    pub(crate) sets: HandleTable<StreamSet>,
    pub(crate) streams: HandleTable<Stream>,
    pub(crate) bins: HandleTable<StreamBin>,
    pub(crate) connections: HandleTable<StreamConnection>,
    pub(crate) readers: HandleTable<StreamReader>,
    pub(crate) parameter_bins: HandleTable<ParameterBin>,
    pub(crate) catalog: StreamSetCatalog,
    pub(crate) stream_added: Signal<StreamEvent>,
    pub(crate) stream_removing: Signal<StreamEvent>,
    pub(crate) host_events: Signal<HostEvent>,
    pub(crate) topology: Mutex<()>,
}

struct PluginSlot {
    plugin: Box<dyn SensorPlugin>,
}

/// Host-side orchestrator. See the module docs for the lifecycle contract.
pub struct Context {
    shared: Arc<ContextShared>,
    plugins: Mutex<Vec<PluginSlot>>,
    initialized: AtomicBool,
}

impl Context {
    pub fn new() -> Context {
        Context {
            shared: Arc::new(ContextShared {
                sets: HandleTable::new("stream set"),
                streams: HandleTable::new("stream"),
                bins: HandleTable::new("stream bin"),
                connections: HandleTable::new("connection"),
                readers: HandleTable::new("reader"),
                parameter_bins: HandleTable::new("parameter bin"),
                catalog: StreamSetCatalog::new(),
                stream_added: Signal::new(),
                stream_removing: Signal::new(),
                host_events: Signal::new(),
                topology: Mutex::new(()),
            }),
            plugins: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Producer handle onto this context's shared state. Plugins receive one
    /// through `initialize`; in-process producers may grab one directly.
    pub fn plugin_service(&self) -> PluginService {
        PluginService::new(self.shared.clone())
    }

    /// Queues a plugin for `initialize`. After the context is initialized,
    /// registration initializes the plugin immediately.
    pub fn register_plugin(&self, mut plugin: Box<dyn SensorPlugin>) {
        if self.initialized.load(Ordering::SeqCst) {
            let name = plugin.name().to_string();
            match plugin.initialize(self.plugin_service()) {
                Ok(()) => {
                    tracing::info!(plugin = %name, "plugin initialized");
                    self.plugins.lock().push(PluginSlot { plugin });
                }
                Err(err) => {
                    tracing::warn!(plugin = %name, error = %err, "plugin failed to initialize, unloading");
                }
            }
            return;
        }
        self.plugins.lock().push(PluginSlot { plugin });
    }

    /// Hands every registered plugin a [`PluginService`] clone. A plugin
    /// whose `initialize` fails is logged and unloaded; the rest proceed.
    /// Idempotent.
    pub fn initialize(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut plugins = self.plugins.lock();
        plugins.retain_mut(|slot| {
            let name = slot.plugin.name().to_string();
            match slot.plugin.initialize(PluginService::new(self.shared.clone())) {
                Ok(()) => {
                    tracing::info!(plugin = %name, "plugin initialized");
                    true
                }
                Err(err) => {
                    tracing::warn!(plugin = %name, error = %err, "plugin failed to initialize, unloading");
                    false
                }
            }
        });
    }

    /// Pumps every live plugin's `update` hook. Drives frame production for
    /// plugins without their own threads; a failing plugin is logged and the
    /// pump continues.
    pub fn update(&self) {
        let mut plugins = self.plugins.lock();
        for slot in plugins.iter_mut() {
            if let Err(err) = slot.plugin.update() {
                tracing::warn!(plugin = slot.plugin.name(), error = %err, "plugin update failed");
            }
        }
    }

    /// Tears the context down: readers and their connections first, then
    /// plugin `terminate` hooks, then any catalog state plugins left behind.
    /// Idempotent; also invoked by `Drop`.
    pub fn terminate(&self) {
        let was_initialized = self.initialized.swap(false, Ordering::SeqCst);

        // Consumers go first so plugin teardown never races an active wait.
        for reader in self.shared.readers.drain() {
            reader.close(&self.shared.connections);
        }

        let mut plugins = self.plugins.lock();
        if was_initialized {
            for slot in plugins.iter_mut() {
                let name = slot.plugin.name().to_string();
                if let Err(err) = slot.plugin.terminate() {
                    tracing::warn!(plugin = %name, error = %err, "plugin terminate failed");
                }
            }
        }
        plugins.clear();
        drop(plugins);

        // Anything the plugins did not destroy themselves.
        for connection in self.shared.connections.drain() {
            connection.detach();
        }
        self.shared.bins.drain();
        self.shared.streams.drain();
        self.shared.catalog.clear();
        self.shared.sets.drain();
        self.shared.parameter_bins.drain();

        if was_initialized {
            tracing::info!("context terminated");
        }
    }

    /// Existing set for `uri`, or a freshly created (empty) one that plugins
    /// may later populate.
    pub fn open_stream_set(&self, uri: &str) -> Result<StreamSetHandle> {
        let set = self.shared.catalog.get_or_add(&self.shared.sets, uri);
        Ok(set.handle())
    }

    /// Releases the host's reference. Sets are owned by their producers;
    /// this only validates the handle.
    pub fn close_stream_set(&self, set: StreamSetHandle) -> Result<()> {
        self.shared.sets.get(set)?;
        Ok(())
    }

    pub fn create_reader(&self, set: StreamSetHandle) -> Result<ReaderHandle> {
        let set = self.shared.sets.get(set)?;
        let (handle, _) = self
            .shared
            .readers
            .insert_with(|h| StreamReader::new(h, set.clone()));
        tracing::debug!(reader = ?handle, uri = set.uri(), "created reader");
        Ok(handle)
    }

    /// Closes the reader: open frame released, connections detached and
    /// retired.
    pub fn destroy_reader(&self, reader: ReaderHandle) -> Result<()> {
        let reader_obj = self.shared.readers.remove(reader)?;
        reader_obj.close(&self.shared.connections);
        tracing::debug!(reader = ?reader, "destroyed reader");
        Ok(())
    }

    /// Connection to the set's stream matching `description`, created on
    /// first request.
    pub fn get_stream(
        &self,
        reader: ReaderHandle,
        description: StreamDescription,
    ) -> Result<ConnectionHandle> {
        let reader = self.shared.readers.get(reader)?;
        let connection = reader.get_stream(&self.shared.connections, description)?;
        Ok(connection.handle())
    }

    pub fn start_stream(&self, connection: ConnectionHandle) -> Result<()> {
        self.shared.connections.get(connection)?.start()
    }

    pub fn stop_stream(&self, connection: ConnectionHandle) -> Result<()> {
        self.shared.connections.get(connection)?.stop()
    }

    pub fn get_stream_description(&self, connection: ConnectionHandle) -> Result<StreamDescription> {
        Ok(self.shared.connections.get(connection)?.description())
    }

    /// Blocks up to `timeout` for a ready frame, then checks out a coherent
    /// snapshot across the reader's started connections.
    pub fn open_frame(&self, reader: ReaderHandle, timeout: FrameTimeout) -> Result<()> {
        self.shared.readers.get(reader)?.lock(timeout)
    }

    pub fn close_frame(&self, reader: ReaderHandle) -> Result<()> {
        self.shared.readers.get(reader)?.unlock();
        Ok(())
    }

    /// One stream's snapshot out of the reader's open frame.
    pub fn get_subframe(
        &self,
        reader: ReaderHandle,
        description: StreamDescription,
    ) -> Result<FrameRef> {
        self.shared.readers.get(reader)?.get_subframe(description)
    }

    pub fn set_parameter(
        &self,
        connection: ConnectionHandle,
        id: ParameterId,
        data: &[u8],
    ) -> Result<()> {
        self.shared.connections.get(connection)?.set_parameter(id, data)
    }

    pub fn get_parameter_size(&self, connection: ConnectionHandle, id: ParameterId) -> Result<usize> {
        self.shared.connections.get(connection)?.get_parameter_size(id)
    }

    /// Copies the parameter value into `out`, whose length the caller sizes
    /// from `get_parameter_size`.
    pub fn get_parameter_data(
        &self,
        connection: ConnectionHandle,
        id: ParameterId,
        out: &mut [u8],
    ) -> Result<()> {
        self.shared
            .connections
            .get(connection)?
            .get_parameter_data(id, out)
    }

    pub fn register_frame_ready_callback(
        &self,
        reader: ReaderHandle,
        callback: impl FnMut(&ReaderHandle) + Send + 'static,
    ) -> Result<CallbackId> {
        Ok(self
            .shared
            .readers
            .get(reader)?
            .register_frame_ready_callback(callback))
    }

    pub fn unregister_frame_ready_callback(
        &self,
        reader: ReaderHandle,
        id: CallbackId,
    ) -> Result<bool> {
        Ok(self
            .shared
            .readers
            .get(reader)?
            .unregister_frame_ready_callback(id))
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

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bin::BinHandle;
    use crate::core::descriptors::{StreamSubtype, StreamType};
    use crate::core::error::BusError;
    use crate::core::stream::StreamCallbacks;
    use std::sync::atomic::AtomicUsize;

    struct NoopCallbacks;
    impl StreamCallbacks for NoopCallbacks {}

    fn color() -> StreamDescription {
        StreamDescription::new(StreamType::COLOR, StreamSubtype::DEFAULT)
    }

    #[derive(Default)]
    struct Counters {
        initialized: AtomicUsize,
        updated: AtomicUsize,
        terminated: AtomicUsize,
    }

    struct CountingPlugin {
        name: &'static str,
        fail_initialize: bool,
        counters: Arc<Counters>,
    }

    impl SensorPlugin for CountingPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn initialize(&mut self, _service: PluginService) -> Result<()> {
            self.counters.initialized.fetch_add(1, Ordering::SeqCst);
            if self.fail_initialize {
                return Err(BusError::InvalidParameter("bad device".into()));
            }
            Ok(())
        }

        fn update(&mut self) -> Result<()> {
            self.counters.updated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn terminate(&mut self) -> Result<()> {
            self.counters.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn counting(name: &'static str, fail_initialize: bool) -> (Box<CountingPlugin>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let plugin = Box::new(CountingPlugin {
            name,
            fail_initialize,
            counters: counters.clone(),
        });
        (plugin, counters)
    }

    #[test]
    fn test_failed_plugin_is_unloaded_and_the_rest_proceed() {
        let context = Context::new();
        let (good, good_counters) = counting("good", false);
        let (bad, bad_counters) = counting("bad", true);
        context.register_plugin(good);
        context.register_plugin(bad);

        context.initialize();
        context.update();

        assert_eq!(good_counters.updated.load(Ordering::SeqCst), 1);
        assert_eq!(bad_counters.updated.load(Ordering::SeqCst), 0);

        context.terminate();
        assert_eq!(good_counters.terminated.load(Ordering::SeqCst), 1);
        assert_eq!(bad_counters.terminated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let context = Context::new();
        let (plugin, counters) = counting("once", false);
        context.register_plugin(plugin);

        context.initialize();
        context.initialize();
        assert_eq!(counters.initialized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_registration_initializes_immediately() {
        let context = Context::new();
        context.initialize();

        let (plugin, counters) = counting("late", false);
        context.register_plugin(plugin);
        assert_eq!(counters.initialized.load(Ordering::SeqCst), 1);

        context.update();
        assert_eq!(counters.updated.load(Ordering::SeqCst), 1);
    }

    struct ProbePlugin {
        service: Option<PluginService>,
        bin: Arc<Mutex<Option<BinHandle>>>,
        clients_at_terminate: Arc<Mutex<Option<bool>>>,
    }

    impl SensorPlugin for ProbePlugin {
        fn name(&self) -> &str {
            "probe"
        }

        fn initialize(&mut self, service: PluginService) -> Result<()> {
            let set = service.create_stream_set("probe/0")?;
            let stream = service.create_stream(set, color(), Arc::new(NoopCallbacks))?;
            *self.bin.lock() = Some(service.create_stream_bin(stream, 4)?);
            self.service = Some(service);
            Ok(())
        }

        fn terminate(&mut self) -> Result<()> {
            let service = self.service.take().expect("initialized");
            let bin = (*self.bin.lock()).expect("bin created");
            *self.clients_at_terminate.lock() = Some(service.has_clients_connected(bin)?);
            Ok(())
        }
    }

    #[test]
    fn test_terminate_closes_readers_before_plugin_teardown() {
        let context = Context::new();
        let bin_cell = Arc::new(Mutex::new(None));
        let clients_at_terminate = Arc::new(Mutex::new(None));
        context.register_plugin(Box::new(ProbePlugin {
            service: None,
            bin: bin_cell.clone(),
            clients_at_terminate: clients_at_terminate.clone(),
        }));
        context.initialize();

        let set = context.open_stream_set("probe/0").expect("set exists");
        let reader = context.create_reader(set).expect("reader");
        let connection = context.get_stream(reader, color()).expect("connection");
        let bin = (*bin_cell.lock()).expect("plugin created its bin");
        let service = context.plugin_service();
        service
            .link_connection_to_bin(connection, Some(bin))
            .expect("link");
        assert!(service.has_clients_connected(bin).expect("bin alive"));

        context.terminate();
        // The reader was closed first, so the hook saw no clients.
        assert_eq!(*clients_at_terminate.lock(), Some(false));

        // Terminate drained everything; old handles are stale.
        assert!(matches!(
            context.create_reader(set),
            Err(BusError::StaleHandle(_))
        ));
    }

    #[test]
    fn test_drop_backstops_terminate() {
        let (plugin, counters) = counting("scoped", false);
        {
            let context = Context::new();
            context.register_plugin(plugin);
            context.initialize();
        }
        assert_eq!(counters.terminated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_stream_set_is_idempotent_by_uri() {
        let context = Context::new();
        let first = context.open_stream_set("device/0").expect("open");
        let second = context.open_stream_set("device/0").expect("open again");
        let other = context.open_stream_set("device/1").expect("open other");
        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn test_host_surface_validates_handles() {
        let context = Context::new();
        let set = context.open_stream_set("device/0").expect("open");
        let reader = context.create_reader(set).expect("reader");

        context.destroy_reader(reader).expect("destroy");
        assert!(matches!(
            context.open_frame(reader, FrameTimeout::Poll),
            Err(BusError::StaleHandle(_))
        ));
        assert!(matches!(
            context.destroy_reader(reader),
            Err(BusError::StaleHandle(_))
        ));
    }
}
