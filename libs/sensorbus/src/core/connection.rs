// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! A consumer's bound view onto one stream.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::bin::{Frame, StreamBin};
use crate::core::descriptors::{ParameterId, StreamDescription};
use crate::core::error::{BusError, Result};
use crate::core::handles::Handle;
use crate::core::signal::{CallbackId, Signal};
use crate::core::stream::Stream;

pub type ConnectionHandle = Handle<StreamConnection>;

struct ConnectionState {
    started: bool,
    detached: bool,
    bin: Option<Arc<StreamBin>>,
    bin_callback: Option<CallbackId>,
    locked: Option<Arc<Frame>>,
}

/// Binds one consumer to one stream, and through `set_bin` to at most one
/// bin. Linking re-raises the bin's frame-ready as this connection's own
/// signal, so readers watch connections, never bins.
pub struct StreamConnection {
    handle: ConnectionHandle,
    stream: Arc<Stream>,
    weak_self: Weak<StreamConnection>,
    state: Mutex<ConnectionState>,
    frame_ready: Signal<ConnectionHandle>,
}

impl StreamConnection {
    pub(crate) fn new(handle: ConnectionHandle, stream: Arc<Stream>) -> Arc<StreamConnection> {
        Arc::new_cyclic(|weak_self| StreamConnection {
            handle,
            stream,
            weak_self: weak_self.clone(),
            state: Mutex::new(ConnectionState {
                started: false,
                detached: false,
                bin: None,
                bin_callback: None,
                locked: None,
            }),
            frame_ready: Signal::new(),
        })
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }

    pub fn description(&self) -> StreamDescription {
        self.stream.description()
    }

    pub fn frame_ready(&self) -> &Signal<ConnectionHandle> {
        &self.frame_ready
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn is_detached(&self) -> bool {
        self.state.lock().detached
    }

    /// Links `bin` (or unlinks with None). The previous bin, if any, loses
    /// this connection's client count and frame-ready subscription.
    pub fn set_bin(&self, bin: Option<Arc<StreamBin>>) -> Result<()> {
        let mut st = self.state.lock();
        if st.detached {
            return Err(BusError::Detached);
        }
        Self::unlink_locked(&mut st);
        if let Some(bin) = bin {
            let weak = self.weak_self.clone();
            let handle = self.handle;
            let callback = bin.frame_ready().subscribe(move |_frame_index: &u64| {
                if let Some(connection) = weak.upgrade() {
                    connection.frame_ready.raise(&handle);
                }
            });
            bin.connect_client();
            st.bin = Some(bin);
            st.bin_callback = Some(callback);
        }
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        {
            let mut st = self.state.lock();
            if st.detached {
                return Err(BusError::Detached);
            }
            if st.started {
                return Ok(());
            }
            st.started = true;
        }
        // Hook runs outside the state lock; plugins link bins from here.
        self.stream.callbacks().connection_started(self.handle);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        {
            let mut st = self.state.lock();
            if st.detached {
                return Err(BusError::Detached);
            }
            if !st.started {
                return Ok(());
            }
            st.started = false;
        }
        self.stream.callbacks().connection_stopped(self.handle);
        Ok(())
    }

    /// Checks out the bin's current front snapshot. Never blocks; waiting
    /// lives in the reader. While a frame is checked out, re-locking
    /// returns the same snapshot.
    pub fn lock(&self) -> Result<Arc<Frame>> {
        let mut st = self.state.lock();
        if st.detached {
            return Err(BusError::Detached);
        }
        if !st.started {
            return Err(BusError::NotStarted);
        }
        if let Some(frame) = &st.locked {
            return Ok(frame.clone());
        }
        let bin = st.bin.as_ref().ok_or(BusError::NoBinLinked)?;
        let frame = bin.front_frame().ok_or(BusError::NoFrameAvailable)?;
        st.locked = Some(frame.clone());
        Ok(frame)
    }

    pub fn unlock(&self) {
        self.state.lock().locked = None;
    }

    pub fn set_parameter(&self, id: ParameterId, data: &[u8]) -> Result<()> {
        self.ensure_attached()?;
        self.stream.callbacks().set_parameter(self.handle, id, data)
    }

    pub fn get_parameter_size(&self, id: ParameterId) -> Result<usize> {
        self.ensure_attached()?;
        self.stream.callbacks().get_parameter_size(self.handle, id)
    }

    pub fn get_parameter_data(&self, id: ParameterId, out: &mut [u8]) -> Result<()> {
        self.ensure_attached()?;
        self.stream
            .callbacks()
            .get_parameter_data(self.handle, id, out)
    }

    /// Severs the connection from its bin and stream. Used when the stream
    /// is destroyed under the consumer and when the owning reader closes.
    pub(crate) fn detach(&self) {
        let mut st = self.state.lock();
        st.detached = true;
        st.started = false;
        st.locked = None;
        Self::unlink_locked(&mut st);
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.state.lock().detached {
            return Err(BusError::Detached);
        }
        Ok(())
    }

    fn unlink_locked(st: &mut ConnectionState) {
        if let Some(previous) = st.bin.take() {
            if let Some(callback) = st.bin_callback.take() {
                previous.frame_ready().unsubscribe(callback);
            }
            previous.disconnect_client();
        }
    }
}
