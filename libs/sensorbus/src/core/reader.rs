// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Consumer-side frame acquisition.
//!
//! A [`StreamReader`] aggregates one connection per stream description
//! against a single set and turns the connections' frame-ready signals into
//! a blocking `lock(timeout)` primitive. The readiness check and the
//! condvar wait share one mutex, and the notifier takes that same mutex
//! before waking, so a frame-ready that lands between check and wait is
//! never lost.
//!
//! Readiness is level-triggered: once a bin has cycled, its front snapshot
//! stays ready, so `lock` right after an earlier `unlock` can return the
//! same latest frame without a new cycle.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::bin::FrameRef;
use crate::core::connection::{ConnectionHandle, StreamConnection};
use crate::core::descriptors::{FrameTimeout, StreamDescription};
use crate::core::error::{BusError, Result};
use crate::core::handles::{Handle, HandleTable};
use crate::core::signal::{CallbackId, Signal};
use crate::core::streamset::StreamSet;

pub type ReaderHandle = Handle<StreamReader>;

struct ReaderConnection {
    connection: Arc<StreamConnection>,
    ready_callback: CallbackId,
}

struct ReaderState {
    connections: HashMap<StreamDescription, ReaderConnection>,
    /// Checked-out frames of the currently open aggregate frame.
    locked: Option<HashMap<StreamDescription, FrameRef>>,
}

/// Aggregates stream connections for one consumer and blocks until any of
/// them has a ready frame.
pub struct StreamReader {
    handle: ReaderHandle,
    set: Arc<StreamSet>,
    weak_self: Weak<StreamReader>,
    wait: Mutex<ReaderState>,
    cond: Condvar,
    frame_ready: Signal<ReaderHandle>,
}

impl StreamReader {
    pub(crate) fn new(handle: ReaderHandle, set: Arc<StreamSet>) -> Arc<StreamReader> {
        Arc::new_cyclic(|weak_self| StreamReader {
            handle,
            set,
            weak_self: weak_self.clone(),
            wait: Mutex::new(ReaderState {
                connections: HashMap::new(),
                locked: None,
            }),
            cond: Condvar::new(),
            frame_ready: Signal::new(),
        })
    }

    pub fn handle(&self) -> ReaderHandle {
        self.handle
    }

    pub fn stream_set(&self) -> &Arc<StreamSet> {
        &self.set
    }

    /// Finds or opens the connection for `description`; one connection per
    /// distinct description per reader.
    pub fn get_stream(
        &self,
        table: &HandleTable<StreamConnection>,
        description: StreamDescription,
    ) -> Result<Arc<StreamConnection>> {
        let mut st = self.wait.lock();
        if let Some(entry) = st.connections.get(&description) {
            return Ok(entry.connection.clone());
        }

        let stream = self
            .set
            .find_stream(description)
            .ok_or(BusError::StreamNotFound(description))?;
        let (_, connection) = table.insert_with(|h| StreamConnection::new(h, stream.clone()));
        stream.track_connection(&connection);

        let weak = self.weak_self.clone();
        let ready_callback = connection
            .frame_ready()
            .subscribe(move |_: &ConnectionHandle| {
                if let Some(reader) = weak.upgrade() {
                    reader.notify_frame_ready();
                }
            });

        tracing::debug!(
            reader = ?self.handle,
            connection = ?connection.handle(),
            stream = %description,
            "opened stream connection"
        );
        st.connections.insert(
            description,
            ReaderConnection {
                connection: connection.clone(),
                ready_callback,
            },
        );
        Ok(connection)
    }

    /// Blocks until at least one started connection has a ready frame, then
    /// checks out the front snapshot of every ready connection.
    ///
    /// A timed-out wait changes no state; the caller may retry. Calling
    /// while a frame is already open succeeds without re-acquiring.
    pub fn lock(&self, timeout: FrameTimeout) -> Result<()> {
        let mut st = self.wait.lock();
        if st.locked.is_some() {
            return Ok(());
        }
        if Self::try_collect(&mut st) {
            return Ok(());
        }
        match timeout {
            FrameTimeout::Poll => Err(BusError::Timeout),
            FrameTimeout::Indefinite => loop {
                self.cond.wait(&mut st);
                if Self::try_collect(&mut st) {
                    return Ok(());
                }
            },
            FrameTimeout::Millis(ms) => {
                let deadline = Instant::now() + Duration::from_millis(ms);
                loop {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(BusError::Timeout);
                    }
                    let timed_out = self.cond.wait_for(&mut st, deadline - now).timed_out();
                    if Self::try_collect(&mut st) {
                        return Ok(());
                    }
                    if timed_out {
                        return Err(BusError::Timeout);
                    }
                }
            }
        }
    }

    /// Releases the open aggregate frame. A no-op when nothing is open.
    pub fn unlock(&self) {
        let mut st = self.wait.lock();
        if let Some(frames) = st.locked.take() {
            for description in frames.keys() {
                if let Some(entry) = st.connections.get(description) {
                    entry.connection.unlock();
                }
            }
        }
    }

    /// View of the open frame for one stream description.
    pub fn get_subframe(&self, description: StreamDescription) -> Result<FrameRef> {
        let st = self.wait.lock();
        let frames = st
            .locked
            .as_ref()
            .ok_or_else(|| BusError::InvalidParameter("no frame is open on this reader".into()))?;
        frames.get(&description).cloned().ok_or_else(|| {
            BusError::InvalidParameter(format!("stream {description} is not part of the open frame"))
        })
    }

    /// Subscribes to "any owned connection became ready". Callbacks run
    /// synchronously on the producer thread that cycled the bin; they must
    /// not call [`lock`](StreamReader::lock).
    pub fn register_frame_ready_callback(
        &self,
        callback: impl FnMut(&ReaderHandle) + Send + 'static,
    ) -> CallbackId {
        self.frame_ready.subscribe(callback)
    }

    pub fn unregister_frame_ready_callback(&self, id: CallbackId) -> bool {
        self.frame_ready.unsubscribe(id)
    }

    /// Releases every owned connection and any open frame (reader
    /// teardown).
    pub(crate) fn close(&self, table: &HandleTable<StreamConnection>) {
        let mut st = self.wait.lock();
        st.locked = None;
        for (_, entry) in st.connections.drain() {
            entry
                .connection
                .frame_ready()
                .unsubscribe(entry.ready_callback);
            entry
                .connection
                .stream()
                .untrack_connection(entry.connection.handle());
            entry.connection.detach();
            let _ = table.remove(entry.connection.handle());
        }
        tracing::debug!(reader = ?self.handle, "closed reader");
    }

    /// Called from connection frame-ready callbacks. Takes the wait mutex
    /// so a concurrent `lock` is either before its readiness check (and
    /// will see the frame) or already waiting (and gets woken).
    fn notify_frame_ready(&self) {
        drop(self.wait.lock());
        self.cond.notify_all();
        self.frame_ready.raise(&self.handle);
    }

    fn try_collect(st: &mut ReaderState) -> bool {
        let mut frames = HashMap::new();
        for (description, entry) in &st.connections {
            if let Ok(frame) = entry.connection.lock() {
                frames.insert(*description, FrameRef::new(*description, frame));
            }
        }
        if frames.is_empty() {
            false
        } else {
            st.locked = Some(frames);
            true
        }
    }
}
