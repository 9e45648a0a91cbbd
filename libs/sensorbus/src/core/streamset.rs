// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! URI-addressed stream namespace.
//!
//! The catalog maps URIs ("device/0") to [`StreamSet`]s, created lazily on
//! first reference. Sets own their streams; the reverse lookup
//! `find_streamset_for_stream` exists so removal notifications can be
//! routed through the correct set.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::descriptors::StreamDescription;
use crate::core::handles::{Handle, HandleTable};
use crate::core::stream::{Stream, StreamHandle};

pub type StreamSetHandle = Handle<StreamSet>;

/// Payload of stream-added / stream-removing notifications.
#[derive(Debug, Clone, Copy)]
pub struct StreamEvent {
    pub set: StreamSetHandle,
    pub stream: StreamHandle,
    pub description: StreamDescription,
}

/// One URI's collection of streams.
pub struct StreamSet {
    handle: StreamSetHandle,
    uri: String,
    streams: Mutex<HashMap<StreamHandle, Arc<Stream>>>,
}

impl StreamSet {
    pub(crate) fn new(handle: StreamSetHandle, uri: String) -> StreamSet {
        StreamSet {
            handle,
            uri,
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle(&self) -> StreamSetHandle {
        self.handle
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub(crate) fn add_stream(&self, stream: Arc<Stream>) {
        self.streams.lock().insert(stream.handle(), stream);
    }

    pub(crate) fn remove_stream(&self, handle: StreamHandle) -> Option<Arc<Stream>> {
        self.streams.lock().remove(&handle)
    }

    /// First stream matching the description, if any is registered.
    pub fn find_stream(&self, description: StreamDescription) -> Option<Arc<Stream>> {
        self.streams
            .lock()
            .values()
            .find(|stream| stream.description() == description)
            .cloned()
    }

    pub fn contains_stream(&self, handle: StreamHandle) -> bool {
        self.streams.lock().contains_key(&handle)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    pub(crate) fn streams(&self) -> Vec<Arc<Stream>> {
        self.streams.lock().values().cloned().collect()
    }
}

/// Process-wide URI → set map.
pub struct StreamSetCatalog {
    sets: Mutex<HashMap<String, Arc<StreamSet>>>,
}

impl StreamSetCatalog {
    pub(crate) fn new() -> StreamSetCatalog {
        StreamSetCatalog {
            sets: Mutex::new(HashMap::new()),
        }
    }

    /// Existing set for `uri`, or a freshly registered one. Idempotent by
    /// URI.
    pub(crate) fn get_or_add(
        &self,
        table: &HandleTable<StreamSet>,
        uri: &str,
    ) -> Arc<StreamSet> {
        let mut sets = self.sets.lock();
        if let Some(set) = sets.get(uri) {
            return set.clone();
        }
        let (handle, set) =
            table.insert_with(|h| Arc::new(StreamSet::new(h, uri.to_string())));
        sets.insert(uri.to_string(), set.clone());
        tracing::info!(uri, set = ?handle, "created stream set");
        set
    }

    pub(crate) fn remove(&self, uri: &str) -> Option<Arc<StreamSet>> {
        self.sets.lock().remove(uri)
    }

    /// Set owning the given stream, if any.
    pub fn find_streamset_for_stream(&self, stream: StreamHandle) -> Option<Arc<StreamSet>> {
        self.sets
            .lock()
            .values()
            .find(|set| set.contains_stream(stream))
            .cloned()
    }

    pub(crate) fn clear(&self) {
        self.sets.lock().clear();
    }

    /// Snapshot of every registered stream, for catch-up replay to a new
    /// stream-added subscriber.
    pub(crate) fn stream_events(&self) -> Vec<StreamEvent> {
        let sets = self.sets.lock();
        let mut events = Vec::new();
        for set in sets.values() {
            for stream in set.streams() {
                events.push(StreamEvent {
                    set: set.handle(),
                    stream: stream.handle(),
                    description: stream.description(),
                });
            }
        }
        events
    }
}
