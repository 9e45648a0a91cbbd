// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Double-buffered frame transport for one stream.
//!
//! A [`StreamBin`] owns a producer-writable back buffer and publishes a
//! refcounted front snapshot. `cycle_buffers` promotes back to front under
//! the bin lock and only then raises the bin's frame-ready signal, so any
//! consumer that observes the notification sees the completed frame.
//!
//! Latest-wins, no backlog: a consumer that locks after two cycles observes
//! only the second frame. The retiring front is reclaimed as the next back
//! buffer when no reader still holds it; a pinned snapshot forces a fresh
//! allocation so a slow reader is never handed bytes from the next write
//! pass and never blocks the producer.

use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::descriptors::StreamDescription;
use crate::core::error::{BusError, Result};
use crate::core::handles::Handle;
use crate::core::signal::Signal;

pub type BinHandle = Handle<StreamBin>;

/// One completed frame: payload bytes plus the cycle ordinal that produced
/// it. Consumers hold frames through `Arc`, keeping a snapshot valid for as
/// long as they need it regardless of later cycles.
pub struct Frame {
    frame_index: u64,
    data: Box<[u8]>,
}

impl Frame {
    fn allocate(byte_length: usize) -> Result<Frame> {
        let mut data = Vec::new();
        data.try_reserve_exact(byte_length)
            .map_err(|_| BusError::AllocationFailed(byte_length))?;
        data.resize(byte_length, 0);
        Ok(Frame {
            frame_index: 0,
            data: data.into_boxed_slice(),
        })
    }

    /// Monotonic per-bin ordinal, stamped when the frame was promoted to
    /// front. Zero only for a buffer that was never published.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_length(&self) -> usize {
        self.data.len()
    }
}

/// Consumer-visible view of a checked-out frame: the stream it came from
/// plus the snapshot itself.
#[derive(Clone)]
pub struct FrameRef {
    description: StreamDescription,
    frame: Arc<Frame>,
}

impl FrameRef {
    pub(crate) fn new(description: StreamDescription, frame: Arc<Frame>) -> Self {
        FrameRef { description, frame }
    }

    pub fn description(&self) -> StreamDescription {
        self.description
    }

    pub fn frame_index(&self) -> u64 {
        self.frame.frame_index()
    }

    pub fn data(&self) -> &[u8] {
        self.frame.data()
    }

    pub fn byte_length(&self) -> usize {
        self.frame.byte_length()
    }
}

struct BinState {
    /// Last completed frame; None until the first cycle.
    front: Option<Arc<Frame>>,
    /// In-progress frame, writable by the producer between cycles.
    back: Frame,
    cycles: u64,
}

/// The double buffer behind one stream.
pub struct StreamBin {
    handle: BinHandle,
    byte_length: usize,
    clients: AtomicUsize,
    state: Mutex<BinState>,
    frame_ready: Signal<u64>,
}

impl StreamBin {
    pub(crate) fn new(handle: BinHandle, byte_length: usize) -> Result<StreamBin> {
        let back = Frame::allocate(byte_length)?;
        Ok(StreamBin {
            handle,
            byte_length,
            clients: AtomicUsize::new(0),
            state: Mutex::new(BinState {
                front: None,
                back,
                cycles: 0,
            }),
            frame_ready: Signal::new(),
        })
    }

    pub fn handle(&self) -> BinHandle {
        self.handle
    }

    /// Declared frame size, fixed at creation.
    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    /// Raised with the new frame index after each completed cycle.
    pub fn frame_ready(&self) -> &Signal<u64> {
        &self.frame_ready
    }

    /// True while at least one connection links to this bin. Producers use
    /// it to skip rendering frames nobody consumes.
    pub fn has_clients_connected(&self) -> bool {
        self.clients.load(Ordering::Acquire) > 0
    }

    pub(crate) fn connect_client(&self) {
        self.clients.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn disconnect_client(&self) {
        self.clients.fetch_sub(1, Ordering::AcqRel);
    }

    /// Producer write access to the back buffer. The bin lock is held for
    /// the duration of `write`; consumers fetching the front snapshot wait
    /// only for that, never for each other.
    pub fn with_back_buffer<R>(&self, write: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut st = self.state.lock();
        write(&mut st.back.data)
    }

    /// Promotes the back buffer to front and readies a back buffer for the
    /// next write pass. Returns the published frame index.
    ///
    /// The frame-ready signal is raised after the bin lock is released;
    /// callbacks may call back into the bin.
    pub fn cycle_buffers(&self) -> Result<u64> {
        let frame_index;
        {
            let mut st = self.state.lock();
            // Resolve the next back buffer first so an allocation failure
            // leaves the current front intact.
            let next_back = match st.front.take() {
                None => Frame::allocate(self.byte_length)?,
                Some(retiring) => match Arc::try_unwrap(retiring) {
                    Ok(frame) => frame,
                    Err(pinned) => match Frame::allocate(self.byte_length) {
                        Ok(frame) => frame,
                        Err(err) => {
                            st.front = Some(pinned);
                            return Err(err);
                        }
                    },
                },
            };
            st.cycles += 1;
            frame_index = st.cycles;
            let mut completed = mem::replace(&mut st.back, next_back);
            completed.frame_index = frame_index;
            st.front = Some(Arc::new(completed));
        }
        tracing::debug!(bin = ?self.handle, frame_index, "cycled buffers");
        self.frame_ready.raise(&frame_index);
        Ok(frame_index)
    }

    /// Current front snapshot; None before the first cycle.
    pub fn front_frame(&self) -> Option<Arc<Frame>> {
        self.state.lock().front.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handles::HandleTable;

    fn make_bin(byte_length: usize) -> Arc<StreamBin> {
        let table: HandleTable<StreamBin> = HandleTable::new("stream bin");
        let (_, bin) = table
            .try_insert_with(|h| StreamBin::new(h, byte_length).map(Arc::new))
            .expect("allocate bin");
        bin
    }

    #[test]
    fn test_front_is_empty_before_first_cycle() {
        let bin = make_bin(8);
        assert!(bin.front_frame().is_none());

        bin.with_back_buffer(|data| data.fill(1));
        assert!(bin.front_frame().is_none());
    }

    #[test]
    fn test_cycle_publishes_the_back_buffer() {
        let bin = make_bin(4);
        bin.with_back_buffer(|data| data.copy_from_slice(&[1, 2, 3, 4]));

        let index = bin.cycle_buffers().expect("cycle");
        assert_eq!(index, 1);

        let front = bin.front_frame().expect("front exists");
        assert_eq!(front.frame_index(), 1);
        assert_eq!(front.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_reader_snapshot_is_isolated_from_later_writes() {
        let bin = make_bin(4);
        bin.with_back_buffer(|data| data.fill(0xAA));
        bin.cycle_buffers().expect("cycle");

        let held = bin.front_frame().expect("front");

        // Next write pass lands in a different buffer.
        bin.with_back_buffer(|data| data.fill(0xBB));
        bin.cycle_buffers().expect("cycle");
        bin.with_back_buffer(|data| data.fill(0xCC));

        assert_eq!(held.data(), &[0xAA; 4]);
        assert_eq!(held.frame_index(), 1);
    }

    #[test]
    fn test_latest_wins_across_unobserved_cycles() {
        let bin = make_bin(2);
        bin.with_back_buffer(|data| data.fill(1));
        bin.cycle_buffers().expect("cycle");
        bin.with_back_buffer(|data| data.fill(2));
        bin.cycle_buffers().expect("cycle");

        let front = bin.front_frame().expect("front");
        assert_eq!(front.frame_index(), 2);
        assert_eq!(front.data(), &[2, 2]);
    }

    #[test]
    fn test_released_front_buffer_is_recycled() {
        let bin = make_bin(4);
        bin.cycle_buffers().expect("cycle 1");

        let first = bin.front_frame().expect("front");
        let first_ptr = first.data().as_ptr() as usize;
        drop(first);

        // Cycle 2 reclaims the released front as the new back; cycle 3
        // publishes that same allocation again.
        bin.cycle_buffers().expect("cycle 2");
        bin.cycle_buffers().expect("cycle 3");

        let third = bin.front_frame().expect("front");
        assert_eq!(third.data().as_ptr() as usize, first_ptr);
    }

    #[test]
    fn test_pinned_front_forces_a_fresh_back_buffer() {
        let bin = make_bin(4);
        bin.with_back_buffer(|data| data.fill(7));
        bin.cycle_buffers().expect("cycle 1");

        let pinned = bin.front_frame().expect("front");
        bin.cycle_buffers().expect("cycle 2");

        // The pinned snapshot must not alias the buffer now open for
        // writing.
        bin.with_back_buffer(|data| data.fill(9));
        assert_eq!(pinned.data(), &[7; 4]);
    }

    #[test]
    fn test_client_count_tracks_links() {
        let bin = make_bin(1);
        assert!(!bin.has_clients_connected());

        bin.connect_client();
        assert!(bin.has_clients_connected());
        bin.connect_client();
        bin.disconnect_client();
        assert!(bin.has_clients_connected());
        bin.disconnect_client();
        assert!(!bin.has_clients_connected());
    }

    #[test]
    fn test_frame_ready_fires_after_promotion() {
        let bin = make_bin(2);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let bin_cb = bin.clone();
        let seen_cb = seen.clone();
        bin.frame_ready().subscribe(move |index: &u64| {
            // The promoted frame is already visible inside the callback.
            let front = bin_cb.front_frame().expect("front visible");
            seen_cb.lock().push((*index, front.frame_index()));
        });

        bin.with_back_buffer(|data| data.fill(3));
        bin.cycle_buffers().expect("cycle");

        assert_eq!(seen.lock().as_slice(), &[(1, 1)]);
    }
}
