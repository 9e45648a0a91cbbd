// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Scratch buffers for variable-size parameter payloads.

use parking_lot::Mutex;

use crate::core::error::{BusError, Result};
use crate::core::handles::Handle;

pub type ParameterBinHandle = Handle<ParameterBin>;

/// Caller-owned byte buffer issued by the plugin service for ad-hoc
/// parameter payloads. No pooling; create, fill, release.
pub struct ParameterBin {
    handle: ParameterBinHandle,
    data: Mutex<Box<[u8]>>,
}

impl ParameterBin {
    pub(crate) fn new(handle: ParameterBinHandle, byte_length: usize) -> Result<ParameterBin> {
        let mut data = Vec::new();
        data.try_reserve_exact(byte_length)
            .map_err(|_| BusError::AllocationFailed(byte_length))?;
        data.resize(byte_length, 0);
        Ok(ParameterBin {
            handle,
            data: Mutex::new(data.into_boxed_slice()),
        })
    }

    pub fn handle(&self) -> ParameterBinHandle {
        self.handle
    }

    pub fn byte_length(&self) -> usize {
        self.data.lock().len()
    }

    pub fn with_buffer<R>(&self, access: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.data.lock();
        access(&mut data)
    }
}
