// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Generation-checked handle arena.
//!
//! External callers (plugins, host applications) never hold `Arc`s to core
//! objects. They hold a [`Handle<T>`]: a slot index plus the generation the
//! slot carried when the object was inserted. Removing an object bumps the
//! slot generation, so a handle kept past its object's destruction resolves
//! to [`BusError::StaleHandle`] instead of another object that happens to
//! reuse the slot.
//!
//! Every core object embeds its own handle: [`HandleTable::insert_with`]
//! passes the freshly minted handle into the constructor closure.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::{BusError, Result};

/// Typed id naming one table-owned object.
///
/// `Copy`, hashable, and safe to hold forever: resolution checks the slot
/// generation and reports staleness rather than aliasing a newer object.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: u32, generation: u32) -> Self {
        Handle {
            index,
            generation,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

/// Arena issuing and resolving [`Handle<T>`] ids for one object kind.
///
/// All operations are internally synchronized; the table is shared across
/// plugin and consumer threads.
pub struct HandleTable<T> {
    name: &'static str,
    state: Mutex<TableState<T>>,
}

struct TableState<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> HandleTable<T> {
    /// `name` appears in stale-handle errors ("Stale stream bin handle").
    pub fn new(name: &'static str) -> Self {
        HandleTable {
            name,
            state: Mutex::new(TableState {
                slots: Vec::new(),
                free: Vec::new(),
            }),
        }
    }

    /// Inserts the object built by `build`, handing it its own handle.
    ///
    /// `build` runs under the table lock and must not call back into this
    /// table.
    pub fn insert_with(&self, build: impl FnOnce(Handle<T>) -> Arc<T>) -> (Handle<T>, Arc<T>) {
        let mut st = self.state.lock();
        let index = Self::claim_slot(&mut st);
        let handle = Handle::new(index, st.slots[index as usize].generation);
        let value = build(handle);
        st.slots[index as usize].value = Some(value.clone());
        (handle, value)
    }

    /// Fallible variant of [`insert_with`](HandleTable::insert_with): if
    /// `build` fails the slot is retired and nothing is registered.
    pub fn try_insert_with(
        &self,
        build: impl FnOnce(Handle<T>) -> Result<Arc<T>>,
    ) -> Result<(Handle<T>, Arc<T>)> {
        let mut st = self.state.lock();
        let index = Self::claim_slot(&mut st);
        let handle = Handle::new(index, st.slots[index as usize].generation);
        match build(handle) {
            Ok(value) => {
                st.slots[index as usize].value = Some(value.clone());
                Ok((handle, value))
            }
            Err(err) => {
                // The handle escaped into the failed constructor; retire the
                // generation so no later insert can be reached through it.
                st.slots[index as usize].generation =
                    st.slots[index as usize].generation.wrapping_add(1);
                st.free.push(index);
                Err(err)
            }
        }
    }

    pub fn get(&self, handle: Handle<T>) -> Result<Arc<T>> {
        let st = self.state.lock();
        let slot = st
            .slots
            .get(handle.index as usize)
            .ok_or(BusError::StaleHandle(self.name))?;
        if slot.generation != handle.generation {
            return Err(BusError::StaleHandle(self.name));
        }
        slot.value.clone().ok_or(BusError::StaleHandle(self.name))
    }

    /// Removes the object, bumping the slot generation so the handle (and
    /// any copy of it) is stale from here on.
    pub fn remove(&self, handle: Handle<T>) -> Result<Arc<T>> {
        let mut st = self.state.lock();
        let slot = st
            .slots
            .get_mut(handle.index as usize)
            .ok_or(BusError::StaleHandle(self.name))?;
        if slot.generation != handle.generation {
            return Err(BusError::StaleHandle(self.name));
        }
        let value = slot.value.take().ok_or(BusError::StaleHandle(self.name))?;
        slot.generation = slot.generation.wrapping_add(1);
        st.free.push(handle.index);
        Ok(value)
    }

    /// Removes every live object (teardown path).
    pub fn drain(&self) -> Vec<Arc<T>> {
        let mut st = self.state.lock();
        let TableState { slots, free } = &mut *st;
        let mut drained = Vec::new();
        for (index, slot) in slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                free.push(index as u32);
                drained.push(value);
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        let st = self.state.lock();
        st.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn claim_slot(st: &mut TableState<T>) -> u32 {
        st.free.pop().unwrap_or_else(|| {
            st.slots.push(Slot {
                generation: 0,
                value: None,
            });
            (st.slots.len() - 1) as u32
        })
    }
}
