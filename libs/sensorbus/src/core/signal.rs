// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Multicast callback registry.
//!
//! [`Signal<A>`] maps caller-issued [`CallbackId`]s to closures. `raise`
//! snapshots the subscriber list under the signal lock, then invokes the
//! callbacks outside it, in subscription order, synchronously on the
//! raising thread. Ids are monotonic and never reused while the signal is
//! alive, so an unsubscribe with a stale id is a harmless no-op.

use std::sync::Arc;

use parking_lot::Mutex;

/// Subscription id, unique per signal for the signal's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

type Callback<A> = Arc<Mutex<dyn FnMut(&A) + Send>>;

struct SignalSlot<A> {
    id: CallbackId,
    callback: Callback<A>,
}

struct SignalState<A> {
    next_id: u64,
    slots: Vec<SignalSlot<A>>,
}

pub struct Signal<A> {
    state: Mutex<SignalState<A>>,
}

impl<A> Signal<A> {
    pub fn new() -> Self {
        Signal {
            state: Mutex::new(SignalState {
                next_id: 1,
                slots: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self, callback: impl FnMut(&A) + Send + 'static) -> CallbackId {
        let mut st = self.state.lock();
        let id = CallbackId(st.next_id);
        st.next_id += 1;
        st.slots.push(SignalSlot {
            id,
            callback: Arc::new(Mutex::new(callback)),
        });
        id
    }

    /// Removes the subscription. Returns false if the id was already gone;
    /// calling twice is safe.
    pub fn unsubscribe(&self, id: CallbackId) -> bool {
        let mut st = self.state.lock();
        let before = st.slots.len();
        st.slots.retain(|slot| slot.id != id);
        st.slots.len() != before
    }

    /// Invokes every current subscriber with `args`, in subscription order.
    ///
    /// The subscriber list is snapshotted first, so callbacks are free to
    /// subscribe or unsubscribe on this same signal while running.
    pub fn raise(&self, args: &A) {
        let snapshot: Vec<Callback<A>> = {
            let st = self.state.lock();
            st.slots.iter().map(|slot| slot.callback.clone()).collect()
        };
        for callback in snapshot {
            (&mut *callback.lock())(args);
        }
    }

    /// Invokes a single subscriber, used to replay history to a fresh
    /// subscription.
    pub(crate) fn raise_for(&self, id: CallbackId, args: &A) -> bool {
        let callback = {
            let st = self.state.lock();
            st.slots
                .iter()
                .find(|slot| slot.id == id)
                .map(|slot| slot.callback.clone())
        };
        match callback {
            Some(callback) => {
                (&mut *callback.lock())(args);
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().slots.len()
    }
}

impl<A> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_runs_callbacks_in_subscription_order() {
        let signal = Signal::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            signal.subscribe(move |n: &u32| order.lock().push((tag, *n)));
        }

        signal.raise(&7);
        assert_eq!(
            order.lock().as_slice(),
            &[("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_is_idempotent() {
        let signal = Signal::new();
        let hits = Arc::new(Mutex::new(0u32));

        let hits_cb = hits.clone();
        let id = signal.subscribe(move |_: &u32| *hits_cb.lock() += 1);

        signal.raise(&0);
        assert!(signal.unsubscribe(id));
        assert!(!signal.unsubscribe(id));
        signal.raise(&0);

        assert_eq!(*hits.lock(), 1);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let signal = Signal::new();
        let a = signal.subscribe(|_: &u32| {});
        signal.unsubscribe(a);
        let b = signal.subscribe(|_: &u32| {});
        assert_ne!(a, b);
    }

    #[test]
    fn test_subscribing_from_inside_a_callback_does_not_deadlock() {
        let signal = Arc::new(Signal::new());
        let inner = signal.clone();
        let late = Arc::new(Mutex::new(0u32));

        let late_cb = late.clone();
        signal.subscribe(move |_: &u32| {
            let late_inner = late_cb.clone();
            inner.subscribe(move |n: &u32| *late_inner.lock() += *n);
        });

        // First raise adds the late subscriber; it only sees the second.
        signal.raise(&1);
        signal.raise(&10);

        // Two late subscribers exist by the second raise; one sees 10.
        assert_eq!(*late.lock(), 10);
    }

    #[test]
    fn test_raise_for_targets_one_subscriber() {
        let signal = Signal::new();
        let a_hits = Arc::new(Mutex::new(0u32));
        let b_hits = Arc::new(Mutex::new(0u32));

        let a_cb = a_hits.clone();
        let _a = signal.subscribe(move |n: &u32| *a_cb.lock() += *n);
        let b_cb = b_hits.clone();
        let b = signal.subscribe(move |n: &u32| *b_cb.lock() += *n);

        assert!(signal.raise_for(b, &5));
        assert_eq!(*a_hits.lock(), 0);
        assert_eq!(*b_hits.lock(), 5);

        signal.unsubscribe(b);
        assert!(!signal.raise_for(b, &5));
    }
}
