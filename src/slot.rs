//! Single-slot hand-off cells.
//!
//! `LatestSlot` is the only point of concurrent read/write in the pipeline:
//! one producer publishes a fully-formed value, replacing whatever was
//! pending (latest-wins), and readers observe either the previous value or
//! the new one, never a torn one. It backs the pending-frame slot, the live
//! occupancy snapshot, and the latest encoded frame.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct SlotState<T> {
    value: Option<Arc<T>>,
    seq: u64,
    closed: bool,
}

/// An atomically-swappable immutable value cell.
///
/// Written by exactly one producer, read by many consumers. Consumers either
/// peek the latest value (`latest`), consume it (`take_wait`, used by the
/// inference worker so each frame is inferred at most once), or wait for a
/// value newer than one they have already seen (`wait_newer`, used by stream
/// cursors).
pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    cond: Condvar,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                seq: 0,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Publish a new value, replacing any unconsumed one.
    ///
    /// Returns true when an unconsumed value was dropped (latest-wins).
    /// Publishing to a closed slot is a no-op.
    pub fn publish(&self, value: T) -> bool {
        let mut state = self.state.lock().expect("slot lock poisoned");
        if state.closed {
            return false;
        }
        let dropped = state.value.is_some();
        state.value = Some(Arc::new(value));
        state.seq += 1;
        self.cond.notify_all();
        dropped
    }

    /// Latest published value, non-blocking. The value stays in the slot.
    pub fn latest(&self) -> Option<Arc<T>> {
        let state = self.state.lock().expect("slot lock poisoned");
        state.value.clone()
    }

    /// Sequence number of the latest published value (0 = nothing yet).
    pub fn seq(&self) -> u64 {
        let state = self.state.lock().expect("slot lock poisoned");
        state.seq
    }

    /// Consume the pending value, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or when the slot is closed and empty.
    pub fn take_wait(&self, timeout: Duration) -> Option<Arc<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("slot lock poisoned");
        loop {
            if let Some(value) = state.value.take() {
                return Some(value);
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, _) = self
                .cond
                .wait_timeout(state, deadline - now)
                .expect("slot lock poisoned");
            state = next;
        }
    }

    /// Wait for a value with a sequence number greater than `last_seq`.
    ///
    /// Returns the value together with its sequence number; `None` on
    /// timeout or when the slot closes with nothing newer. The value stays
    /// in the slot, so independent cursors never starve each other.
    pub fn wait_newer(&self, last_seq: u64, timeout: Duration) -> Option<(u64, Arc<T>)> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("slot lock poisoned");
        loop {
            if state.seq > last_seq {
                if let Some(value) = state.value.clone() {
                    return Some((state.seq, value));
                }
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, _) = self
                .cond
                .wait_timeout(state, deadline - now)
                .expect("slot lock poisoned");
            state = next;
        }
    }

    /// Close the slot: wakes all waiters; further publishes are dropped.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("slot lock poisoned");
        state.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        let state = self.state.lock().expect("slot lock poisoned");
        state.closed
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
