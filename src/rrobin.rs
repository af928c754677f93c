//! A fixed-capacity, cyclic round-robin target list.
//!
//! Used by the lock-free scheduler to distribute queued work across its
//! per-worker queues, and by the work-stealing scheduler to pick a steal
//! order across peers. Targets are stored in fixed slots so `append` and
//! `remove` don't shift surviving entries' positions out from under a
//! concurrent `dispatch`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A cyclic list of up to a fixed number of targets, dispatched to in turn.
pub struct RoundRobin<T> {
    slots: Mutex<Vec<Option<T>>>,
    cursor: AtomicUsize,
}

impl<T: Clone> Default for RoundRobin<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T: Clone> RoundRobin<T> {
    /// Creates an empty round-robin with room for `capacity` targets without
    /// reallocating; `append` beyond that still works, it just grows the
    /// backing `Vec` like any other.
    pub fn new(capacity: usize) -> Self {
        RoundRobin {
            slots: Mutex::new(Vec::with_capacity(capacity)),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Appends `target`, reusing a slot vacated by `remove` if one exists.
    pub fn append(&self, target: T) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(target);
        } else {
            slots.push(Some(target));
        }
    }

    /// Removes the first target for which `matches` returns `true`.
    /// Returns `true` if a target was removed.
    pub fn remove(&self, matches: impl Fn(&T) -> bool) -> bool {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter_mut() {
            if slot.as_ref().is_some_and(&matches) {
                *slot = None;
                return true;
            }
        }
        false
    }

    /// Returns the next live target in rotation, advancing the cursor, or
    /// `None` if every slot is empty.
    pub fn next(&self) -> Option<T> {
        let slots = self.slots.lock().unwrap();
        if slots.is_empty() {
            return None;
        }
        let len = slots.len();
        for step in 0..len {
            let i = (self.cursor.fetch_add(1, Ordering::Relaxed) + step) % len;
            if let Some(target) = &slots[i] {
                return Some(target.clone());
            }
        }
        None
    }

    /// Dispatches `f` to the next live target, fire-and-forget: `f`'s return
    /// value is discarded and no result is propagated back to the caller.
    pub fn dispatch(&self, f: impl FnOnce(&T)) -> bool {
        match self.next() {
            Some(target) => {
                f(&target);
                true
            }
            None => false,
        }
    }

    /// Snapshot of all live targets, in slot order.
    pub fn targets(&self) -> Vec<T> {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| s.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
