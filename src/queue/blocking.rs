//! A closeable, blocking MPMC queue.
//!
//! Unlike [`crate::deque::Deque`] or [`crate::queue::lockfree::LockFreeQueue`]
//! this queue is not lock-free: it backs the shared-queue scheduler, where
//! workers are expected to block waiting for work rather than spin, so a
//! `Mutex` + `Condvar` is the idiomatic choice; nothing about this queue's
//! access pattern calls for `parking_lot`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::PopResult;

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A blocking, closeable FIFO queue.
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        BlockingQueue {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes `value`. A no-op once the queue has been [`close`](Self::close)d.
    pub fn push(&self, value: T) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.items.push_back(value);
        self.not_empty.notify_one();
    }

    /// Blocks until an item is available or the queue is closed and drained.
    pub fn pop(&self) -> PopResult<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(v) = state.items.pop_front() {
                return PopResult::Item(v);
            }
            if state.closed {
                return PopResult::Closed;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Non-blocking pop: returns `Empty` immediately rather than waiting.
    pub fn try_pop(&self) -> PopResult<T> {
        let mut state = self.state.lock().unwrap();
        if let Some(v) = state.items.pop_front() {
            return PopResult::Item(v);
        }
        if state.closed {
            PopResult::Closed
        } else {
            PopResult::Empty
        }
    }

    /// Blocks until an item is available, the queue is closed, or `timeout`
    /// elapses, whichever comes first. Unlike
    /// [`timed_pop_or_close`](Self::timed_pop_or_close), a timeout leaves the
    /// queue open: this is the variant for a worker that wants to notice
    /// idleness without taking responsibility for shutting the queue down.
    pub fn timed_pop(&self, timeout: Duration) -> PopResult<T> {
        let mut state = self.state.lock().unwrap();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(v) = state.items.pop_front() {
                return PopResult::Item(v);
            }
            if state.closed {
                return PopResult::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return PopResult::Empty;
            }
            let (guard, timeout_result) =
                self.not_empty.wait_timeout(state, deadline - now).unwrap();
            state = guard;
            if timeout_result.timed_out() && state.items.is_empty() && !state.closed {
                return PopResult::Empty;
            }
        }
    }

    /// Non-blocking pop that **closes the queue** the moment it observes an
    /// empty queue, instead of returning `Empty`.
    ///
    /// This is the "consumer-driven shutdown" variant: it exists for the
    /// single-consumer case where "nothing to do right now" really does mean
    /// "no more work is coming, stop". Calling this from more than one
    /// consumer, or from a consumer that does not actually own the decision
    /// to shut the queue down, will close it out from under producers that
    /// are still about to push. Prefer [`try_pop`](Self::try_pop) unless you
    /// are certain this is what you want.
    pub fn try_pop_or_close(&self) -> PopResult<T> {
        let mut state = self.state.lock().unwrap();
        if let Some(v) = state.items.pop_front() {
            return PopResult::Item(v);
        }
        state.closed = true;
        self.not_empty.notify_all();
        PopResult::Closed
    }

    /// Like [`pop`](Self::pop), but gives up and closes the queue if no item
    /// arrives within `timeout`. See [`try_pop_or_close`](Self::try_pop_or_close)
    /// for the caveats around closing on an empty observation.
    pub fn timed_pop_or_close(&self, timeout: Duration) -> PopResult<T> {
        let mut state = self.state.lock().unwrap();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(v) = state.items.pop_front() {
                return PopResult::Item(v);
            }
            if state.closed {
                return PopResult::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                state.closed = true;
                self.not_empty.notify_all();
                return PopResult::Closed;
            }
            let (guard, timeout_result) =
                self.not_empty.wait_timeout(state, deadline - now).unwrap();
            state = guard;
            if timeout_result.timed_out() && state.items.is_empty() && !state.closed {
                state.closed = true;
                self.not_empty.notify_all();
                return PopResult::Closed;
            }
        }
    }

    /// Closes the queue. Items already queued remain poppable; pushes after
    /// this point are discarded.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
