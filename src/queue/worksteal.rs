//! The container-level view of one worker's slice of a work-stealing pool:
//! a private [`Deque`] the owner pushes/pops from, a shared overflow
//! [`LockFreeQueue`] for work that doesn't belong to any particular worker
//! (e.g. posted before any worker claims it), and a [`RoundRobin`] of peer
//! deques to steal from when both are empty.
//!
//! [`crate::scheduler::worksteal::WorkStealScheduler`] owns one of these per
//! worker thread and registers every worker's deque as a peer of every
//! other.

use std::sync::Arc;

use crate::deque::{Deque, Steal};
use crate::queue::lockfree::LockFreeQueue;
use crate::queue::PopResult;
use crate::rrobin::RoundRobin;

/// One worker's combined view of a work-stealing queue family.
pub struct WorkStealQueue<T> {
    local: Arc<Deque<T>>,
    global: Arc<LockFreeQueue<T>>,
    peers: RoundRobin<Arc<Deque<T>>>,
}

impl<T> WorkStealQueue<T> {
    pub fn new(global: Arc<LockFreeQueue<T>>) -> Self {
        WorkStealQueue {
            local: Arc::new(Deque::new()),
            global,
            peers: RoundRobin::new(4),
        }
    }

    /// A clonable handle to this worker's local deque, to hand to peers via
    /// [`register_peer`](Self::register_peer).
    pub fn local_handle(&self) -> Arc<Deque<T>> {
        self.local.clone()
    }

    /// Registers another worker's deque as a steal target for this one.
    pub fn register_peer(&self, peer: Arc<Deque<T>>) {
        self.peers.append(peer);
    }

    /// Pushes onto this worker's own queue.
    pub fn push(&self, value: T) {
        self.local.push(value);
    }

    /// Pushes onto the shared overflow queue, for work with no preferred
    /// worker (e.g. posted from outside the pool).
    pub fn push_global(&self, value: T) {
        self.global.push(value);
    }

    /// Pops the next item: local deque first, then the global overflow
    /// queue, then a steal attempt against each peer in rotation.
    pub fn pop(&self) -> Option<T> {
        if let Some(v) = self.local.pop() {
            return Some(v);
        }
        if let PopResult::Item(v) = self.global.pop() {
            return Some(v);
        }
        let attempts = self.peers.len().max(1);
        for _ in 0..attempts {
            match self.peers.next() {
                Some(peer) => {
                    if let Steal::Success(v) = peer.steal() {
                        return Some(v);
                    }
                }
                None => break,
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.global.is_empty()
    }
}
