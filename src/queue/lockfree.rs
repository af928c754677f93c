//! A lock-free, closeable Michael & Scott FIFO queue.
//!
//! Nodes are drawn from and returned to a [`FreeList`], so a long-running
//! queue with a roughly steady depth settles into recycling a fixed pool of
//! allocations instead of calling into the allocator on every push/pop.
//!
//! The dequeue loop reads a node's value speculatively before attempting the
//! CAS that actually claims it, because a second reader may be racing for the
//! same node. A losing reader's read is a bitwise copy of the same live
//! value, not a second independent one, so it `mem::forget`s it rather than
//! dropping it: dropping would double-free anything the value owns.

use std::sync::atomic::{AtomicBool, Ordering};

use super::PopResult;
use crate::freelist::{FreeList, ListNode};
use crate::tagged_ptr::Aligned;

/// A lock-free, closeable FIFO queue.
pub struct LockFreeQueue<T> {
    head: crate::tagged_ptr::TaggedPtr<ListNode<T>>,
    tail: crate::tagged_ptr::TaggedPtr<ListNode<T>>,
    free: FreeList<T>,
    closed: AtomicBool,
}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockFreeQueue<T> {
    pub fn new() -> Self {
        let dummy = FreeList::<T>::alloc_detached();
        LockFreeQueue {
            head: crate::tagged_ptr::TaggedPtr::new(dummy),
            tail: crate::tagged_ptr::TaggedPtr::new(dummy),
            free: FreeList::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Pushes `value`. A no-op once the queue has been [`close`](Self::close)d.
    pub fn push(&self, value: T) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let node: *mut Aligned<ListNode<T>> = self.free.get();
        unsafe {
            (*node).0.write(value);
        }
        loop {
            let (tail_ptr, tail_stamp) = self.tail.load(Ordering::Acquire);
            let (next_ptr, next_stamp) = unsafe { (*tail_ptr).0.next.load(Ordering::Acquire) };
            if next_ptr.is_null() {
                match unsafe {
                    (*tail_ptr).0.next.compare_exchange(
                        next_ptr,
                        next_stamp,
                        node,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                } {
                    Ok(()) => {
                        let _ = self.tail.compare_exchange(
                            tail_ptr,
                            tail_stamp,
                            node,
                            Ordering::AcqRel,
                            Ordering::Relaxed,
                        );
                        return;
                    }
                    Err(_) => continue,
                }
            } else {
                let _ = self.tail.compare_exchange(
                    tail_ptr,
                    tail_stamp,
                    next_ptr,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
            }
        }
    }

    /// Non-blocking pop.
    pub fn pop(&self) -> PopResult<T> {
        loop {
            let (head_ptr, head_stamp) = self.head.load(Ordering::Acquire);
            let (tail_ptr, tail_stamp) = self.tail.load(Ordering::Acquire);
            let (next_ptr, _) = unsafe { (*head_ptr).0.next.load(Ordering::Acquire) };

            if head_ptr == tail_ptr {
                if next_ptr.is_null() {
                    return if self.closed.load(Ordering::Acquire) {
                        PopResult::Closed
                    } else {
                        PopResult::Empty
                    };
                }
                let _ = self.tail.compare_exchange(
                    tail_ptr,
                    tail_stamp,
                    next_ptr,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                continue;
            }

            if next_ptr.is_null() {
                continue;
            }

            let value = unsafe { (*next_ptr).0.read() };
            match self.head.compare_exchange(
                head_ptr,
                head_stamp,
                next_ptr,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(()) => {
                    self.free.put(head_ptr);
                    return PopResult::Item(value);
                }
                Err(_) => {
                    std::mem::forget(value);
                    continue;
                }
            }
        }
    }

    /// Closes the queue: already-queued items remain poppable, further
    /// pushes are discarded, and `pop` on an empty queue reports `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        let (head_ptr, _) = self.head.load(Ordering::Acquire);
        let (next_ptr, _) = unsafe { (*head_ptr).0.next.load(Ordering::Acquire) };
        next_ptr.is_null()
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        while let PopResult::Item(_) = self.pop() {}
        let (head_ptr, _) = self.head.load(Ordering::Acquire);
        unsafe { drop(Box::from_raw(head_ptr)) };
    }
}

unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}


#[cfg(loom)]
mod loom_tests {
    use super::LockFreeQueue;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn test_loom_two_producers_one_consumer_never_loses_or_duplicates_an_item() {
        loom::model(|| {
            let q = Arc::new(LockFreeQueue::new());

            let q1 = q.clone();
            let t1 = thread::spawn(move || q1.push(1));
            let q2 = q.clone();
            let t2 = thread::spawn(move || q2.push(2));

            t1.join().unwrap();
            t2.join().unwrap();

            let mut seen = Vec::new();
            while let Some(v) = q.pop().item() {
                seen.push(v);
            }
            seen.sort_unstable();
            assert_eq!(seen, vec![1, 2]);
        });
    }
}
