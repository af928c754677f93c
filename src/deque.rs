//! A Chase-Lev work-stealing deque.
//!
//! One owning thread pushes and pops from the "bottom" of the deque with no
//! synchronization beyond what is needed to repel concurrent stealers; any
//! number of other threads may "steal" from the "top" concurrently. This is
//! the structure behind [`crate::scheduler::worksteal`]'s per-worker queues.
//!
//! The growable backing buffer uses the usual `UnsafeCell<MaybeUninit<T>>`
//! slot discipline, but stored behind an `AtomicPtr<Buffer<T>>` so the owner
//! can swap in a larger buffer without
//! stopping concurrent steals. Retired buffers are intentionally leaked
//! rather than reclaimed: a stealer may still be mid-read from an old buffer
//! when the owner grows, and this crate does not carry an epoch-based
//! reclamation crate to make freeing them safe. Buffers only grow (by
//! doubling) and a worker's queue does not grow without bound in practice, so
//! the leak is bounded by how many times a given worker's queue has doubled
//! over its lifetime.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;

struct Buffer<T> {
    cells: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

impl<T> Buffer<T> {
    fn new(cap: usize) -> Self {
        debug_assert!(cap.is_power_of_two());
        let cells = (0..cap)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Buffer { cells }
    }

    fn capacity(&self) -> isize {
        self.cells.len() as isize
    }

    fn index(&self, i: isize) -> usize {
        (i as usize) & (self.cells.len() - 1)
    }

    unsafe fn write(&self, i: isize, value: T) {
        unsafe { ptr::write(self.cells[self.index(i)].get().cast::<T>(), value) };
    }

    unsafe fn read(&self, i: isize) -> T {
        unsafe { ptr::read(self.cells[self.index(i)].get().cast::<T>()) }
    }
}

const DEFAULT_CAPACITY: usize = 32;

/// A Chase-Lev work-stealing deque.
///
/// The owning worker calls [`Deque::push`] and [`Deque::pop`]; every other
/// thread calls [`Deque::steal`]. It is a logic error (though not unsound) to
/// call `push`/`pop` from more than one thread.
pub struct Deque<T> {
    // `bottom` and `top` are touched by different threads (owner vs.
    // stealers) far more often than `buffer`; cache-padding keeps a stealer's
    // read of `top` from bouncing the owner's cache line on every `push`.
    bottom: CachePadded<AtomicIsize>,
    top: CachePadded<AtomicIsize>,
    buffer: AtomicPtr<Buffer<T>>,
}

impl<T> Default for Deque<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deque<T> {
    pub fn new() -> Self {
        let buffer = Box::into_raw(Box::new(Buffer::new(DEFAULT_CAPACITY)));
        Deque {
            bottom: CachePadded::new(AtomicIsize::new(0)),
            top: CachePadded::new(AtomicIsize::new(0)),
            buffer: AtomicPtr::new(buffer),
        }
    }

    /// Owner-only: pushes `value` onto the bottom of the deque, growing the
    /// backing buffer first if it is full.
    pub fn push(&self, value: T) {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);
        let mut buf = unsafe { &*self.buffer.load(Ordering::Relaxed) };

        if b - t >= buf.capacity() {
            buf = self.grow(buf);
        }

        unsafe { buf.write(b, value) };
        std::sync::atomic::fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Release);
    }

    fn grow(&self, old: &Buffer<T>) -> &Buffer<T> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        let new_cap = (old.cells.len() * 2).max(DEFAULT_CAPACITY);
        let new_buf = Box::new(Buffer::new(new_cap));
        for i in t..b {
            unsafe { new_buf.write(i, old.read(i)) };
        }
        let new_ptr = Box::into_raw(new_buf);
        self.buffer.store(new_ptr, Ordering::Release);
        unsafe { &*new_ptr }
    }

    /// Owner-only: pops from the bottom of the deque. Returns `None` once
    /// empty, including the case where a racing [`Deque::steal`] won the
    /// last element.
    pub fn pop(&self) -> Option<T> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        let buf = unsafe { &*self.buffer.load(Ordering::Relaxed) };
        self.bottom.store(b, Ordering::Relaxed);

        std::sync::atomic::fence(Ordering::SeqCst);
        let t = self.top.load(Ordering::Relaxed);

        if t > b {
            // Already empty; restore bottom to a consistent empty state.
            self.bottom.store(b + 1, Ordering::Relaxed);
            return None;
        }

        let mut value = Some(unsafe { buf.read(b) });
        if t == b {
            // Last slot: race the stealers for it.
            if self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_err()
            {
                value = None;
            }
            self.bottom.store(b + 1, Ordering::Relaxed);
        }
        value
    }

    /// Any thread: attempts to steal one item from the top of the deque.
    pub fn steal(&self) -> Steal<T> {
        let t = self.top.load(Ordering::Acquire);
        std::sync::atomic::fence(Ordering::SeqCst);
        let b = self.bottom.load(Ordering::Acquire);

        if t >= b {
            return Steal::Empty;
        }

        let buf = unsafe { &*self.buffer.load(Ordering::Acquire) };
        let value = unsafe { buf.read(t) };
        match self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
        {
            Ok(_) => Steal::Success(value),
            Err(_) => {
                std::mem::forget(value);
                Steal::Retry
            }
        }
    }

    /// Snapshot length; may be stale the instant it is observed.
    pub fn len(&self) -> usize {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Relaxed);
        (b - t).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for Deque<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
        unsafe { drop(Box::from_raw(self.buffer.load(Ordering::Relaxed))) };
    }
}

unsafe impl<T: Send> Send for Deque<T> {}
unsafe impl<T: Send> Sync for Deque<T> {}

/// Outcome of a [`Deque::steal`] attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Steal<T> {
    /// Nothing to steal.
    Empty,
    /// Lost a race with another stealer or the owner's `pop`; the caller
    /// should retry.
    Retry,
    /// Stole a value.
    Success(T),
}

impl<T> Steal<T> {
    pub fn success(self) -> Option<T> {
        match self {
            Steal::Success(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_pop_is_lifo_for_owner() {
        let deque = Deque::new();
        deque.push(1);
        deque.push(2);
        deque.push(3);
        assert_eq!(deque.pop(), Some(3));
        assert_eq!(deque.pop(), Some(2));
        assert_eq!(deque.pop(), Some(1));
        assert_eq!(deque.pop(), None);
    }

    #[test]
    fn steal_takes_from_the_opposite_end() {
        let deque = Deque::new();
        deque.push(1);
        deque.push(2);
        deque.push(3);
        assert_eq!(deque.steal().success(), Some(1));
        assert_eq!(deque.pop(), Some(3));
        assert_eq!(deque.steal().success(), Some(2));
        assert_eq!(deque.pop(), None);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let deque = Deque::new();
        for i in 0..(DEFAULT_CAPACITY * 4) {
            deque.push(i);
        }
        let mut popped = Vec::new();
        while let Some(v) = deque.pop() {
            popped.push(v);
        }
        popped.reverse();
        assert_eq!(popped, (0..(DEFAULT_CAPACITY * 4)).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_steals_and_pop_see_every_element_exactly_once() {
        let deque = Arc::new(Deque::new());
        const N: usize = 20_000;
        for i in 0..N {
            deque.push(i);
        }

        let stolen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut stealers = Vec::new();
        for _ in 0..4 {
            let deque = deque.clone();
            let stolen = stolen.clone();
            stealers.push(thread::spawn(move || loop {
                match deque.steal() {
                    Steal::Success(v) => stolen.lock().unwrap().push(v),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }));
        }

        let mut owned = Vec::new();
        while let Some(v) = deque.pop() {
            owned.push(v);
        }
        for s in stealers {
            s.join().unwrap();
        }

        let mut all = owned;
        all.extend(stolen.lock().unwrap().iter().copied());
        all.sort_unstable();
        assert_eq!(all, (0..N).collect::<Vec<_>>());
    }
}

#[cfg(loom)]
mod loom_tests {
    use super::Deque;
    use loom::sync::Arc;
    use loom::thread;

    #[test]
    fn test_loom_owner_pop_and_one_stealer_never_double_take_an_item() {
        loom::model(|| {
            let deque = Arc::new(Deque::new());
            deque.push(1);
            deque.push(2);

            let d = deque.clone();
            let stealer = thread::spawn(move || d.steal().success());

            let popped = deque.pop();
            let stolen = stealer.join().unwrap();

            let mut seen: Vec<i32> = [popped, stolen].into_iter().flatten().collect();
            seen.sort_unstable();
            assert!(seen == vec![1] || seen == vec![2] || seen == vec![1, 2]);
        });
    }
}
