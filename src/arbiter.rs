//! Arbiters coordinate up to three receivers (`exclusive`, `concurrent`, and
//! `teardown`) that share one admission policy.
//!
//! At most one exclusive handler runs at a time. Any number of concurrent
//! handlers may run together, but a concurrent *batch* (the first admission
//! after the count drops back to zero) does not start fresh while an
//! exclusive admission is pending. Once a batch is already running, further
//! concurrent admissions are let through regardless: a pending exclusive
//! request only blocks the *start* of a new batch, not an already-open one.
//! Teardown is always admitted at most once, and after it runs no further
//! exclusive or concurrent admission is ever granted again. Its handler body
//! does not actually run until every prior exclusive/concurrent handler has
//! completed, enforced by [`Arbiter::wait_for_quiescent`], called from
//! inside [`crate::receiver::Receiver::run_handler`].

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::ArbiterError;
use crate::receiver::{Receiver, Role};

const EXCLUSIVE_ACTIVE: u32 = 1 << 0;
const NEEDS_EXCLUSIVE: u32 = 1 << 1;

/// What [`Arbiter::can_receive`] tells a receiver to do with a message it is
/// about to admit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterDecision {
    Admit,
    Pause,
    Never,
}

pub struct Arbiter {
    exclusive: Option<Arc<Receiver>>,
    concurrent: Option<Arc<Receiver>>,
    teardown: Option<Arc<Receiver>>,
    flags: AtomicU32,
    concurrent_count: AtomicUsize,
    inflight: AtomicUsize,
    teardown_ran: AtomicBool,
}

impl Arbiter {
    /// Builds an arbiter over whichever of the three receivers are present,
    /// binding each to its role. At least one must be given.
    pub fn coordinate(
        exclusive: Option<Arc<Receiver>>,
        concurrent: Option<Arc<Receiver>>,
        teardown: Option<Arc<Receiver>>,
    ) -> Result<Arc<Arbiter>, ArbiterError> {
        if exclusive.is_none() && concurrent.is_none() && teardown.is_none() {
            return Err(ArbiterError::NoReceivers);
        }

        let arbiter = Arc::new(Arbiter {
            exclusive: exclusive.clone(),
            concurrent: concurrent.clone(),
            teardown: teardown.clone(),
            flags: AtomicU32::new(0),
            concurrent_count: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
            teardown_ran: AtomicBool::new(false),
        });

        if let Some(r) = &exclusive {
            r.bind_arbiter(Arc::downgrade(&arbiter), Role::Exclusive);
        }
        if let Some(r) = &concurrent {
            r.bind_arbiter(Arc::downgrade(&arbiter), Role::Concurrent);
        }
        if let Some(r) = &teardown {
            r.bind_arbiter(Arc::downgrade(&arbiter), Role::Teardown);
        }

        Ok(arbiter)
    }

    pub fn exclusive_receiver(&self) -> Option<&Arc<Receiver>> {
        self.exclusive.as_ref()
    }

    pub fn concurrent_receiver(&self) -> Option<&Arc<Receiver>> {
        self.concurrent.as_ref()
    }

    pub fn teardown_receiver(&self) -> Option<&Arc<Receiver>> {
        self.teardown.as_ref()
    }

    /// Number of exclusive/concurrent handlers currently in flight. Teardown
    /// does not count towards this: it is the thing waiting on it to reach
    /// zero.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub(crate) fn can_receive(&self, role: Role) -> ArbiterDecision {
        match role {
            Role::Exclusive => self.can_receive_exclusive(),
            Role::Concurrent => self.can_receive_concurrent(),
            Role::Teardown => self.can_receive_teardown(),
            Role::Free => ArbiterDecision::Admit,
        }
    }

    fn can_receive_exclusive(&self) -> ArbiterDecision {
        if self.exclusive.is_none() {
            return ArbiterDecision::Never;
        }
        if self.teardown_ran.load(Ordering::Acquire) {
            return ArbiterDecision::Never;
        }
        loop {
            let flags = self.flags.load(Ordering::Acquire);
            if flags & EXCLUSIVE_ACTIVE != 0 {
                return ArbiterDecision::Pause;
            }
            if self.concurrent_count.load(Ordering::Acquire) > 0 {
                self.flags.fetch_or(NEEDS_EXCLUSIVE, Ordering::AcqRel);
                return ArbiterDecision::Pause;
            }
            let next = (flags | EXCLUSIVE_ACTIVE) & !NEEDS_EXCLUSIVE;
            if self
                .flags
                .compare_exchange_weak(flags, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.inflight.fetch_add(1, Ordering::AcqRel);
                return ArbiterDecision::Admit;
            }
        }
    }

    /// A `NEEDS_EXCLUSIVE` request blocks a *new* concurrent batch from
    /// starting, but an already-open batch (concurrent_count > 0) keeps
    /// admitting regardless: it already committed to running alongside
    /// whatever exclusive work shows up next.
    fn can_receive_concurrent(&self) -> ArbiterDecision {
        if self.concurrent.is_none() {
            return ArbiterDecision::Never;
        }
        if self.teardown_ran.load(Ordering::Acquire) {
            return ArbiterDecision::Pause;
        }
        if self.flags.load(Ordering::Acquire) & EXCLUSIVE_ACTIVE != 0 {
            return ArbiterDecision::Pause;
        }
        loop {
            let count = self.concurrent_count.load(Ordering::Acquire);
            if count == 0 && self.flags.load(Ordering::Acquire) & NEEDS_EXCLUSIVE != 0 {
                return ArbiterDecision::Pause;
            }
            if self
                .concurrent_count
                .compare_exchange_weak(count, count + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.inflight.fetch_add(1, Ordering::AcqRel);
                return ArbiterDecision::Admit;
            }
        }
    }

    fn can_receive_teardown(&self) -> ArbiterDecision {
        if self.teardown.is_none() {
            return ArbiterDecision::Never;
        }
        if self.teardown_ran.swap(true, Ordering::AcqRel) {
            return ArbiterDecision::Never;
        }
        ArbiterDecision::Admit
    }

    /// Completion handler for a governed receiver. Beyond clearing this
    /// receiver's own flags/counters, it wakes whichever sibling receiver
    /// may now be admittable: an exclusive completion can let a held
    /// concurrent batch start, and a concurrent completion that drains the
    /// last in-flight handler can let a held exclusive message through.
    /// Without this, a message paused by [`ArbiterDecision::Pause`] sits in
    /// its port's `holding` queue forever, since nothing else ever re-flushes
    /// that port.
    pub(crate) fn on_completed(&self, role: Role) {
        match role {
            Role::Exclusive => {
                self.flags.fetch_and(!EXCLUSIVE_ACTIVE, Ordering::AcqRel);
                self.inflight.fetch_sub(1, Ordering::AcqRel);
                self.wake(&self.concurrent);
            }
            Role::Concurrent => {
                let remaining = self.concurrent_count.fetch_sub(1, Ordering::AcqRel) - 1;
                self.inflight.fetch_sub(1, Ordering::AcqRel);
                if remaining == 0 {
                    self.wake(&self.exclusive);
                }
            }
            Role::Teardown | Role::Free => {}
        }
    }

    fn wake(&self, receiver: &Option<Arc<Receiver>>) {
        if let Some(receiver) = receiver {
            receiver.signal_port();
        }
    }

    /// Blocks the calling (teardown) thread until no exclusive or concurrent
    /// handler is in flight. Polling rather than a condvar: teardown runs at
    /// most once per arbiter, so the extra latency of a short sleep loop is
    /// immaterial next to the cost of a full handler drain.
    pub(crate) fn wait_for_quiescent(&self) {
        while self.inflight.load(Ordering::Acquire) > 0 {
            thread::sleep(Duration::from_micros(100));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::scheduler::{SchedulerConfig, SharedQueueScheduler};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    fn scheduler() -> Arc<dyn crate::scheduler::Scheduler> {
        Arc::new(SharedQueueScheduler::new(SchedulerConfig {
            min_threads: 2,
            max_threads: 4,
            idle_timeout: StdDuration::from_millis(50),
        }))
    }

    #[test]
    fn coordinate_rejects_when_no_receivers_given() {
        assert_eq!(Arbiter::coordinate(None, None, None).unwrap_err(), ArbiterError::NoReceivers);
    }

    #[test]
    fn only_one_exclusive_handler_runs_at_a_time() {
        let sched = scheduler();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let r1 = running.clone();
        let m1 = max_seen.clone();
        let exclusive = Receiver::new(sched, None, move |_| {
            let now = r1.fetch_add(1, Ordering::SeqCst) + 1;
            m1.fetch_max(now, Ordering::SeqCst);
            thread::sleep(StdDuration::from_millis(30));
            r1.fetch_sub(1, Ordering::SeqCst);
        });
        let arbiter = Arbiter::coordinate(Some(exclusive.clone()), None, None).unwrap();
        for _ in 0..5 {
            exclusive.deliver(Message::new(1).build());
        }
        thread::sleep(StdDuration::from_millis(200));
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        drop(arbiter);
    }

    #[test]
    fn concurrent_handlers_run_alongside_each_other() {
        let sched = scheduler();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let r1 = running.clone();
        let m1 = max_seen.clone();
        let concurrent = Receiver::new(sched, None, move |_| {
            let now = r1.fetch_add(1, Ordering::SeqCst) + 1;
            m1.fetch_max(now, Ordering::SeqCst);
            thread::sleep(StdDuration::from_millis(50));
            r1.fetch_sub(1, Ordering::SeqCst);
        });
        let arbiter = Arbiter::coordinate(None, Some(concurrent.clone()), None).unwrap();
        for _ in 0..3 {
            concurrent.deliver(Message::new(1).build());
        }
        thread::sleep(StdDuration::from_millis(200));
        assert!(max_seen.load(Ordering::SeqCst) > 1);
        drop(arbiter);
    }

    #[test]
    fn teardown_waits_for_inflight_handlers_to_drain() {
        let sched = scheduler();
        let order: Arc<std::sync::Mutex<Vec<&'static str>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let exclusive = Receiver::new(sched.clone(), None, move |_| {
            thread::sleep(StdDuration::from_millis(60));
            o1.lock().unwrap().push("exclusive");
        });
        let o2 = order.clone();
        let teardown = Receiver::new(sched, None, move |_| {
            o2.lock().unwrap().push("teardown");
        });
        let arbiter = Arbiter::coordinate(Some(exclusive.clone()), None, Some(teardown.clone())).unwrap();
        exclusive.deliver(Message::new(1).build());
        thread::sleep(StdDuration::from_millis(5));
        teardown.deliver(Message::new(2).build());
        thread::sleep(StdDuration::from_millis(150));
        let seen = order.lock().unwrap().clone();
        assert_eq!(seen, vec!["exclusive", "teardown"]);
        drop(arbiter);
    }

    #[test]
    fn concurrent_batch_already_open_admits_despite_pending_exclusive() {
        // Start a concurrent batch, then request exclusive while it's still
        // open; further concurrent admissions into the same batch must
        // still succeed.
        let sched = scheduler();
        let gate = Arc::new(std::sync::Barrier::new(2));
        let g1 = gate.clone();
        let concurrent = Receiver::new(sched.clone(), None, move |_| {
            g1.wait();
            thread::sleep(StdDuration::from_millis(60));
        });
        let exclusive = Receiver::new(sched, None, |_| {});
        let arbiter = Arbiter::coordinate(Some(exclusive.clone()), Some(concurrent.clone()), None).unwrap();

        assert_eq!(concurrent.deliver(Message::new(1).build()), crate::receiver::Deliver::Delivered);
        gate.wait();
        // One concurrent handler is now in flight; request exclusive.
        assert_eq!(exclusive.deliver(Message::new(2).build()), crate::receiver::Deliver::Pause);
        // A further concurrent admission into the already-open batch succeeds.
        assert_eq!(concurrent.deliver(Message::new(3).build()), crate::receiver::Deliver::Delivered);
        drop(arbiter);
    }

    #[test]
    fn once_teardown_runs_no_further_exclusive_or_concurrent_admission_is_granted() {
        let sched = scheduler();
        let exclusive = Receiver::new(sched.clone(), None, |_| {});
        let concurrent = Receiver::new(sched.clone(), None, |_| {});
        let teardown = Receiver::new(sched, None, |_| {});
        let arbiter =
            Arbiter::coordinate(Some(exclusive.clone()), Some(concurrent.clone()), Some(teardown.clone())).unwrap();

        assert_eq!(teardown.deliver(Message::new(1).build()), crate::receiver::Deliver::Delivered);
        thread::sleep(StdDuration::from_millis(20));

        assert_eq!(exclusive.deliver(Message::new(2).build()), crate::receiver::Deliver::Never);
        assert_eq!(concurrent.deliver(Message::new(3).build()), crate::receiver::Deliver::Pause);
        drop(arbiter);
    }
}
