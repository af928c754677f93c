//! Receivers turn a delivered [`Message`] into a scheduler work item.
//!
//! A receiver either stands alone (admission gated by its own `active` /
//! `max_active` counters) or is governed by an [`Arbiter`], in which case
//! admission is delegated to [`Arbiter::can_receive`]. Either way, the
//! `active` counter here tracks in-flight handler invocations for this
//! receiver specifically; it is distinct from whatever bookkeeping the
//! arbiter itself keeps across its three receivers.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::arbiter::{Arbiter, ArbiterDecision};
use crate::debug::{enabled, section};
use crate::message::Message;
use crate::port::Port;
use crate::scheduler::Scheduler;

/// Which of an arbiter's three slots a receiver occupies, or `Free` for a
/// receiver with no arbiter at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Free,
    Exclusive,
    Concurrent,
    Teardown,
}

/// Outcome of [`Receiver::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deliver {
    /// The message was admitted; a scheduler work item has been queued.
    Delivered,
    /// Temporary refusal; the port should hold the message and retry later.
    Pause,
    /// Temporary refusal; additionally the receiver asks to be detached
    /// until it re-arms.
    Remove,
    /// Permanent refusal.
    Never,
}

type Handler = dyn Fn(&Message) + Send + Sync;

pub struct Receiver {
    scheduler: Arc<dyn Scheduler>,
    handler: Box<Handler>,
    active: AtomicUsize,
    max_active: Option<usize>,
    arbiter: OnceLock<(Weak<Arbiter>, Role)>,
    port: Mutex<Option<Weak<Port>>>,
}

impl Receiver {
    /// Creates a free (ungoverned) receiver bound to `scheduler`, admitting
    /// up to `max_active` concurrent handler invocations (`None` for
    /// unbounded, the default for free receivers).
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        max_active: Option<usize>,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Arc<Receiver> {
        Arc::new(Receiver {
            scheduler,
            handler: Box::new(handler),
            active: AtomicUsize::new(0),
            max_active,
            arbiter: OnceLock::new(),
            port: Mutex::new(None),
        })
    }

    pub fn role(&self) -> Role {
        self.arbiter.get().map(|(_, role)| *role).unwrap_or(Role::Free)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Associates this receiver with an arbiter slot. Called exactly once,
    /// by [`Arbiter::coordinate`], before the receiver is exposed to any
    /// producer.
    pub(crate) fn bind_arbiter(&self, arbiter: Weak<Arbiter>, role: Role) {
        self.arbiter
            .set((arbiter, role))
            .unwrap_or_else(|_| panic!("receiver already bound to an arbiter"));
    }

    pub(crate) fn attach_port(&self, port: Weak<Port>) {
        *self.port.lock().unwrap() = Some(port);
    }

    /// Attempts to admit `message`. Never blocks the calling thread.
    pub fn deliver(self: &Arc<Self>, message: Message) -> Deliver {
        let governed = self.arbiter.get();
        let decision = match governed {
            Some((weak, role)) => match weak.upgrade() {
                Some(arbiter) => arbiter.can_receive(*role),
                None => ArbiterDecision::Never,
            },
            None => self.try_admit_free(),
        };

        match decision {
            ArbiterDecision::Never => Deliver::Never,
            ArbiterDecision::Pause => Deliver::Pause,
            ArbiterDecision::Admit => {
                if governed.is_some() {
                    self.active.fetch_add(1, Ordering::AcqRel);
                }
                self.run_admitted(message);
                Deliver::Delivered
            }
        }
    }

    fn try_admit_free(&self) -> ArbiterDecision {
        let max = self.max_active.unwrap_or(usize::MAX);
        loop {
            let cur = self.active.load(Ordering::Acquire);
            if cur >= max {
                return ArbiterDecision::Pause;
            }
            if self
                .active
                .compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return ArbiterDecision::Admit;
            }
        }
    }

    fn run_admitted(self: &Arc<Self>, message: Message) {
        let this = Arc::clone(self);
        crate::debug::trace_section!(
            section::RECEIVER,
            "junction::receiver",
            "admitted message what={}",
            message.what()
        );
        self.scheduler.queue(Box::new(move || {
            this.run_handler(&message);
            this.active.fetch_sub(1, Ordering::AcqRel);
            if let Some((weak, role)) = this.arbiter.get() {
                if let Some(arbiter) = weak.upgrade() {
                    arbiter.on_completed(*role);
                }
            }
            this.signal_port();
        }));
    }

    /// Runs the handler, catching panics at the scheduler boundary: a
    /// handler failure is logged and treated as ordinary completion
    /// (counters still advance, arbiter still notified), not propagated and
    /// not allowed to poison anything.
    fn run_handler(&self, message: &Message) {
        // Teardown must not run while any prior exclusive/concurrent
        // handler on the same arbiter is still in flight.
        if self.role() == Role::Teardown {
            if let Some((weak, _)) = self.arbiter.get() {
                if let Some(arbiter) = weak.upgrade() {
                    arbiter.wait_for_quiescent();
                }
            }
        }
        let handler = &self.handler;
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(message)));
        if let Err(panic) = result {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            log::error!(target: "junction::receiver", "handler panicked: {detail}");
        }
    }

    pub(crate) fn signal_port(&self) {
        let port = self.port.lock().unwrap().as_ref().and_then(Weak::upgrade);
        if let Some(port) = port {
            port.flush();
        }
        if enabled(section::RECEIVER) {
            crate::debug::trace_section!(section::RECEIVER, "junction::receiver", "handler completed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{SchedulerConfig, SharedQueueScheduler};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn scheduler() -> Arc<dyn Scheduler> {
        Arc::new(SharedQueueScheduler::new(SchedulerConfig {
            min_threads: 1,
            max_threads: 2,
            idle_timeout: Duration::from_millis(50),
        }))
    }

    #[test]
    fn free_receiver_admits_up_to_max_active() {
        let sched = scheduler();
        let running = Arc::new(AtomicUsize::new(0));
        let r2 = running.clone();
        let receiver = Receiver::new(sched, Some(1), move |_| {
            r2.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
        });
        let m = Message::new(1).build();
        assert_eq!(receiver.deliver(m.clone()), Deliver::Delivered);
        // Second message arrives before the first handler has released its
        // active slot: max_active=1 means it must pause.
        assert_eq!(receiver.deliver(m), Deliver::Pause);
    }

    #[test]
    fn free_receiver_defaults_to_unbounded_admission() {
        let sched = scheduler();
        let receiver = Receiver::new(sched, None, |_| {});
        for _ in 0..10 {
            assert_eq!(receiver.deliver(Message::new(1).build()), Deliver::Delivered);
        }
    }

    #[test]
    fn handler_panic_is_caught_and_counters_still_advance() {
        let sched = scheduler();
        let receiver = Receiver::new(sched, Some(1), |_| panic!("boom"));
        assert_eq!(receiver.deliver(Message::new(1).build()), Deliver::Delivered);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(receiver.active(), 0);
    }
}
