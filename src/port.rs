//! Ports are single-receiver mailboxes.
//!
//! A port holds at most one attached [`Receiver`] plus a FIFO *holding queue*
//! for messages that have nowhere to go yet: either no receiver is attached,
//! or the attached receiver just refused the message (`Pause`, `Remove`, or
//! `Never`; see [`Deliver`]). [`Port::set_receiver`] re-attempts delivery of
//! anything still held, in order, stopping the moment the receiver refuses
//! again so later messages don't jump the queue.
//!
//! The receiver holds only a `Weak` back-reference to its port
//! ([`Receiver::attach_port`]); the port holds the strong `Arc<Receiver>`.
//! This breaks what would otherwise be an `Arc` reference cycle between the
//! two.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::debug::{enabled, section};
use crate::message::Message;
use crate::receiver::{Deliver, Receiver};
use crate::scheduler::Scheduler;

/// What to do with a message a [`Receiver::deliver`] call just refused.
enum Refusal {
    /// Admitted; nothing to hold.
    Delivered,
    /// Temporary refusal (`Pause` or `Never`): hold the message, keep the
    /// receiver attached.
    Hold,
    /// Temporary refusal that additionally asks to be detached (`Remove`):
    /// hold the message and clear the attached receiver.
    HoldAndDetach,
}

fn classify(decision: Deliver) -> Refusal {
    match decision {
        Deliver::Delivered => Refusal::Delivered,
        Deliver::Pause | Deliver::Never => Refusal::Hold,
        Deliver::Remove => Refusal::HoldAndDetach,
    }
}

struct PortState {
    receiver: Option<Arc<Receiver>>,
    holding: VecDeque<Message>,
}

/// A single-receiver mailbox. Messages posted while no receiver is attached,
/// or while the attached receiver is refusing, are buffered here until a
/// receiver is willing to take them.
pub struct Port {
    state: Mutex<PortState>,
}

impl Default for Port {
    fn default() -> Self {
        Port {
            state: Mutex::new(PortState {
                receiver: None,
                holding: VecDeque::new(),
            }),
        }
    }
}

impl Port {
    pub fn new() -> Arc<Port> {
        Arc::new(Port::default())
    }

    /// Convenience constructor matching the external-interface shape of
    /// `arbiter_receive(scheduler?, port, handler, user_data, destroy?)`:
    /// builds a free receiver over `scheduler` and attaches it to a fresh
    /// port in one step.
    pub fn with_receiver(
        scheduler: Arc<dyn Scheduler>,
        max_active: Option<usize>,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> (Arc<Port>, Arc<Receiver>) {
        let port = Port::new();
        let receiver = port.attach(scheduler, max_active, handler);
        (port, receiver)
    }

    /// Builds a free receiver over `scheduler` and attaches it to `self`.
    pub fn attach(
        self: &Arc<Self>,
        scheduler: Arc<dyn Scheduler>,
        max_active: Option<usize>,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Arc<Receiver> {
        let receiver = Receiver::new(scheduler, max_active, handler);
        self.set_receiver(Some(receiver.clone()));
        receiver
    }

    /// Delivers `message` to the attached receiver, holding it if there is
    /// none attached or the receiver refuses. If messages are already
    /// holding, the new one is appended and delivery goes through `flush`
    /// instead, so a late-arriving message never overtakes an earlier one
    /// from the same port still waiting its turn.
    pub fn post(&self, message: Message) {
        crate::debug::trace_section!(
            section::PORT,
            "junction::port",
            "posting message what={}",
            message.what()
        );
        let mut state = self.state.lock().unwrap();
        if !state.holding.is_empty() {
            state.holding.push_back(message);
            drop(state);
            self.flush();
            return;
        }
        match state.receiver.clone() {
            Some(receiver) => match classify(receiver.deliver(message.clone())) {
                Refusal::Delivered => {}
                Refusal::Hold => state.holding.push_back(message),
                Refusal::HoldAndDetach => {
                    state.holding.push_back(message);
                    state.receiver = None;
                }
            },
            None => state.holding.push_back(message),
        }
    }

    /// Attaches (or detaches, if `None`) the port's receiver, then flushes
    /// any held messages to it in FIFO order.
    pub fn set_receiver(self: &Arc<Self>, receiver: Option<Arc<Receiver>>) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(r) = &receiver {
                r.attach_port(Arc::downgrade(self));
            }
            state.receiver = receiver;
        }
        self.flush();
    }

    pub fn has_receiver(&self) -> bool {
        self.state.lock().unwrap().receiver.is_some()
    }

    /// Re-attempts delivery of held messages against the current receiver,
    /// in order, stopping as soon as one is refused again.
    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap();
        loop {
            let receiver = match &state.receiver {
                Some(r) => r.clone(),
                None => return,
            };
            let message = match state.holding.pop_front() {
                Some(m) => m,
                None => return,
            };
            match classify(receiver.deliver(message.clone())) {
                Refusal::Delivered => {
                    if enabled(section::PORT) {
                        crate::debug::trace_section!(section::PORT, "junction::port", "flushed held message");
                    }
                }
                Refusal::Hold => {
                    state.holding.push_front(message);
                    return;
                }
                Refusal::HoldAndDetach => {
                    state.holding.push_front(message);
                    state.receiver = None;
                    return;
                }
            }
        }
    }

    pub fn held_len(&self) -> usize {
        self.state.lock().unwrap().holding.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{SchedulerConfig, SharedQueueScheduler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn scheduler() -> Arc<dyn Scheduler> {
        Arc::new(SharedQueueScheduler::new(SchedulerConfig {
            min_threads: 1,
            max_threads: 2,
            idle_timeout: Duration::from_millis(50),
        }))
    }

    #[test]
    fn post_with_no_receiver_holds_the_message() {
        let port = Port::new();
        port.post(Message::new(1).build());
        assert!(!port.has_receiver());
        assert_eq!(port.held_len(), 1);
    }

    #[test]
    fn set_receiver_flushes_held_messages_in_order() {
        let port = Port::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for what in 1..=3 {
            port.post(Message::new(what).build());
        }
        let o = order.clone();
        port.attach(scheduler(), None, move |m| {
            o.lock().unwrap().push(m.what());
        });
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(port.held_len(), 0);
    }

    #[test]
    fn post_to_attached_receiver_delivers_immediately_without_holding() {
        let port = Port::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        port.attach(scheduler(), None, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        port.post(Message::new(1).build());
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(port.held_len(), 0);
    }

    #[test]
    fn saturated_receiver_causes_post_to_hold_the_message() {
        let port = Port::new();
        let receiver = port.attach(scheduler(), Some(1), |_| {
            std::thread::sleep(Duration::from_millis(100));
        });
        port.post(Message::new(1).build());
        // Receiver is now saturated (active == max_active == 1).
        port.post(Message::new(2).build());
        assert_eq!(port.held_len(), 1);
        assert_eq!(receiver.active(), 1);
    }

    #[test]
    fn flush_on_handler_completion_drains_a_held_message() {
        let port = Port::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        port.attach(scheduler(), Some(1), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
        });
        port.post(Message::new(1).build());
        port.post(Message::new(2).build());
        assert_eq!(port.held_len(), 1);
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(port.held_len(), 0);
    }

    #[test]
    fn set_receiver_to_none_detaches_and_future_posts_hold() {
        let port = Port::new();
        port.attach(scheduler(), None, |_| {});
        port.set_receiver(None);
        assert!(!port.has_receiver());
        port.post(Message::new(1).build());
        assert_eq!(port.held_len(), 1);
    }
}
