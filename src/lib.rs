//! `junction`: message-passing concurrency over a pool of worker threads.
//!
//! A producer builds a [`Message`] and posts it to a [`Port`]. The port
//! forwards it to a [`Receiver`] directly, or via an [`Arbiter`] that
//! coordinates several receivers sharing the same data. The receiver asks
//! its [`Scheduler`] to run a work item that invokes its handler with the
//! message; the scheduler delivers that item through one of the
//! [`queue`] family's containers to a worker thread.
//!
//! ```
//! use junction::{Message, Port, SchedulerConfig, SharedQueueScheduler};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let scheduler = SharedQueueScheduler::new(SchedulerConfig::default());
//! let port = Port::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let seen2 = seen.clone();
//! port.attach(scheduler, None, move |_msg| {
//!     seen2.fetch_add(1, Ordering::SeqCst);
//! });
//! port.post(Message::new(1).build());
//! ```
//!
//! Three scheduler variants are interchangeable behind the same
//! [`Scheduler`] trait: [`SharedQueueScheduler`] (one blocking queue shared
//! by every worker), [`LockFreeScheduler`] (one lock-free queue per worker
//! fed by round-robin), and [`WorkStealScheduler`] (one work-stealing deque
//! per worker plus a shared overflow queue). A fourth,
//! [`ExternalScheduler`], drains its work items on a host-driven tick
//! instead of owning OS threads, for embedding into an existing event loop.
//!
//! Debug tracing is controlled by the `JUNCTION_DEBUG*` environment
//! variables (see [`debug`]) layered under the ordinary `log` facade, so
//! host applications can additionally filter by `RUST_LOG`.

pub mod arbiter;
pub mod debug;
pub mod deque;
pub mod error;
pub mod freelist;
pub mod message;
pub mod port;
pub mod queue;
pub mod receiver;
pub mod rrobin;
pub mod scheduler;
pub mod stack;
mod tagged_ptr;

pub use arbiter::{Arbiter, ArbiterDecision};
pub use deque::{Deque, Steal};
pub use error::{ArbiterError, MessageError};
pub use message::{DestructiblePointer, Message, MessageBuilder, Value};
pub use port::Port;
pub use queue::{BlockingQueue, LockFreeQueue, PopResult, WorkStealQueue};
pub use receiver::{Deliver, Receiver, Role};
pub use rrobin::RoundRobin;
pub use scheduler::{
    default_scheduler, set_default_scheduler, manager, ExternalScheduler, Job, LockFreeScheduler,
    Scheduler, SchedulerConfig, SharedQueueScheduler, WorkStealScheduler,
};
pub use stack::Stack;
