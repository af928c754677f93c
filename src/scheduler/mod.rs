//! The scheduler family: worker-thread pools that run queued work items.
//!
//! Three interchangeable implementations back onto the queue family in
//! [`crate::queue`]: [`shared::SharedQueueScheduler`] (one
//! [`crate::queue::BlockingQueue`] shared by every worker),
//! [`lockfree::LockFreeScheduler`] (one
//! [`crate::queue::LockFreeQueue`] per worker plus round-robin dispatch), and
//! [`worksteal::WorkStealScheduler`] (one [`crate::deque::Deque`] per worker
//! plus a shared overflow queue). [`external::ExternalScheduler`] is a
//! fourth, non-thread-owning variant for hosts that want to drain work items
//! on their own event loop's tick instead of owned OS threads.
//!
//! All four share one [`Scheduler`] trait so [`crate::receiver::Receiver`]
//! and [`manager::SchedulerManager`] can hold `Arc<dyn Scheduler>` without
//! caring which variant backs it.

pub mod external;
pub mod lockfree;
pub mod manager;
pub mod shared;
pub mod worksteal;

use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

pub use external::ExternalScheduler;
pub use lockfree::LockFreeScheduler;
pub use shared::SharedQueueScheduler;
pub use worksteal::WorkStealScheduler;

/// A queued unit of work: a function plus whatever payload it closed over.
///
/// The payload is captured by the closure, so "the destructor runs whether
/// or not the item ran" falls out of ordinary `Drop`: dropping an
/// unexecuted `Job` drops its captured state without calling it.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Thread-pool sizing, shared by every scheduler variant that owns threads.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Workers started eagerly at construction and never reaped.
    pub min_threads: usize,
    /// Ceiling on workers spawned under sustained backlog.
    pub max_threads: usize,
    /// How long an idle worker above `min_threads` waits for work before
    /// exiting.
    pub idle_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            min_threads: 1,
            max_threads: (2 * num_cpus::get()).max(2),
            idle_timeout: Duration::from_secs(5),
        }
    }
}

/// Common contract for every scheduler variant.
pub trait Scheduler: Send + Sync {
    /// Enqueues `job` for execution on some worker. Never blocks the
    /// calling thread beyond a single lock/CAS on the chosen queue.
    fn queue(&self, job: Job);

    fn min_threads(&self) -> usize;
    fn max_threads(&self) -> usize;

    /// Snapshot of how many items are currently queued, summed across
    /// whatever internal queues this scheduler owns. Used by
    /// [`manager::SchedulerManager`] to decide whether to grow the pool;
    /// approximate and allowed to be stale the instant it's read.
    fn queue_depth(&self) -> usize {
        0
    }

    /// Snapshot of how many worker threads are currently alive.
    fn worker_count(&self) -> usize {
        self.min_threads()
    }

    /// Called periodically by [`manager::SchedulerManager`]; a scheduler
    /// that wants to grow under backlog observed since the last tick does so
    /// here. The default is a no-op: [`external::ExternalScheduler`] owns
    /// no threads to grow.
    fn rebalance(&self) {}
}

static DEFAULT: OnceLock<RwLock<Arc<dyn Scheduler>>> = OnceLock::new();

fn default_cell() -> &'static RwLock<Arc<dyn Scheduler>> {
    DEFAULT.get_or_init(|| RwLock::new(Arc::new(SharedQueueScheduler::new(SchedulerConfig::default()))))
}

/// The process-wide default scheduler, created lazily on first use.
pub fn default_scheduler() -> Arc<dyn Scheduler> {
    default_cell().read().unwrap().clone()
}

/// Replaces the process-wide default scheduler.
pub fn set_default_scheduler(scheduler: Arc<dyn Scheduler>) {
    *default_cell().write().unwrap() = scheduler;
}
