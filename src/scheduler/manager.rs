//! The process-wide scheduler manager: owns the default scheduler, tracks
//! every live scheduler that asked to be rebalanced, and drives periodic
//! rebalancing either on its own background thread or on a tick the caller
//! supplies, for hosts that run their own cooperative main loop instead of
//! wanting a background thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{default_scheduler, Scheduler, SharedQueueScheduler};

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

pub struct SchedulerManager {
    default: RwLock<Arc<dyn Scheduler>>,
    schedulers: Mutex<Vec<Weak<dyn Scheduler>>>,
    started: AtomicBool,
    stop: Arc<AtomicBool>,
    tick_thread: Mutex<Option<JoinHandle<()>>>,
}

static MANAGER: OnceLock<SchedulerManager> = OnceLock::new();

/// The process-wide [`SchedulerManager`] singleton.
pub fn manager() -> &'static SchedulerManager {
    MANAGER.get_or_init(SchedulerManager::new)
}

impl SchedulerManager {
    fn new() -> Self {
        SchedulerManager {
            default: RwLock::new(default_scheduler()),
            schedulers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stop: Arc::new(AtomicBool::new(false)),
            tick_thread: Mutex::new(None),
        }
    }

    pub fn default_scheduler(&self) -> Arc<dyn Scheduler> {
        self.default.read().unwrap().clone()
    }

    pub fn set_default_scheduler(&self, scheduler: Arc<dyn Scheduler>) {
        *self.default.write().unwrap() = scheduler;
    }

    /// Registers `scheduler` for periodic rebalancing. Holds only a `Weak`
    /// reference: a scheduler that is otherwise dropped is not kept alive by
    /// having been registered here.
    pub fn register(&self, scheduler: &Arc<dyn Scheduler>) {
        self.schedulers.lock().unwrap().push(Arc::downgrade(scheduler));
    }

    /// Starts periodic rebalancing. Idempotent: a second call is a no-op
    /// after the first one wins.
    ///
    /// If `use_periodic` is true, a background thread ticks every
    /// `interval` (or [`DEFAULT_TICK_INTERVAL`] if `None`) and invokes
    /// `on_tick` (if given) after each rebalance pass. If `use_periodic` is
    /// false, no thread is started and the caller is expected to drive
    /// rebalancing by calling [`SchedulerManager::tick`] themselves: the
    /// "external main-context" mode.
    pub fn init(
        &'static self,
        use_periodic: bool,
        interval: Option<Duration>,
        on_tick: Option<Box<dyn Fn() + Send + Sync>>,
    ) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        if !use_periodic {
            return;
        }
        let stop = self.stop.clone();
        let interval = interval.unwrap_or(DEFAULT_TICK_INTERVAL);
        let handle = thread::Builder::new()
            .name("junction-scheduler-manager".into())
            .spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    if stop.load(Ordering::Acquire) {
                        break;
                    }
                    manager().tick();
                    if let Some(cb) = &on_tick {
                        cb();
                    }
                }
            })
            .expect("failed to spawn scheduler manager thread");
        *self.tick_thread.lock().unwrap() = Some(handle);
    }

    /// Runs one rebalance pass over every still-live registered scheduler.
    /// Safe to call from an externally-driven tick even if `init` started
    /// its own background thread (rebalancing is idempotent per pass).
    pub fn tick(&self) {
        let mut schedulers = self.schedulers.lock().unwrap();
        schedulers.retain(|weak| weak.strong_count() > 0);
        for weak in schedulers.iter() {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.rebalance();
            }
        }
    }

    /// Stops the background rebalance thread (if one was started) and
    /// drops the registered-scheduler list. Registered schedulers
    /// themselves are not closed: a `Weak` reference confers no
    /// ownership to close with.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.tick_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.schedulers.lock().unwrap().clear();
        self.started.store(false, Ordering::Release);
        self.stop.store(false, Ordering::Release);
    }
}

impl Default for SchedulerManager {
    fn default() -> Self {
        Self::new()
    }
}
