//! The lock-free scheduler: one [`LockFreeQueue`] per worker, fed through a
//! [`RoundRobin`] distributor.
//!
//! Workers spin briefly on their own queue, then try their peers in
//! round-robin order before backing off to sleep. Best throughput on a
//! heavily loaded many-core host; wastes CPU under light load.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Job, Scheduler, SchedulerConfig};
use crate::debug::{enabled, section};
use crate::queue::{LockFreeQueue, PopResult};
use crate::rrobin::RoundRobin;

/// Short spin count before a worker falls through to a peer steal attempt.
const SPIN_ATTEMPTS: usize = 64;
/// Sleep granularity once every queue (own + peers) has come up empty.
const BACKOFF: Duration = Duration::from_micros(200);

struct Parker {
    lock: Mutex<()>,
    cv: Condvar,
}

impl Parker {
    fn new() -> Self {
        Parker {
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    fn notify(&self) {
        self.cv.notify_all();
    }

    fn park(&self, timeout: Duration) {
        let guard = self.lock.lock().unwrap();
        let _ = self.cv.wait_timeout(guard, timeout).unwrap();
    }
}

pub struct LockFreeScheduler {
    queues: Mutex<Vec<Arc<LockFreeQueue<Job>>>>,
    rr: Arc<RoundRobin<Arc<LockFreeQueue<Job>>>>,
    parker: Arc<Parker>,
    closed: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: Arc<AtomicUsize>,
    config: SchedulerConfig,
}

impl LockFreeScheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let this = Arc::new(LockFreeScheduler {
            queues: Mutex::new(Vec::new()),
            rr: Arc::new(RoundRobin::new(config.max_threads)),
            parker: Arc::new(Parker::new()),
            closed: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            worker_count: Arc::new(AtomicUsize::new(0)),
            config,
        });
        for _ in 0..config.min_threads {
            this.spawn_worker();
        }
        this
    }

    fn spawn_worker(&self) {
        let own: Arc<LockFreeQueue<Job>> = Arc::new(LockFreeQueue::new());
        self.queues.lock().unwrap().push(own.clone());
        self.rr.append(own.clone());

        let rr = self.rr.clone();
        let parker = self.parker.clone();
        let closed = self.closed.clone();
        let worker_count = self.worker_count.clone();

        worker_count.fetch_add(1, Ordering::AcqRel);
        let handle = thread::Builder::new()
            .name("junction-lockfree-worker".into())
            .spawn(move || {
                Self::worker_loop(own, rr, parker, closed);
                worker_count.fetch_sub(1, Ordering::AcqRel);
            })
            .expect("failed to spawn scheduler worker thread");
        self.workers.lock().unwrap().push(handle);
    }

    fn worker_loop(
        own: Arc<LockFreeQueue<Job>>,
        peers: Arc<RoundRobin<Arc<LockFreeQueue<Job>>>>,
        parker: Arc<Parker>,
        closed: Arc<AtomicBool>,
    ) {
        loop {
            let mut ran = false;
            for _ in 0..SPIN_ATTEMPTS {
                match own.pop() {
                    PopResult::Item(job) => {
                        job();
                        ran = true;
                        break;
                    }
                    PopResult::Closed | PopResult::Empty => break,
                }
            }
            if ran {
                continue;
            }

            let attempts = peers.len().max(1);
            let mut stole = false;
            for _ in 0..attempts {
                match peers.next() {
                    Some(peer) => {
                        if let PopResult::Item(job) = peer.pop() {
                            job();
                            stole = true;
                            break;
                        }
                    }
                    None => break,
                }
            }
            if stole {
                continue;
            }

            if closed.load(Ordering::Acquire) && own.is_empty() {
                return;
            }
            parker.park(BACKOFF);
        }
    }
}

impl Scheduler for LockFreeScheduler {
    fn queue(&self, job: Job) {
        if enabled(section::SCHEDULER) {
            crate::debug::trace_section!(
                section::SCHEDULER,
                "junction::scheduler::lockfree",
                "dispatching job via round robin"
            );
        }
        let mut slot = Some(job);
        let dispatched = self.rr.dispatch(|q| {
            q.push(slot.take().expect("dispatch target invoked more than once"));
        });
        if !dispatched {
            // No workers registered yet (min_threads == 0): park the item on
            // a freshly spawned worker rather than dropping it.
            self.spawn_worker();
            self.rr.dispatch(|q| {
                if let Some(job) = slot.take() {
                    q.push(job);
                }
            });
        }
        self.parker.notify();

        let workers = self.worker_count.load(Ordering::Acquire);
        if workers > 0 && workers < self.config.max_threads {
            let backlog = self.queues.lock().unwrap().iter().filter(|q| !q.is_empty()).count();
            if backlog >= workers {
                self.spawn_worker();
            }
        }
    }

    fn min_threads(&self) -> usize {
        self.config.min_threads
    }

    fn max_threads(&self) -> usize {
        self.config.max_threads
    }

    fn queue_depth(&self) -> usize {
        self.queues.lock().unwrap().iter().map(|q| if q.is_empty() { 0 } else { 1 }).sum()
    }

    fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::Acquire)
    }

    fn rebalance(&self) {
        let workers = self.worker_count.load(Ordering::Acquire);
        if workers == 0 || workers >= self.config.max_threads {
            return;
        }
        let backlog = self.queues.lock().unwrap().iter().filter(|q| !q.is_empty()).count();
        if backlog >= workers {
            self.spawn_worker();
        }
    }
}

impl Drop for LockFreeScheduler {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        for q in self.queues.get_mut().unwrap().iter() {
            q.close();
        }
        self.parker.notify();
        for handle in self.workers.get_mut().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}
