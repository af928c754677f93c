//! The work-stealing scheduler: each worker owns a [`WorkStealQueue`] (a
//! local [`Deque`](crate::deque::Deque) plus a shared global overflow
//! [`LockFreeQueue`] plus a steal ring over its peers).
//!
//! `queue()` called from outside a worker thread goes to the shared global
//! queue; called from *inside* a worker's own running job it goes onto that
//! worker's local deque instead, giving LIFO locality for work a handler
//! spawns on itself. Recursive fan-out (a handler posting a burst of
//! further messages to a fresh receiver) is the case this matters most for.
//! A thread-local tracks which `WorkStealQueue`, if any, the calling thread
//! owns.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Job, Scheduler, SchedulerConfig};
use crate::debug::{enabled, section};
use crate::queue::lockfree::LockFreeQueue;
use crate::queue::worksteal::WorkStealQueue;

const PARK_INTERVAL: Duration = Duration::from_millis(1);

thread_local! {
    static CURRENT: RefCell<Option<Arc<WorkStealQueue<Job>>>> = const { RefCell::new(None) };
}

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

pub struct WorkStealScheduler {
    global: Arc<LockFreeQueue<Job>>,
    queues: Mutex<Vec<Arc<WorkStealQueue<Job>>>>,
    parker: Arc<Parker>,
    closed: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: Arc<AtomicUsize>,
    config: SchedulerConfig,
}

impl WorkStealScheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let this = Arc::new(WorkStealScheduler {
            global: Arc::new(LockFreeQueue::new()),
            queues: Mutex::new(Vec::new()),
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
        let own = Arc::new(WorkStealQueue::new(self.global.clone()));
        {
            let mut queues = self.queues.lock().unwrap();
            for existing in queues.iter() {
                existing.register_peer(own.local_handle());
                own.register_peer(existing.local_handle());
            }
            queues.push(own.clone());
        }

        let parker = self.parker.clone();
        let closed = self.closed.clone();
        let worker_count = self.worker_count.clone();

        worker_count.fetch_add(1, Ordering::AcqRel);
        let handle = thread::Builder::new()
            .name("junction-worksteal-worker".into())
            .spawn(move || {
                CURRENT.with(|c| *c.borrow_mut() = Some(own.clone()));
                loop {
                    if let Some(job) = own.pop() {
                        job();
                        continue;
                    }
                    if closed.load(Ordering::Acquire) && own.is_empty() {
                        break;
                    }
                    parker.park(PARK_INTERVAL);
                }
                CURRENT.with(|c| *c.borrow_mut() = None);
                worker_count.fetch_sub(1, Ordering::AcqRel);
            })
            .expect("failed to spawn scheduler worker thread");
        self.workers.lock().unwrap().push(handle);
    }
}

impl Scheduler for WorkStealScheduler {
    fn queue(&self, job: Job) {
        let inside_worker = CURRENT.with(|c| c.borrow().clone());
        match inside_worker {
            Some(local) => {
                if enabled(section::SCHEDULER) {
                    crate::debug::trace_section!(
                        section::SCHEDULER,
                        "junction::scheduler::worksteal",
                        "queueing onto caller's own local deque"
                    );
                }
                local.push(job);
            }
            None => {
                crate::debug::trace_section!(
                    section::SCHEDULER,
                    "junction::scheduler::worksteal",
                    "queueing onto global overflow queue"
                );
                self.global.push(job);
            }
        }
        self.parker.notify();

        let workers = self.worker_count.load(Ordering::Acquire);
        if workers < self.config.max_threads && workers > 0 && !self.global.is_empty() {
            self.spawn_worker();
        }
    }

    fn min_threads(&self) -> usize {
        self.config.min_threads
    }

    fn max_threads(&self) -> usize {
        self.config.max_threads
    }

    fn queue_depth(&self) -> usize {
        if self.global.is_empty() {
            0
        } else {
            1
        }
    }

    fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::Acquire)
    }

    fn rebalance(&self) {
        let workers = self.worker_count.load(Ordering::Acquire);
        if workers > 0 && workers < self.config.max_threads && !self.global.is_empty() {
            self.spawn_worker();
        }
    }
}

impl Drop for WorkStealScheduler {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.global.close();
        self.parker.notify();
        for handle in self.workers.get_mut().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn config(min: usize, max: usize) -> SchedulerConfig {
        SchedulerConfig {
            min_threads: min,
            max_threads: max,
            idle_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn runs_queued_jobs() {
        let sched = WorkStealScheduler::new(config(2, 2));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..500 {
            let c = counter.clone();
            sched.queue(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        thread::sleep(Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 500);
    }

    #[test]
    fn jobs_queued_from_within_a_job_still_all_run() {
        // Exercises the "queue from inside a worker's own code path" rule:
        // a running job enqueues further jobs, which must still all run.
        let sched = WorkStealScheduler::new(config(2, 2));
        let counter = Arc::new(AtomicUsize::new(0));
        let sched_for_job = sched.clone();
        for _ in 0..10 {
            let c = counter.clone();
            let sched2 = sched_for_job.clone();
            sched.queue(Box::new(move || {
                for _ in 0..10 {
                    let c = c.clone();
                    sched2.queue(Box::new(move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    }));
                }
            }));
        }
        thread::sleep(Duration::from_millis(300));
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }
}
