//! The shared-queue scheduler: one [`BlockingQueue`] shared by every worker.
//! Simplest of the three variants; fairness is plain FIFO.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::{Job, Scheduler, SchedulerConfig};
use crate::debug::{enabled, section};
use crate::queue::{BlockingQueue, PopResult};

pub struct SharedQueueScheduler {
    queue: Arc<BlockingQueue<Job>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: Arc<AtomicUsize>,
    config: SchedulerConfig,
}

impl SharedQueueScheduler {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let this = Arc::new(SharedQueueScheduler {
            queue: Arc::new(BlockingQueue::new()),
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
        let queue = self.queue.clone();
        let worker_count = self.worker_count.clone();
        let min_threads = self.config.min_threads;
        let idle_timeout = self.config.idle_timeout;
        worker_count.fetch_add(1, Ordering::AcqRel);
        let handle = thread::Builder::new()
            .name("junction-shared-worker".into())
            .spawn(move || {
                loop {
                    match queue.timed_pop(idle_timeout) {
                        PopResult::Item(job) => job(),
                        PopResult::Closed => break,
                        PopResult::Empty => {
                            if worker_count.load(Ordering::Acquire) > min_threads {
                                break;
                            }
                        }
                    }
                }
                worker_count.fetch_sub(1, Ordering::AcqRel);
            })
            .expect("failed to spawn scheduler worker thread");
        self.workers.lock().unwrap().push(handle);
    }
}

impl Scheduler for SharedQueueScheduler {
    fn queue(&self, job: Job) {
        if enabled(section::SCHEDULER) {
            crate::debug::trace_section!(
                section::SCHEDULER,
                "junction::scheduler::shared",
                "queueing job, depth={}",
                self.queue.len()
            );
        }
        self.queue.push(job);
        let workers = self.worker_count.load(Ordering::Acquire);
        if self.queue.len() > workers && workers < self.config.max_threads {
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
        self.queue.len()
    }

    fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::Acquire)
    }

    fn rebalance(&self) {
        let workers = self.worker_count.load(Ordering::Acquire);
        if self.queue.len() > workers && workers < self.config.max_threads {
            self.spawn_worker();
        }
    }
}

impl Drop for SharedQueueScheduler {
    fn drop(&mut self) {
        self.queue.close();
        for handle in self.workers.get_mut().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn config(min: usize, max: usize) -> SchedulerConfig {
        SchedulerConfig {
            min_threads: min,
            max_threads: max,
            idle_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn runs_queued_jobs() {
        let sched = SharedQueueScheduler::new(config(2, 2));
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let c = counter.clone();
            sched.queue(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn drop_runs_destructors_for_unrun_items() {
        struct Dropper(Arc<AtomicUsize>);
        impl Drop for Dropper {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let dropped = Arc::new(AtomicUsize::new(0));
        let sched = SharedQueueScheduler::new(config(0, 0));
        for _ in 0..5 {
            let d = Dropper(dropped.clone());
            sched.queue(Box::new(move || {
                let _keep_alive = &d;
            }));
        }
        drop(sched);
        assert_eq!(dropped.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn min_and_max_threads_report_configured_values() {
        let sched = SharedQueueScheduler::new(config(2, 6));
        assert_eq!(sched.min_threads(), 2);
        assert_eq!(sched.max_threads(), 6);
    }
}
