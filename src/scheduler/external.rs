//! A scheduler whose work items are drained by the *host's* event loop
//! rather than owned OS threads.
//!
//! There is no GLib-style main loop in this crate's dependency graph, so the
//! "context" is reduced to whatever poll/tick function the embedding
//! application already runs (a game loop, a GUI frame callback, an async
//! executor's `LocalSet`). The caller is responsible for calling
//! [`ExternalScheduler::tick`] (or [`tick_one`](ExternalScheduler::tick_one))
//! from that loop; nothing here spawns a thread.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::{Job, Scheduler, SchedulerConfig};

pub struct ExternalScheduler {
    queue: Mutex<VecDeque<Job>>,
    config: SchedulerConfig,
}

impl ExternalScheduler {
    pub fn new() -> Self {
        ExternalScheduler {
            queue: Mutex::new(VecDeque::new()),
            config: SchedulerConfig {
                min_threads: 0,
                max_threads: 0,
                ..SchedulerConfig::default()
            },
        }
    }

    /// Runs every job queued so far, in FIFO order. Returns how many ran.
    /// Jobs queued by a job that runs during this tick are left for the
    /// *next* tick, so one call always terminates.
    pub fn tick(&self) -> usize {
        let jobs: Vec<Job> = {
            let mut queue = self.queue.lock().unwrap();
            queue.drain(..).collect()
        };
        let ran = jobs.len();
        for job in jobs {
            job();
        }
        ran
    }

    /// Runs at most one queued job. Returns whether one ran.
    pub fn tick_one(&self) -> bool {
        let job = self.queue.lock().unwrap().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }
}

impl Default for ExternalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ExternalScheduler {
    fn queue(&self, job: Job) {
        self.queue.lock().unwrap().push_back(job);
    }

    fn min_threads(&self) -> usize {
        self.config.min_threads
    }

    fn max_threads(&self) -> usize {
        self.config.max_threads
    }

    fn queue_depth(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn worker_count(&self) -> usize {
        0
    }
}
