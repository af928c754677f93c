//! Recursive fan-out: a top-level receiver handles one message and, for each
//! of N messages, creates a fresh port + receiver and posts N messages to it.
//! The leaf receiver must run exactly N*N times regardless of which scheduler
//! variant backs the receivers. Scaled from 1,000x1,000 to 40x40 to keep the
//! suite fast; the invariant (every leaf fan-out message is handled, none
//! lost or double-counted) is unaffected by the scale-down.

use junction::{Message, Port, Scheduler, SchedulerConfig, SharedQueueScheduler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const FANOUT: usize = 40;

fn run_fanout(scheduler: Arc<dyn Scheduler>) {
    let h2_runs = Arc::new(AtomicUsize::new(0));

    let h1_port = Port::new();
    let sched_for_h1 = scheduler.clone();
    let h2_runs_for_h1 = h2_runs.clone();
    h1_port.attach(scheduler.clone(), None, move |_m| {
        for what in 0..FANOUT {
            let leaf_port = Port::new();
            let counter = h2_runs_for_h1.clone();
            leaf_port.attach(sched_for_h1.clone(), None, move |_m| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            for leaf_what in 0..FANOUT {
                leaf_port.post(Message::new((what * FANOUT + leaf_what) as i32).build());
            }
        }
    });

    h1_port.post(Message::new(0).build());

    let deadline = Instant::now() + Duration::from_secs(20);
    while h2_runs.load(Ordering::SeqCst) < FANOUT * FANOUT && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(h2_runs.load(Ordering::SeqCst), FANOUT * FANOUT);
}

#[test]
fn fanout_runs_exactly_n_squared_times_on_shared_queue_scheduler() {
    let scheduler: Arc<dyn Scheduler> = SharedQueueScheduler::new(SchedulerConfig {
        min_threads: 4,
        max_threads: 8,
        idle_timeout: Duration::from_millis(100),
    });
    run_fanout(scheduler);
}

#[test]
fn fanout_runs_exactly_n_squared_times_on_work_steal_scheduler() {
    let scheduler: Arc<dyn Scheduler> = junction::WorkStealScheduler::new(SchedulerConfig {
        min_threads: 4,
        max_threads: 8,
        idle_timeout: Duration::from_millis(100),
    });
    run_fanout(scheduler);
}
