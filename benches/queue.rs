//! Throughput comparison across the concurrent queue family: one producer
//! thread pushing as fast as possible against one consumer thread draining
//! it, plus `crossbeam-channel` as an external reference point.

use crossbeam_utils::thread::scope;
use criterion::{criterion_group, criterion_main, Criterion};
use junction::{BlockingQueue, LockFreeQueue, PopResult};

const TOTAL_MESSAGES: usize = 20_000;

fn blocking_queue(c: &mut Criterion) {
    c.bench_function("blocking_queue_spsc", |b| {
        b.iter(|| {
            let queue: BlockingQueue<i32> = BlockingQueue::new();
            scope(|s| {
                s.spawn(|_| {
                    for i in 0..TOTAL_MESSAGES {
                        queue.push(i as i32);
                    }
                });
                for _ in 0..TOTAL_MESSAGES {
                    criterion::black_box(queue.pop());
                }
            })
            .unwrap();
        });
    });
}

fn lockfree_queue(c: &mut Criterion) {
    c.bench_function("lockfree_queue_spsc", |b| {
        b.iter(|| {
            let queue: LockFreeQueue<i32> = LockFreeQueue::new();
            scope(|s| {
                s.spawn(|_| {
                    for i in 0..TOTAL_MESSAGES {
                        queue.push(i as i32);
                    }
                });
                let mut received = 0;
                while received < TOTAL_MESSAGES {
                    match queue.pop() {
                        PopResult::Item(v) => {
                            criterion::black_box(v);
                            received += 1;
                        }
                        PopResult::Empty | PopResult::Closed => std::hint::spin_loop(),
                    }
                }
            })
            .unwrap();
        });
    });
}

fn crossbeam_reference(c: &mut Criterion) {
    c.bench_function("crossbeam_channel_spsc", |b| {
        b.iter(|| {
            let (tx, rx) = crossbeam_channel::unbounded::<i32>();
            scope(|s| {
                s.spawn(|_| {
                    for i in 0..TOTAL_MESSAGES {
                        tx.send(i as i32).unwrap();
                    }
                });
                for _ in 0..TOTAL_MESSAGES {
                    rx.recv().unwrap();
                }
            })
            .unwrap();
        });
    });
}

criterion_group!(queue_benches, blocking_queue, lockfree_queue, crossbeam_reference);
criterion_main!(queue_benches);
