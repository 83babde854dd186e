//! Concurrency stress for the workload distributor.
//!
//! Ten producer threads race 600 enqueues each against a 5000-slot
//! queue: exactly 5000 must be accepted, every accepted task must run
//! exactly once, and the size counter must read zero once drained.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ballast_core::time::SystemClock;
use ballast_engine::{EnqueueError, WorkloadDistributor};
use ballast_test_utils::MockHost;

const PRODUCERS: usize = 10;
const TASKS_PER_PRODUCER: usize = 600;

#[test]
fn concurrent_overflow_accounting_is_exact() {
    let clock = Arc::new(SystemClock::new());
    let host = Arc::new(MockHost::new());
    // Large budget so draining is bounded by queue content, not time.
    let distributor = WorkloadDistributor::new(1_000_000_000, clock, host.clone());

    let runs = Arc::new(AtomicU64::new(0));
    let accepted = Arc::new(AtomicU64::new(0));
    let rejected = Arc::new(AtomicU64::new(0));

    let mut producers = Vec::new();
    for _ in 0..PRODUCERS {
        let distributor = Arc::clone(&distributor);
        let runs = Arc::clone(&runs);
        let accepted = Arc::clone(&accepted);
        let rejected = Arc::clone(&rejected);
        producers.push(std::thread::spawn(move || {
            for _ in 0..TASKS_PER_PRODUCER {
                let runs = Arc::clone(&runs);
                match distributor.enqueue(move || {
                    runs.fetch_add(1, Ordering::AcqRel);
                }) {
                    Ok(()) => accepted.fetch_add(1, Ordering::AcqRel),
                    Err(EnqueueError::QueueFull) => rejected.fetch_add(1, Ordering::AcqRel),
                };
            }
        }));
    }
    for producer in producers {
        producer.join().expect("producer panicked");
    }

    let accepted = accepted.load(Ordering::Acquire);
    let rejected = rejected.load(Ordering::Acquire);
    assert_eq!(accepted + rejected, (PRODUCERS * TASKS_PER_PRODUCER) as u64);
    assert_eq!(accepted, 5_000);
    assert_eq!(rejected, 1_000);

    // Drain on this thread (the "main" thread for the test).
    while !distributor.is_empty() {
        distributor.drain_once();
    }

    assert_eq!(runs.load(Ordering::Acquire), 5_000);
    assert_eq!(distributor.queue_size(), 0);
    assert_eq!(distributor.stats().executed(), 5_000);
    // Exactly one overflow warning for the whole burst.
    assert_eq!(host.admin_notices().len(), 1);
}

#[test]
fn producer_order_is_preserved_per_thread() {
    let clock = Arc::new(SystemClock::new());
    let host = Arc::new(MockHost::new());
    let distributor = WorkloadDistributor::new(1_000_000_000, clock, host);

    let observed = Arc::new(std::sync::Mutex::new(Vec::new()));
    for i in 0..100u32 {
        let observed = Arc::clone(&observed);
        distributor
            .enqueue(move || observed.lock().unwrap().push(i))
            .unwrap();
    }
    while !distributor.is_empty() {
        distributor.drain_once();
    }
    let observed = observed.lock().unwrap();
    assert_eq!(*observed, (0..100).collect::<Vec<_>>());
}
