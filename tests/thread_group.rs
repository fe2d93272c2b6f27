use hsa_cts::{HsaError, ThreadGroup};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn every_worker_runs_once_per_round(workers in 1usize..8, rounds in 1usize..6) {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut group = ThreadGroup::new(workers).unwrap();
        let counter = Arc::clone(&runs);
        group
            .add(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }, workers)
            .unwrap();
        group.thread_create().unwrap();

        for round in 1..=rounds {
            group.run_round().unwrap();
            prop_assert_eq!(runs.load(Ordering::SeqCst), workers * round);
        }
        group.destroy();
    }
}

#[test]
fn worker_indices_are_distinct() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let group = ThreadGroup::spawn_shrinking(5, move |worker| record.lock().push(worker)).unwrap();
    group.run_round().unwrap();
    group.destroy();

    let mut seen = seen.lock().clone();
    seen.sort_unstable();
    assert_eq!(seen, (0..5).collect::<Vec<_>>());
}

#[test]
fn start_while_in_flight_is_busy() {
    let gate = Arc::new(parking_lot::Mutex::new(()));
    let held = gate.lock();
    let worker_gate = Arc::clone(&gate);
    let group = ThreadGroup::spawn_shrinking(1, move |_| {
        drop(worker_gate.lock());
    })
    .unwrap();

    group.start().unwrap();
    assert!(matches!(group.start(), Err(HsaError::GroupBusy)));
    drop(held);
    group.wait();
    group.run_round().unwrap();
}

#[test]
#[should_panic(expected = "worker 2 failed")]
fn worker_panics_reach_the_waiter() {
    let group = ThreadGroup::spawn_shrinking(4, |worker| {
        assert_ne!(worker, 2, "worker 2 failed");
    })
    .unwrap();
    group.run_round().unwrap();
}

#[test]
fn exit_lets_a_started_round_finish() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let group = ThreadGroup::spawn_shrinking(3, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    group.start().unwrap();
    group.exit();
    group.wait();
    group.destroy();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}
