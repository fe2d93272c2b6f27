//! Fixed-capacity worker pool driven in rounds.
//!
//! Workers are spawned once and then park on a start gate. Every `start()`
//! opens a round in which each worker runs its work item exactly once;
//! `wait()` returns when the whole round has completed. The same thread set
//! can be reused for any number of rounds until `exit()`.

use crate::error::{HsaError, Result};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// A unit of work. The argument is whatever the closure captured; the
/// `usize` passed in is the worker index within the group.
pub type WorkItem = Arc<dyn Fn(usize) + Send + Sync + 'static>;

#[derive(Default)]
struct GroupState {
    round: u64,
    in_flight: bool,
    completed: usize,
    spawned: usize,
    exit: bool,
    panic: Option<Box<dyn Any + Send + 'static>>,
}

#[derive(Default)]
struct GroupShared {
    state: Mutex<GroupState>,
    start_gate: Condvar,
    done_gate: Condvar,
}

pub struct ThreadGroup {
    capacity: usize,
    items: Vec<WorkItem>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<GroupShared>,
}

impl std::fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("capacity", &self.capacity)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl ThreadGroup {
    pub fn new(capacity: usize) -> Result<Self> {
        let mut items = Vec::new();
        items.try_reserve_exact(capacity).map_err(|e| {
            HsaError::OutOfResources(format!("thread group of {capacity} workers: {e}"))
        })?;
        let mut workers = Vec::new();
        workers.try_reserve_exact(capacity).map_err(|e| {
            HsaError::OutOfResources(format!("thread group of {capacity} workers: {e}"))
        })?;

        Ok(Self {
            capacity,
            items,
            workers,
            shared: Arc::new(GroupShared::default()),
        })
    }

    /// Builds a group of up to `requested` workers all running `work`,
    /// halving the request whenever the host refuses to spawn threads.
    pub fn spawn_shrinking<F>(requested: usize, work: F) -> Result<Self>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let work: WorkItem = Arc::new(work);
        let mut size = requested.max(1);
        loop {
            let mut group = Self::new(size)?;
            group.add_item(Arc::clone(&work), size)?;
            match group.thread_create() {
                Ok(()) => return Ok(group),
                Err(HsaError::OutOfResources(msg)) if !group.workers.is_empty() => {
                    let spawned = group.len();
                    warn!(
                        requested = size,
                        spawned,
                        "{msg}; continuing with fewer workers"
                    );
                    return Ok(group);
                }
                Err(HsaError::OutOfResources(msg)) if size > 1 => {
                    warn!(requested = size, "{msg}; retrying with half the workers");
                    size /= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of spawned workers taking part in each round.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Appends `n` copies of `work`.
    pub fn add<F>(&mut self, work: F, n: usize) -> Result<()>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.add_item(Arc::new(work), n)
    }

    pub fn add_item(&mut self, work: WorkItem, n: usize) -> Result<()> {
        self.ensure_idle()?;
        let requested = self.items.len().saturating_add(n);
        debug_assert!(
            requested <= self.capacity,
            "thread group capacity {} exceeded: {} work items requested",
            self.capacity,
            requested
        );
        if requested > self.capacity {
            return Err(HsaError::CapacityExceeded {
                capacity: self.capacity,
                requested,
            });
        }

        self.items.extend(std::iter::repeat_n(work, n));
        Ok(())
    }

    /// Spawns one thread for every work item that has none yet. Each thread
    /// parks on the start gate before running anything.
    ///
    /// Fails with `GroupBusy` while a round is in flight and with
    /// `GroupExited` after `exit()`.
    pub fn thread_create(&mut self) -> Result<()> {
        self.ensure_idle()?;
        while self.workers.len() < self.items.len() {
            let index = self.workers.len();
            let work = Arc::clone(&self.items[index]);
            let shared = Arc::clone(&self.shared);
            let round = self.shared.state.lock().round;

            let handle = spawn_worker(format!("hsa-cts-worker-{index}"), move || {
                worker_loop(index, round, work, shared)
            })
            .map_err(|e| {
                HsaError::OutOfResources(format!(
                    "failed to spawn worker {index} of {}: {e}",
                    self.items.len()
                ))
            });

            match handle {
                Ok(handle) => {
                    self.workers.push(handle);
                    self.shared.state.lock().spawned += 1;
                }
                Err(e) => {
                    // Items without a thread would never report completion.
                    self.items.truncate(self.workers.len());
                    return Err(e);
                }
            }
        }

        debug!(workers = self.workers.len(), "thread group spawned");
        Ok(())
    }

    /// Releases the start gate for one round. Fails with `GroupExited` once
    /// `exit()` was requested.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.in_flight {
            return Err(HsaError::GroupBusy);
        }
        if state.exit {
            return Err(HsaError::GroupExited);
        }
        state.round += 1;
        state.completed = 0;
        state.in_flight = state.spawned > 0;
        self.shared.start_gate.notify_all();
        Ok(())
    }

    /// Blocks until every worker finished the current round. A panic raised
    /// by any work item is resumed on the calling thread.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        while state.in_flight {
            self.shared.done_gate.wait(&mut state);
        }
        if let Some(payload) = state.panic.take() {
            drop(state);
            panic::resume_unwind(payload);
        }
    }

    /// `start()` followed by `wait()`.
    pub fn run_round(&self) -> Result<()> {
        self.start()?;
        self.wait();
        Ok(())
    }

    /// Asks the workers to terminate at the next round boundary. A round
    /// that was already started still runs to completion.
    pub fn exit(&self) {
        let mut state = self.shared.state.lock();
        state.exit = true;
        self.shared.start_gate.notify_all();
    }

    fn ensure_idle(&self) -> Result<()> {
        let state = self.shared.state.lock();
        if state.in_flight {
            Err(HsaError::GroupBusy)
        } else if state.exit {
            Err(HsaError::GroupExited)
        } else {
            Ok(())
        }
    }

    /// Terminates and joins every worker.
    pub fn destroy(mut self) {
        self.join_all();
    }

    fn join_all(&mut self) {
        self.exit();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("thread group worker terminated abnormally");
            }
        }
    }
}

impl Drop for ThreadGroup {
    fn drop(&mut self) {
        self.join_all();
    }
}

fn spawn_worker<F>(name: String, body: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    #[cfg(test)]
    if tests::spawn_refused() {
        return Err(io::Error::new(io::ErrorKind::WouldBlock, "thread spawn refused"));
    }
    thread::Builder::new().name(name).spawn(body)
}

fn worker_loop(index: usize, mut seen: u64, work: WorkItem, shared: Arc<GroupShared>) {
    loop {
        {
            let mut state = shared.state.lock();
            while state.round == seen && !state.exit {
                shared.start_gate.wait(&mut state);
            }
            if state.round == seen {
                break;
            }
            seen = state.round;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(index)));

        let mut state = shared.state.lock();
        if let Err(payload) = outcome {
            state.panic.get_or_insert(payload);
        }
        state.completed += 1;
        if state.completed == state.spawned {
            state.in_flight = false;
            shared.done_gate.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    thread_local! {
        // Scripted spawn outcomes for the current test thread; `false` refuses.
        static SPAWN_SCRIPT: RefCell<VecDeque<bool>> = const { RefCell::new(VecDeque::new()) };
    }

    pub(super) fn spawn_refused() -> bool {
        SPAWN_SCRIPT.with(|script| script.borrow_mut().pop_front() == Some(false))
    }

    fn script_spawns(outcomes: &[bool]) {
        SPAWN_SCRIPT.with(|script| *script.borrow_mut() = outcomes.iter().copied().collect());
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl Fn(usize) + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn each_worker_runs_once_per_round() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut group = ThreadGroup::new(4).unwrap();
        let c = Arc::clone(&counter);
        group
            .add(
                move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                },
                4,
            )
            .unwrap();
        group.thread_create().unwrap();

        for round in 1..=5 {
            group.run_round().unwrap();
            assert_eq!(counter.load(Ordering::SeqCst), 4 * round);
        }
        group.destroy();
    }

    #[test]
    fn workers_receive_distinct_indices() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut group = ThreadGroup::new(3).unwrap();
        let s = Arc::clone(&seen);
        group.add(move |i| s.lock().push(i), 3).unwrap();
        group.thread_create().unwrap();
        group.run_round().unwrap();

        let mut indices = seen.lock().clone();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn mixed_work_items_in_one_group() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let mut group = ThreadGroup::new(5).unwrap();
        let a2 = Arc::clone(&a);
        let b2 = Arc::clone(&b);
        group
            .add(
                move |_| {
                    a2.fetch_add(1, Ordering::SeqCst);
                },
                2,
            )
            .unwrap();
        group
            .add(
                move |_| {
                    b2.fetch_add(10, Ordering::SeqCst);
                },
                3,
            )
            .unwrap();
        group.thread_create().unwrap();
        group.run_round().unwrap();

        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 30);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn adding_past_capacity_is_rejected() {
        let mut group = ThreadGroup::new(2).unwrap();
        group.add(|_| {}, 2).unwrap();
        let err = group.add(|_| {}, 1).unwrap_err();
        assert!(matches!(err, HsaError::CapacityExceeded { requested: 3, .. }));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "capacity 2 exceeded")]
    fn adding_past_capacity_is_fatal_in_debug_builds() {
        let mut group = ThreadGroup::new(2).unwrap();
        group.add(|_| {}, 3).unwrap();
    }

    #[test]
    fn wait_without_start_returns() {
        let mut group = ThreadGroup::new(1).unwrap();
        group.add(|_| {}, 1).unwrap();
        group.thread_create().unwrap();
        group.wait();
    }

    #[test]
    fn empty_group_rounds_complete_immediately() {
        let group = ThreadGroup::new(0).unwrap();
        group.run_round().unwrap();
        assert!(group.is_empty());
    }

    #[test]
    fn start_while_in_flight_is_busy() {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let mut group = ThreadGroup::new(1).unwrap();
        let g = Arc::clone(&gate);
        group
            .add(
                move |_| {
                    let (lock, cond) = &*g;
                    let mut open = lock.lock();
                    while !*open {
                        cond.wait(&mut open);
                    }
                },
                1,
            )
            .unwrap();
        group.thread_create().unwrap();
        group.start().unwrap();
        assert!(matches!(group.start(), Err(HsaError::GroupBusy)));

        let (lock, cond) = &*gate;
        *lock.lock() = true;
        cond.notify_all();
        group.wait();
    }

    #[test]
    #[should_panic(expected = "worker assertion")]
    fn worker_panic_is_resumed_by_wait() {
        let mut group = ThreadGroup::new(2).unwrap();
        group
            .add(
                |i| {
                    if i == 1 {
                        panic!("worker assertion");
                    }
                },
                2,
            )
            .unwrap();
        group.thread_create().unwrap();
        group.start().unwrap();
        group.wait();
    }

    #[test]
    fn exit_after_start_still_runs_the_round() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut group = ThreadGroup::new(3).unwrap();
        let c = Arc::clone(&counter);
        group
            .add(
                move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                },
                3,
            )
            .unwrap();
        group.thread_create().unwrap();
        group.start().unwrap();
        group.exit();
        group.destroy();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn spawn_shrinking_spawns_requested_workers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let group = ThreadGroup::spawn_shrinking(6, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        group.run_round().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), group.len());
        assert_eq!(group.len(), 6);
    }

    #[test]
    fn failed_spawn_keeps_the_workers_already_running() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut group = ThreadGroup::new(4).unwrap();
        group.add(counting(&counter), 4).unwrap();

        script_spawns(&[true, true, false]);
        let err = group.thread_create().unwrap_err();
        assert_eq!(err.status(), crate::Status::OutOfResources);
        assert_eq!(group.len(), 2);

        group.run_round().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        group.destroy();
    }

    #[test]
    fn spawn_shrinking_continues_with_a_partial_group() {
        let counter = Arc::new(AtomicUsize::new(0));
        script_spawns(&[true, true, true, false]);
        let group = ThreadGroup::spawn_shrinking(8, counting(&counter)).unwrap();
        assert_eq!(group.len(), 3);

        group.run_round().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn spawn_shrinking_halves_until_threads_spawn() {
        let counter = Arc::new(AtomicUsize::new(0));
        script_spawns(&[false, false]);
        let group = ThreadGroup::spawn_shrinking(8, counting(&counter)).unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group.capacity(), 2);

        group.run_round().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn spawn_shrinking_gives_up_after_a_single_worker() {
        script_spawns(&[false, false, false]);
        let err = ThreadGroup::spawn_shrinking(4, |_| {}).unwrap_err();
        assert!(matches!(err, HsaError::OutOfResources(_)));
    }

    #[test]
    fn start_after_exit_is_rejected() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group = ThreadGroup::spawn_shrinking(3, counting(&counter)).unwrap();
        group.exit();
        // Let the idle workers leave their loop.
        thread::sleep(Duration::from_millis(20));

        assert!(matches!(group.start(), Err(HsaError::GroupExited)));
        group.wait();
        group.destroy();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn growing_the_group_mid_round_is_busy() {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let mut group = ThreadGroup::new(2).unwrap();
        let g = Arc::clone(&gate);
        group
            .add(
                move |_| {
                    let (lock, cond) = &*g;
                    let mut open = lock.lock();
                    while !*open {
                        cond.wait(&mut open);
                    }
                },
                1,
            )
            .unwrap();
        group.thread_create().unwrap();
        group.start().unwrap();

        assert!(matches!(group.add(|_| {}, 1), Err(HsaError::GroupBusy)));
        assert!(matches!(group.thread_create(), Err(HsaError::GroupBusy)));

        let (lock, cond) = &*gate;
        *lock.lock() = true;
        cond.notify_all();
        group.wait();

        // Between rounds the group can grow again, and the newcomer joins
        // the next round.
        let counter = Arc::new(AtomicUsize::new(0));
        group.add(counting(&counter), 1).unwrap();
        group.thread_create().unwrap();
        assert_eq!(group.len(), 2);
        group.run_round().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
