//! Signal value cell with blocking and polling waits.
//!
//! `SignalCell` is the synchronization device the reference runtime hands
//! out as a signal, and the same cell the harness itself leans on when a
//! producer thread has to hand work to a consumer thread.

use parking_lot::{Condvar, Mutex};
use std::hint;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering, fence};
use std::thread;
use std::time::{Duration, Instant};

/// Comparison applied between the live signal value and a compare value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Gte,
}

impl Condition {
    pub const ALL: [Condition; 4] = [Condition::Eq, Condition::Ne, Condition::Lt, Condition::Gte];

    pub fn holds(self, value: i64, compare: i64) -> bool {
        match self {
            Condition::Eq => value == compare,
            Condition::Ne => value != compare,
            Condition::Lt => value < compare,
            Condition::Gte => value >= compare,
        }
    }
}

/// How a waiting thread spends its time until the condition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitState {
    /// The thread is parked and descheduled.
    Blocked,
    /// The thread busy-polls the value.
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOrder {
    Relaxed,
    Acquire,
}

impl LoadOrder {
    pub fn ordering(self) -> Ordering {
        match self {
            LoadOrder::Relaxed => Ordering::Relaxed,
            LoadOrder::Acquire => Ordering::Acquire,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOrder {
    Relaxed,
    Release,
}

impl StoreOrder {
    pub fn ordering(self) -> Ordering {
        match self {
            StoreOrder::Relaxed => Ordering::Relaxed,
            StoreOrder::Release => Ordering::Release,
        }
    }
}

/// Ordering of a read-modify-write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOrder {
    Relaxed,
    Acquire,
    Release,
    AcqRel,
}

impl MemoryOrder {
    pub const ALL: [MemoryOrder; 4] = [
        MemoryOrder::Relaxed,
        MemoryOrder::Acquire,
        MemoryOrder::Release,
        MemoryOrder::AcqRel,
    ];

    pub fn ordering(self) -> Ordering {
        match self {
            MemoryOrder::Relaxed => Ordering::Relaxed,
            MemoryOrder::Acquire => Ordering::Acquire,
            MemoryOrder::Release => Ordering::Release,
            MemoryOrder::AcqRel => Ordering::AcqRel,
        }
    }

    /// Ordering used when a compare-and-swap fails; a failed exchange is a
    /// pure load.
    pub fn failure_ordering(self) -> Ordering {
        match self {
            MemoryOrder::Relaxed | MemoryOrder::Release => Ordering::Relaxed,
            MemoryOrder::Acquire | MemoryOrder::AcqRel => Ordering::Acquire,
        }
    }
}

/// Read-modify-write operations on a signal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalOp {
    Add,
    Subtract,
    And,
    Or,
    Xor,
    Exchange,
}

impl SignalOp {
    pub const ALL: [SignalOp; 6] = [
        SignalOp::Add,
        SignalOp::Subtract,
        SignalOp::And,
        SignalOp::Or,
        SignalOp::Xor,
        SignalOp::Exchange,
    ];

    /// Value the cell holds after applying the operation. Arithmetic wraps,
    /// matching the atomic instructions.
    pub fn apply(self, current: i64, operand: i64) -> i64 {
        match self {
            SignalOp::Add => current.wrapping_add(operand),
            SignalOp::Subtract => current.wrapping_sub(operand),
            SignalOp::And => current & operand,
            SignalOp::Or => current | operand,
            SignalOp::Xor => current ^ operand,
            SignalOp::Exchange => operand,
        }
    }
}

/// Hook called between two polls of an active wait.
pub trait Backoff {
    fn snooze(&mut self);

    fn reset(&mut self) {}
}

const SPIN_LIMIT: u32 = 6;

/// Exponential spin ramp that degrades to yielding the CPU.
#[derive(Debug, Default)]
pub struct SpinBackoff {
    step: u32,
}

impl SpinBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_yielding(&self) -> bool {
        self.step > SPIN_LIMIT
    }
}

impl Backoff for SpinBackoff {
    fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                hint::spin_loop();
            }
            self.step += 1;
        } else {
            thread::yield_now();
        }
    }

    fn reset(&mut self) {
        self.step = 0;
    }
}

/// Atomic 64-bit signal value plus the parking lot for blocked waiters.
#[derive(Debug)]
pub struct SignalCell {
    value: AtomicI64,
    parked: AtomicUsize,
    lock: Mutex<()>,
    wakeup: Condvar,
}

impl SignalCell {
    pub fn new(initial_value: i64) -> Self {
        Self {
            value: AtomicI64::new(initial_value),
            parked: AtomicUsize::new(0),
            lock: Mutex::new(()),
            wakeup: Condvar::new(),
        }
    }

    pub fn load(&self, order: LoadOrder) -> i64 {
        self.value.load(order.ordering())
    }

    pub fn store(&self, value: i64, order: StoreOrder) {
        self.value.store(value, order.ordering());
        self.notify();
    }

    /// Applies `op` atomically and returns the previous value.
    pub fn rmw(&self, op: SignalOp, operand: i64, order: MemoryOrder) -> i64 {
        let ordering = order.ordering();
        let previous = match op {
            SignalOp::Add => self.value.fetch_add(operand, ordering),
            SignalOp::Subtract => self.value.fetch_sub(operand, ordering),
            SignalOp::And => self.value.fetch_and(operand, ordering),
            SignalOp::Or => self.value.fetch_or(operand, ordering),
            SignalOp::Xor => self.value.fetch_xor(operand, ordering),
            SignalOp::Exchange => self.value.swap(operand, ordering),
        };
        self.notify();
        previous
    }

    /// Stores `value` if the cell holds `expected`; returns the value
    /// observed before the operation either way.
    pub fn compare_exchange(&self, expected: i64, value: i64, order: MemoryOrder) -> i64 {
        match self
            .value
            .compare_exchange(expected, value, order.ordering(), order.failure_ordering())
        {
            Ok(previous) => {
                self.notify();
                previous
            }
            Err(observed) => observed,
        }
    }

    /// Number of threads currently parked in a blocked wait.
    pub fn parked_waiters(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }

    /// Waits with the default `SpinBackoff` for active waits.
    pub fn wait(
        &self,
        condition: Condition,
        compare: i64,
        timeout: Option<Duration>,
        state: WaitState,
        order: LoadOrder,
    ) -> i64 {
        self.wait_with(
            condition,
            compare,
            timeout,
            state,
            order,
            &mut SpinBackoff::new(),
        )
    }

    /// Waits until `condition(value, compare)` holds or `timeout` elapses and
    /// returns the last observed value. `None` waits without deadline; the
    /// returned value only satisfies the condition if the wait did not time
    /// out.
    pub fn wait_with(
        &self,
        condition: Condition,
        compare: i64,
        timeout: Option<Duration>,
        state: WaitState,
        order: LoadOrder,
        backoff: &mut dyn Backoff,
    ) -> i64 {
        let current = self.load(order);
        if condition.holds(current, compare) || timeout == Some(Duration::ZERO) {
            return current;
        }

        // An unrepresentable deadline is treated as no deadline.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        match state {
            WaitState::Active => {
                backoff.reset();
                loop {
                    backoff.snooze();
                    let value = self.load(order);
                    if condition.holds(value, compare) {
                        return value;
                    }
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return value;
                    }
                }
            }
            WaitState::Blocked => {
                let mut guard = self.lock.lock();
                self.parked.fetch_add(1, Ordering::Relaxed);
                // Pairs with the fence in `notify`.
                fence(Ordering::SeqCst);

                let observed = loop {
                    let value = self.load(order);
                    if condition.holds(value, compare) {
                        break value;
                    }
                    match deadline {
                        Some(deadline) => {
                            if self.wakeup.wait_until(&mut guard, deadline).timed_out() {
                                break self.load(order);
                            }
                        }
                        None => self.wakeup.wait(&mut guard),
                    }
                };

                self.parked.fetch_sub(1, Ordering::Relaxed);
                observed
            }
        }
    }

    fn notify(&self) {
        fence(Ordering::SeqCst);
        if self.parked.load(Ordering::Relaxed) > 0 {
            let _guard = self.lock.lock();
            self.wakeup.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn conditions_are_signed_comparisons() {
        assert!(Condition::Eq.holds(-1, -1));
        assert!(Condition::Ne.holds(0, -1));
        assert!(Condition::Lt.holds(i64::MIN, 0));
        assert!(!Condition::Lt.holds(0, 0));
        assert!(Condition::Gte.holds(0, 0));
        assert!(Condition::Gte.holds(5, -5));
    }

    #[test]
    fn rmw_returns_previous_value() {
        let cell = SignalCell::new(100);
        assert_eq!(cell.rmw(SignalOp::Exchange, 200, MemoryOrder::Release), 100);
        assert_eq!(cell.load(LoadOrder::Relaxed), 200);
        assert_eq!(cell.rmw(SignalOp::Add, 5, MemoryOrder::Relaxed), 200);
        assert_eq!(cell.rmw(SignalOp::Subtract, 10, MemoryOrder::AcqRel), 205);
        assert_eq!(cell.load(LoadOrder::Acquire), 195);
    }

    #[test]
    fn compare_exchange_reports_observed_value() {
        let cell = SignalCell::new(3);
        assert_eq!(cell.compare_exchange(3, 9, MemoryOrder::AcqRel), 3);
        assert_eq!(cell.compare_exchange(3, 11, MemoryOrder::AcqRel), 9);
        assert_eq!(cell.load(LoadOrder::Relaxed), 9);
    }

    #[test]
    fn add_wraps_on_overflow() {
        let cell = SignalCell::new(i64::MAX);
        cell.rmw(SignalOp::Add, 1, MemoryOrder::Relaxed);
        assert_eq!(cell.load(LoadOrder::Relaxed), i64::MIN);
        assert_eq!(SignalOp::Add.apply(i64::MAX, 1), i64::MIN);
    }

    #[test]
    fn satisfied_wait_returns_without_blocking() {
        let cell = SignalCell::new(7);
        for state in [WaitState::Blocked, WaitState::Active] {
            let start = Instant::now();
            let value = cell.wait(Condition::Eq, 7, None, state, LoadOrder::Acquire);
            assert_eq!(value, 7);
            assert!(start.elapsed() < Duration::from_secs(1));
        }
        assert_eq!(cell.parked_waiters(), 0);
    }

    #[test]
    fn positive_timeout_waits_a_nonzero_duration() {
        let cell = SignalCell::new(0);
        for state in [WaitState::Blocked, WaitState::Active] {
            let start = Instant::now();
            let value = cell.wait(
                Condition::Eq,
                1,
                Some(Duration::from_millis(5)),
                state,
                LoadOrder::Relaxed,
            );
            assert_eq!(value, 0);
            assert!(start.elapsed() >= Duration::from_millis(5));
        }
    }

    #[test]
    fn zero_timeout_checks_once() {
        let cell = SignalCell::new(0);
        let value = cell.wait(
            Condition::Ne,
            0,
            Some(Duration::ZERO),
            WaitState::Blocked,
            LoadOrder::Relaxed,
        );
        assert_eq!(value, 0);
    }

    #[test]
    fn store_wakes_mixed_waiters() {
        let cell = Arc::new(SignalCell::new(0));
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let cell = Arc::clone(&cell);
                let state = if i % 2 == 0 {
                    WaitState::Blocked
                } else {
                    WaitState::Active
                };
                thread::spawn(move || cell.wait(Condition::Gte, 1, None, state, LoadOrder::Acquire))
            })
            .collect();

        while cell.parked_waiters() < 3 {
            thread::yield_now();
        }
        cell.store(1, StoreOrder::Release);

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
    }

    #[test]
    fn acquire_wait_observes_release_store_payload() {
        let cell = Arc::new(SignalCell::new(0));
        let payload = Arc::new(AtomicU64::new(0));

        let consumer = {
            let cell = Arc::clone(&cell);
            let payload = Arc::clone(&payload);
            thread::spawn(move || {
                cell.wait(
                    Condition::Eq,
                    1,
                    None,
                    WaitState::Blocked,
                    LoadOrder::Acquire,
                );
                payload.load(Ordering::Relaxed)
            })
        };

        payload.store(0xfeed, Ordering::Relaxed);
        cell.store(1, StoreOrder::Release);
        assert_eq!(consumer.join().unwrap(), 0xfeed);
    }

    #[derive(Default)]
    struct CountingBackoff {
        snoozes: usize,
    }

    impl Backoff for CountingBackoff {
        fn snooze(&mut self) {
            self.snoozes += 1;
            thread::yield_now();
        }
    }

    #[test]
    fn active_wait_calls_backoff_hook() {
        let cell = SignalCell::new(0);
        let mut backoff = CountingBackoff::default();
        cell.wait_with(
            Condition::Eq,
            1,
            Some(Duration::from_millis(2)),
            WaitState::Active,
            LoadOrder::Relaxed,
            &mut backoff,
        );
        assert!(backoff.snoozes > 0);
    }

    #[test]
    fn spin_backoff_ramps_to_yield() {
        let mut backoff = SpinBackoff::new();
        for _ in 0..=SPIN_LIMIT {
            assert!(!backoff.is_yielding());
            backoff.snooze();
        }
        assert!(backoff.is_yielding());
        backoff.reset();
        assert!(!backoff.is_yielding());
    }
}
