use super::{CaseEnv, TestCase};
use crate::agent::agents;
use crate::error::Status;
use crate::session::Session;
use crate::signal::Signal;
use crate::thread_group::ThreadGroup;
use crate::types::SignalHandle;
use crate::wait::{Condition, LoadOrder, MemoryOrder, SignalOp, StoreOrder, WaitState};
use crate::{Result, assert_status};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SUITE: &str = "signal";

pub(super) const CASES: &[TestCase] = &[
    TestCase::new(SUITE, "initial_values", initial_values),
    TestCase::new(SUITE, "create_not_initialized", create_not_initialized),
    TestCase::new(SUITE, "consumer_lists", consumer_lists),
    TestCase::new(SUITE, "double_destroy", double_destroy),
    TestCase::new(SUITE, "destroy_invalid_handle", destroy_invalid_handle),
    TestCase::new(SUITE, "destroy_forged_handle", destroy_forged_handle),
    TestCase::new(SUITE, "exchange_release", exchange_release),
    TestCase::new(SUITE, "arithmetic_composition", arithmetic_composition),
    TestCase::new(SUITE, "compare_and_swap", compare_and_swap),
    TestCase::new(
        SUITE,
        "satisfied_wait_returns_immediately",
        satisfied_wait_returns_immediately,
    ),
    TestCase::new(SUITE, "timeout_waits_non_zero", timeout_waits_non_zero),
    TestCase::new(SUITE, "mixed_waiters_all_wake", mixed_waiters_all_wake),
    TestCase::new(SUITE, "acquire_release_message", acquire_release_message),
    TestCase::new(SUITE, "concurrent_add", concurrent_add),
    TestCase::new(
        SUITE,
        "conditions_satisfied_remotely",
        conditions_satisfied_remotely,
    ),
];

const WAIT_STATES: [WaitState; 2] = [WaitState::Blocked, WaitState::Active];

fn initial_values(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    for value in [0, 1, -1, 100, -100, i64::MAX, i64::MIN] {
        let signal = rt.signal_create(value, &[])?;
        assert_eq!(rt.signal_load(signal, LoadOrder::Relaxed)?, value);
        assert_eq!(rt.signal_load(signal, LoadOrder::Acquire)?, value);
        assert_status!(rt.signal_destroy(signal), Status::Success);
    }
    session.close()
}

fn create_not_initialized(env: &CaseEnv) -> Result<()> {
    assert_status!(env.runtime.signal_create(0, &[]), Status::NotInitialized);
    Ok(())
}

fn consumer_lists(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    let all = agents(&**rt)?;

    let shared = rt.signal_create(3, &all)?;
    assert_eq!(rt.signal_load(shared, LoadOrder::Acquire)?, 3);
    assert_status!(rt.signal_destroy(shared), Status::Success);

    let twice = [all[0], all[0]];
    assert_status!(rt.signal_create(0, &twice), Status::InvalidArgument);
    session.close()
}

fn double_destroy(env: &CaseEnv) -> Result<()> {
    env.require_forged_handle_checks()?;
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    let signal = rt.signal_create(0, &[])?;
    assert_status!(rt.signal_destroy(signal), Status::Success);
    assert_status!(
        rt.signal_destroy(signal),
        Status::InvalidSignal | Status::InvalidArgument
    );
    assert_status!(
        rt.signal_load(signal, LoadOrder::Relaxed),
        Status::InvalidSignal
    );
    session.close()
}

fn destroy_invalid_handle(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    assert_status!(
        rt.signal_destroy(SignalHandle::from_raw(0)),
        Status::InvalidArgument | Status::InvalidSignal
    );
    session.close()
}

fn destroy_forged_handle(env: &CaseEnv) -> Result<()> {
    env.require_forged_handle_checks()?;
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    assert_status!(
        rt.signal_destroy(SignalHandle::from_raw(0xDEAD_BEEF_0000)),
        Status::InvalidSignal | Status::InvalidArgument
    );
    session.close()
}

fn exchange_release(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let signal = Signal::create(session.runtime(), 100)?;
    assert_eq!(signal.exchange_release(200)?, 100);
    assert_eq!(signal.load_relaxed()?, 200);
    signal.destroy()?;
    session.close()
}

/// A single thread applying every operation must read back their
/// composition in program order.
fn arithmetic_composition(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let signal = Signal::create(session.runtime(), 7)?;
    let mut expected = 7i64;

    let steps = [
        (SignalOp::Add, 35),
        (SignalOp::Subtract, 50),
        (SignalOp::Exchange, 0x0F0F),
        (SignalOp::And, 0x00FF),
        (SignalOp::Or, 0x7000),
        (SignalOp::Xor, 0x1234),
        (SignalOp::Add, i64::MAX),
        (SignalOp::Subtract, -3),
    ];
    let schedule = steps.into_iter().cycle().take(steps.len() * 4);
    for (round, (op, operand)) in schedule.enumerate() {
        let order = MemoryOrder::ALL[round % MemoryOrder::ALL.len()];
        assert_eq!(
            signal.rmw(op, operand, order)?,
            expected,
            "{op:?} returned a stale value"
        );
        expected = op.apply(expected, operand);
        if round % 5 == 0 {
            expected = round as i64;
            signal.store_ordered(expected, StoreOrder::Release)?;
        }
    }
    assert_eq!(signal.load()?, expected);
    signal.destroy()?;
    session.close()
}

fn compare_and_swap(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let signal = Signal::create(session.runtime(), 0)?;
    for (i, order) in MemoryOrder::ALL.into_iter().enumerate() {
        let current = i as i64;
        assert_eq!(
            signal.compare_and_swap_ordered(current + 10, -1, order)?,
            current
        );
        assert_eq!(signal.load()?, current, "failed CAS modified the signal");
        assert_eq!(
            signal.compare_and_swap_ordered(current, current + 1, order)?,
            current
        );
    }
    assert_eq!(signal.load()?, MemoryOrder::ALL.len() as i64);
    signal.destroy()?;
    session.close()
}

fn satisfied_wait_returns_immediately(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let signal = Signal::create(session.runtime(), 5)?;
    let satisfied = [
        (Condition::Eq, 5),
        (Condition::Ne, 4),
        (Condition::Lt, 6),
        (Condition::Gte, 5),
    ];
    for state in WAIT_STATES {
        for (condition, compare) in satisfied {
            let started = Instant::now();
            let value = signal.wait(condition, compare, u64::MAX, state, LoadOrder::Acquire)?;
            assert_eq!(value, 5, "{condition:?} {compare} ({state:?})");
            assert!(
                started.elapsed() < env.config.wait_timeout,
                "satisfied {condition:?} wait blocked for {:?}",
                started.elapsed()
            );
        }
    }
    signal.destroy()?;
    session.close()
}

fn timeout_waits_non_zero(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let info = session.runtime().system_info()?;
    let signal = Signal::create(session.runtime(), 1)?;
    let requested = Duration::from_millis(20);
    let hint = info.ticks_from_nanos(requested.as_nanos() as u64).max(1);
    for state in WAIT_STATES {
        let started = Instant::now();
        let value = signal.wait(Condition::Eq, 0, hint, state, LoadOrder::Relaxed)?;
        let elapsed = started.elapsed();
        assert_eq!(value, 1, "unsatisfied wait returned a changed value");
        assert!(
            elapsed >= requested / 4,
            "{state:?} wait with a {requested:?} hint returned after {elapsed:?}"
        );
    }
    signal.destroy()?;
    session.close()
}

/// Half the workers block, half poll; a single store must release all of
/// them.
fn mixed_waiters_all_wake(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    let trigger = Arc::new(Signal::create(rt, 0)?);
    let arrived = Arc::new(Signal::create(rt, 0)?);
    let ticks = env.wait_ticks()?;

    let group = ThreadGroup::spawn_shrinking(env.config.threads, {
        let trigger = Arc::clone(&trigger);
        let arrived = Arc::clone(&arrived);
        move |worker| {
            let state = WAIT_STATES[worker % 2];
            assert_status!(
                arrived.rmw(SignalOp::Add, 1, MemoryOrder::Release),
                Status::Success
            );
            let value = trigger.wait(Condition::Eq, 1, ticks, state, LoadOrder::Acquire);
            assert_status!(value, Status::Success);
            assert_eq!(
                value.ok(),
                Some(1),
                "worker {worker} ({state:?}) woke without the store"
            );
        }
    })?;
    let workers = group.len() as i64;

    group.start()?;
    let seen = arrived.wait(
        Condition::Gte,
        workers,
        ticks,
        WaitState::Blocked,
        LoadOrder::Acquire,
    )?;
    assert_eq!(seen, workers, "not every waiter arrived");
    trigger.store_release(1)?;
    group.wait();
    group.exit();
    group.destroy();
    drop((trigger, arrived));
    session.close()
}

/// Payload written relaxed before a release store must be visible after an
/// acquire wait on the same signal.
fn acquire_release_message(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let flag = Arc::new(Signal::create(session.runtime(), 0)?);
    let payload = Arc::new(AtomicI64::new(0));
    let round = Arc::new(AtomicI64::new(0));
    let ticks = env.wait_ticks()?;

    let mut group = ThreadGroup::new(2)?;
    {
        let (flag, payload, round) = (Arc::clone(&flag), Arc::clone(&payload), Arc::clone(&round));
        group.add(
            move |_| {
                let r = round.load(Ordering::Relaxed);
                payload.store(r * 7, Ordering::Relaxed);
                assert_status!(flag.store_release(r), Status::Success);
            },
            1,
        )?;
    }
    {
        let (flag, payload, round) = (Arc::clone(&flag), Arc::clone(&payload), Arc::clone(&round));
        group.add(
            move |_| {
                let r = round.load(Ordering::Relaxed);
                let seen = flag.wait(
                    Condition::Eq,
                    r,
                    ticks,
                    WaitState::Blocked,
                    LoadOrder::Acquire,
                );
                assert_eq!(seen.ok(), Some(r), "round {r} flag never arrived");
                assert_eq!(
                    payload.load(Ordering::Relaxed),
                    r * 7,
                    "round {r} payload not visible"
                );
            },
            1,
        )?;
    }
    group.thread_create()?;
    for r in 1..=env.config.iterations as i64 {
        round.store(r, Ordering::Relaxed);
        group.run_round()?;
    }
    group.destroy();
    drop(flag);
    session.close()
}

fn concurrent_add(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let counter = Arc::new(Signal::create(session.runtime(), 0)?);
    let per_worker = env.config.iterations as i64 * 16;

    let group = ThreadGroup::spawn_shrinking(env.config.threads, {
        let counter = Arc::clone(&counter);
        move |_| {
            for _ in 0..per_worker {
                assert_status!(
                    counter.rmw(SignalOp::Add, 1, MemoryOrder::AcqRel),
                    Status::Success
                );
            }
        }
    })?;
    let workers = group.len() as i64;
    group.run_round()?;
    group.destroy();

    assert_eq!(counter.load()?, workers * per_worker);
    drop(counter);
    session.close()
}

/// Each condition starts unsatisfied and is satisfied by a store from
/// another thread while the main thread waits in both styles.
fn conditions_satisfied_remotely(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let ticks = env.wait_ticks()?;
    // (condition, compare, initial, stored)
    let cases = [
        (Condition::Eq, 1, 0, 1),
        (Condition::Ne, 1, 1, 2),
        (Condition::Lt, 5, 5, 4),
        (Condition::Gte, 3, 0, 3),
    ];

    for state in WAIT_STATES {
        for (condition, compare, initial, stored) in cases {
            let signal = Arc::new(Signal::create(session.runtime(), initial)?);
            let mut group = ThreadGroup::new(1)?;
            {
                let signal = Arc::clone(&signal);
                group.add(
                    move |_| {
                        thread::sleep(Duration::from_millis(1));
                        assert_status!(signal.store_release(stored), Status::Success);
                    },
                    1,
                )?;
            }
            group.thread_create()?;
            group.start()?;
            let value = signal.wait(condition, compare, ticks, state, LoadOrder::Acquire)?;
            group.wait();
            group.destroy();
            assert!(
                condition.holds(value, compare),
                "{condition:?} {compare} ({state:?}) returned unsatisfied value {value}"
            );
        }
    }
    session.close()
}
