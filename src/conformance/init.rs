use super::{CaseEnv, TestCase};
use crate::agent::agents;
use crate::error::Status;
use crate::session::Session;
use crate::thread_group::ThreadGroup;
use crate::wait::LoadOrder;
use crate::{Result, assert_status};
use std::sync::Arc;

const SUITE: &str = "init";

pub(super) const CASES: &[TestCase] = &[
    TestCase::new(SUITE, "init_shut_down", init_shut_down),
    TestCase::new(
        SUITE,
        "shut_down_not_initialized",
        shut_down_not_initialized,
    ),
    TestCase::new(SUITE, "nested_reference_count", nested_reference_count),
    TestCase::new(
        SUITE,
        "concurrent_init_shut_down",
        concurrent_init_shut_down,
    ),
    TestCase::new(SUITE, "repeated_cycles", repeated_cycles),
    TestCase::new(SUITE, "system_info", system_info),
    TestCase::new(SUITE, "status_strings", status_strings),
    TestCase::new(SUITE, "queries_not_initialized", queries_not_initialized),
];

fn init_shut_down(env: &CaseEnv) -> Result<()> {
    let rt = &env.runtime;
    assert_status!(rt.init(), Status::Success);
    assert_status!(rt.shut_down(), Status::Success);
    Ok(())
}

fn shut_down_not_initialized(env: &CaseEnv) -> Result<()> {
    assert_status!(env.runtime.shut_down(), Status::NotInitialized);
    Ok(())
}

/// K inits followed by K-1 shutdowns leave the runtime operational; the
/// Kth shutdown brings it back to uninitialized.
fn nested_reference_count(env: &CaseEnv) -> Result<()> {
    let rt = &env.runtime;
    let k = env.config.iterations.max(2);
    for _ in 0..k {
        assert_status!(rt.init(), Status::Success);
    }
    for _ in 0..k - 1 {
        assert_status!(rt.shut_down(), Status::Success);
    }

    assert_status!(rt.system_info(), Status::Success);
    assert!(
        !agents(&**rt)?.is_empty(),
        "no agents while still initialized"
    );
    let signal = rt.signal_create(1, &[])?;
    assert_status!(rt.signal_destroy(signal), Status::Success);

    assert_status!(rt.shut_down(), Status::Success);
    assert_status!(rt.system_info(), Status::NotInitialized);
    assert_status!(rt.shut_down(), Status::NotInitialized);
    Ok(())
}

fn concurrent_init_shut_down(env: &CaseEnv) -> Result<()> {
    let rt = Arc::clone(&env.runtime);
    let mut group = ThreadGroup::new(env.config.threads)?;
    group.add(
        move |_| {
            assert_status!(rt.init(), Status::Success);
            let mut visited = 0usize;
            assert_status!(
                rt.iterate_agents(&mut |_| {
                    visited += 1;
                    Status::Success
                }),
                Status::Success
            );
            assert!(visited > 0, "initialized runtime enumerated no agents");
            assert_status!(rt.shut_down(), Status::Success);
        },
        env.config.threads,
    )?;
    group.thread_create()?;
    for _ in 0..env.config.iterations {
        group.run_round()?;
    }
    group.destroy();

    assert_status!(env.runtime.shut_down(), Status::NotInitialized);
    Ok(())
}

fn repeated_cycles(env: &CaseEnv) -> Result<()> {
    for round in 0..env.config.iterations {
        let session = Session::open(&env.runtime)?;
        let rt = session.runtime();
        let signal = rt.signal_create(round as i64, &[])?;
        assert_eq!(rt.signal_load(signal, LoadOrder::Relaxed)?, round as i64);
        assert_status!(rt.signal_destroy(signal), Status::Success);
        session.close()?;
    }
    assert_status!(env.runtime.system_info(), Status::NotInitialized);
    Ok(())
}

fn system_info(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let info = session.runtime().system_info()?;
    assert!(
        info.version_major >= 1,
        "version {}.{}",
        info.version_major,
        info.version_minor
    );
    assert!(info.timestamp_frequency > 0, "zero timestamp frequency");
    assert!(info.signal_max_wait > 0, "zero signal max wait");
    session.close()
}

fn status_strings(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    for status in Status::ALL {
        let text = session.runtime().status_string(status)?;
        assert!(!text.is_empty(), "empty description for {status}");
    }
    session.close()
}

fn queries_not_initialized(env: &CaseEnv) -> Result<()> {
    let rt = &env.runtime;
    assert_status!(rt.system_info(), Status::NotInitialized);
    assert_status!(rt.status_string(Status::Success), Status::NotInitialized);
    assert_status!(
        rt.iterate_agents(&mut |_| Status::Success),
        Status::NotInitialized
    );
    assert_status!(rt.signal_create(0, &[]), Status::NotInitialized);
    Ok(())
}
