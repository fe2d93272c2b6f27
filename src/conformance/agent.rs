use super::{CaseEnv, TestCase};
use crate::agent::agents;
use crate::error::Status;
use crate::session::Session;
use crate::thread_group::ThreadGroup;
use crate::types::{Agent, RegionSegment};
use crate::{Result, assert_status};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

const SUITE: &str = "agent";

pub(super) const CASES: &[TestCase] = &[
    TestCase::new(SUITE, "iterate_not_initialized", iterate_not_initialized),
    TestCase::new(
        SUITE,
        "handles_unique_and_non_zero",
        handles_unique_and_non_zero,
    ),
    TestCase::new(SUITE, "break_after_one", break_after_one),
    TestCase::new(
        SUITE,
        "callback_error_propagates",
        callback_error_propagates,
    ),
    TestCase::new(SUITE, "concurrent_iteration", concurrent_iteration),
    TestCase::new(SUITE, "info_invalid_agent", info_invalid_agent),
    TestCase::new(SUITE, "info_forged_agent", info_forged_agent),
    TestCase::new(SUITE, "info_consistency", info_consistency),
    TestCase::new(SUITE, "region_iteration", region_iteration),
    TestCase::new(SUITE, "regions_invalid_agent", regions_invalid_agent),
];

fn iterate_not_initialized(env: &CaseEnv) -> Result<()> {
    let mut calls = 0;
    assert_status!(
        env.runtime.iterate_agents(&mut |_| {
            calls += 1;
            Status::Success
        }),
        Status::NotInitialized
    );
    assert_eq!(calls, 0, "callback ran on an uninitialized runtime");
    Ok(())
}

fn handles_unique_and_non_zero(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let list = agents(&**session.runtime())?;
    assert!(!list.is_empty(), "no agents enumerated");
    assert!(
        list.iter().all(|a| a.handle() != 0),
        "zero agent handle in {list:?}"
    );
    let unique: HashSet<_> = list.iter().collect();
    assert_eq!(
        unique.len(),
        list.len(),
        "duplicate agent handles in {list:?}"
    );
    session.close()
}

fn break_after_one(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let mut calls = 0;
    let result = session.runtime().iterate_agents(&mut |_| {
        calls += 1;
        Status::InfoBreak
    });
    assert_status!(result, Status::Success);
    assert_eq!(result?, Status::InfoBreak);
    assert_eq!(calls, 1, "iteration continued after InfoBreak");
    session.close()
}

fn callback_error_propagates(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let mut calls = 0;
    let result = session.runtime().iterate_agents(&mut |_| {
        calls += 1;
        Status::Error
    });
    assert_status!(result, Status::Error);
    assert_eq!(calls, 1, "iteration continued after an error status");
    session.close()
}

/// Every worker of the group enumerates concurrently and must see the
/// serially obtained list, in order, on every round.
fn concurrent_iteration(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let reference = Arc::new(agents(&**session.runtime())?);
    let observed = Arc::new(Mutex::new(Vec::<usize>::new()));

    let mut group = ThreadGroup::new(env.config.threads)?;
    {
        let rt = Arc::clone(session.runtime());
        let reference = Arc::clone(&reference);
        let observed = Arc::clone(&observed);
        group.add(
            move |worker| {
                let mut list = Vec::with_capacity(reference.len());
                assert_status!(
                    rt.iterate_agents(&mut |agent| {
                        list.push(agent);
                        Status::Success
                    }),
                    Status::Success
                );
                assert_eq!(
                    list, *reference,
                    "worker {worker} saw a different agent list"
                );
                observed.lock().push(worker);
            },
            env.config.threads,
        )?;
    }
    group.thread_create()?;
    let workers = group.len();
    let rounds = env.config.iterations;
    for _ in 0..rounds {
        group.run_round()?;
    }
    group.destroy();

    assert_eq!(observed.lock().len(), workers * rounds);
    session.close()
}

fn info_invalid_agent(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    assert_status!(rt.agent_info(Agent::from_raw(0)), Status::InvalidAgent);
    session.close()
}

fn info_forged_agent(env: &CaseEnv) -> Result<()> {
    env.require_forged_handle_checks()?;
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    assert_status!(
        rt.agent_info(Agent::from_raw(u64::MAX)),
        Status::InvalidAgent
    );
    session.close()
}

fn info_consistency(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    for agent in agents(&**rt)? {
        let info = agent.info(&**rt)?;
        assert!(
            !info.name.is_empty(),
            "agent 0x{:x} has no name",
            agent.handle()
        );
        assert_eq!(
            rt.agent_info(agent)?,
            info,
            "agent info changed between queries"
        );
        if info.supports_kernel_dispatch() {
            assert!(
                info.queues_max > 0,
                "{} dispatches but allows no queues",
                info.name
            );
            assert!(
                info.queue_min_size.is_power_of_two() && info.queue_max_size.is_power_of_two(),
                "{} queue sizes {}..{} are not powers of two",
                info.name,
                info.queue_min_size,
                info.queue_max_size
            );
            assert!(info.queue_min_size <= info.queue_max_size);
        }
    }
    session.close()
}

fn region_iteration(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    let mut global = 0;
    for agent in agents(&**rt)? {
        let regions = agent.regions(&**rt)?;
        for region in &regions {
            let info = region.info(&**rt)?;
            if info.segment == RegionSegment::Global {
                global += 1;
            }
            if info.runtime_alloc_allowed {
                assert!(
                    info.alloc_max_size > 0,
                    "allocatable region with zero max size"
                );
                assert!(info.alloc_max_size <= info.size || info.size == 0);
            }
        }

        let mut calls = 0;
        let result = rt.agent_iterate_regions(agent, &mut |_| {
            calls += 1;
            Status::InfoBreak
        });
        let expected = if regions.is_empty() {
            Status::Success
        } else {
            Status::InfoBreak
        };
        assert_eq!(result?, expected);
        assert_eq!(calls, regions.len().min(1));
    }
    assert!(global > 0, "no global memory region in the system");
    session.close()
}

fn regions_invalid_agent(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    assert_status!(
        rt.agent_iterate_regions(Agent::from_raw(0), &mut |_| Status::Success),
        Status::InvalidAgent
    );
    session.close()
}
