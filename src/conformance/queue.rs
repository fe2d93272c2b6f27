use super::{CaseEnv, TestCase, poll_until};
use crate::agent::agents;
use crate::context::HsaContext;
use crate::error::Status;
use crate::packet::{BarrierPacket, KernelDispatchPacket, Packet};
use crate::session::Session;
use crate::thread_group::ThreadGroup;
use crate::types::{Agent, DeviceType, QueueType};
use crate::wait::{MemoryOrder, StoreOrder};
use crate::{HsaError, Queue, Result, Signal, assert_status};
use std::sync::Arc;

const SUITE: &str = "queue";

pub(super) const CASES: &[TestCase] = &[
    TestCase::new(SUITE, "create_not_initialized", create_not_initialized),
    TestCase::new(SUITE, "basic_create", basic_create),
    TestCase::new(SUITE, "invalid_sizes", invalid_sizes),
    TestCase::new(SUITE, "invalid_agent", invalid_agent),
    TestCase::new(SUITE, "double_destroy", double_destroy),
    TestCase::new(SUITE, "write_index_arithmetic", write_index_arithmetic),
    TestCase::new(
        SUITE,
        "doorbell_dispatch_completion",
        doorbell_dispatch_completion,
    ),
    TestCase::new(
        SUITE,
        "multi_producer_beyond_capacity",
        multi_producer_beyond_capacity,
    ),
    TestCase::new(SUITE, "barrier_and_dependencies", barrier_and_dependencies),
    TestCase::new(SUITE, "barrier_or_dependencies", barrier_or_dependencies),
    TestCase::new(SUITE, "invalid_packet_format", invalid_packet_format),
];

fn dispatch(completion: &Signal) -> Packet {
    Packet::KernelDispatch(KernelDispatchPacket::default().with_completion(completion.handle()))
}

/// The configured size clamped into what `agent` accepts.
fn queue_size(env: &CaseEnv, agent: Agent) -> Result<u32> {
    let info = agent.info(&*env.runtime)?;
    Ok(env
        .config
        .queue_size
        .clamp(info.queue_min_size, info.queue_max_size))
}

fn fixture_queue(context: &HsaContext) -> Result<&Queue> {
    context
        .queue
        .as_ref()
        .ok_or_else(|| HsaError::InvalidQueue("fixture was built without a queue".to_string()))
}

fn create_not_initialized(env: &CaseEnv) -> Result<()> {
    assert_status!(
        env.runtime.queue_create(Agent::from_raw(1), 64, QueueType::Multi),
        Status::NotInitialized
    );
    Ok(())
}

fn basic_create(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    let agent = Agent::find_kernel_agent(&**rt)?;
    let size = queue_size(env, agent)?;

    for queue_type in [QueueType::Multi, QueueType::Single] {
        let queue = Queue::create_typed(rt, agent, size, queue_type)?;
        let info = queue.info()?;
        assert_eq!(info.agent, agent);
        assert_eq!(info.size, size);
        assert_eq!(info.queue_type, queue_type);
        assert_ne!(info.doorbell.handle(), 0, "queue without a doorbell signal");
        assert_eq!(info.error, None);
        assert_eq!(queue.load_read_index()?, 0);
        assert_eq!(queue.load_write_index()?, 0);
    }
    session.close()
}

fn invalid_sizes(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    let agent = Agent::find_kernel_agent(&**rt)?;
    let info = agent.info(&**rt)?;

    let mut sizes = vec![0, info.queue_min_size.saturating_add(1).max(3)];
    if let Some(over) = info.queue_max_size.checked_mul(2) {
        sizes.push(over);
    }
    for size in sizes {
        assert_status!(
            rt.queue_create(agent, size, QueueType::Multi),
            Status::InvalidArgument
        );
    }
    session.close()
}

fn invalid_agent(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    assert_status!(
        rt.queue_create(Agent::from_raw(0), env.config.queue_size, QueueType::Multi),
        Status::InvalidAgent
    );
    for agent in agents(&**rt)? {
        let info = agent.info(&**rt)?;
        if info.device == DeviceType::Cpu && !info.supports_kernel_dispatch() {
            assert_status!(
                rt.queue_create(agent, env.config.queue_size, QueueType::Multi),
                Status::InvalidQueueCreation | Status::InvalidAgent
            );
        }
    }
    session.close()
}

fn double_destroy(env: &CaseEnv) -> Result<()> {
    env.require_forged_handle_checks()?;
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    let agent = Agent::find_kernel_agent(&**rt)?;
    let queue = rt.queue_create(agent, queue_size(env, agent)?, QueueType::Multi)?;
    assert_status!(rt.queue_destroy(queue), Status::Success);
    assert_status!(
        rt.queue_destroy(queue),
        Status::InvalidQueue | Status::InvalidArgument
    );
    session.close()
}

fn write_index_arithmetic(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    let agent = Agent::find_kernel_agent(&**rt)?;
    let queue = Queue::create(rt, agent, queue_size(env, agent)?)?;
    let handle = queue.handle();

    assert_eq!(rt.queue_add_write_index(handle, 5, MemoryOrder::AcqRel)?, 0);
    assert_eq!(
        rt.queue_cas_write_index(handle, 5, 9, MemoryOrder::AcqRel)?,
        5
    );
    assert_eq!(queue.load_write_index()?, 9);
    // Failed exchange reports the current value and changes nothing.
    assert_eq!(
        rt.queue_cas_write_index(handle, 5, 11, MemoryOrder::AcqRel)?,
        9
    );
    assert_eq!(queue.load_write_index()?, 9);
    rt.queue_store_write_index(handle, 12, StoreOrder::Release)?;
    assert_eq!(queue.load_write_index()?, 12);
    assert_eq!(
        queue.load_read_index()?,
        0,
        "read index moved without packets"
    );

    drop(queue);
    session.close()
}

fn doorbell_dispatch_completion(env: &CaseEnv) -> Result<()> {
    let context = HsaContext::with_queue(&env.runtime, env.config.queue_size)?;
    let queue = fixture_queue(&context)?;
    let count = env.config.iterations as u64;
    let done = Signal::create(context.runtime(), count as i64)?;

    for expected in 0..count {
        assert_eq!(queue.submit(&dispatch(&done))?, expected);
    }
    assert_eq!(
        done.wait_eq(0, env.wait_ticks()?)?,
        0,
        "dispatches did not complete"
    );

    let read = poll_until(env.config.wait_timeout, || {
        let read = queue.load_read_index()?;
        Ok((read == count).then_some(read))
    })?;
    assert_eq!(
        read,
        Some(count),
        "read index did not reach the write index"
    );
    assert_eq!(queue.info()?.error, None);
    Ok(())
}

/// More packets than the queue holds, from several producers at once.
fn multi_producer_beyond_capacity(env: &CaseEnv) -> Result<()> {
    let context = HsaContext::new(&env.runtime)?;
    let rt = context.runtime();
    let queue = Arc::new(Queue::create(rt, context.agent, queue_size(env, context.agent)?)?);
    let done = Arc::new(Signal::create(rt, 0)?);
    let threads = env.config.threads.max(1);
    let per_worker = 2 * queue.size() as usize / threads + 1;

    let group = {
        let queue = Arc::clone(&queue);
        let done = Arc::clone(&done);
        ThreadGroup::spawn_shrinking(threads, move |_| {
            // Account for this producer's packets before any can complete.
            assert_status!(done.add(per_worker as i64), Status::Success);
            for _ in 0..per_worker {
                assert_status!(queue.submit(&dispatch(&done)), Status::Success);
            }
        })?
    };
    let producers = group.len();
    group.run_round()?;
    group.destroy();

    let total = (producers * per_worker) as u64;
    assert!(
        total > u64::from(queue.size()),
        "test did not exceed queue capacity"
    );
    assert_eq!(queue.load_write_index()?, total);
    assert_eq!(
        done.wait_eq(0, env.wait_ticks()?)?,
        0,
        "not every packet completed"
    );
    Ok(())
}

fn barrier_and_dependencies(env: &CaseEnv) -> Result<()> {
    let context = HsaContext::with_queue(&env.runtime, env.config.queue_size)?;
    let queue = fixture_queue(&context)?;
    let rt = context.runtime();
    let deps = (0..3)
        .map(|_| Signal::create(rt, 1))
        .collect::<Result<Vec<_>>>()?;
    let done = Signal::create(rt, 1)?;
    let handles: Vec<_> = deps.iter().map(Signal::handle).collect();

    let barrier = BarrierPacket::on(&handles)?.with_completion(done.handle());
    queue.submit(&Packet::BarrierAnd(barrier))?;

    let short = env.wait_ticks()? / 100;
    for (i, dep) in deps.iter().enumerate() {
        assert_eq!(
            done.wait_eq(0, short)?,
            1,
            "barrier completed with {i} of 3 dependencies met"
        );
        dep.store_release(0)?;
    }
    assert_eq!(
        done.wait_eq(0, env.wait_ticks()?)?,
        0,
        "barrier never completed"
    );
    Ok(())
}

fn barrier_or_dependencies(env: &CaseEnv) -> Result<()> {
    let context = HsaContext::with_queue(&env.runtime, env.config.queue_size)?;
    let queue = fixture_queue(&context)?;
    let rt = context.runtime();
    let first = Signal::create(rt, 1)?;
    let second = Signal::create(rt, 1)?;
    let done = Signal::create(rt, 1)?;

    let barrier = BarrierPacket::on(&[first.handle(), second.handle()])?
        .with_completion(done.handle());
    queue.submit(&Packet::BarrierOr(barrier))?;

    assert_eq!(
        done.wait_eq(0, env.wait_ticks()? / 100)?,
        1,
        "barrier completed early"
    );
    second.store_release(0)?;
    assert_eq!(
        done.wait_eq(0, env.wait_ticks()?)?,
        0,
        "one met dependency did not suffice"
    );
    assert_eq!(first.load()?, 1);
    Ok(())
}

fn invalid_packet_format(env: &CaseEnv) -> Result<()> {
    let context = HsaContext::with_queue(&env.runtime, env.config.queue_size)?;
    let queue = fixture_queue(&context)?;
    let rt = context.runtime();
    let packet = Packet::KernelDispatch(KernelDispatchPacket {
        dimensions: 0,
        ..KernelDispatchPacket::default()
    });

    // `submit` validates nothing; the packet processor must reject it.
    let index = queue.add_write_index(1)?;
    rt.queue_write_packet(queue.handle(), index, &packet)?;
    rt.signal_store(queue.doorbell(), index as i64, StoreOrder::Release)?;

    let error = poll_until(env.config.wait_timeout, || Ok(queue.info()?.error))?;
    assert_eq!(error, Some(Status::InvalidPacketFormat));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::{SoftConfig, SoftRuntime};

    #[test]
    fn missing_fixture_queue_fails_the_case() {
        let rt = SoftRuntime::shared(SoftConfig::default());
        let context = HsaContext::new(&rt).unwrap();
        assert!(context.queue.is_none());
        let err = fixture_queue(&context).unwrap_err();
        assert_eq!(err.status(), Status::InvalidQueue);
    }
}
