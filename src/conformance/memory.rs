use super::{CaseEnv, TestCase};
use crate::agent::agents;
use crate::context::HsaContext;
use crate::error::Status;
use crate::runtime::Runtime;
use crate::session::Session;
use crate::thread_group::ThreadGroup;
use crate::types::{MemoryRegion, RegionInfo, RegionSegment};
use crate::{HsaError, Result, assert_status};
use std::os::raw::c_void;
use std::ptr;
use tracing::info;

const SUITE: &str = "memory";

pub(super) const CASES: &[TestCase] = &[
    TestCase::new(SUITE, "allocate_not_initialized", allocate_not_initialized),
    TestCase::new(
        SUITE,
        "allocate_free_every_region",
        allocate_free_every_region,
    ),
    TestCase::new(SUITE, "allocate_zero_size", allocate_zero_size),
    TestCase::new(SUITE, "allocate_too_large", allocate_too_large),
    TestCase::new(
        SUITE,
        "allocate_disallowed_region",
        allocate_disallowed_region,
    ),
    TestCase::new(SUITE, "allocate_invalid_region", allocate_invalid_region),
    TestCase::new(SUITE, "free_null", free_null),
    TestCase::new(SUITE, "double_free", double_free),
    TestCase::new(SUITE, "register_deregister", register_deregister),
    TestCase::new(SUITE, "register_zero_size", register_zero_size),
    TestCase::new(SUITE, "deregister_unregistered", deregister_unregistered),
    TestCase::new(SUITE, "copy_between_allocations", copy_between_allocations),
    TestCase::new(
        SUITE,
        "copy_from_registered_host",
        copy_from_registered_host,
    ),
    TestCase::new(SUITE, "concurrent_allocate_free", concurrent_allocate_free),
];

/// Every global region the runtime lets the program allocate from.
fn allocatable_regions(rt: &dyn Runtime) -> Result<Vec<(MemoryRegion, RegionInfo)>> {
    let mut found = Vec::new();
    for agent in agents(rt)? {
        for region in agent.regions(rt)? {
            let info = region.info(rt)?;
            if info.runtime_alloc_allowed && info.segment == RegionSegment::Global {
                found.push((region, info));
            }
        }
    }
    Ok(found)
}

fn allocate_not_initialized(env: &CaseEnv) -> Result<()> {
    assert_status!(
        env.runtime.memory_allocate(MemoryRegion::from_raw(1), 64),
        Status::NotInitialized
    );
    Ok(())
}

fn allocate_free_every_region(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    let regions = allocatable_regions(&**rt)?;
    assert!(!regions.is_empty(), "no allocatable global region");

    for (region, info) in regions {
        let size = info.alloc_granule.max(1).min(info.alloc_max_size);
        let ptr = rt.memory_allocate(region, size)?;
        assert!(
            !ptr.is_null(),
            "region 0x{:x} returned null",
            region.handle()
        );
        if info.alloc_alignment > 0 {
            assert_eq!(
                ptr as usize % info.alloc_alignment,
                0,
                "misaligned allocation"
            );
        }
        assert_status!(rt.memory_free(ptr), Status::Success);
    }
    session.close()
}

fn allocate_zero_size(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    for (region, _) in allocatable_regions(&**rt)? {
        assert_status!(rt.memory_allocate(region, 0), Status::InvalidArgument);
    }
    session.close()
}

fn allocate_too_large(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    for (region, info) in allocatable_regions(&**rt)? {
        let Some(size) = info.alloc_max_size.checked_add(1) else {
            continue;
        };
        assert_status!(rt.memory_allocate(region, size), Status::InvalidAllocation);
    }
    session.close()
}

fn allocate_disallowed_region(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    let mut checked = 0;
    for agent in agents(&**rt)? {
        for region in agent.regions(&**rt)? {
            if !region.runtime_alloc_allowed(&**rt)? {
                assert_status!(rt.memory_allocate(region, 64), Status::InvalidAllocation);
                checked += 1;
            }
        }
    }
    if checked == 0 {
        info!("every region allows runtime allocation; nothing to check");
    }
    session.close()
}

fn allocate_invalid_region(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    assert_status!(
        rt.memory_allocate(MemoryRegion::from_raw(0), 64),
        Status::InvalidRegion | Status::InvalidArgument
    );
    session.close()
}

fn free_null(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    assert_status!(
        session.runtime().memory_free(ptr::null_mut()),
        Status::Success
    );
    session.close()
}

fn double_free(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    let Some((region, _)) = allocatable_regions(&**rt)?.into_iter().next() else {
        return Err(HsaError::CaseSkipped("no region allows allocation".to_string()));
    };
    let ptr = rt.memory_allocate(region, 256)?;
    assert_status!(rt.memory_free(ptr), Status::Success);
    assert_status!(rt.memory_free(ptr), Status::InvalidArgument);
    session.close()
}

fn register_deregister(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let rt = session.runtime();
    let mut host = vec![0u8; 4096];
    let ptr = host.as_mut_ptr().cast::<c_void>();
    // SAFETY: `host` outlives the registration, which ends below.
    assert_status!(
        unsafe { rt.memory_register(ptr, host.len()) },
        Status::Success
    );
    assert_status!(rt.memory_deregister(ptr, host.len()), Status::Success);
    session.close()
}

fn register_zero_size(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let mut host = [0u8; 16];
    // SAFETY: a zero-length range is never accessed.
    let result = unsafe {
        session
            .runtime()
            .memory_register(host.as_mut_ptr().cast(), 0)
    };
    assert_status!(result, Status::InvalidArgument);
    session.close()
}

fn deregister_unregistered(env: &CaseEnv) -> Result<()> {
    let session = Session::open(&env.runtime)?;
    let mut host = [0u8; 64];
    assert_status!(
        session
            .runtime()
            .memory_deregister(host.as_mut_ptr().cast(), host.len()),
        Status::InvalidArgument
    );
    session.close()
}

fn copy_between_allocations(env: &CaseEnv) -> Result<()> {
    let context = HsaContext::new(&env.runtime)?;
    let rt = context.runtime();
    let region = context
        .fine_grained_region
        .ok_or_else(|| HsaError::CaseSkipped("no fine-grained region".to_string()))?;

    const LEN: usize = 1024;
    let mut src = region.allocate(rt, LEN)?;
    let dst = region.allocate(rt, LEN)?;
    // SAFETY: fine-grained memory, no agent is using either allocation.
    unsafe {
        for (i, byte) in src.as_mut_slice().iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
    }
    assert_status!(src.copy_to(&dst, LEN), Status::Success);
    // SAFETY: as above; the copy has completed.
    unsafe {
        assert_eq!(
            dst.as_slice(),
            src.as_slice(),
            "copy produced different bytes"
        );
    }
    Ok(())
}

fn copy_from_registered_host(env: &CaseEnv) -> Result<()> {
    let context = HsaContext::new(&env.runtime)?;
    let rt = context.runtime();
    let region = context
        .fine_grained_region
        .ok_or_else(|| HsaError::CaseSkipped("no fine-grained region".to_string()))?;

    let mut host: Vec<u8> = (0..512u32).map(|i| (i * 7) as u8).collect();
    let dst = region.allocate(rt, host.len())?;
    let src = host.as_mut_ptr().cast::<c_void>();
    // SAFETY: `host` lives until after the deregistration below.
    unsafe { rt.memory_register(src, host.len())? };
    assert_status!(
        rt.memory_copy(dst.as_ptr(), src, host.len()),
        Status::Success
    );
    assert_status!(rt.memory_deregister(src, host.len()), Status::Success);

    // SAFETY: fine-grained memory no agent touches.
    assert_eq!(unsafe { dst.as_slice() }, host.as_slice());
    Ok(())
}

fn concurrent_allocate_free(env: &CaseEnv) -> Result<()> {
    let context = HsaContext::new(&env.runtime)?;
    let region = context
        .coarse_grained_region
        .ok_or_else(|| HsaError::CaseSkipped("no coarse-grained region".to_string()))?;
    let rt = context.runtime().clone();
    let rounds = env.config.iterations;

    let group = ThreadGroup::spawn_shrinking(env.config.threads, move |worker| {
        for round in 0..rounds {
            let size = 64 * (1 + (worker + round) % 8);
            let ptr = rt.memory_allocate(region, size);
            assert_status!(ptr, Status::Success);
            if let Ok(ptr) = ptr {
                assert_status!(rt.memory_free(ptr), Status::Success);
            }
        }
    })?;
    group.run_round()?;
    group.run_round()?;
    group.destroy();
    Ok(())
}
