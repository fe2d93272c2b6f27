use super::bindings;
use crate::error::{HsaError, Result, Status};
use crate::packet::{FenceScope, Packet, PacketHeader};
use crate::types::{Agent, DeviceType, MemoryRegion, QueueType, RegionSegment, SymbolKind};
use crate::wait::{Condition, WaitState};
use std::any::Any;
use std::ffi::CStr;
use std::os::raw::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

/// Maps a raw `hsa_status_t` to `Ok` or the matching error.
pub(super) fn check(status: bindings::hsa_status_t, what: &str) -> Result<()> {
    if status == bindings::hsa_status_t_HSA_STATUS_SUCCESS {
        Ok(())
    } else {
        Err(error_for(status, what))
    }
}

pub(super) fn error_for(status: bindings::hsa_status_t, what: &str) -> HsaError {
    let raw = status as u32;
    match Status::from_raw(raw) {
        Some(status) => HsaError::from_status_with_context(status, format!("{what} failed")),
        None => HsaError::HsaStatus {
            status: raw,
            description: format!("{what} returned an unknown status"),
        },
    }
}

pub(super) fn agent(agent: Agent) -> bindings::hsa_agent_t {
    bindings::hsa_agent_t {
        handle: agent.handle,
    }
}

pub(super) fn region(region: MemoryRegion) -> bindings::hsa_region_t {
    bindings::hsa_region_t {
        handle: region.handle,
    }
}

pub(super) fn signal(handle: u64) -> bindings::hsa_signal_t {
    bindings::hsa_signal_t { handle }
}

pub(super) fn condition(condition: Condition) -> bindings::hsa_signal_condition_t {
    match condition {
        Condition::Eq => bindings::hsa_signal_condition_t_HSA_SIGNAL_CONDITION_EQ,
        Condition::Ne => bindings::hsa_signal_condition_t_HSA_SIGNAL_CONDITION_NE,
        Condition::Lt => bindings::hsa_signal_condition_t_HSA_SIGNAL_CONDITION_LT,
        Condition::Gte => bindings::hsa_signal_condition_t_HSA_SIGNAL_CONDITION_GTE,
    }
}

pub(super) fn wait_state(state: WaitState) -> bindings::hsa_wait_state_t {
    match state {
        WaitState::Blocked => bindings::hsa_wait_state_t_HSA_WAIT_STATE_BLOCKED,
        WaitState::Active => bindings::hsa_wait_state_t_HSA_WAIT_STATE_ACTIVE,
    }
}

pub(super) fn queue_type(queue_type: QueueType) -> bindings::hsa_queue_type32_t {
    match queue_type {
        QueueType::Multi => {
            bindings::hsa_queue_type_t_HSA_QUEUE_TYPE_MULTI as bindings::hsa_queue_type32_t
        }
        QueueType::Single => {
            bindings::hsa_queue_type_t_HSA_QUEUE_TYPE_SINGLE as bindings::hsa_queue_type32_t
        }
    }
}

pub(super) fn queue_type_from(raw: bindings::hsa_queue_type32_t) -> QueueType {
    if raw == bindings::hsa_queue_type_t_HSA_QUEUE_TYPE_SINGLE as bindings::hsa_queue_type32_t {
        QueueType::Single
    } else {
        QueueType::Multi
    }
}

pub(super) fn device_type(raw: bindings::hsa_device_type_t) -> Result<DeviceType> {
    Ok(match raw {
        bindings::hsa_device_type_t_HSA_DEVICE_TYPE_CPU => DeviceType::Cpu,
        bindings::hsa_device_type_t_HSA_DEVICE_TYPE_GPU => DeviceType::Gpu,
        bindings::hsa_device_type_t_HSA_DEVICE_TYPE_DSP => DeviceType::Dsp,
        other => {
            return Err(HsaError::InvalidArgument(format!("unknown device type {other}")));
        }
    })
}

pub(super) fn segment(raw: bindings::hsa_region_segment_t) -> Result<RegionSegment> {
    Ok(match raw {
        bindings::hsa_region_segment_t_HSA_REGION_SEGMENT_GLOBAL => RegionSegment::Global,
        bindings::hsa_region_segment_t_HSA_REGION_SEGMENT_READONLY => RegionSegment::ReadOnly,
        bindings::hsa_region_segment_t_HSA_REGION_SEGMENT_PRIVATE => RegionSegment::Private,
        bindings::hsa_region_segment_t_HSA_REGION_SEGMENT_GROUP => RegionSegment::Group,
        bindings::hsa_region_segment_t_HSA_REGION_SEGMENT_KERNARG => RegionSegment::KernArg,
        other => {
            return Err(HsaError::InvalidArgument(format!("unknown region segment {other}")));
        }
    })
}

pub(super) fn symbol_kind(raw: bindings::hsa_symbol_kind_t) -> Result<SymbolKind> {
    Ok(match raw {
        bindings::hsa_symbol_kind_t_HSA_SYMBOL_KIND_VARIABLE => SymbolKind::Variable,
        bindings::hsa_symbol_kind_t_HSA_SYMBOL_KIND_KERNEL => SymbolKind::Kernel,
        bindings::hsa_symbol_kind_t_HSA_SYMBOL_KIND_INDIRECT_FUNCTION => {
            SymbolKind::IndirectFunction
        }
        other => {
            return Err(HsaError::InvalidArgument(format!("unknown symbol kind {other}")));
        }
    })
}

/// Reads one of the 64-byte, NUL-terminated name attributes of an agent.
pub(super) fn agent_name(
    handle: bindings::hsa_agent_t,
    attribute: bindings::hsa_agent_info_t,
) -> Result<String> {
    let mut bytes = [0u8; 64];
    let status = unsafe {
        bindings::hsa_agent_get_info(handle, attribute, bytes.as_mut_ptr().cast())
    };
    check(status, "hsa_agent_get_info")?;
    CStr::from_bytes_until_nul(&bytes)
        .map(|name| name.to_string_lossy().into_owned())
        .map_err(|_| HsaError::StringConversionError)
}

/// # Safety
///
/// `T` must be the C type the runtime writes for `attribute`.
pub(super) unsafe fn agent_attribute<T: Default>(
    handle: bindings::hsa_agent_t,
    attribute: bindings::hsa_agent_info_t,
) -> Result<T> {
    let mut value = T::default();
    let status = unsafe {
        bindings::hsa_agent_get_info(handle, attribute, &mut value as *mut T as *mut c_void)
    };
    check(status, "hsa_agent_get_info")?;
    Ok(value)
}

/// # Safety
///
/// `T` must be the C type the runtime writes for `attribute`.
pub(super) unsafe fn region_attribute<T: Default>(
    handle: bindings::hsa_region_t,
    attribute: bindings::hsa_region_info_t,
) -> Result<T> {
    let mut value = T::default();
    let status = unsafe {
        bindings::hsa_region_get_info(handle, attribute, &mut value as *mut T as *mut c_void)
    };
    check(status, "hsa_region_get_info")?;
    Ok(value)
}

/// # Safety
///
/// `T` must be the C type the runtime writes for `attribute`.
pub(super) unsafe fn system_attribute<T: Default>(
    attribute: bindings::hsa_system_info_t,
) -> Result<T> {
    let mut value = T::default();
    let status = unsafe {
        bindings::hsa_system_get_info(attribute, &mut value as *mut T as *mut c_void)
    };
    check(status, "hsa_system_get_info")?;
    Ok(value)
}

/// Carries a Rust iteration callback through the runtime's `void *data`.
///
/// A panicking callback stops the iteration; the panic resumes once control
/// is back on the Rust side of the call.
pub(super) struct Trampoline<'a, 'b, T> {
    callback: &'a mut (dyn FnMut(T) -> Status + 'b),
    panic: Option<Box<dyn Any + Send>>,
}

impl<'a, 'b, T> Trampoline<'a, 'b, T> {
    pub(super) fn new(callback: &'a mut (dyn FnMut(T) -> Status + 'b)) -> Self {
        Self {
            callback,
            panic: None,
        }
    }

    pub(super) fn as_data(&mut self) -> *mut c_void {
        self as *mut Self as *mut c_void
    }

    fn invoke(&mut self, item: T) -> bindings::hsa_status_t {
        let callback = &mut self.callback;
        match panic::catch_unwind(AssertUnwindSafe(|| callback(item))) {
            Ok(status) => status.as_raw() as bindings::hsa_status_t,
            Err(payload) => {
                self.panic = Some(payload);
                bindings::hsa_status_t_HSA_STATUS_ERROR
            }
        }
    }

    /// Folds the iteration's return value into the `Runtime` contract.
    pub(super) fn finish(self, status: bindings::hsa_status_t, what: &str) -> Result<Status> {
        if let Some(payload) = self.panic {
            panic::resume_unwind(payload);
        }
        match status {
            bindings::hsa_status_t_HSA_STATUS_SUCCESS => Ok(Status::Success),
            bindings::hsa_status_t_HSA_STATUS_INFO_BREAK => Ok(Status::InfoBreak),
            other => Err(error_for(other, what)),
        }
    }
}

pub(super) unsafe extern "C" fn visit_agent(
    agent: bindings::hsa_agent_t,
    data: *mut c_void,
) -> bindings::hsa_status_t {
    let trampoline = unsafe { &mut *(data as *mut Trampoline<'_, '_, Agent>) };
    trampoline.invoke(Agent::from_raw(agent.handle))
}

pub(super) unsafe extern "C" fn visit_region(
    region: bindings::hsa_region_t,
    data: *mut c_void,
) -> bindings::hsa_status_t {
    let trampoline = unsafe { &mut *(data as *mut Trampoline<'_, '_, MemoryRegion>) };
    trampoline.invoke(MemoryRegion::from_raw(region.handle))
}

fn fence(scope: FenceScope) -> u16 {
    (match scope {
        FenceScope::None => bindings::hsa_fence_scope_t_HSA_FENCE_SCOPE_NONE,
        FenceScope::Agent => bindings::hsa_fence_scope_t_HSA_FENCE_SCOPE_AGENT,
        FenceScope::System => bindings::hsa_fence_scope_t_HSA_FENCE_SCOPE_SYSTEM,
    }) as u16
}

fn header_bits(kind: bindings::hsa_packet_type_t, header: &PacketHeader) -> u16 {
    (kind as u16) << bindings::hsa_packet_header_t_HSA_PACKET_HEADER_TYPE
        | u16::from(header.barrier) << bindings::hsa_packet_header_t_HSA_PACKET_HEADER_BARRIER
        | fence(header.acquire_fence)
            << bindings::hsa_packet_header_t_HSA_PACKET_HEADER_ACQUIRE_FENCE_SCOPE
        | fence(header.release_fence)
            << bindings::hsa_packet_header_t_HSA_PACKET_HEADER_RELEASE_FENCE_SCOPE
}

fn barrier_signals(deps: impl Iterator<Item = u64>) -> [bindings::hsa_signal_t; 5] {
    let mut signals = [signal(0); 5];
    for (slot, handle) in signals.iter_mut().zip(deps) {
        *slot = signal(handle);
    }
    signals
}

/// Writes `packet` into the 64-byte AQL slot at `slot`, header last.
///
/// # Safety
///
/// `slot` must point at a queue slot the caller has reserved and the packet
/// processor has released.
pub(super) unsafe fn write_slot(slot: *mut u8, packet: &Packet) {
    let invalid = (bindings::hsa_packet_type_t_HSA_PACKET_TYPE_INVALID as u16)
        << bindings::hsa_packet_header_t_HSA_PACKET_HEADER_TYPE;
    let completion = signal(packet.completion_signal().map_or(0, |s| s.handle));

    let (header, setup) = match packet {
        Packet::KernelDispatch(dispatch) => {
            let body = bindings::hsa_kernel_dispatch_packet_t {
                header: invalid,
                setup: 0,
                workgroup_size_x: dispatch.workgroup_size[0],
                workgroup_size_y: dispatch.workgroup_size[1],
                workgroup_size_z: dispatch.workgroup_size[2],
                grid_size_x: dispatch.grid_size[0],
                grid_size_y: dispatch.grid_size[1],
                grid_size_z: dispatch.grid_size[2],
                private_segment_size: dispatch.private_segment_size,
                group_segment_size: dispatch.group_segment_size,
                kernel_object: dispatch.kernel_object,
                kernarg_address: dispatch.kernarg_address as *mut c_void,
                completion_signal: completion,
                ..Default::default()
            };
            unsafe { ptr::write(slot.cast(), body) };
            let setup = dispatch.dimensions
                << bindings::hsa_kernel_dispatch_packet_setup_t_HSA_KERNEL_DISPATCH_PACKET_SETUP_DIMENSIONS;
            (
                header_bits(
                    bindings::hsa_packet_type_t_HSA_PACKET_TYPE_KERNEL_DISPATCH,
                    &dispatch.header,
                ),
                setup,
            )
        }
        Packet::BarrierAnd(barrier) => {
            let body = bindings::hsa_barrier_and_packet_t {
                header: invalid,
                dep_signal: barrier_signals(barrier.dependencies().map(|s| s.handle)),
                completion_signal: completion,
                ..Default::default()
            };
            unsafe { ptr::write(slot.cast(), body) };
            (
                header_bits(
                    bindings::hsa_packet_type_t_HSA_PACKET_TYPE_BARRIER_AND,
                    &barrier.header,
                ),
                0,
            )
        }
        Packet::BarrierOr(barrier) => {
            let body = bindings::hsa_barrier_or_packet_t {
                header: invalid,
                dep_signal: barrier_signals(barrier.dependencies().map(|s| s.handle)),
                completion_signal: completion,
                ..Default::default()
            };
            unsafe { ptr::write(slot.cast(), body) };
            (
                header_bits(
                    bindings::hsa_packet_type_t_HSA_PACKET_TYPE_BARRIER_OR,
                    &barrier.header,
                ),
                0,
            )
        }
    };

    // Header and setup share the first 32 bits of every packet.
    let word = unsafe { AtomicU32::from_ptr(slot.cast()) };
    let word_value = u32::from(header) | u32::from(setup) << 16;
    word.store(word_value, Ordering::Release);
}
