//! Runtime backed by the vendor `libhsa-runtime64`.
//!
//! Every call goes straight to the vendor library and its status is reported
//! as is: life cycle, not-initialized and invalid-handle answers all come from
//! the runtime under test. The only bookkeeping kept here is what the HSA API
//! has no query for (the agent a queue was created on, the first error a
//! queue reported).
//!
//! The vendor library dereferences the handles it is given, so a destroyed or
//! made-up signal or queue handle is a use-after-free on its side. The
//! runtime reports `survives_forged_handles() == false` and the catalog skips
//! the cases that pass such handles.

mod bindings;
mod ffi;

use crate::error::{HsaError, Result, Status};
use crate::packet::Packet;
use crate::runtime::{AgentCallback, RegionCallback, Runtime, SharedRuntime};
use crate::types::{
    Agent, AgentFeature, AgentInfo, ExecutableHandle, ExecutableState, MachineModel,
    MemoryRegion, Profile, QueueHandle, QueueInfo, QueueType, RegionGlobalFlags, RegionInfo,
    RegionSegment, SignalHandle, SymbolInfo, SymbolKind, SystemInfo,
};
use crate::wait::{Condition, LoadOrder, MemoryOrder, SignalOp, StoreOrder, WaitState};
use ffi::Trampoline;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::Arc;
use tracing::{debug, warn};

const AQL_PACKET_SIZE: usize = 64;

/// First error the runtime reported for each live queue, keyed by handle.
static QUEUE_ERRORS: Mutex<BTreeMap<u64, Status>> = parking_lot::const_mutex(BTreeMap::new());

unsafe extern "C" fn record_queue_error(
    status: bindings::hsa_status_t,
    queue: *mut bindings::hsa_queue_t,
    _data: *mut c_void,
) {
    let status = Status::from_raw(status as u32).unwrap_or(Status::Error);
    warn!("queue {queue:p} reported {status}");
    QUEUE_ERRORS.lock().entry(queue as u64).or_insert(status);
}

#[derive(Default)]
pub struct SystemRuntime {
    /// Agent each queue was created on, keyed by queue handle.
    queue_agents: RwLock<HashMap<u64, Agent>>,
}

impl SystemRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedRuntime {
        Arc::new(Self::new())
    }

    fn queue_ptr(queue: QueueHandle) -> *mut bindings::hsa_queue_t {
        queue.handle as *mut bindings::hsa_queue_t
    }

    /// The queue structure of a queue this runtime created and has not
    /// destroyed. The HSA API exposes queue attributes only through it.
    fn live_queue(&self, queue: QueueHandle) -> Result<(&bindings::hsa_queue_t, Agent)> {
        let agent = self.queue_agents.read().get(&queue.handle).copied();
        match agent {
            // SAFETY: the handle was returned by hsa_queue_create and not yet
            // passed to hsa_queue_destroy.
            Some(agent) => Ok((unsafe { &*Self::queue_ptr(queue) }, agent)),
            None => Err(HsaError::InvalidQueue(format!(
                "queue 0x{:x} was not created by this runtime",
                queue.handle
            ))),
        }
    }

    fn symbol_info(
        &self,
        symbol: bindings::hsa_executable_symbol_t,
        agent: Option<Agent>,
    ) -> Result<SymbolInfo> {
        unsafe fn attribute<T: Default>(
            symbol: bindings::hsa_executable_symbol_t,
            attribute: bindings::hsa_executable_symbol_info_t,
        ) -> Result<T> {
            let mut value = T::default();
            let status = unsafe {
                bindings::hsa_executable_symbol_get_info(
                    symbol,
                    attribute,
                    &mut value as *mut T as *mut c_void,
                )
            };
            ffi::check(status, "hsa_executable_symbol_get_info")?;
            Ok(value)
        }

        // SAFETY: each attribute is read into its documented C type.
        unsafe {
            let kind: bindings::hsa_symbol_kind_t = attribute(
                symbol,
                bindings::hsa_executable_symbol_info_t_HSA_EXECUTABLE_SYMBOL_INFO_TYPE,
            )?;
            let length: u32 = attribute(
                symbol,
                bindings::hsa_executable_symbol_info_t_HSA_EXECUTABLE_SYMBOL_INFO_NAME_LENGTH,
            )?;
            let mut name = vec![0u8; length as usize + 1];
            let status = bindings::hsa_executable_symbol_get_info(
                symbol,
                bindings::hsa_executable_symbol_info_t_HSA_EXECUTABLE_SYMBOL_INFO_NAME,
                name.as_mut_ptr().cast(),
            );
            ffi::check(status, "hsa_executable_symbol_get_info")?;
            name.truncate(length as usize);

            let kind = ffi::symbol_kind(kind)?;
            let address: u64 = match kind {
                SymbolKind::Variable => attribute(
                    symbol,
                    bindings::hsa_executable_symbol_info_t_HSA_EXECUTABLE_SYMBOL_INFO_VARIABLE_ADDRESS,
                )?,
                _ => attribute(
                    symbol,
                    bindings::hsa_executable_symbol_info_t_HSA_EXECUTABLE_SYMBOL_INFO_KERNEL_OBJECT,
                )?,
            };
            Ok(SymbolInfo {
                kind,
                name: String::from_utf8(name).map_err(|_| HsaError::StringConversionError)?,
                address,
                agent,
            })
        }
    }
}

impl Runtime for SystemRuntime {
    fn name(&self) -> &str {
        "system"
    }

    fn survives_forged_handles(&self) -> bool {
        false
    }

    fn init(&self) -> Result<()> {
        ffi::check(unsafe { bindings::hsa_init() }, "hsa_init")?;
        debug!("hsa_init");
        Ok(())
    }

    fn shut_down(&self) -> Result<()> {
        ffi::check(unsafe { bindings::hsa_shut_down() }, "hsa_shut_down")?;
        debug!("hsa_shut_down");
        Ok(())
    }

    fn status_string(&self, status: Status) -> Result<String> {
        let mut text: *const c_char = ptr::null();
        let raw = unsafe {
            bindings::hsa_status_string(status.as_raw() as bindings::hsa_status_t, &mut text)
        };
        ffi::check(raw, "hsa_status_string")?;
        if text.is_null() {
            return Err(HsaError::StringConversionError);
        }
        // SAFETY: the runtime returns a static NUL-terminated string.
        let text = unsafe { CStr::from_ptr(text) };
        Ok(text.to_string_lossy().into_owned())
    }

    fn system_info(&self) -> Result<SystemInfo> {
        // SAFETY: each attribute is read into its documented C type.
        unsafe {
            let model: bindings::hsa_machine_model_t =
                ffi::system_attribute(bindings::hsa_system_info_t_HSA_SYSTEM_INFO_MACHINE_MODEL)?;
            Ok(SystemInfo {
                version_major: ffi::system_attribute(
                    bindings::hsa_system_info_t_HSA_SYSTEM_INFO_VERSION_MAJOR,
                )?,
                version_minor: ffi::system_attribute(
                    bindings::hsa_system_info_t_HSA_SYSTEM_INFO_VERSION_MINOR,
                )?,
                timestamp_frequency: ffi::system_attribute(
                    bindings::hsa_system_info_t_HSA_SYSTEM_INFO_TIMESTAMP_FREQUENCY,
                )?,
                signal_max_wait: ffi::system_attribute(
                    bindings::hsa_system_info_t_HSA_SYSTEM_INFO_SIGNAL_MAX_WAIT,
                )?,
                machine_model: if model == bindings::hsa_machine_model_t_HSA_MACHINE_MODEL_LARGE {
                    MachineModel::Large
                } else {
                    MachineModel::Small
                },
            })
        }
    }

    fn iterate_agents(&self, callback: &mut AgentCallback<'_>) -> Result<Status> {
        let mut trampoline = Trampoline::new(callback);
        let status =
            unsafe { bindings::hsa_iterate_agents(Some(ffi::visit_agent), trampoline.as_data()) };
        trampoline.finish(status, "hsa_iterate_agents")
    }

    fn agent_info(&self, agent: Agent) -> Result<AgentInfo> {
        let handle = ffi::agent(agent);
        // SAFETY: each attribute is read into its documented C type.
        unsafe {
            let name = ffi::agent_name(handle, bindings::hsa_agent_info_t_HSA_AGENT_INFO_NAME)?;
            let vendor_name = ffi::agent_name(
                handle,
                bindings::hsa_agent_info_t_HSA_AGENT_INFO_VENDOR_NAME,
            )?;
            let device: bindings::hsa_device_type_t =
                ffi::agent_attribute(handle, bindings::hsa_agent_info_t_HSA_AGENT_INFO_DEVICE)?;
            let features: bindings::hsa_agent_feature_t =
                ffi::agent_attribute(handle, bindings::hsa_agent_info_t_HSA_AGENT_INFO_FEATURE)?;
            Ok(AgentInfo {
                name,
                vendor_name,
                device: ffi::device_type(device)?,
                features: AgentFeature::from_bits_truncate(features as u32),
                queue_min_size: ffi::agent_attribute(
                    handle,
                    bindings::hsa_agent_info_t_HSA_AGENT_INFO_QUEUE_MIN_SIZE,
                )?,
                queue_max_size: ffi::agent_attribute(
                    handle,
                    bindings::hsa_agent_info_t_HSA_AGENT_INFO_QUEUE_MAX_SIZE,
                )?,
                queues_max: ffi::agent_attribute(
                    handle,
                    bindings::hsa_agent_info_t_HSA_AGENT_INFO_QUEUES_MAX,
                )?,
                node: ffi::agent_attribute(handle, bindings::hsa_agent_info_t_HSA_AGENT_INFO_NODE)?,
            })
        }
    }

    fn agent_iterate_regions(
        &self,
        agent: Agent,
        callback: &mut RegionCallback<'_>,
    ) -> Result<Status> {
        let handle = ffi::agent(agent);
        let mut trampoline = Trampoline::new(callback);
        let status = unsafe {
            bindings::hsa_agent_iterate_regions(
                handle,
                Some(ffi::visit_region),
                trampoline.as_data(),
            )
        };
        trampoline.finish(status, "hsa_agent_iterate_regions")
    }

    fn region_info(&self, region: MemoryRegion) -> Result<RegionInfo> {
        let handle = ffi::region(region);
        // SAFETY: each attribute is read into its documented C type.
        unsafe {
            let segment: bindings::hsa_region_segment_t =
                ffi::region_attribute(handle, bindings::hsa_region_info_t_HSA_REGION_INFO_SEGMENT)?;
            let segment = ffi::segment(segment)?;
            let global_flags = if segment == RegionSegment::Global {
                let flags: u32 = ffi::region_attribute(
                    handle,
                    bindings::hsa_region_info_t_HSA_REGION_INFO_GLOBAL_FLAGS,
                )?;
                RegionGlobalFlags::from_bits_truncate(flags)
            } else {
                RegionGlobalFlags::empty()
            };
            let runtime_alloc_allowed: bool = ffi::region_attribute(
                handle,
                bindings::hsa_region_info_t_HSA_REGION_INFO_RUNTIME_ALLOC_ALLOWED,
            )?;
            let (alloc_granule, alloc_alignment) = if runtime_alloc_allowed {
                (
                    ffi::region_attribute(
                        handle,
                        bindings::hsa_region_info_t_HSA_REGION_INFO_RUNTIME_ALLOC_GRANULE,
                    )?,
                    ffi::region_attribute(
                        handle,
                        bindings::hsa_region_info_t_HSA_REGION_INFO_RUNTIME_ALLOC_ALIGNMENT,
                    )?,
                )
            } else {
                (0, 0)
            };
            Ok(RegionInfo {
                segment,
                global_flags,
                size: ffi::region_attribute(
                    handle,
                    bindings::hsa_region_info_t_HSA_REGION_INFO_SIZE,
                )?,
                alloc_max_size: ffi::region_attribute(
                    handle,
                    bindings::hsa_region_info_t_HSA_REGION_INFO_ALLOC_MAX_SIZE,
                )?,
                runtime_alloc_allowed,
                alloc_granule,
                alloc_alignment,
            })
        }
    }

    fn memory_allocate(&self, region: MemoryRegion, size: usize) -> Result<*mut c_void> {
        let handle = ffi::region(region);
        let mut ptr = ptr::null_mut();
        let status = unsafe { bindings::hsa_memory_allocate(handle, size, &mut ptr) };
        ffi::check(status, "hsa_memory_allocate")?;
        Ok(ptr)
    }

    fn memory_free(&self, ptr: *mut c_void) -> Result<()> {
        ffi::check(unsafe { bindings::hsa_memory_free(ptr) }, "hsa_memory_free")
    }

    unsafe fn memory_register(&self, ptr: *mut c_void, size: usize) -> Result<()> {
        ffi::check(
            unsafe { bindings::hsa_memory_register(ptr, size) },
            "hsa_memory_register",
        )
    }

    fn memory_deregister(&self, ptr: *mut c_void, size: usize) -> Result<()> {
        ffi::check(
            unsafe { bindings::hsa_memory_deregister(ptr, size) },
            "hsa_memory_deregister",
        )
    }

    fn memory_copy(&self, dst: *mut c_void, src: *const c_void, size: usize) -> Result<()> {
        ffi::check(
            unsafe { bindings::hsa_memory_copy(dst, src, size) },
            "hsa_memory_copy",
        )
    }

    fn signal_create(&self, initial_value: i64, consumers: &[Agent]) -> Result<SignalHandle> {
        let consumers: Vec<_> = consumers.iter().copied().map(ffi::agent).collect();
        let list = if consumers.is_empty() {
            ptr::null()
        } else {
            consumers.as_ptr()
        };
        let mut signal = ffi::signal(0);
        let status = unsafe {
            bindings::hsa_signal_create(initial_value, consumers.len() as u32, list, &mut signal)
        };
        ffi::check(status, "hsa_signal_create")?;
        Ok(SignalHandle::from_raw(signal.handle))
    }

    fn signal_destroy(&self, signal: SignalHandle) -> Result<()> {
        ffi::check(
            unsafe { bindings::hsa_signal_destroy(ffi::signal(signal.handle)) },
            "hsa_signal_destroy",
        )
    }

    fn signal_load(&self, signal: SignalHandle, order: LoadOrder) -> Result<i64> {
        let handle = ffi::signal(signal.handle);
        Ok(match order {
            LoadOrder::Relaxed => unsafe { bindings::hsa_signal_load_relaxed(handle) },
            LoadOrder::Acquire => unsafe { bindings::hsa_signal_load_scacquire(handle) },
        })
    }

    fn signal_store(&self, signal: SignalHandle, value: i64, order: StoreOrder) -> Result<()> {
        let handle = ffi::signal(signal.handle);
        match order {
            StoreOrder::Relaxed => unsafe { bindings::hsa_signal_store_relaxed(handle, value) },
            StoreOrder::Release => unsafe { bindings::hsa_signal_store_screlease(handle, value) },
        }
        Ok(())
    }

    /// Exchange maps onto the native call; the other operations run as a
    /// compare-and-swap loop, since the native ones do not report the
    /// previous value.
    fn signal_rmw(
        &self,
        signal: SignalHandle,
        op: SignalOp,
        value: i64,
        order: MemoryOrder,
    ) -> Result<i64> {
        let handle = ffi::signal(signal.handle);
        if op == SignalOp::Exchange {
            return Ok(match order {
                MemoryOrder::Relaxed => unsafe {
                    bindings::hsa_signal_exchange_relaxed(handle, value)
                },
                MemoryOrder::Acquire => unsafe {
                    bindings::hsa_signal_exchange_scacquire(handle, value)
                },
                MemoryOrder::Release => unsafe {
                    bindings::hsa_signal_exchange_screlease(handle, value)
                },
                MemoryOrder::AcqRel => unsafe {
                    bindings::hsa_signal_exchange_scacq_screl(handle, value)
                },
            });
        }
        let mut current = unsafe { bindings::hsa_signal_load_relaxed(handle) };
        loop {
            let observed = cas(handle, current, op.apply(current, value), order);
            if observed == current {
                return Ok(observed);
            }
            current = observed;
        }
    }

    fn signal_cas(
        &self,
        signal: SignalHandle,
        expected: i64,
        value: i64,
        order: MemoryOrder,
    ) -> Result<i64> {
        let handle = ffi::signal(signal.handle);
        Ok(cas(handle, expected, value, order))
    }

    fn signal_wait(
        &self,
        signal: SignalHandle,
        condition: Condition,
        compare_value: i64,
        timeout_hint: u64,
        wait_state: WaitState,
        order: LoadOrder,
    ) -> Result<i64> {
        let handle = ffi::signal(signal.handle);
        let condition = ffi::condition(condition);
        let state = ffi::wait_state(wait_state);
        Ok(match order {
            LoadOrder::Relaxed => unsafe {
                bindings::hsa_signal_wait_relaxed(
                    handle,
                    condition,
                    compare_value,
                    timeout_hint,
                    state,
                )
            },
            LoadOrder::Acquire => unsafe {
                bindings::hsa_signal_wait_scacquire(
                    handle,
                    condition,
                    compare_value,
                    timeout_hint,
                    state,
                )
            },
        })
    }

    fn queue_create(&self, agent: Agent, size: u32, queue_type: QueueType) -> Result<QueueHandle> {
        let handle = ffi::agent(agent);
        let mut queue = ptr::null_mut();
        let status = unsafe {
            bindings::hsa_queue_create(
                handle,
                size,
                ffi::queue_type(queue_type),
                Some(record_queue_error),
                ptr::null_mut(),
                u32::MAX,
                u32::MAX,
                &mut queue,
            )
        };
        ffi::check(status, "hsa_queue_create")?;
        self.queue_agents.write().insert(queue as u64, agent);
        debug!("created queue {queue:p} of {size} packets");
        Ok(QueueHandle::from_raw(queue as u64))
    }

    fn queue_destroy(&self, queue: QueueHandle) -> Result<()> {
        ffi::check(
            unsafe { bindings::hsa_queue_destroy(Self::queue_ptr(queue)) },
            "hsa_queue_destroy",
        )?;
        self.queue_agents.write().remove(&queue.handle);
        QUEUE_ERRORS.lock().remove(&queue.handle);
        Ok(())
    }

    fn queue_info(&self, queue: QueueHandle) -> Result<QueueInfo> {
        let (raw, agent) = self.live_queue(queue)?;
        Ok(QueueInfo {
            id: raw.id,
            agent,
            size: raw.size,
            queue_type: ffi::queue_type_from(raw.type_),
            doorbell: SignalHandle::from_raw(raw.doorbell_signal.handle),
            error: QUEUE_ERRORS.lock().get(&queue.handle).copied(),
        })
    }

    fn queue_load_read_index(&self, queue: QueueHandle, order: LoadOrder) -> Result<u64> {
        let ptr = Self::queue_ptr(queue);
        Ok(match order {
            LoadOrder::Relaxed => unsafe { bindings::hsa_queue_load_read_index_relaxed(ptr) },
            LoadOrder::Acquire => unsafe { bindings::hsa_queue_load_read_index_scacquire(ptr) },
        })
    }

    fn queue_load_write_index(&self, queue: QueueHandle, order: LoadOrder) -> Result<u64> {
        let ptr = Self::queue_ptr(queue);
        Ok(match order {
            LoadOrder::Relaxed => unsafe { bindings::hsa_queue_load_write_index_relaxed(ptr) },
            LoadOrder::Acquire => unsafe { bindings::hsa_queue_load_write_index_scacquire(ptr) },
        })
    }

    fn queue_store_write_index(
        &self,
        queue: QueueHandle,
        value: u64,
        order: StoreOrder,
    ) -> Result<()> {
        let ptr = Self::queue_ptr(queue);
        match order {
            StoreOrder::Relaxed => unsafe {
                bindings::hsa_queue_store_write_index_relaxed(ptr, value)
            },
            StoreOrder::Release => unsafe {
                bindings::hsa_queue_store_write_index_screlease(ptr, value)
            },
        }
        Ok(())
    }

    fn queue_add_write_index(
        &self,
        queue: QueueHandle,
        delta: u64,
        order: MemoryOrder,
    ) -> Result<u64> {
        let ptr = Self::queue_ptr(queue);
        Ok(match order {
            MemoryOrder::Relaxed => unsafe {
                bindings::hsa_queue_add_write_index_relaxed(ptr, delta)
            },
            MemoryOrder::Acquire => unsafe {
                bindings::hsa_queue_add_write_index_scacquire(ptr, delta)
            },
            MemoryOrder::Release => unsafe {
                bindings::hsa_queue_add_write_index_screlease(ptr, delta)
            },
            MemoryOrder::AcqRel => unsafe {
                bindings::hsa_queue_add_write_index_scacq_screl(ptr, delta)
            },
        })
    }

    fn queue_cas_write_index(
        &self,
        queue: QueueHandle,
        expected: u64,
        value: u64,
        order: MemoryOrder,
    ) -> Result<u64> {
        let ptr = Self::queue_ptr(queue);
        Ok(match order {
            MemoryOrder::Relaxed => unsafe {
                bindings::hsa_queue_cas_write_index_relaxed(ptr, expected, value)
            },
            MemoryOrder::Acquire => unsafe {
                bindings::hsa_queue_cas_write_index_scacquire(ptr, expected, value)
            },
            MemoryOrder::Release => unsafe {
                bindings::hsa_queue_cas_write_index_screlease(ptr, expected, value)
            },
            MemoryOrder::AcqRel => unsafe {
                bindings::hsa_queue_cas_write_index_scacq_screl(ptr, expected, value)
            },
        })
    }

    fn queue_write_packet(&self, queue: QueueHandle, index: u64, packet: &Packet) -> Result<()> {
        let (raw, _) = self.live_queue(queue)?;
        let ptr = Self::queue_ptr(queue);
        let (write, read) = unsafe {
            (
                bindings::hsa_queue_load_write_index_scacquire(ptr),
                bindings::hsa_queue_load_read_index_scacquire(ptr),
            )
        };
        let size = u64::from(raw.size);
        if index >= write || index < read || index - read >= size {
            return Err(HsaError::InvalidIndex(format!(
                "packet {index} is outside the reserved window {read}..{write} of queue 0x{:x}",
                queue.handle
            )));
        }
        let offset = (index % size) as usize * AQL_PACKET_SIZE;
        // SAFETY: the slot lies inside the ring and the index is reserved
        // but not yet consumed.
        unsafe { ffi::write_slot(raw.base_address.cast::<u8>().add(offset), packet) };
        Ok(())
    }

    fn executable_create(&self, profile: Profile) -> Result<ExecutableHandle> {
        let profile = match profile {
            Profile::Base => bindings::hsa_profile_t_HSA_PROFILE_BASE,
            Profile::Full => bindings::hsa_profile_t_HSA_PROFILE_FULL,
        };
        let mut executable = bindings::hsa_executable_t { handle: 0 };
        let status = unsafe {
            bindings::hsa_executable_create_alt(
                profile,
                bindings::hsa_default_float_rounding_mode_t_HSA_DEFAULT_FLOAT_ROUNDING_MODE_DEFAULT,
                ptr::null(),
                &mut executable,
            )
        };
        ffi::check(status, "hsa_executable_create_alt")?;
        Ok(ExecutableHandle::from_raw(executable.handle))
    }

    fn executable_destroy(&self, executable: ExecutableHandle) -> Result<()> {
        let handle = bindings::hsa_executable_t {
            handle: executable.handle,
        };
        ffi::check(
            unsafe { bindings::hsa_executable_destroy(handle) },
            "hsa_executable_destroy",
        )
    }

    fn executable_define_global_variable(
        &self,
        executable: ExecutableHandle,
        name: &str,
        address: *mut c_void,
    ) -> Result<()> {
        let handle = bindings::hsa_executable_t {
            handle: executable.handle,
        };
        let name = CString::new(name).map_err(|_| {
            HsaError::InvalidArgument(format!("variable name {name:?} contains NUL"))
        })?;
        let status = unsafe {
            bindings::hsa_executable_global_variable_define(handle, name.as_ptr(), address)
        };
        ffi::check(status, "hsa_executable_global_variable_define")
    }

    fn executable_freeze(&self, executable: ExecutableHandle) -> Result<()> {
        let handle = bindings::hsa_executable_t {
            handle: executable.handle,
        };
        ffi::check(
            unsafe { bindings::hsa_executable_freeze(handle, ptr::null()) },
            "hsa_executable_freeze",
        )
    }

    fn executable_state(&self, executable: ExecutableHandle) -> Result<ExecutableState> {
        let handle = bindings::hsa_executable_t {
            handle: executable.handle,
        };
        let mut state: bindings::hsa_executable_state_t = Default::default();
        let status = unsafe {
            bindings::hsa_executable_get_info(
                handle,
                bindings::hsa_executable_info_t_HSA_EXECUTABLE_INFO_STATE,
                &mut state as *mut _ as *mut c_void,
            )
        };
        ffi::check(status, "hsa_executable_get_info")?;
        Ok(if state == bindings::hsa_executable_state_t_HSA_EXECUTABLE_STATE_FROZEN {
            ExecutableState::Frozen
        } else {
            ExecutableState::Unfrozen
        })
    }

    fn executable_symbol(
        &self,
        executable: ExecutableHandle,
        name: &str,
        agent: Option<Agent>,
    ) -> Result<SymbolInfo> {
        let handle = bindings::hsa_executable_t {
            handle: executable.handle,
        };
        let target = agent.map(ffi::agent);
        let name = CString::new(name).map_err(|_| {
            HsaError::InvalidSymbolName(format!("symbol name {name:?} contains NUL"))
        })?;
        let mut symbol = bindings::hsa_executable_symbol_t { handle: 0 };
        let status = unsafe {
            bindings::hsa_executable_get_symbol_by_name(
                handle,
                name.as_ptr(),
                target
                    .as_ref()
                    .map_or(ptr::null(), |agent| agent as *const _),
                &mut symbol,
            )
        };
        ffi::check(status, "hsa_executable_get_symbol_by_name")?;
        self.symbol_info(symbol, agent)
    }
}

fn cas(handle: bindings::hsa_signal_t, expected: i64, value: i64, order: MemoryOrder) -> i64 {
    match order {
        MemoryOrder::Relaxed => unsafe {
            bindings::hsa_signal_cas_relaxed(handle, expected, value)
        },
        MemoryOrder::Acquire => unsafe {
            bindings::hsa_signal_cas_scacquire(handle, expected, value)
        },
        MemoryOrder::Release => unsafe {
            bindings::hsa_signal_cas_screlease(handle, expected, value)
        },
        MemoryOrder::AcqRel => unsafe {
            bindings::hsa_signal_cas_scacq_screl(handle, expected, value)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SuiteConfig;
    use crate::conformance::{self, CaseEnv, Outcome};

    #[test]
    fn forged_handle_cases_are_skipped() {
        assert!(!SystemRuntime::new().survives_forged_handles());

        let env = CaseEnv::new(SystemRuntime::shared(), SuiteConfig::default());
        let forged = [
            "signal::double_destroy",
            "signal::destroy_forged_handle",
            "queue::double_destroy",
            "agent::info_forged_agent",
        ];
        for case in conformance::catalog() {
            let id = format!("{}::{}", case.suite, case.name);
            if forged.contains(&id.as_str()) {
                assert!(matches!(case.run(&env), Outcome::Skipped(_)), "{id}");
            }
        }
    }

    #[test]
    fn life_cycle_statuses_come_from_the_vendor_runtime() {
        let rt = SystemRuntime::new();
        assert_eq!(rt.shut_down().unwrap_err().status(), Status::NotInitialized);
        assert_eq!(
            rt.system_info().unwrap_err().status(),
            Status::NotInitialized
        );

        if rt.init().is_err() {
            // No usable device on this host.
            return;
        }
        rt.init().unwrap();
        rt.shut_down().unwrap();
        rt.system_info().unwrap();
        rt.shut_down().unwrap();
        assert_eq!(rt.shut_down().unwrap_err().status(), Status::NotInitialized);
    }

    #[test]
    fn queue_info_needs_a_queue_from_this_runtime() {
        let rt = SystemRuntime::new();
        assert_eq!(
            rt.queue_info(QueueHandle::from_raw(0x1000)).unwrap_err().status(),
            Status::InvalidQueue
        );
    }
}
