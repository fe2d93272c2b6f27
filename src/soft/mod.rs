//! In-process reference runtime.
//!
//! Agents are simulated, memory is host memory and every queue is served by
//! a host thread. The status-code contract follows the HSA runtime API, so
//! the conformance catalog passes against it unchanged.

mod executables;
mod memory;
mod queues;
mod signals;
mod topology;

use crate::error::{HsaError, Result, Status};
use crate::packet::Packet;
use crate::runtime::{AgentCallback, RegionCallback, Runtime, SharedRuntime, drive_iteration};
use crate::types::{
    Agent, AgentInfo, ExecutableHandle, ExecutableState, MachineModel, MemoryRegion, Profile,
    QueueHandle, QueueInfo, QueueType, RegionInfo, SignalHandle, SymbolInfo, SystemInfo,
};
use crate::wait::{Condition, LoadOrder, MemoryOrder, SignalOp, StoreOrder, WaitState};
use executables::ExecutableTable;
use memory::MemoryTable;
use parking_lot::Mutex;
use queues::QueueTable;
use signals::SignalTable;
use std::collections::HashSet;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use topology::Topology;
use tracing::{debug, info};

/// Ticks per second of the soft runtime's timestamp: one tick per
/// nanosecond.
pub const TIMESTAMP_FREQUENCY: u64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftConfig {
    pub cpu_agents: usize,
    pub gpu_agents: usize,
    /// Bytes available in every global region.
    pub region_size: usize,
    pub alloc_granule: usize,
    pub max_signals: usize,
    pub queue_min_size: u32,
    pub queue_max_size: u32,
    pub queues_per_agent: u32,
    /// Largest reference count `init` may reach.
    pub refcount_ceiling: i32,
}

impl Default for SoftConfig {
    fn default() -> Self {
        Self {
            cpu_agents: 1,
            gpu_agents: 1,
            region_size: 64 * 1024 * 1024,
            alloc_granule: 4096,
            max_signals: 4096,
            queue_min_size: 64,
            queue_max_size: 4096,
            queues_per_agent: 8,
            refcount_ceiling: i32::MAX,
        }
    }
}

impl SoftConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cpu_agents(mut self, count: usize) -> Self {
        self.cpu_agents = count;
        self
    }

    pub fn with_gpu_agents(mut self, count: usize) -> Self {
        self.gpu_agents = count;
        self
    }

    pub fn with_region_size(mut self, bytes: usize) -> Self {
        self.region_size = bytes;
        self
    }

    pub fn with_alloc_granule(mut self, bytes: usize) -> Self {
        self.alloc_granule = bytes;
        self
    }

    pub fn with_max_signals(mut self, count: usize) -> Self {
        self.max_signals = count;
        self
    }

    pub fn with_queue_sizes(mut self, min: u32, max: u32) -> Self {
        self.queue_min_size = min;
        self.queue_max_size = max;
        self
    }

    pub fn with_queues_per_agent(mut self, count: u32) -> Self {
        self.queues_per_agent = count;
        self
    }

    pub fn with_refcount_ceiling(mut self, ceiling: i32) -> Self {
        self.refcount_ceiling = ceiling;
        self
    }
}

pub struct SoftRuntime {
    config: SoftConfig,
    refcount: Mutex<i32>,
    live: AtomicBool,
    topology: Topology,
    signals: Arc<SignalTable>,
    memory: MemoryTable,
    queues: QueueTable,
    executables: ExecutableTable,
}

impl SoftRuntime {
    pub fn new(config: SoftConfig) -> Self {
        let topology = Topology::build(&config);
        Self {
            memory: MemoryTable::new(topology.region_count()),
            signals: Arc::new(SignalTable::new(config.max_signals)),
            queues: QueueTable::new(),
            executables: ExecutableTable::new(),
            refcount: Mutex::new(0),
            live: AtomicBool::new(false),
            topology,
            config,
        }
    }

    /// A fresh runtime behind the trait object the catalog consumes.
    pub fn shared(config: SoftConfig) -> SharedRuntime {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &SoftConfig {
        &self.config
    }

    pub fn refcount(&self) -> i32 {
        *self.refcount.lock()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.live.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(HsaError::NotInitialized(format!(
                "{} runtime is not initialized",
                self.name()
            )))
        }
    }

    fn release_all(&self) {
        self.queues.destroy_all(&self.signals);
        self.signals.clear();
        self.executables.clear();
        self.memory.release_all();
    }
}

/// Process-wide instance shared by every caller, the way a driver is.
pub fn global() -> Arc<SoftRuntime> {
    static GLOBAL: OnceLock<Arc<SoftRuntime>> = OnceLock::new();
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(SoftRuntime::new(SoftConfig::default()))))
}

impl Runtime for SoftRuntime {
    fn name(&self) -> &str {
        "soft"
    }

    fn init(&self) -> Result<()> {
        let mut count = self.refcount.lock();
        if *count >= self.config.refcount_ceiling {
            return Err(HsaError::RefcountOverflow(format!(
                "reference count is at its ceiling of {}",
                self.config.refcount_ceiling
            )));
        }
        *count += 1;
        if *count == 1 {
            self.live.store(true, Ordering::Release);
            info!("soft runtime initialized");
        }
        debug!(refcount = *count, "init");
        Ok(())
    }

    fn shut_down(&self) -> Result<()> {
        let mut count = self.refcount.lock();
        if *count == 0 {
            return Err(HsaError::NotInitialized("shut_down without a matching init".to_string()));
        }
        *count -= 1;
        debug!(refcount = *count, "shut_down");
        if *count == 0 {
            self.live.store(false, Ordering::Release);
            self.release_all();
            info!("soft runtime shut down");
        }
        Ok(())
    }

    fn status_string(&self, status: Status) -> Result<String> {
        self.ensure_live()?;
        Ok(status.description().to_string())
    }

    fn system_info(&self) -> Result<SystemInfo> {
        self.ensure_live()?;
        Ok(SystemInfo {
            version_major: 1,
            version_minor: 2,
            timestamp_frequency: TIMESTAMP_FREQUENCY,
            signal_max_wait: u64::MAX,
            machine_model: if cfg!(target_pointer_width = "64") {
                MachineModel::Large
            } else {
                MachineModel::Small
            },
        })
    }

    fn iterate_agents(&self, callback: &mut AgentCallback<'_>) -> Result<Status> {
        self.ensure_live()?;
        drive_iteration(self.topology.agents(), callback)
    }

    fn agent_info(&self, agent: Agent) -> Result<AgentInfo> {
        self.ensure_live()?;
        Ok(self.topology.agent(agent)?.info.clone())
    }

    fn agent_iterate_regions(
        &self,
        agent: Agent,
        callback: &mut RegionCallback<'_>,
    ) -> Result<Status> {
        self.ensure_live()?;
        let desc = self.topology.agent(agent)?;
        drive_iteration(desc.regions.iter().copied(), callback)
    }

    fn region_info(&self, region: MemoryRegion) -> Result<RegionInfo> {
        self.ensure_live()?;
        Ok(self.topology.region(region)?.info.clone())
    }

    fn memory_allocate(&self, region: MemoryRegion, size: usize) -> Result<*mut c_void> {
        self.ensure_live()?;
        let index = self.topology.region_index(region)?;
        let info = &self.topology.region(region)?.info;
        if size == 0 {
            return Err(HsaError::InvalidArgument("allocation size is zero".to_string()));
        }
        if !info.runtime_alloc_allowed {
            return Err(HsaError::InvalidAllocation(format!(
                "region 0x{:x} does not allow runtime allocation",
                region.handle
            )));
        }
        if size > info.alloc_max_size {
            return Err(HsaError::InvalidAllocation(format!(
                "{size} bytes exceed the region maximum of {}",
                info.alloc_max_size
            )));
        }
        self.memory.allocate(
            index,
            info.size,
            size,
            info.alloc_granule,
            info.alloc_alignment,
        )
    }

    fn memory_free(&self, ptr: *mut c_void) -> Result<()> {
        self.ensure_live()?;
        self.memory.free(ptr)
    }

    unsafe fn memory_register(&self, ptr: *mut c_void, size: usize) -> Result<()> {
        self.ensure_live()?;
        self.memory.register(ptr, size)
    }

    fn memory_deregister(&self, ptr: *mut c_void, size: usize) -> Result<()> {
        self.ensure_live()?;
        self.memory.deregister(ptr, size)
    }

    fn memory_copy(&self, dst: *mut c_void, src: *const c_void, size: usize) -> Result<()> {
        self.ensure_live()?;
        self.memory.copy(dst, src, size)
    }

    fn signal_create(&self, initial_value: i64, consumers: &[Agent]) -> Result<SignalHandle> {
        self.ensure_live()?;
        let mut seen = HashSet::with_capacity(consumers.len());
        for consumer in consumers {
            if !seen.insert(*consumer) {
                return Err(HsaError::InvalidArgument(format!(
                    "consumer 0x{:x} listed twice",
                    consumer.handle
                )));
            }
            if self.topology.agent(*consumer).is_err() {
                return Err(HsaError::InvalidArgument(format!(
                    "consumer 0x{:x} is not an agent",
                    consumer.handle
                )));
            }
        }
        self.signals.create(initial_value, consumers, false)
    }

    fn signal_destroy(&self, signal: SignalHandle) -> Result<()> {
        self.ensure_live()?;
        self.signals.destroy(signal)
    }

    fn signal_load(&self, signal: SignalHandle, order: LoadOrder) -> Result<i64> {
        self.ensure_live()?;
        Ok(self.signals.get(signal)?.cell.load(order))
    }

    fn signal_store(&self, signal: SignalHandle, value: i64, order: StoreOrder) -> Result<()> {
        self.ensure_live()?;
        self.signals.get(signal)?.cell.store(value, order);
        Ok(())
    }

    fn signal_rmw(
        &self,
        signal: SignalHandle,
        op: SignalOp,
        value: i64,
        order: MemoryOrder,
    ) -> Result<i64> {
        self.ensure_live()?;
        Ok(self.signals.get(signal)?.cell.rmw(op, value, order))
    }

    fn signal_cas(
        &self,
        signal: SignalHandle,
        expected: i64,
        value: i64,
        order: MemoryOrder,
    ) -> Result<i64> {
        self.ensure_live()?;
        Ok(self
            .signals
            .get(signal)?
            .cell
            .compare_exchange(expected, value, order))
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
        self.ensure_live()?;
        // One tick is one nanosecond.
        let timeout = (timeout_hint != u64::MAX).then(|| Duration::from_nanos(timeout_hint));
        let signal = self.signals.get(signal)?;
        Ok(signal
            .cell
            .wait(condition, compare_value, timeout, wait_state, order))
    }

    fn queue_create(&self, agent: Agent, size: u32, queue_type: QueueType) -> Result<QueueHandle> {
        self.ensure_live()?;
        let info = &self.topology.agent(agent)?.info;
        if !info.supports_kernel_dispatch() {
            return Err(HsaError::InvalidQueueCreation(format!(
                "agent {} does not accept dispatches",
                info.name
            )));
        }
        if !size.is_power_of_two() || size < info.queue_min_size || size > info.queue_max_size {
            return Err(HsaError::InvalidArgument(format!(
                "queue size {size} is not a power of two in {}..={}",
                info.queue_min_size, info.queue_max_size
            )));
        }
        self.queues
            .create(&self.signals, agent, size, queue_type, info.queues_max)
    }

    fn queue_destroy(&self, queue: QueueHandle) -> Result<()> {
        self.ensure_live()?;
        self.queues.destroy(&self.signals, queue)
    }

    fn queue_info(&self, queue: QueueHandle) -> Result<QueueInfo> {
        self.ensure_live()?;
        Ok(self.queues.get(queue)?.info())
    }

    fn queue_load_read_index(&self, queue: QueueHandle, order: LoadOrder) -> Result<u64> {
        self.ensure_live()?;
        Ok(self.queues.get(queue)?.load_read_index(order))
    }

    fn queue_load_write_index(&self, queue: QueueHandle, order: LoadOrder) -> Result<u64> {
        self.ensure_live()?;
        Ok(self.queues.get(queue)?.load_write_index(order))
    }

    fn queue_store_write_index(
        &self,
        queue: QueueHandle,
        value: u64,
        order: StoreOrder,
    ) -> Result<()> {
        self.ensure_live()?;
        self.queues.get(queue)?.store_write_index(value, order);
        Ok(())
    }

    fn queue_add_write_index(
        &self,
        queue: QueueHandle,
        delta: u64,
        order: MemoryOrder,
    ) -> Result<u64> {
        self.ensure_live()?;
        Ok(self.queues.get(queue)?.add_write_index(delta, order))
    }

    fn queue_cas_write_index(
        &self,
        queue: QueueHandle,
        expected: u64,
        value: u64,
        order: MemoryOrder,
    ) -> Result<u64> {
        self.ensure_live()?;
        Ok(self
            .queues
            .get(queue)?
            .cas_write_index(expected, value, order))
    }

    fn queue_write_packet(&self, queue: QueueHandle, index: u64, packet: &Packet) -> Result<()> {
        self.ensure_live()?;
        self.queues.get(queue)?.write_packet(index, packet)
    }

    fn executable_create(&self, profile: Profile) -> Result<ExecutableHandle> {
        self.ensure_live()?;
        Ok(self.executables.create(profile))
    }

    fn executable_destroy(&self, executable: ExecutableHandle) -> Result<()> {
        self.ensure_live()?;
        self.executables.destroy(executable)
    }

    fn executable_define_global_variable(
        &self,
        executable: ExecutableHandle,
        name: &str,
        address: *mut c_void,
    ) -> Result<()> {
        self.ensure_live()?;
        if address.is_null() {
            return Err(HsaError::InvalidArgument(format!(
                "null address for global variable `{name}`"
            )));
        }
        self.executables
            .define_global_variable(executable, name, address as u64)
    }

    fn executable_freeze(&self, executable: ExecutableHandle) -> Result<()> {
        self.ensure_live()?;
        self.executables.freeze(executable)
    }

    fn executable_state(&self, executable: ExecutableHandle) -> Result<ExecutableState> {
        self.ensure_live()?;
        self.executables.state(executable)
    }

    fn executable_symbol(
        &self,
        executable: ExecutableHandle,
        name: &str,
        agent: Option<Agent>,
    ) -> Result<SymbolInfo> {
        self.ensure_live()?;
        if let Some(agent) = agent {
            self.topology.agent(agent)?;
        }
        self.executables.symbol(executable, name)
    }
}

impl Drop for SoftRuntime {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_status;

    fn live() -> SoftRuntime {
        let rt = SoftRuntime::new(SoftConfig::default());
        rt.init().unwrap();
        rt
    }

    fn first_agent(rt: &SoftRuntime, kernel: bool) -> Agent {
        let mut found = None;
        rt.iterate_agents(&mut |agent| {
            if rt.agent_info(agent).unwrap().supports_kernel_dispatch() == kernel {
                found = Some(agent);
                return Status::InfoBreak;
            }
            Status::Success
        })
        .unwrap();
        found.unwrap()
    }

    #[test]
    fn queries_need_an_open_session() {
        let rt = SoftRuntime::new(SoftConfig::default());
        assert_status!(rt.system_info(), Status::NotInitialized);
        assert_status!(rt.shut_down(), Status::NotInitialized);
        rt.init().unwrap();
        assert!(rt.system_info().is_ok());
        rt.shut_down().unwrap();
        assert_status!(rt.signal_create(0, &[]), Status::NotInitialized);
    }

    #[test]
    fn refcount_stops_at_ceiling() {
        let rt = SoftRuntime::new(SoftConfig::default().with_refcount_ceiling(3));
        for _ in 0..3 {
            rt.init().unwrap();
        }
        assert_status!(rt.init(), Status::RefcountOverflow);
        assert_eq!(rt.refcount(), 3);
    }

    #[test]
    fn last_shutdown_releases_resources() {
        let rt = live();
        let signal = rt.signal_create(1, &[]).unwrap();
        rt.shut_down().unwrap();
        rt.init().unwrap();
        assert_status!(rt.signal_destroy(signal), Status::InvalidSignal);
    }

    #[test]
    fn duplicate_consumers_are_rejected() {
        let rt = live();
        let gpu = first_agent(&rt, true);
        assert_status!(rt.signal_create(0, &[gpu, gpu]), Status::InvalidArgument);
        assert!(rt.signal_create(0, &[gpu]).is_ok());
    }

    #[test]
    fn host_agents_cannot_own_queues() {
        let rt = live();
        let cpu = first_agent(&rt, false);
        let gpu = first_agent(&rt, true);
        assert_status!(
            rt.queue_create(cpu, 64, QueueType::Multi),
            Status::InvalidQueueCreation
        );
        assert_status!(
            rt.queue_create(gpu, 65, QueueType::Multi),
            Status::InvalidArgument
        );
        assert_status!(
            rt.queue_create(gpu, 1 << 20, QueueType::Multi),
            Status::InvalidArgument
        );

        let queue = rt.queue_create(gpu, 64, QueueType::Single).unwrap();
        let doorbell = rt.queue_info(queue).unwrap().doorbell;
        assert_status!(rt.signal_destroy(doorbell), Status::InvalidArgument);
        rt.queue_destroy(queue).unwrap();
    }

    #[test]
    fn allocations_respect_region_properties() {
        let rt = live();
        let gpu = first_agent(&rt, true);
        let mut regions = Vec::new();
        rt.agent_iterate_regions(gpu, &mut |region| {
            regions.push(region);
            Status::Success
        })
        .unwrap();

        let (mut allowed, mut denied) = (None, None);
        for region in regions {
            if rt.region_info(region).unwrap().runtime_alloc_allowed {
                allowed = Some(region);
            } else {
                denied = Some(region);
            }
        }
        let (allowed, denied) = (allowed.unwrap(), denied.unwrap());

        assert_status!(rt.memory_allocate(denied, 64), Status::InvalidAllocation);
        assert_status!(rt.memory_allocate(allowed, 0), Status::InvalidArgument);
        assert_status!(
            rt.memory_allocate(allowed, usize::MAX),
            Status::InvalidAllocation
        );
        let ptr = rt.memory_allocate(allowed, 128).unwrap();
        rt.memory_free(ptr).unwrap();
    }

    #[test]
    fn timed_wait_returns_unsatisfied_value() {
        let rt = live();
        let signal = rt.signal_create(5, &[]).unwrap();
        let ticks = rt.system_info().unwrap().ticks_from_nanos(1_000_000);
        let value = rt
            .signal_wait(
                signal,
                Condition::Eq,
                0,
                ticks,
                WaitState::Blocked,
                LoadOrder::Relaxed,
            )
            .unwrap();
        assert_eq!(value, 5);
    }
}
