//! Boundary with the runtime under test.
//!
//! Every conformance procedure reaches the runtime through this trait only.
//! Implementations provide their own internal synchronization: the harness
//! never locks around calls into it.

use crate::error::{Result, Status};
use crate::packet::Packet;
use crate::types::{
    Agent, AgentInfo, ExecutableHandle, ExecutableState, MemoryRegion, Profile, QueueHandle,
    QueueInfo, QueueType, RegionInfo, SignalHandle, SymbolInfo, SystemInfo,
};
use crate::wait::{Condition, LoadOrder, MemoryOrder, SignalOp, StoreOrder, WaitState};
use std::os::raw::c_void;
use std::sync::Arc;

/// Per-agent iteration callback. The closure's captures play the role of
/// the opaque context pointer.
pub type AgentCallback<'a> = dyn FnMut(Agent) -> Status + 'a;

pub type RegionCallback<'a> = dyn FnMut(MemoryRegion) -> Status + 'a;

pub type SharedRuntime = Arc<dyn Runtime>;

/// Shared iteration protocol: keep going while the callback returns
/// `Success`; `InfoBreak` ends the walk and is returned as `Ok`; any error
/// status ends the walk and is returned as `Err`.
pub fn drive_iteration<T, F>(items: impl IntoIterator<Item = T>, callback: &mut F) -> Result<Status>
where
    F: FnMut(T) -> Status + ?Sized,
{
    for item in items {
        match callback(item) {
            Status::Success => continue,
            Status::InfoBreak => return Ok(Status::InfoBreak),
            status => return Err(crate::HsaError::from_status(status)),
        }
    }
    Ok(Status::Success)
}

pub trait Runtime: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Whether destroyed or made-up handles come back as an error status
    /// rather than being dereferenced. Cases that pass such handles are
    /// skipped when this is `false`.
    fn survives_forged_handles(&self) -> bool {
        true
    }

    // Life-cycle

    fn init(&self) -> Result<()>;

    fn shut_down(&self) -> Result<()>;

    fn status_string(&self, status: Status) -> Result<String> {
        Ok(status.description().to_string())
    }

    fn system_info(&self) -> Result<SystemInfo>;

    // Agents and regions

    fn iterate_agents(&self, callback: &mut AgentCallback<'_>) -> Result<Status>;

    fn agent_info(&self, agent: Agent) -> Result<AgentInfo>;

    fn agent_iterate_regions(
        &self,
        agent: Agent,
        callback: &mut RegionCallback<'_>,
    ) -> Result<Status>;

    fn region_info(&self, region: MemoryRegion) -> Result<RegionInfo>;

    // Memory

    fn memory_allocate(&self, region: MemoryRegion, size: usize) -> Result<*mut c_void>;

    /// Freeing a null pointer is a successful no-op.
    fn memory_free(&self, ptr: *mut c_void) -> Result<()>;

    /// Registers host memory for use by agents.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` bytes until the
    /// range is deregistered.
    unsafe fn memory_register(&self, ptr: *mut c_void, size: usize) -> Result<()>;

    fn memory_deregister(&self, ptr: *mut c_void, size: usize) -> Result<()>;

    fn memory_copy(&self, dst: *mut c_void, src: *const c_void, size: usize) -> Result<()>;

    // Signals

    fn signal_create(&self, initial_value: i64, consumers: &[Agent]) -> Result<SignalHandle>;

    fn signal_destroy(&self, signal: SignalHandle) -> Result<()>;

    fn signal_load(&self, signal: SignalHandle, order: LoadOrder) -> Result<i64>;

    fn signal_store(&self, signal: SignalHandle, value: i64, order: StoreOrder) -> Result<()>;

    /// Applies `op` atomically and returns the previous value.
    fn signal_rmw(
        &self,
        signal: SignalHandle,
        op: SignalOp,
        value: i64,
        order: MemoryOrder,
    ) -> Result<i64>;

    /// Returns the value observed before the compare-and-swap.
    fn signal_cas(
        &self,
        signal: SignalHandle,
        expected: i64,
        value: i64,
        order: MemoryOrder,
    ) -> Result<i64>;

    /// `timeout_hint` is in system timestamp ticks; `u64::MAX` means no
    /// deadline. Returns the value observed when the wait ended.
    #[allow(clippy::too_many_arguments)]
    fn signal_wait(
        &self,
        signal: SignalHandle,
        condition: Condition,
        compare_value: i64,
        timeout_hint: u64,
        wait_state: WaitState,
        order: LoadOrder,
    ) -> Result<i64>;

    // Queues

    fn queue_create(&self, agent: Agent, size: u32, queue_type: QueueType) -> Result<QueueHandle>;

    fn queue_destroy(&self, queue: QueueHandle) -> Result<()>;

    fn queue_info(&self, queue: QueueHandle) -> Result<QueueInfo>;

    fn queue_load_read_index(&self, queue: QueueHandle, order: LoadOrder) -> Result<u64>;

    fn queue_load_write_index(&self, queue: QueueHandle, order: LoadOrder) -> Result<u64>;

    fn queue_store_write_index(&self, queue: QueueHandle, value: u64, order: StoreOrder)
    -> Result<()>;

    /// Returns the write index before the addition.
    fn queue_add_write_index(&self, queue: QueueHandle, delta: u64, order: MemoryOrder)
    -> Result<u64>;

    /// Returns the write index observed before the compare-and-swap.
    fn queue_cas_write_index(
        &self,
        queue: QueueHandle,
        expected: u64,
        value: u64,
        order: MemoryOrder,
    ) -> Result<u64>;

    /// Writes `packet` into the slot of a reserved `index`. The header is
    /// published last, so the packet processor never sees a torn packet.
    fn queue_write_packet(&self, queue: QueueHandle, index: u64, packet: &Packet) -> Result<()>;

    // Executables

    fn executable_create(&self, profile: Profile) -> Result<ExecutableHandle>;

    fn executable_destroy(&self, executable: ExecutableHandle) -> Result<()>;

    fn executable_define_global_variable(
        &self,
        executable: ExecutableHandle,
        name: &str,
        address: *mut c_void,
    ) -> Result<()>;

    fn executable_freeze(&self, executable: ExecutableHandle) -> Result<()>;

    fn executable_state(&self, executable: ExecutableHandle) -> Result<ExecutableState>;

    fn executable_symbol(
        &self,
        executable: ExecutableHandle,
        name: &str,
        agent: Option<Agent>,
    ) -> Result<SymbolInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_stops_on_break_after_one_call() {
        let mut calls = 0;
        let result = drive_iteration([1u32, 2, 3], &mut |_| {
            calls += 1;
            Status::InfoBreak
        });
        assert_eq!(result.unwrap(), Status::InfoBreak);
        assert_eq!(calls, 1);
    }

    #[test]
    fn iteration_propagates_callback_errors() {
        let mut visited = Vec::new();
        let result = drive_iteration([1u32, 2, 3], &mut |item| {
            visited.push(item);
            if item == 2 {
                Status::InvalidArgument
            } else {
                Status::Success
            }
        });
        assert_eq!(result.unwrap_err().status(), Status::InvalidArgument);
        assert_eq!(visited, vec![1, 2]);
    }

    #[test]
    fn iteration_visits_everything_on_success() {
        let mut sum = 0;
        let result = drive_iteration([1u32, 2, 3], &mut |item| {
            sum += item;
            Status::Success
        });
        assert_eq!(result.unwrap(), Status::Success);
        assert_eq!(sum, 6);
    }
}
