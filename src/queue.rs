use crate::packet::Packet;
use crate::runtime::SharedRuntime;
use crate::types::{Agent, QueueHandle, QueueInfo, QueueType, SignalHandle};
use crate::wait::{Backoff, LoadOrder, MemoryOrder, SpinBackoff, StoreOrder};
use crate::{HsaError, Result};
use std::sync::Arc;
use tracing::{debug, error};

/// Runtime queue destroyed on drop.
pub struct Queue {
    runtime: SharedRuntime,
    handle: QueueHandle,
    size: u32,
    doorbell: SignalHandle,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .field("doorbell", &self.doorbell)
            .finish_non_exhaustive()
    }
}

impl Queue {
    pub fn create(rt: &SharedRuntime, agent: Agent, size: u32) -> Result<Self> {
        Self::create_typed(rt, agent, size, QueueType::Multi)
    }

    pub fn create_typed(
        rt: &SharedRuntime,
        agent: Agent,
        size: u32,
        queue_type: QueueType,
    ) -> Result<Self> {
        let handle = rt.queue_create(agent, size, queue_type)?;
        let info = match rt.queue_info(handle) {
            Ok(info) => info,
            Err(e) => {
                let _ = rt.queue_destroy(handle);
                return Err(e);
            }
        };
        Ok(Self {
            runtime: Arc::clone(rt),
            handle,
            size: info.size,
            doorbell: info.doorbell,
        })
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn doorbell(&self) -> SignalHandle {
        self.doorbell
    }

    pub fn info(&self) -> Result<QueueInfo> {
        self.runtime.queue_info(self.handle)
    }

    pub fn add_write_index(&self, value: u64) -> Result<u64> {
        self.runtime
            .queue_add_write_index(self.handle, value, MemoryOrder::Relaxed)
    }

    pub fn store_write_index(&self, value: u64) -> Result<()> {
        self.runtime
            .queue_store_write_index(self.handle, value, StoreOrder::Relaxed)
    }

    pub fn load_read_index(&self) -> Result<u64> {
        self.runtime
            .queue_load_read_index(self.handle, LoadOrder::Acquire)
    }

    pub fn load_write_index(&self) -> Result<u64> {
        self.runtime
            .queue_load_write_index(self.handle, LoadOrder::Acquire)
    }

    /// Enqueues `packet` and rings the doorbell; returns its index.
    ///
    /// Safe for any number of concurrent producers: each reserves its own
    /// index, then waits until that slot is no longer occupied by an entry
    /// the packet processor has not read.
    pub fn submit(&self, packet: &Packet) -> Result<u64> {
        let index = self
            .runtime
            .queue_add_write_index(self.handle, 1, MemoryOrder::Relaxed)?;

        let mut backoff = SpinBackoff::new();
        while index.saturating_sub(self.load_read_index()?) >= u64::from(self.size) {
            if backoff.is_yielding() {
                // A stopped processor never frees the slot.
                if let Some(status) = self.info()?.error {
                    return Err(HsaError::from_status_with_context(
                        status,
                        format!(
                            "queue 0x{:x} stopped before packet {index}",
                            self.handle.handle
                        ),
                    ));
                }
            }
            backoff.snooze();
        }

        self.runtime.queue_write_packet(self.handle, index, packet)?;
        self.runtime
            .signal_store(self.doorbell, index as i64, StoreOrder::Release)?;
        debug!("queue 0x{:x}: submitted packet {index}", self.handle.handle);
        Ok(index)
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.queue_destroy(self.handle) {
            error!("failed to destroy queue: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Signal;
    use crate::packet::{BarrierPacket, KernelDispatchPacket};
    use crate::soft::{SoftConfig, SoftRuntime};

    fn setup() -> (SharedRuntime, Agent) {
        let rt = SoftRuntime::shared(SoftConfig::default());
        rt.init().unwrap();
        let agent = Agent::find_kernel_agent(&*rt).unwrap();
        (rt, agent)
    }

    #[test]
    fn submissions_complete_in_order() {
        let (rt, agent) = setup();
        let queue = Queue::create(&rt, agent, 64).unwrap();
        let done = Signal::create(&rt, 3).unwrap();

        for _ in 0..3 {
            let packet = KernelDispatchPacket::default().with_completion(done.handle());
            queue.submit(&Packet::KernelDispatch(packet)).unwrap();
        }
        assert_eq!(done.wait_eq(0, u64::MAX).unwrap(), 0);
        assert_eq!(queue.load_write_index().unwrap(), 3);
    }

    #[test]
    fn barrier_holds_until_dependency_clears() {
        let (rt, agent) = setup();
        let queue = Queue::create(&rt, agent, 64).unwrap();
        let dep = Signal::create(&rt, 1).unwrap();
        let done = Signal::create(&rt, 1).unwrap();

        let barrier = BarrierPacket::on(&[dep.handle()])
            .unwrap()
            .with_completion(done.handle());
        queue.submit(&Packet::BarrierAnd(barrier)).unwrap();

        // 2 ms in nanosecond ticks
        assert_eq!(done.wait_eq(0, 2_000_000).unwrap(), 1);
        dep.store_release(0).unwrap();
        assert_eq!(done.wait_eq(0, u64::MAX).unwrap(), 0);
    }
}
