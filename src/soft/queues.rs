use super::signals::{SignalTable, SoftSignal};
use crate::error::{HsaError, Result, Status};
use crate::packet::{BarrierPacket, Packet};
use crate::types::{Agent, QueueHandle, QueueInfo, QueueType, SignalHandle};
use crate::wait::{Condition, LoadOrder, MemoryOrder, SignalOp, StoreOrder, WaitState};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound of one processor sleep; bounds how long a queue takes to
/// notice it is being destroyed.
const POLL_SLICE: Duration = Duration::from_millis(1);

pub(crate) struct SoftQueue {
    pub id: u64,
    pub agent: Agent,
    pub size: u32,
    pub queue_type: QueueType,
    pub doorbell: SignalHandle,
    doorbell_signal: Arc<SoftSignal>,
    /// Each slot holds the index it was written for, so the processor can
    /// tell a fresh packet from a stale one.
    slots: Box<[Mutex<Option<(u64, Packet)>>]>,
    read_index: AtomicU64,
    write_index: AtomicU64,
    error: Mutex<Option<Status>>,
    stop: AtomicBool,
}

impl SoftQueue {
    pub fn info(&self) -> QueueInfo {
        QueueInfo {
            id: self.id,
            agent: self.agent,
            size: self.size,
            queue_type: self.queue_type,
            doorbell: self.doorbell,
            error: *self.error.lock(),
        }
    }

    pub fn load_read_index(&self, order: LoadOrder) -> u64 {
        self.read_index.load(order.ordering())
    }

    pub fn load_write_index(&self, order: LoadOrder) -> u64 {
        self.write_index.load(order.ordering())
    }

    pub fn store_write_index(&self, value: u64, order: StoreOrder) {
        self.write_index.store(value, order.ordering());
    }

    pub fn add_write_index(&self, delta: u64, order: MemoryOrder) -> u64 {
        self.write_index.fetch_add(delta, order.ordering())
    }

    pub fn cas_write_index(&self, expected: u64, value: u64, order: MemoryOrder) -> u64 {
        match self.write_index.compare_exchange(
            expected,
            value,
            order.ordering(),
            order.failure_ordering(),
        ) {
            Ok(previous) | Err(previous) => previous,
        }
    }

    pub fn write_packet(&self, index: u64, packet: &Packet) -> Result<()> {
        let write = self.write_index.load(Ordering::Acquire);
        let read = self.read_index.load(Ordering::Acquire);
        if index >= write {
            return Err(HsaError::InvalidIndex(format!(
                "packet index {index} was not reserved (write index {write})"
            )));
        }
        if index < read {
            return Err(HsaError::InvalidIndex(format!(
                "packet index {index} was already consumed (read index {read})"
            )));
        }
        if index - read >= u64::from(self.size) {
            return Err(HsaError::InvalidIndex(format!(
                "slot for packet index {index} still holds an unread packet (read index {read})"
            )));
        }

        let mut slot = self.slots[self.slot_of(index)].lock();
        if slot.is_some() {
            return Err(HsaError::InvalidIndex(format!(
                "slot for packet index {index} is occupied"
            )));
        }
        *slot = Some((index, packet.clone()));
        Ok(())
    }

    fn slot_of(&self, index: u64) -> usize {
        (index % u64::from(self.size)) as usize
    }

    fn take_packet(&self, index: u64) -> Option<Packet> {
        let mut slot = self.slots[self.slot_of(index)].lock();
        if matches!(slot.as_ref(), Some((written, _)) if *written == index) {
            slot.take().map(|(_, packet)| packet)
        } else {
            None
        }
    }

    fn fail(&self, status: Status) {
        let mut error = self.error.lock();
        if error.is_none() {
            warn!("queue {} stopped: {status}", self.id);
            *error = Some(status);
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        // Any mutation wakes a processor parked on the doorbell.
        self.doorbell_signal.cell.rmw(SignalOp::Or, 0, MemoryOrder::Release);
    }
}

enum Completion {
    Done,
    Abandoned,
}

/// Consumer side of a queue: runs packets strictly in index order.
fn process(queue: Arc<SoftQueue>, signals: Arc<SignalTable>) {
    debug!("queue {} processor running", queue.id);
    while !queue.stopping() {
        let read = queue.read_index.load(Ordering::Relaxed);
        let rung = queue.doorbell_signal.cell.load(LoadOrder::Acquire);

        let Some(packet) = queue.take_packet(read) else {
            queue.doorbell_signal.cell.wait(
                Condition::Ne,
                rung,
                Some(POLL_SLICE),
                WaitState::Blocked,
                LoadOrder::Acquire,
            );
            continue;
        };

        match execute(&queue, &signals, &packet) {
            Ok(Completion::Done) => {
                queue.read_index.store(read + 1, Ordering::Release);
            }
            Ok(Completion::Abandoned) => break,
            Err(err) => {
                queue.fail(err.status());
                break;
            }
        }
    }
    debug!("queue {} processor exiting", queue.id);
}

fn execute(queue: &SoftQueue, signals: &SignalTable, packet: &Packet) -> Result<Completion> {
    packet.validate()?;

    let completion = match packet {
        // The reference runtime has no kernel code to run; a dispatch only
        // completes.
        Packet::KernelDispatch(_) => Completion::Done,
        Packet::BarrierAnd(barrier) => wait_dependencies(queue, signals, barrier, true)?,
        Packet::BarrierOr(barrier) => wait_dependencies(queue, signals, barrier, false)?,
    };

    if let (Completion::Done, Some(handle)) = (&completion, packet.completion_signal()) {
        signals
            .get(handle)?
            .cell
            .rmw(SignalOp::Subtract, 1, MemoryOrder::Release);
    }
    Ok(completion)
}

fn wait_dependencies(
    queue: &SoftQueue,
    signals: &SignalTable,
    barrier: &BarrierPacket,
    all: bool,
) -> Result<Completion> {
    let deps = barrier
        .dependencies()
        .map(|handle| signals.get(handle))
        .collect::<Result<Vec<_>>>()?;
    if deps.is_empty() {
        return Ok(Completion::Done);
    }

    loop {
        let pending: Vec<_> = deps
            .iter()
            .filter(|dep| dep.cell.load(LoadOrder::Acquire) != 0)
            .collect();
        let satisfied = if all {
            pending.is_empty()
        } else {
            pending.len() < deps.len()
        };
        if satisfied {
            return Ok(Completion::Done);
        }
        if queue.stopping() {
            return Ok(Completion::Abandoned);
        }
        if let Some(dep) = pending.first() {
            dep.cell.wait(
                Condition::Eq,
                0,
                Some(POLL_SLICE),
                WaitState::Blocked,
                LoadOrder::Acquire,
            );
        }
    }
}

struct QueueEntry {
    queue: Arc<SoftQueue>,
    processor: Option<JoinHandle<()>>,
}

pub(crate) struct QueueTable {
    next: AtomicU64,
    entries: RwLock<HashMap<u64, QueueEntry>>,
    /// Serializes the per-agent limit check with the insertion.
    creating: Mutex<()>,
}

impl QueueTable {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
            creating: Mutex::new(()),
        }
    }

    pub fn create(
        &self,
        signals: &Arc<SignalTable>,
        agent: Agent,
        size: u32,
        queue_type: QueueType,
        limit: u32,
    ) -> Result<QueueHandle> {
        let _creating = self.creating.lock();
        let live = self.live_on(agent);
        if live >= limit as usize {
            return Err(HsaError::OutOfResources(format!(
                "agent 0x{:x} already has {live} of {limit} queues",
                agent.handle
            )));
        }

        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let doorbell = signals.create(0, &[agent], true)?;
        let doorbell_signal = signals.get(doorbell)?;

        let queue = Arc::new(SoftQueue {
            id,
            agent,
            size,
            queue_type,
            doorbell,
            doorbell_signal,
            slots: (0..size).map(|_| Mutex::new(None)).collect(),
            read_index: AtomicU64::new(0),
            write_index: AtomicU64::new(0),
            error: Mutex::new(None),
            stop: AtomicBool::new(false),
        });

        let processor = {
            let queue = Arc::clone(&queue);
            let signals = Arc::clone(signals);
            thread::Builder::new()
                .name(format!("soft-queue-{id}"))
                .spawn(move || process(queue, signals))
        };
        let processor = match processor {
            Ok(handle) => handle,
            Err(e) => {
                let _ = signals.remove(doorbell);
                return Err(HsaError::OutOfResources(format!(
                    "failed to spawn packet processor: {e}"
                )));
            }
        };

        self.entries.write().insert(
            id,
            QueueEntry {
                queue,
                processor: Some(processor),
            },
        );
        debug!(
            "created queue {id} of {size} packets on agent 0x{:x}",
            agent.handle
        );
        Ok(QueueHandle::from_raw(id))
    }

    pub fn get(&self, queue: QueueHandle) -> Result<Arc<SoftQueue>> {
        if queue.handle == 0 {
            return Err(HsaError::InvalidArgument("null queue handle".to_string()));
        }
        self.entries
            .read()
            .get(&queue.handle)
            .map(|entry| Arc::clone(&entry.queue))
            .ok_or_else(|| HsaError::InvalidQueue(format!("queue 0x{:x}", queue.handle)))
    }

    pub fn live_on(&self, agent: Agent) -> usize {
        self.entries
            .read()
            .values()
            .filter(|entry| entry.queue.agent == agent)
            .count()
    }

    pub fn destroy(&self, signals: &SignalTable, queue: QueueHandle) -> Result<()> {
        if queue.handle == 0 {
            return Err(HsaError::InvalidArgument("null queue handle".to_string()));
        }
        let entry = self
            .entries
            .write()
            .remove(&queue.handle)
            .ok_or_else(|| HsaError::InvalidQueue(format!("queue 0x{:x}", queue.handle)))?;
        shut_down_entry(signals, entry);
        debug!("destroyed queue {}", queue.handle);
        Ok(())
    }

    pub fn destroy_all(&self, signals: &SignalTable) {
        let entries: Vec<_> = self
            .entries
            .write()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in entries {
            shut_down_entry(signals, entry);
        }
    }
}

fn shut_down_entry(signals: &SignalTable, mut entry: QueueEntry) {
    entry.queue.request_stop();
    if let Some(processor) = entry.processor.take() {
        if processor.join().is_err() {
            warn!("packet processor of queue {} panicked", entry.queue.id);
        }
    }
    let _ = signals.remove(entry.queue.doorbell);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::KernelDispatchPacket;

    fn setup(size: u32) -> (Arc<SignalTable>, QueueTable, QueueHandle) {
        let signals = Arc::new(SignalTable::new(64));
        let table = QueueTable::new();
        let handle = table
            .create(&signals, Agent::from_raw(0x1001), size, QueueType::Multi, 1)
            .unwrap();
        (signals, table, handle)
    }

    #[test]
    fn dispatch_decrements_completion_signal() {
        let (signals, table, handle) = setup(4);
        let queue = table.get(handle).unwrap();
        let done = signals.create(1, &[], false).unwrap();

        let index = queue.add_write_index(1, MemoryOrder::Relaxed);
        let packet = Packet::KernelDispatch(KernelDispatchPacket::default().with_completion(done));
        queue.write_packet(index, &packet).unwrap();
        queue.doorbell_signal.cell.store(index as i64, StoreOrder::Release);

        let cell = &signals.get(done).unwrap().cell;
        let value = cell.wait(
            Condition::Eq,
            0,
            None,
            WaitState::Blocked,
            LoadOrder::Acquire,
        );
        assert_eq!(value, 0);
        table.destroy(&signals, handle).unwrap();
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn unreserved_and_overlapping_indices_are_rejected() {
        let (signals, table, handle) = setup(2);
        let queue = table.get(handle).unwrap();
        let packet = Packet::KernelDispatch(KernelDispatchPacket::default());

        let err = queue.write_packet(0, &packet).unwrap_err();
        assert_eq!(err.status(), Status::InvalidIndex);

        queue.store_write_index(3, StoreOrder::Release);
        let err = queue.write_packet(2, &packet).unwrap_err();
        assert_eq!(err.status(), Status::InvalidIndex);
        table.destroy_all(&signals);
    }

    #[test]
    fn malformed_packet_sets_queue_error() {
        let (signals, table, handle) = setup(2);
        let queue = table.get(handle).unwrap();
        let index = queue.add_write_index(1, MemoryOrder::AcqRel);
        let packet = Packet::KernelDispatch(KernelDispatchPacket {
            grid_size: [0, 0, 0],
            ..Default::default()
        });
        queue.write_packet(index, &packet).unwrap();
        queue.doorbell_signal.cell.store(index as i64, StoreOrder::Release);

        while queue.info().error.is_none() {
            thread::sleep(POLL_SLICE);
        }
        assert_eq!(queue.info().error, Some(Status::InvalidPacketFormat));
        assert_eq!(queue.load_read_index(LoadOrder::Acquire), 0);
        table.destroy(&signals, handle).unwrap();
    }

    #[test]
    fn per_agent_limit_is_out_of_resources() {
        let (signals, table, _handle) = setup(2);
        let err = table
            .create(&signals, Agent::from_raw(0x1001), 2, QueueType::Single, 1)
            .unwrap_err();
        assert_eq!(err.status(), Status::OutOfResources);
        table.destroy_all(&signals);
        assert_eq!(signals.len(), 0);
    }

    #[test]
    fn destroy_twice_reports_invalid_queue() {
        let (signals, table, handle) = setup(2);
        table.destroy(&signals, handle).unwrap();
        assert_eq!(
            table.destroy(&signals, handle).unwrap_err().status(),
            Status::InvalidQueue
        );
    }
}
