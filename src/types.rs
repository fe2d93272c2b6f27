//! Handles and descriptors shared by every runtime implementation.

use crate::error::Status;
use bitflags::bitflags;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            pub(crate) handle: u64,
        }

        impl $name {
            /// Wraps a raw handle value. Nothing checks that the runtime
            /// issued it, which is exactly what invalid-handle tests need.
            pub const fn from_raw(handle: u64) -> Self {
                Self { handle }
            }

            pub const fn handle(&self) -> u64 {
                self.handle
            }
        }
    };
}

handle_type!(
    /// An enumerable compute resource exposed by the runtime.
    Agent
);
handle_type!(
    /// A memory pool with its own allocation and access properties.
    MemoryRegion
);
handle_type!(SignalHandle);
handle_type!(QueueHandle);
handle_type!(ExecutableHandle);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Cpu,
    Gpu,
    Dsp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSegment {
    Global,
    ReadOnly,
    Private,
    Group,
    KernArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueType {
    Multi,
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Base,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableState {
    Unfrozen,
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineModel {
    Small,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Kernel,
    IndirectFunction,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AgentFeature: u32 {
        const KERNEL_DISPATCH = 1;
        const AGENT_DISPATCH = 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RegionGlobalFlags: u32 {
        const KERNARG = 1;
        const FINE_GRAINED = 2;
        const COARSE_GRAINED = 4;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    pub version_major: u16,
    pub version_minor: u16,
    /// Ticks per second of the system timestamp; signal wait timeouts are
    /// expressed in these ticks.
    pub timestamp_frequency: u64,
    pub signal_max_wait: u64,
    pub machine_model: MachineModel,
}

impl SystemInfo {
    /// Converts a duration in nanoseconds to timestamp ticks, saturating.
    pub fn ticks_from_nanos(&self, nanos: u64) -> u64 {
        let ticks = (nanos as u128 * self.timestamp_frequency as u128) / 1_000_000_000;
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    pub name: String,
    pub vendor_name: String,
    pub device: DeviceType,
    pub features: AgentFeature,
    pub queue_min_size: u32,
    pub queue_max_size: u32,
    pub queues_max: u32,
    pub node: u32,
}

impl AgentInfo {
    pub fn supports_kernel_dispatch(&self) -> bool {
        self.features.contains(AgentFeature::KERNEL_DISPATCH)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub segment: RegionSegment,
    pub global_flags: RegionGlobalFlags,
    pub size: usize,
    pub alloc_max_size: usize,
    pub runtime_alloc_allowed: bool,
    pub alloc_granule: usize,
    pub alloc_alignment: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub id: u64,
    pub agent: Agent,
    pub size: u32,
    pub queue_type: QueueType,
    pub doorbell: SignalHandle,
    /// First error the packet processor reported for this queue.
    pub error: Option<Status>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub kind: SymbolKind,
    pub name: String,
    pub address: u64,
    pub agent: Option<Agent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_from_nanos_scales_by_frequency() {
        let info = SystemInfo {
            version_major: 1,
            version_minor: 2,
            timestamp_frequency: 100_000_000,
            signal_max_wait: u64::MAX,
            machine_model: MachineModel::Large,
        };
        assert_eq!(info.ticks_from_nanos(1_000), 100);
        assert_eq!(info.ticks_from_nanos(u64::MAX), 1_844_674_407_370_955_161);
    }

    #[test]
    fn handles_compare_by_value() {
        assert_eq!(Agent::from_raw(7), Agent::from_raw(7));
        assert_ne!(SignalHandle::from_raw(1).handle(), 2);
    }
}
