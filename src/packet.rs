//! Architected Queuing Language packets submitted through queues.

use crate::error::{HsaError, Result};
use crate::types::SignalHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FenceScope {
    None,
    Agent,
    #[default]
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub barrier: bool,
    pub acquire_fence: FenceScope,
    pub release_fence: FenceScope,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            barrier: false,
            acquire_fence: FenceScope::System,
            release_fence: FenceScope::System,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDispatchPacket {
    pub header: PacketHeader,
    pub dimensions: u16,
    pub workgroup_size: [u16; 3],
    pub grid_size: [u32; 3],
    pub private_segment_size: u32,
    pub group_segment_size: u32,
    pub kernel_object: u64,
    pub kernarg_address: u64,
    pub completion_signal: Option<SignalHandle>,
}

impl Default for KernelDispatchPacket {
    fn default() -> Self {
        Self {
            header: PacketHeader::default(),
            dimensions: 1,
            workgroup_size: [1, 1, 1],
            grid_size: [1, 1, 1],
            private_segment_size: 0,
            group_segment_size: 0,
            kernel_object: 0,
            kernarg_address: 0,
            completion_signal: None,
        }
    }
}

impl KernelDispatchPacket {
    pub fn with_completion(mut self, signal: SignalHandle) -> Self {
        self.completion_signal = Some(signal);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.dimensions) {
            return Err(HsaError::InvalidPacketFormat(format!(
                "dispatch with {} dimensions",
                self.dimensions
            )));
        }
        let dims = usize::from(self.dimensions);
        if self.workgroup_size[..dims].contains(&0) || self.grid_size[..dims].contains(&0) {
            return Err(HsaError::InvalidPacketFormat(format!(
                "dispatch with empty extent: workgroup {:?}, grid {:?}",
                self.workgroup_size, self.grid_size
            )));
        }
        Ok(())
    }
}

pub const BARRIER_DEPENDENCIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BarrierPacket {
    pub header: PacketHeader,
    pub dep_signals: [Option<SignalHandle>; BARRIER_DEPENDENCIES],
    pub completion_signal: Option<SignalHandle>,
}

impl BarrierPacket {
    /// Barrier on up to five dependencies; extra signals are rejected.
    pub fn on(deps: &[SignalHandle]) -> Result<Self> {
        if deps.len() > BARRIER_DEPENDENCIES {
            return Err(HsaError::InvalidArgument(format!(
                "barrier packets carry at most {BARRIER_DEPENDENCIES} dependencies, got {}",
                deps.len()
            )));
        }
        let mut packet = Self::default();
        for (slot, dep) in packet.dep_signals.iter_mut().zip(deps) {
            *slot = Some(*dep);
        }
        Ok(packet)
    }

    pub fn with_completion(mut self, signal: SignalHandle) -> Self {
        self.completion_signal = Some(signal);
        self
    }

    pub fn dependencies(&self) -> impl Iterator<Item = SignalHandle> + '_ {
        self.dep_signals.iter().flatten().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    KernelDispatch(KernelDispatchPacket),
    /// Completes once every dependency signal reads zero.
    BarrierAnd(BarrierPacket),
    /// Completes once any dependency signal reads zero.
    BarrierOr(BarrierPacket),
}

impl Packet {
    pub fn header(&self) -> &PacketHeader {
        match self {
            Packet::KernelDispatch(p) => &p.header,
            Packet::BarrierAnd(p) | Packet::BarrierOr(p) => &p.header,
        }
    }

    pub fn completion_signal(&self) -> Option<SignalHandle> {
        match self {
            Packet::KernelDispatch(p) => p.completion_signal,
            Packet::BarrierAnd(p) | Packet::BarrierOr(p) => p.completion_signal,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Packet::KernelDispatch(p) => p.validate(),
            Packet::BarrierAnd(_) | Packet::BarrierOr(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;

    #[test]
    fn default_dispatch_is_valid() {
        assert!(KernelDispatchPacket::default().validate().is_ok());
    }

    #[test]
    fn empty_grid_is_malformed() {
        let packet = KernelDispatchPacket {
            grid_size: [0, 1, 1],
            ..Default::default()
        };
        assert_eq!(
            packet.validate().unwrap_err().status(),
            Status::InvalidPacketFormat
        );
    }

    #[test]
    fn unused_dimensions_are_not_checked() {
        let packet = KernelDispatchPacket {
            dimensions: 2,
            grid_size: [8, 8, 0],
            workgroup_size: [4, 4, 0],
            ..Default::default()
        };
        assert!(packet.validate().is_ok());
    }

    #[test]
    fn four_dimensions_are_malformed() {
        let packet = KernelDispatchPacket {
            dimensions: 4,
            ..Default::default()
        };
        assert!(packet.validate().is_err());
    }

    #[test]
    fn barrier_keeps_dependency_order() {
        let deps = [SignalHandle::from_raw(3), SignalHandle::from_raw(9)];
        let packet = BarrierPacket::on(&deps).unwrap();
        assert_eq!(packet.dependencies().collect::<Vec<_>>(), deps);
        assert!(BarrierPacket::on(&[SignalHandle::from_raw(1); 6]).is_err());
    }
}
