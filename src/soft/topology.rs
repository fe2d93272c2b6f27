use super::SoftConfig;
use crate::error::{HsaError, Result};
use crate::types::{
    Agent, AgentFeature, AgentInfo, DeviceType, MemoryRegion, RegionGlobalFlags, RegionInfo,
    RegionSegment,
};

const AGENT_HANDLE_BASE: u64 = 0x1000;
const REGION_HANDLE_BASE: u64 = 0x2000;
const GROUP_SEGMENT_SIZE: usize = 64 * 1024;
const VENDOR: &str = "hsa-cts";

pub(crate) struct AgentDesc {
    pub agent: Agent,
    pub info: AgentInfo,
    pub regions: Vec<MemoryRegion>,
}

pub(crate) struct RegionDesc {
    pub info: RegionInfo,
}

/// Fixed set of agents and regions, built once from the configuration.
pub(crate) struct Topology {
    agents: Vec<AgentDesc>,
    regions: Vec<RegionDesc>,
}

impl Topology {
    pub fn build(config: &SoftConfig) -> Self {
        let mut topology = Self {
            agents: Vec::new(),
            regions: Vec::new(),
        };

        for i in 0..config.cpu_agents {
            let fine = topology.push_region(RegionInfo {
                segment: RegionSegment::Global,
                global_flags: RegionGlobalFlags::FINE_GRAINED,
                size: config.region_size,
                alloc_max_size: config.region_size,
                runtime_alloc_allowed: true,
                alloc_granule: config.alloc_granule,
                alloc_alignment: config.alloc_granule,
            });
            let kernarg = topology.push_region(RegionInfo {
                segment: RegionSegment::Global,
                global_flags: RegionGlobalFlags::KERNARG | RegionGlobalFlags::FINE_GRAINED,
                size: config.region_size,
                alloc_max_size: config.region_size,
                runtime_alloc_allowed: true,
                alloc_granule: config.alloc_granule,
                alloc_alignment: config.alloc_granule,
            });
            topology.push_agent(
                AgentInfo {
                    name: format!("soft-cpu-{i}"),
                    vendor_name: VENDOR.to_string(),
                    device: DeviceType::Cpu,
                    features: AgentFeature::empty(),
                    queue_min_size: 0,
                    queue_max_size: 0,
                    queues_max: 0,
                    node: i as u32,
                },
                vec![fine, kernarg],
            );
        }

        for i in 0..config.gpu_agents {
            let coarse = topology.push_region(RegionInfo {
                segment: RegionSegment::Global,
                global_flags: RegionGlobalFlags::COARSE_GRAINED,
                size: config.region_size,
                alloc_max_size: config.region_size,
                runtime_alloc_allowed: true,
                alloc_granule: config.alloc_granule,
                alloc_alignment: config.alloc_granule,
            });
            let group = topology.push_region(RegionInfo {
                segment: RegionSegment::Group,
                global_flags: RegionGlobalFlags::empty(),
                size: GROUP_SEGMENT_SIZE,
                alloc_max_size: 0,
                runtime_alloc_allowed: false,
                alloc_granule: 0,
                alloc_alignment: 0,
            });
            topology.push_agent(
                AgentInfo {
                    name: format!("soft-gpu-{i}"),
                    vendor_name: VENDOR.to_string(),
                    device: DeviceType::Gpu,
                    features: AgentFeature::KERNEL_DISPATCH,
                    queue_min_size: config.queue_min_size,
                    queue_max_size: config.queue_max_size,
                    queues_max: config.queues_per_agent,
                    node: (config.cpu_agents + i) as u32,
                },
                vec![coarse, group],
            );
        }

        topology
    }

    fn push_region(&mut self, info: RegionInfo) -> MemoryRegion {
        let region = MemoryRegion::from_raw(REGION_HANDLE_BASE + self.regions.len() as u64);
        self.regions.push(RegionDesc { info });
        region
    }

    fn push_agent(&mut self, info: AgentInfo, regions: Vec<MemoryRegion>) {
        let agent = Agent::from_raw(AGENT_HANDLE_BASE + self.agents.len() as u64);
        self.agents.push(AgentDesc {
            agent,
            info,
            regions,
        });
    }

    pub fn agents(&self) -> impl Iterator<Item = Agent> + '_ {
        self.agents.iter().map(|desc| desc.agent)
    }

    pub fn agent(&self, agent: Agent) -> Result<&AgentDesc> {
        agent
            .handle
            .checked_sub(AGENT_HANDLE_BASE)
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| self.agents.get(i))
            .ok_or_else(|| HsaError::InvalidAgent(format!("unknown agent 0x{:x}", agent.handle)))
    }

    pub fn region_index(&self, region: MemoryRegion) -> Result<usize> {
        region
            .handle
            .checked_sub(REGION_HANDLE_BASE)
            .and_then(|i| usize::try_from(i).ok())
            .filter(|i| *i < self.regions.len())
            .ok_or_else(|| {
                HsaError::InvalidRegion(format!("unknown region 0x{:x}", region.handle))
            })
    }

    pub fn region(&self, region: MemoryRegion) -> Result<&RegionDesc> {
        let index = self.region_index(region)?;
        Ok(&self.regions[index])
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topology_has_host_and_kernel_agents() {
        let topology = Topology::build(&SoftConfig::default());
        let agents: Vec<_> = topology.agents().collect();
        assert_eq!(agents.len(), 2);

        let cpu = topology.agent(agents[0]).unwrap();
        assert_eq!(cpu.info.device, DeviceType::Cpu);
        assert!(!cpu.info.supports_kernel_dispatch());

        let gpu = topology.agent(agents[1]).unwrap();
        assert_eq!(gpu.info.device, DeviceType::Gpu);
        assert!(gpu.info.supports_kernel_dispatch());
        assert_eq!(gpu.regions.len(), 2);
    }

    #[test]
    fn unknown_handles_are_rejected() {
        let topology = Topology::build(&SoftConfig::default());
        assert!(topology.agent(Agent::from_raw(0)).is_err());
        let stale = Agent::from_raw(AGENT_HANDLE_BASE + 99);
        assert!(topology.agent(stale).is_err());
        assert!(topology.region(MemoryRegion::from_raw(1)).is_err());
        assert_eq!(topology.region_count(), 4);
    }

    #[test]
    fn wide_handle_offsets_do_not_alias_real_entries() {
        let topology = Topology::build(&SoftConfig::default());
        let wide = 1u64 << 32;
        let agent = Agent::from_raw(AGENT_HANDLE_BASE + wide);
        assert!(topology.agent(agent).is_err());
        assert!(topology.agent(Agent::from_raw(u64::MAX)).is_err());
        let region = MemoryRegion::from_raw(REGION_HANDLE_BASE + wide);
        assert!(topology.region(region).is_err());
        assert!(topology.region(MemoryRegion::from_raw(u64::MAX)).is_err());
    }
}
