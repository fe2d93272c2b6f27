use crate::runtime::Runtime;
use crate::types::{Agent, AgentInfo, DeviceType, MemoryRegion};
use crate::{HsaError, Result, Status};
use tracing::debug;

/// Every agent in enumeration order.
pub fn agents(rt: &dyn Runtime) -> Result<Vec<Agent>> {
    let mut found = Vec::new();
    rt.iterate_agents(&mut |agent| {
        found.push(agent);
        Status::Success
    })?;
    Ok(found)
}

impl Agent {
    /// First agent, in enumeration order, whose info satisfies `pred`.
    ///
    /// The walk stops with `InfoBreak` as soon as a match is found. A failing
    /// info query inside the callback ends the walk with that status.
    pub fn find<P>(rt: &dyn Runtime, what: &'static str, mut pred: P) -> Result<Self>
    where
        P: FnMut(&AgentInfo) -> bool,
    {
        let mut found = None;
        rt.iterate_agents(&mut |agent| match rt.agent_info(agent) {
            Ok(info) if pred(&info) => {
                found = Some(agent);
                Status::InfoBreak
            }
            Ok(_) => Status::Success,
            Err(e) => e.status(),
        })?;

        let agent = found.ok_or(HsaError::AgentNotFound(what))?;
        debug!("found {what}: agent 0x{:x}", agent.handle);
        Ok(agent)
    }

    pub fn find_gpu(rt: &dyn Runtime) -> Result<Self> {
        Self::find(rt, "a GPU agent", |info| info.device == DeviceType::Gpu)
    }

    pub fn find_cpu(rt: &dyn Runtime) -> Result<Self> {
        Self::find(rt, "a CPU agent", |info| info.device == DeviceType::Cpu)
    }

    pub fn find_kernel_agent(rt: &dyn Runtime) -> Result<Self> {
        Self::find(rt, "a kernel agent", AgentInfo::supports_kernel_dispatch)
    }

    pub fn info(&self, rt: &dyn Runtime) -> Result<AgentInfo> {
        rt.agent_info(*self)
    }

    pub fn device_type(&self, rt: &dyn Runtime) -> Result<DeviceType> {
        Ok(rt.agent_info(*self)?.device)
    }

    pub fn regions(&self, rt: &dyn Runtime) -> Result<Vec<MemoryRegion>> {
        let mut regions = Vec::new();
        rt.agent_iterate_regions(*self, &mut |region| {
            regions.push(region);
            Status::Success
        })?;
        Ok(regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::{SoftConfig, SoftRuntime};

    #[test]
    fn finds_agents_by_kind() {
        let rt = SoftRuntime::new(SoftConfig::default().with_cpu_agents(2));
        rt.init().unwrap();

        let all = agents(&rt).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(Agent::find_cpu(&rt).unwrap(), all[0]);
        assert_eq!(Agent::find_gpu(&rt).unwrap(), all[2]);
        assert_eq!(Agent::find_kernel_agent(&rt).unwrap(), all[2]);
        assert_eq!(all[2].regions(&rt).unwrap().len(), 2);
    }

    #[test]
    fn missing_kind_is_agent_not_found() {
        let rt = SoftRuntime::new(SoftConfig::default().with_gpu_agents(0));
        rt.init().unwrap();
        assert!(matches!(
            Agent::find_kernel_agent(&rt),
            Err(HsaError::AgentNotFound(_))
        ));
    }
}
