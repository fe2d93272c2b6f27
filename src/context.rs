use crate::runtime::SharedRuntime;
use crate::session::Session;
use crate::types::{RegionGlobalFlags, RegionSegment};
use crate::{Agent, HsaError, MemoryRegion, Queue, Result};

/// Common fixture: an open session, the first kernel agent, a host agent
/// and the regions a dispatch needs.
pub struct HsaContext {
    pub agent: Agent,
    pub host_agent: Option<Agent>,
    pub queue: Option<Queue>,
    pub kernarg_region: Option<MemoryRegion>,
    pub fine_grained_region: Option<MemoryRegion>,
    pub coarse_grained_region: Option<MemoryRegion>,
    session: Session,
}

impl HsaContext {
    pub fn new(rt: &SharedRuntime) -> Result<Self> {
        let session = Session::open(rt)?;
        let rt = session.runtime();

        let agent = Agent::find_kernel_agent(&**rt)?;
        let host_agent = Agent::find_cpu(&**rt).ok();

        let mut kernarg_region = None;
        let mut fine_grained_region = None;
        let mut coarse_grained_region = None;

        // Host regions first so the kernel agent's own coarse region wins.
        for owner in host_agent.iter().chain([&agent]) {
            for region in owner.regions(&**rt)? {
                let info = region.info(&**rt)?;
                match info.segment {
                    RegionSegment::KernArg => {
                        kernarg_region.get_or_insert(region);
                    }
                    RegionSegment::Global => {
                        let flags = info.global_flags;
                        if flags.contains(RegionGlobalFlags::KERNARG) {
                            kernarg_region.get_or_insert(region);
                        }
                        if flags.contains(RegionGlobalFlags::FINE_GRAINED) {
                            fine_grained_region.get_or_insert(region);
                        } else if flags.contains(RegionGlobalFlags::COARSE_GRAINED) {
                            coarse_grained_region = Some(region);
                        }
                    }
                    _ => {}
                }
            }
        }

        let coarse_grained_region =
            coarse_grained_region.ok_or(HsaError::MemoryRegionNotFound)?;
        let fine_grained_region = fine_grained_region.ok_or(HsaError::MemoryRegionNotFound)?;

        Ok(Self {
            agent,
            host_agent,
            queue: None,
            kernarg_region,
            fine_grained_region: Some(fine_grained_region),
            coarse_grained_region: Some(coarse_grained_region),
            session,
        })
    }

    /// Fixture with a multi-producer queue of `size` packets on the kernel
    /// agent.
    pub fn with_queue(rt: &SharedRuntime, size: u32) -> Result<Self> {
        let mut context = Self::new(rt)?;
        context.queue = Some(Queue::create(context.runtime(), context.agent, size)?);
        Ok(context)
    }

    pub fn runtime(&self) -> &SharedRuntime {
        self.session.runtime()
    }
}

impl Drop for HsaContext {
    fn drop(&mut self) {
        // The queue must go before the session releases the runtime.
        self.queue.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;
    use crate::assert_status;
    use crate::soft::{SoftConfig, SoftRuntime};

    #[test]
    fn fixture_finds_all_regions() {
        let rt = SoftRuntime::shared(SoftConfig::default());
        let context = HsaContext::with_queue(&rt, 64).unwrap();
        assert!(context.kernarg_region.is_some());
        assert!(context.host_agent.is_some());
        assert_eq!(context.queue.as_ref().unwrap().size(), 64);
        drop(context);
        assert_status!(rt.system_info(), Status::NotInitialized);
    }
}
