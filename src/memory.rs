use crate::runtime::{Runtime, SharedRuntime};
use crate::types::{MemoryRegion, RegionGlobalFlags, RegionInfo, RegionSegment};
use crate::{HsaError, Result};
use std::os::raw::c_void;
use std::sync::Arc;
use tracing::{debug, error};

impl MemoryRegion {
    pub fn info(&self, rt: &dyn Runtime) -> Result<RegionInfo> {
        rt.region_info(*self)
    }

    pub fn segment(&self, rt: &dyn Runtime) -> Result<RegionSegment> {
        Ok(rt.region_info(*self)?.segment)
    }

    pub fn global_flags(&self, rt: &dyn Runtime) -> Result<RegionGlobalFlags> {
        Ok(rt.region_info(*self)?.global_flags)
    }

    pub fn size(&self, rt: &dyn Runtime) -> Result<usize> {
        Ok(rt.region_info(*self)?.size)
    }

    pub fn max_alloc_size(&self, rt: &dyn Runtime) -> Result<usize> {
        Ok(rt.region_info(*self)?.alloc_max_size)
    }

    pub fn runtime_alloc_allowed(&self, rt: &dyn Runtime) -> Result<bool> {
        Ok(rt.region_info(*self)?.runtime_alloc_allowed)
    }

    /// Allocates `size` bytes, checking the region's permissions first so
    /// the error names the region property that refused it.
    pub fn allocate(&self, rt: &SharedRuntime, size: usize) -> Result<Memory> {
        debug!("allocating {size} bytes from region 0x{:x}", self.handle);

        let info = rt.region_info(*self)?;
        if !info.runtime_alloc_allowed {
            return Err(HsaError::InvalidAllocation(
                "runtime allocation not allowed for this memory region".to_string(),
            ));
        }
        if size > info.alloc_max_size {
            return Err(HsaError::InvalidAllocation(format!(
                "requested size {size} exceeds maximum allocation size {} for this region",
                info.alloc_max_size
            )));
        }

        let ptr = rt.memory_allocate(*self, size).inspect_err(|e| {
            error!("memory allocation failed: {e}");
        })?;
        debug!("allocated {size} bytes at {ptr:p}");

        Ok(Memory {
            runtime: Arc::clone(rt),
            ptr,
            size,
        })
    }
}

/// Runtime allocation freed on drop.
pub struct Memory {
    runtime: SharedRuntime,
    ptr: *mut c_void,
    size: usize,
}

impl Memory {
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }

    /// # Safety
    ///
    /// The allocation must be host-accessible (fine-grained or kernarg), and
    /// no agent may write to it while the slice is alive.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr as *const u8, self.size) }
    }

    /// # Safety
    ///
    /// As for [`Memory::as_slice`], and no agent may access it at all while
    /// the slice is alive.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr as *mut u8, self.size) }
    }

    /// Copies the first `size` bytes of this allocation into `dst`.
    pub fn copy_to(&self, dst: &Memory, size: usize) -> Result<()> {
        if size > self.size || size > dst.size {
            return Err(HsaError::InvalidArgument(format!(
                "copy of {size} bytes between allocations of {} and {} bytes",
                self.size, dst.size
            )));
        }
        self.runtime.memory_copy(dst.ptr, self.ptr, size)
    }

    /// Frees now and reports the runtime's answer instead of logging it.
    pub fn free(mut self) -> Result<()> {
        let ptr = std::mem::replace(&mut self.ptr, std::ptr::null_mut());
        self.runtime.memory_free(ptr)
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            debug!("freeing memory at {:p} ({} bytes)", self.ptr, self.size);
            if let Err(e) = self.runtime.memory_free(self.ptr) {
                error!("failed to free memory: {e}");
            }
        }
    }
}

unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;
    use crate::soft::{SoftConfig, SoftRuntime};
    use crate::types::Agent;

    #[test]
    fn allocation_round_trip_through_copy() {
        let rt = SoftRuntime::shared(SoftConfig::default());
        rt.init().unwrap();
        let cpu = Agent::find_cpu(&*rt).unwrap();
        let region = cpu.regions(&*rt).unwrap()[0];
        assert!(region.runtime_alloc_allowed(&*rt).unwrap());

        let mut src = region.allocate(&rt, 32).unwrap();
        let dst = region.allocate(&rt, 32).unwrap();
        // SAFETY: soft regions are host memory and no agent touches them.
        unsafe { src.as_mut_slice().fill(0xAB) };
        src.copy_to(&dst, 32).unwrap();
        // SAFETY: as above.
        assert!(unsafe { dst.as_slice() }.iter().all(|b| *b == 0xAB));

        assert!(src.copy_to(&dst, 33).is_err());
        dst.free().unwrap();
    }

    #[test]
    fn group_segment_refuses_allocation() {
        let rt = SoftRuntime::shared(SoftConfig::default());
        rt.init().unwrap();
        let gpu = Agent::find_gpu(&*rt).unwrap();
        let group = gpu
            .regions(&*rt)
            .unwrap()
            .into_iter()
            .find(|r| r.segment(&*rt).unwrap() == RegionSegment::Group)
            .unwrap();
        let err = group.allocate(&rt, 16).err().unwrap();
        assert_eq!(err.status(), Status::InvalidAllocation);
    }
}
