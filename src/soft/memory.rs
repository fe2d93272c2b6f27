use crate::error::{HsaError, Result};
use parking_lot::RwLock;
use std::alloc::{self, Layout};
use std::collections::BTreeMap;
use std::os::raw::c_void;
use std::ptr;
use tracing::debug;

struct Allocation {
    layout: Layout,
    region: usize,
}

#[derive(Default)]
struct MemoryState {
    allocations: BTreeMap<usize, Allocation>,
    /// Registered host ranges `(address, size)` with their registration count.
    registrations: BTreeMap<(usize, usize), usize>,
    used: Vec<usize>,
}

impl MemoryState {
    fn in_allocation(&self, address: usize, size: usize) -> bool {
        self.allocations
            .range(..=address)
            .next_back()
            .is_some_and(|(start, allocation)| {
                address
                    .checked_add(size)
                    .is_some_and(|end| end <= start + allocation.layout.size())
            })
    }

    fn in_registration(&self, address: usize, size: usize) -> bool {
        let Some(end) = address.checked_add(size) else {
            return false;
        };
        self.registrations
            .range(..=(address, usize::MAX))
            .any(|((start, len), _)| *start <= address && end <= start + len)
    }

    fn accessible(&self, address: usize, size: usize) -> bool {
        self.in_allocation(address, size) || self.in_registration(address, size)
    }
}

/// Host-backed allocations and registrations of the reference runtime.
pub(crate) struct MemoryTable {
    state: RwLock<MemoryState>,
}

impl MemoryTable {
    pub fn new(regions: usize) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                used: vec![0; regions],
                ..Default::default()
            }),
        }
    }

    /// Allocates `size` bytes rounded up to `granule`, charged to `region`.
    pub fn allocate(
        &self,
        region: usize,
        region_size: usize,
        size: usize,
        granule: usize,
        alignment: usize,
    ) -> Result<*mut c_void> {
        let rounded = size
            .checked_next_multiple_of(granule.max(1))
            .ok_or_else(|| HsaError::InvalidAllocation(format!("size {size} overflows")))?;
        let layout = Layout::from_size_align(rounded, alignment.max(1))
            .map_err(|e| HsaError::InvalidAllocation(format!("size {size}: {e}")))?;

        let mut state = self.state.write();
        let used = state.used[region];
        if used.saturating_add(rounded) > region_size {
            return Err(HsaError::OutOfResources(format!(
                "region {region} has {} of {region_size} bytes free, {rounded} requested",
                region_size - used
            )));
        }

        // SAFETY: `layout` has a non-zero size, the caller rejects `size == 0`.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        if raw.is_null() {
            return Err(HsaError::OutOfResources(format!(
                "host allocator refused {rounded} bytes"
            )));
        }

        state.used[region] += rounded;
        state.allocations.insert(raw as usize, Allocation { layout, region });
        debug!("allocated {rounded} bytes at {raw:p} from region {region}");
        Ok(raw.cast())
    }

    pub fn free(&self, ptr: *mut c_void) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }
        let mut state = self.state.write();
        let allocation = state.allocations.remove(&(ptr as usize)).ok_or_else(|| {
            HsaError::InvalidArgument(format!("{ptr:p} is not the start of a live allocation"))
        })?;
        state.used[allocation.region] -= allocation.layout.size();

        // SAFETY: the pointer came from `alloc_zeroed` with this layout and
        // was just removed from the table, so it is freed exactly once.
        unsafe { alloc::dealloc(ptr.cast(), allocation.layout) };
        debug!("freed {} bytes at {ptr:p}", allocation.layout.size());
        Ok(())
    }

    pub fn register(&self, ptr: *mut c_void, size: usize) -> Result<()> {
        if ptr.is_null() || size == 0 {
            return Err(HsaError::InvalidArgument(format!(
                "cannot register {size} bytes at {ptr:p}"
            )));
        }
        if (ptr as usize).checked_add(size).is_none() {
            return Err(HsaError::InvalidArgument(format!(
                "range of {size} bytes at {ptr:p} wraps the address space"
            )));
        }
        *self
            .state
            .write()
            .registrations
            .entry((ptr as usize, size))
            .or_insert(0) += 1;
        debug!("registered {size} bytes at {ptr:p}");
        Ok(())
    }

    pub fn deregister(&self, ptr: *mut c_void, size: usize) -> Result<()> {
        let key = (ptr as usize, size);
        let mut state = self.state.write();
        let Some(count) = state.registrations.get_mut(&key) else {
            return Err(HsaError::InvalidArgument(format!(
                "{size} bytes at {ptr:p} were never registered"
            )));
        };
        *count -= 1;
        if *count == 0 {
            state.registrations.remove(&key);
        }
        debug!("deregistered {size} bytes at {ptr:p}");
        Ok(())
    }

    pub fn copy(&self, dst: *mut c_void, src: *const c_void, size: usize) -> Result<()> {
        if dst.is_null() || src.is_null() {
            return Err(HsaError::InvalidArgument(format!(
                "copy from {src:p} to {dst:p}"
            )));
        }
        if size == 0 {
            return Ok(());
        }

        // Held for the whole copy so neither range can be freed meanwhile.
        let state = self.state.read();
        for (what, address) in [("destination", dst as usize), ("source", src as usize)] {
            if !state.accessible(address, size) {
                return Err(HsaError::InvalidArgument(format!(
                    "{what} range 0x{address:x}+{size} is neither allocated nor registered"
                )));
            }
        }

        // SAFETY: both ranges lie inside live allocations or registered
        // host memory that the registrant keeps valid. `ptr::copy` allows
        // overlap.
        unsafe { ptr::copy(src.cast::<u8>(), dst.cast::<u8>(), size) };
        Ok(())
    }

    #[cfg(test)]
    pub fn used(&self, region: usize) -> usize {
        self.state.read().used[region]
    }

    /// Frees every allocation and forgets every registration.
    pub fn release_all(&self) {
        let mut state = self.state.write();
        let allocations = std::mem::take(&mut state.allocations);
        for (address, allocation) in allocations {
            // SAFETY: as in `free`; the table no longer references it.
            unsafe { alloc::dealloc(address as *mut u8, allocation.layout) };
        }
        state.registrations.clear();
        state.used.iter_mut().for_each(|used| *used = 0);
    }
}

impl Drop for MemoryTable {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;

    const MIB: usize = 1024 * 1024;

    #[test]
    fn allocations_round_to_granule_and_are_accounted() {
        let table = MemoryTable::new(1);
        let ptr = table.allocate(0, MIB, 10, 4096, 4096).unwrap();
        assert_eq!(ptr as usize % 4096, 0);
        assert_eq!(table.used(0), 4096);
        table.free(ptr).unwrap();
        assert_eq!(table.used(0), 0);
    }

    #[test]
    fn region_exhaustion_is_out_of_resources() {
        let table = MemoryTable::new(1);
        let ptr = table.allocate(0, 8192, 8192, 4096, 4096).unwrap();
        let err = table.allocate(0, 8192, 1, 4096, 4096).unwrap_err();
        assert_eq!(err.status(), Status::OutOfResources);
        table.free(ptr).unwrap();
    }

    #[test]
    fn double_free_is_rejected() {
        let table = MemoryTable::new(1);
        let ptr = table.allocate(0, MIB, 64, 64, 64).unwrap();
        table.free(ptr).unwrap();
        assert_eq!(
            table.free(ptr).unwrap_err().status(),
            Status::InvalidArgument
        );
        assert!(table.free(ptr::null_mut()).is_ok());
    }

    #[test]
    fn copy_requires_known_ranges() {
        let table = MemoryTable::new(1);
        let dst = table.allocate(0, MIB, 16, 16, 16).unwrap();
        let mut host = [7u8; 16];
        let src = host.as_mut_ptr().cast::<c_void>();

        assert!(table.copy(dst, src, 16).is_err());
        table.register(src, 16).unwrap();
        table.copy(dst, src, 16).unwrap();

        // SAFETY: `dst` is a live 16-byte allocation.
        let copied = unsafe { std::slice::from_raw_parts(dst.cast::<u8>(), 16) };
        assert_eq!(copied, &host);
        assert!(table.copy(dst, src, 17).is_err());

        table.deregister(src, 16).unwrap();
        assert!(table.deregister(src, 16).is_err());
        table.free(dst).unwrap();
    }

    #[test]
    fn registrations_nest() {
        let table = MemoryTable::new(0);
        let mut host = vec![0u8; 32];
        let ptr = host.as_mut_ptr().cast::<c_void>();
        table.register(ptr, 32).unwrap();
        table.register(ptr, 32).unwrap();
        table.deregister(ptr, 32).unwrap();
        table.deregister(ptr, 32).unwrap();
        assert!(table.deregister(ptr, 32).is_err());
        assert!(table.register(ptr, 0).is_err());
    }
}
