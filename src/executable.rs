use crate::runtime::SharedRuntime;
use crate::types::{Agent, ExecutableHandle, ExecutableState, Profile, SymbolInfo};
use crate::{HsaError, Memory, Result};
use std::sync::Arc;
use tracing::{debug, error};

/// Runtime executable destroyed on drop.
///
/// Code objects are not loaded; the executable carries program-allocation
/// global variables only.
pub struct Executable {
    runtime: SharedRuntime,
    handle: ExecutableHandle,
}

impl Executable {
    pub fn create(rt: &SharedRuntime, profile: Profile) -> Result<Self> {
        let handle = rt.executable_create(profile)?;
        if handle.handle == 0 {
            return Err(HsaError::InvalidExecutable(
                "executable creation returned invalid handle (0)".to_string(),
            ));
        }
        debug!("created executable 0x{:x}", handle.handle);
        Ok(Self {
            runtime: Arc::clone(rt),
            handle,
        })
    }

    pub fn handle(&self) -> ExecutableHandle {
        self.handle
    }

    /// Binds `name` to storage the program allocated.
    pub fn define_global_variable(&self, name: &str, storage: &Memory) -> Result<()> {
        self.runtime
            .executable_define_global_variable(self.handle, name, storage.as_ptr())
    }

    pub fn freeze(&self) -> Result<()> {
        self.runtime.executable_freeze(self.handle)
    }

    pub fn state(&self) -> Result<ExecutableState> {
        self.runtime.executable_state(self.handle)
    }

    pub fn symbol(&self, name: &str, agent: Option<Agent>) -> Result<SymbolInfo> {
        self.runtime.executable_symbol(self.handle, name, agent)
    }

    pub fn destroy(mut self) -> Result<()> {
        let handle = std::mem::replace(&mut self.handle, ExecutableHandle::from_raw(0));
        self.runtime.executable_destroy(handle)
    }
}

impl Drop for Executable {
    fn drop(&mut self) {
        if self.handle.handle != 0 {
            if let Err(e) = self.runtime.executable_destroy(self.handle) {
                error!("failed to destroy executable: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;
    use crate::soft::{SoftConfig, SoftRuntime};
    use crate::types::SymbolKind;

    #[test]
    fn frozen_executable_exposes_variables() {
        let rt = SoftRuntime::shared(SoftConfig::default());
        rt.init().unwrap();
        let cpu = Agent::find_cpu(&*rt).unwrap();
        let storage = cpu.regions(&*rt).unwrap()[0].allocate(&rt, 8).unwrap();

        let exe = Executable::create(&rt, Profile::Full).unwrap();
        exe.define_global_variable("counter", &storage).unwrap();
        exe.freeze().unwrap();
        assert_eq!(exe.state().unwrap(), ExecutableState::Frozen);

        let symbol = exe.symbol("counter", None).unwrap();
        assert_eq!(symbol.kind, SymbolKind::Variable);
        assert_eq!(symbol.address, storage.as_ptr() as u64);
        assert_eq!(exe.freeze().unwrap_err().status(), Status::FrozenExecutable);
        exe.destroy().unwrap();
    }
}
