use crate::error::{HsaError, Result};
use crate::types::{ExecutableHandle, ExecutableState, Profile, SymbolInfo, SymbolKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

struct SoftExecutable {
    profile: Profile,
    state: ExecutableState,
    /// Program-allocation global variables by name.
    variables: HashMap<String, u64>,
}

#[derive(Default)]
struct Registry {
    next: u64,
    executables: HashMap<u64, SoftExecutable>,
}

pub(crate) struct ExecutableTable {
    inner: Mutex<Registry>,
}

impl ExecutableTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Registry {
                next: 1,
                ..Default::default()
            }),
        }
    }

    pub fn create(&self, profile: Profile) -> ExecutableHandle {
        let mut inner = self.inner.lock();
        let handle = inner.next;
        inner.next += 1;
        inner.executables.insert(
            handle,
            SoftExecutable {
                profile,
                state: ExecutableState::Unfrozen,
                variables: HashMap::new(),
            },
        );
        debug!("created {profile:?} executable {handle}");
        ExecutableHandle::from_raw(handle)
    }

    pub fn destroy(&self, executable: ExecutableHandle) -> Result<()> {
        self.inner
            .lock()
            .executables
            .remove(&executable.handle)
            .map(|removed| {
                debug!(
                    variables = removed.variables.len(),
                    "destroyed {:?} executable {}",
                    removed.profile,
                    executable.handle
                );
            })
            .ok_or_else(|| unknown(executable))
    }

    pub fn define_global_variable(
        &self,
        executable: ExecutableHandle,
        name: &str,
        address: u64,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(HsaError::InvalidArgument("global variable name is empty".to_string()));
        }
        let mut inner = self.inner.lock();
        let exe = inner
            .executables
            .get_mut(&executable.handle)
            .ok_or_else(|| unknown(executable))?;
        if exe.state == ExecutableState::Frozen {
            return Err(HsaError::FrozenExecutable(format!(
                "cannot define `{name}` in executable {}",
                executable.handle
            )));
        }
        if exe.variables.contains_key(name) {
            return Err(HsaError::VariableAlreadyDefined(name.to_string()));
        }
        exe.variables.insert(name.to_string(), address);
        Ok(())
    }

    pub fn freeze(&self, executable: ExecutableHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        let exe = inner
            .executables
            .get_mut(&executable.handle)
            .ok_or_else(|| unknown(executable))?;
        if exe.state == ExecutableState::Frozen {
            return Err(HsaError::FrozenExecutable(format!(
                "executable {} is already frozen",
                executable.handle
            )));
        }
        exe.state = ExecutableState::Frozen;
        Ok(())
    }

    pub fn state(&self, executable: ExecutableHandle) -> Result<ExecutableState> {
        self.inner
            .lock()
            .executables
            .get(&executable.handle)
            .map(|exe| exe.state)
            .ok_or_else(|| unknown(executable))
    }

    pub fn symbol(&self, executable: ExecutableHandle, name: &str) -> Result<SymbolInfo> {
        let inner = self.inner.lock();
        let exe = inner
            .executables
            .get(&executable.handle)
            .ok_or_else(|| unknown(executable))?;
        let address = exe
            .variables
            .get(name)
            .copied()
            .ok_or_else(|| HsaError::InvalidSymbolName(name.to_string()))?;
        Ok(SymbolInfo {
            kind: SymbolKind::Variable,
            name: name.to_string(),
            address,
            agent: None,
        })
    }

    pub fn clear(&self) {
        self.inner.lock().executables.clear();
    }
}

fn unknown(executable: ExecutableHandle) -> HsaError {
    HsaError::InvalidExecutable(format!("executable 0x{:x}", executable.handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;

    #[test]
    fn variables_are_rejected_once_frozen() {
        let table = ExecutableTable::new();
        let exe = table.create(Profile::Full);
        table.define_global_variable(exe, "counter", 0x40).unwrap();
        table.freeze(exe).unwrap();

        let err = table.define_global_variable(exe, "late", 0x80).unwrap_err();
        assert_eq!(err.status(), Status::FrozenExecutable);
        assert_eq!(
            table.freeze(exe).unwrap_err().status(),
            Status::FrozenExecutable
        );
        assert_eq!(table.symbol(exe, "counter").unwrap().address, 0x40);
    }

    #[test]
    fn duplicate_and_missing_names() {
        let table = ExecutableTable::new();
        let exe = table.create(Profile::Base);
        table.define_global_variable(exe, "x", 1).unwrap();
        assert_eq!(
            table.define_global_variable(exe, "x", 2).unwrap_err().status(),
            Status::VariableAlreadyDefined
        );
        assert_eq!(
            table.symbol(exe, "y").unwrap_err().status(),
            Status::InvalidSymbolName
        );
    }

    #[test]
    fn destroyed_executables_are_invalid() {
        let table = ExecutableTable::new();
        let exe = table.create(Profile::Base);
        table.destroy(exe).unwrap();
        assert_eq!(
            table.destroy(exe).unwrap_err().status(),
            Status::InvalidExecutable
        );
        assert_eq!(
            table.state(exe).unwrap_err().status(),
            Status::InvalidExecutable
        );
    }
}
