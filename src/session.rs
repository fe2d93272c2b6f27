//! Initialize/shutdown handshake of one test case.

use crate::Result;
use crate::runtime::SharedRuntime;
use tracing::warn;

/// Holds one reference on the runtime session; dropping it releases the
/// reference.
pub struct Session {
    runtime: SharedRuntime,
    open: bool,
}

impl Session {
    pub fn open(rt: &SharedRuntime) -> Result<Self> {
        rt.init()?;
        Ok(Self {
            runtime: SharedRuntime::clone(rt),
            open: true,
        })
    }

    pub fn runtime(&self) -> &SharedRuntime {
        &self.runtime
    }

    /// Performs the matching shutdown and returns its status.
    pub fn close(mut self) -> Result<()> {
        self.open = false;
        self.runtime.shut_down()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.runtime.shut_down() {
                warn!("{} runtime shutdown failed: {e}", self.runtime.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;
    use crate::assert_status;
    use crate::soft::{SoftConfig, SoftRuntime};

    #[test]
    fn drop_and_close_release_the_reference() {
        let rt = SoftRuntime::shared(SoftConfig::default());
        {
            let _session = Session::open(&rt).unwrap();
            assert!(rt.system_info().is_ok());
        }
        assert_status!(rt.system_info(), Status::NotInitialized);

        let outer = Session::open(&rt).unwrap();
        let inner = Session::open(&rt).unwrap();
        inner.close().unwrap();
        assert!(rt.system_info().is_ok());
        outer.close().unwrap();
        assert_status!(rt.shut_down(), Status::NotInitialized);
    }
}
