use crate::error::{HsaError, Result};
use crate::types::{Agent, SignalHandle};
use crate::wait::SignalCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub(crate) struct SoftSignal {
    pub cell: SignalCell,
    pub consumers: Vec<Agent>,
    /// Doorbells belong to their queue and cannot be destroyed directly.
    pub doorbell: bool,
}

/// Live signals by handle. Handles increase monotonically and are never
/// reused, so a stale handle always resolves to `InvalidSignal`.
pub(crate) struct SignalTable {
    next: AtomicU64,
    max_signals: usize,
    signals: RwLock<HashMap<u64, Arc<SoftSignal>>>,
}

impl SignalTable {
    pub fn new(max_signals: usize) -> Self {
        Self {
            next: AtomicU64::new(1),
            max_signals,
            signals: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(
        &self,
        initial_value: i64,
        consumers: &[Agent],
        doorbell: bool,
    ) -> Result<SignalHandle> {
        let mut signals = self.signals.write();
        if signals.len() >= self.max_signals {
            return Err(HsaError::OutOfResources(format!(
                "signal limit of {} reached",
                self.max_signals
            )));
        }

        let handle = self.next.fetch_add(1, Ordering::Relaxed);
        signals.insert(
            handle,
            Arc::new(SoftSignal {
                cell: SignalCell::new(initial_value),
                consumers: consumers.to_vec(),
                doorbell,
            }),
        );
        debug!(
            initial_value,
            consumers = consumers.len(),
            "created signal 0x{handle:x}"
        );
        Ok(SignalHandle::from_raw(handle))
    }

    pub fn get(&self, signal: SignalHandle) -> Result<Arc<SoftSignal>> {
        if signal.handle == 0 {
            return Err(HsaError::InvalidArgument("null signal handle".to_string()));
        }
        self.signals
            .read()
            .get(&signal.handle)
            .cloned()
            .ok_or_else(|| HsaError::InvalidSignal(format!("signal 0x{:x}", signal.handle)))
    }

    pub fn destroy(&self, signal: SignalHandle) -> Result<()> {
        if self.get(signal)?.doorbell {
            return Err(HsaError::InvalidArgument(format!(
                "signal 0x{:x} is a queue doorbell",
                signal.handle
            )));
        }
        self.remove(signal)
    }

    /// Removes any signal, doorbells included.
    pub fn remove(&self, signal: SignalHandle) -> Result<()> {
        match self.signals.write().remove(&signal.handle) {
            Some(removed) => {
                debug!(
                    consumers = removed.consumers.len(),
                    "destroyed signal 0x{:x}",
                    signal.handle
                );
                Ok(())
            }
            None => Err(HsaError::InvalidSignal(format!("signal 0x{:x}", signal.handle))),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.signals.read().len()
    }

    pub fn clear(&self) {
        self.signals.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;

    #[test]
    fn handles_are_never_reused() {
        let table = SignalTable::new(8);
        let first = table.create(0, &[], false).unwrap();
        table.destroy(first).unwrap();
        let second = table.create(0, &[], false).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            table.get(first).err().map(|e| e.status()),
            Some(Status::InvalidSignal)
        );
    }

    #[test]
    fn limit_reports_out_of_resources() {
        let table = SignalTable::new(2);
        table.create(0, &[], false).unwrap();
        table.create(0, &[], false).unwrap();
        let err = table.create(0, &[], false).unwrap_err();
        assert_eq!(err.status(), Status::OutOfResources);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn doorbells_survive_destroy() {
        let table = SignalTable::new(2);
        let bell = table.create(0, &[], true).unwrap();
        assert_eq!(
            table.destroy(bell).unwrap_err().status(),
            Status::InvalidArgument
        );
        table.remove(bell).unwrap();
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn null_handle_is_an_invalid_argument() {
        let table = SignalTable::new(1);
        let err = table.destroy(SignalHandle::from_raw(0)).unwrap_err();
        assert_eq!(err.status(), Status::InvalidArgument);
    }
}
