use crate::runtime::SharedRuntime;
use crate::types::{Agent, SignalHandle};
use crate::wait::{Condition, LoadOrder, MemoryOrder, SignalOp, StoreOrder, WaitState};
use crate::{HsaError, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Runtime signal destroyed on drop.
///
/// Plain methods use the orderings the HSA convenience calls default to:
/// acquire loads and waits, relaxed stores and read-modify-writes.
pub struct Signal {
    runtime: SharedRuntime,
    handle: SignalHandle,
}

impl Signal {
    pub fn create(rt: &SharedRuntime, initial_value: i64) -> Result<Self> {
        Self::create_with_consumers(rt, initial_value, &[])
    }

    pub fn create_with_consumers(
        rt: &SharedRuntime,
        initial_value: i64,
        consumers: &[Agent],
    ) -> Result<Self> {
        debug!("creating signal with initial value {initial_value}");

        let handle = rt
            .signal_create(initial_value, consumers)
            .inspect_err(|e| error!("signal creation failed: {e}"))?;
        if handle.handle == 0 {
            return Err(HsaError::InvalidSignal(
                "signal creation returned invalid handle (0)".to_string(),
            ));
        }

        debug!("signal created with handle 0x{:x}", handle.handle);
        Ok(Self {
            runtime: Arc::clone(rt),
            handle,
        })
    }

    pub fn handle(&self) -> SignalHandle {
        self.handle
    }

    pub fn load(&self) -> Result<i64> {
        self.load_ordered(LoadOrder::Acquire)
    }

    pub fn load_relaxed(&self) -> Result<i64> {
        self.load_ordered(LoadOrder::Relaxed)
    }

    pub fn load_ordered(&self, order: LoadOrder) -> Result<i64> {
        self.runtime.signal_load(self.handle, order)
    }

    pub fn store(&self, value: i64) -> Result<()> {
        self.store_ordered(value, StoreOrder::Relaxed)
    }

    pub fn store_release(&self, value: i64) -> Result<()> {
        self.store_ordered(value, StoreOrder::Release)
    }

    pub fn store_ordered(&self, value: i64, order: StoreOrder) -> Result<()> {
        debug!("signal 0x{:x} storing {value}", self.handle.handle);
        self.runtime.signal_store(self.handle, value, order)
    }

    /// Applies `op` and returns the previous value.
    pub fn rmw(&self, op: SignalOp, value: i64, order: MemoryOrder) -> Result<i64> {
        self.runtime.signal_rmw(self.handle, op, value, order)
    }

    pub fn add(&self, value: i64) -> Result<()> {
        self.rmw(SignalOp::Add, value, MemoryOrder::Relaxed)
            .map(drop)
    }

    pub fn subtract(&self, value: i64) -> Result<()> {
        self.rmw(SignalOp::Subtract, value, MemoryOrder::Relaxed)
            .map(drop)
    }

    pub fn and(&self, value: i64) -> Result<()> {
        self.rmw(SignalOp::And, value, MemoryOrder::Relaxed)
            .map(drop)
    }

    pub fn or(&self, value: i64) -> Result<()> {
        self.rmw(SignalOp::Or, value, MemoryOrder::Relaxed)
            .map(drop)
    }

    pub fn xor(&self, value: i64) -> Result<()> {
        self.rmw(SignalOp::Xor, value, MemoryOrder::Relaxed)
            .map(drop)
    }

    pub fn exchange(&self, value: i64) -> Result<i64> {
        self.rmw(SignalOp::Exchange, value, MemoryOrder::Relaxed)
    }

    pub fn exchange_release(&self, value: i64) -> Result<i64> {
        self.rmw(SignalOp::Exchange, value, MemoryOrder::Release)
    }

    /// Returns the value observed; the swap happened iff it equals
    /// `expected`.
    pub fn compare_and_swap(&self, expected: i64, value: i64) -> Result<i64> {
        self.compare_and_swap_ordered(expected, value, MemoryOrder::Relaxed)
    }

    pub fn compare_and_swap_ordered(
        &self,
        expected: i64,
        value: i64,
        order: MemoryOrder,
    ) -> Result<i64> {
        let observed = self
            .runtime
            .signal_cas(self.handle, expected, value, order)?;
        debug!(
            "signal 0x{:x} CAS: observed {observed}, succeeded: {}",
            self.handle.handle,
            observed == expected
        );
        Ok(observed)
    }

    /// Waits until `condition(value, compare)` holds or `timeout_hint`
    /// ticks elapse, and returns the value observed last.
    pub fn wait(
        &self,
        condition: Condition,
        compare: i64,
        timeout_hint: u64,
        state: WaitState,
        order: LoadOrder,
    ) -> Result<i64> {
        debug!(
            "signal 0x{:x} waiting for {condition:?} {compare} ({state:?}, timeout {timeout_hint})",
            self.handle.handle
        );
        let value = self
            .runtime
            .signal_wait(self.handle, condition, compare, timeout_hint, state, order)?;
        debug!(
            "signal 0x{:x} wait completed with {value}",
            self.handle.handle
        );
        Ok(value)
    }

    pub fn wait_eq(&self, value: i64, timeout_hint: u64) -> Result<i64> {
        self.wait(
            Condition::Eq,
            value,
            timeout_hint,
            WaitState::Blocked,
            LoadOrder::Acquire,
        )
    }

    pub fn wait_ne(&self, value: i64, timeout_hint: u64) -> Result<i64> {
        self.wait(
            Condition::Ne,
            value,
            timeout_hint,
            WaitState::Blocked,
            LoadOrder::Acquire,
        )
    }

    pub fn wait_lt(&self, value: i64, timeout_hint: u64) -> Result<i64> {
        self.wait(
            Condition::Lt,
            value,
            timeout_hint,
            WaitState::Blocked,
            LoadOrder::Acquire,
        )
    }

    pub fn wait_gte(&self, value: i64, timeout_hint: u64) -> Result<i64> {
        self.wait(
            Condition::Gte,
            value,
            timeout_hint,
            WaitState::Blocked,
            LoadOrder::Acquire,
        )
    }

    pub fn print_info(&self) {
        match self.load() {
            Ok(value) => info!(handle = self.handle.handle, value, "signal"),
            Err(e) => info!(handle = self.handle.handle, "signal unreadable: {e}"),
        }
    }

    /// Destroys now and returns the runtime's status.
    pub fn destroy(mut self) -> Result<()> {
        let handle = std::mem::replace(&mut self.handle, SignalHandle::from_raw(0));
        self.runtime.signal_destroy(handle)
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        if self.handle.handle != 0 {
            debug!("destroying signal 0x{:x}", self.handle.handle);
            if let Err(e) = self.runtime.signal_destroy(self.handle) {
                error!("failed to destroy signal: {e}");
            }
        }
    }
}
