//! Test doubles for the GATT layer.
//!
//! Used by this crate's own tests and, behind the `test-util` feature, by
//! downstream crates that need to drive a stream without real hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use uuid::Uuid;

use crate::peripheral::{ConnectionState, Peripheral, PeripheralError, Result};

/// In-memory peripheral that records every write.
pub struct FakePeripheral {
    identifier: Uuid,
    max_write_length: usize,
    state: Mutex<ConnectionState>,
    writes: Mutex<Vec<Vec<u8>>>,
    notifying: AtomicBool,
    fail_writes: AtomicBool,
}

impl FakePeripheral {
    pub fn new(max_write_length: usize) -> Self {
        Self {
            identifier: Uuid::new_v4(),
            max_write_length,
            state: Mutex::new(ConnectionState::Connected),
            writes: Mutex::new(Vec::new()),
            notifying: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Everything written so far, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("state lock") = state;
    }

    /// Make subsequent writes fail until called again with `false`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn is_notifying(&self) -> bool {
        self.notifying.load(Ordering::SeqCst)
    }
}

impl Peripheral for FakePeripheral {
    fn identifier(&self) -> Uuid {
        self.identifier
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock")
    }

    fn max_write_length(&self) -> usize {
        self.max_write_length
    }

    fn write_value(&self, data: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PeripheralError::WriteFailed("simulated failure".to_string()));
        }
        self.writes.lock().expect("writes lock").push(data.to_vec());
        Ok(())
    }

    fn set_notify(&self, enabled: bool) -> Result<()> {
        self.notifying.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}
