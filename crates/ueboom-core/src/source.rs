//! The controller's own Bluetooth address, learned from a speaker.
//!
//! Every power-on write needs it and any connected speaker can report it, so
//! a single cell is shared by all state machines. The lock is held only for
//! the read or write of the value itself.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ueboom_types::Address;

/// Shared, lock-guarded source address.
///
/// Cloning yields another handle to the same cell.
#[derive(Debug, Clone, Default)]
pub struct SourceAddress {
    inner: Arc<Mutex<Option<Address>>>,
}

impl SourceAddress {
    /// An unset cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cell seeded with a known value, e.g. from the cache.
    pub fn with_value(value: Option<Address>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Address>> {
        // The value is a plain Copy type, a panicking writer cannot leave it torn.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value.
    pub fn get(&self) -> Option<Address> {
        *self.lock()
    }

    /// Overwrite the value.
    pub fn set(&self, value: Option<Address>) {
        *self.lock() = value;
    }

    /// Store `value` unless it is already current. Returns whether it changed.
    pub fn replace_if_different(&self, value: Address) -> bool {
        let mut guard = self.lock();
        if *guard == Some(value) {
            return false;
        }
        *guard = Some(value);
        true
    }
}
