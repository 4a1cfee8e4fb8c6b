//! Platform collaborator traits.
//!
//! The orchestrator never talks to a Bluetooth stack or the filesystem
//! directly. It drives these traits, which lets the same logic run against
//! `btleplug`, a platform accessory framework, or the mocks in
//! [`crate::mock`].

use std::fmt;
use std::io;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ueboom_types::{Address, DeviceRecord};

use crate::error::Result;

/// Opaque platform identifier of a BLE peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralHandle(String);

impl PeripheralHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// BLE central operations.
///
/// Every method completes when the platform reports the outcome. The
/// orchestrator runs them in background tasks, so implementations may take
/// as long as their own timeouts allow.
///
/// # Example
///
/// ```ignore
/// use ueboom_core::{BleCentral, PeripheralHandle, Result};
///
/// async fn probe<C: BleCentral>(central: &C, p: &PeripheralHandle) -> Result<()> {
///     central.connect(p).await?;
///     central.disconnect(p).await
/// }
/// ```
#[async_trait]
pub trait BleCentral: Send + Sync {
    /// Begin delivering advertisements.
    async fn start_scan(&self) -> Result<()>;

    /// Stop delivering advertisements.
    async fn stop_scan(&self) -> Result<()>;

    /// Establish a BLE link.
    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<()>;

    /// Tear down a BLE link.
    async fn disconnect(&self, peripheral: &PeripheralHandle) -> Result<()>;

    /// Discover `services` and, within them, `characteristics`.
    ///
    /// Returns the subset of `characteristics` the peripheral exposes.
    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralHandle,
        services: &[Uuid],
        characteristics: &[Uuid],
    ) -> Result<Vec<Uuid>>;

    /// Read a characteristic value.
    async fn read_characteristic(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: Uuid,
    ) -> Result<Vec<u8>>;

    /// Write a characteristic value, waiting for the response if `ack_required`.
    async fn write_characteristic(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: Uuid,
        value: &[u8],
        ack_required: bool,
    ) -> Result<()>;
}

/// Metadata the platform reports for a connected accessory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryInfo {
    pub name: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub firmware: Option<String>,
}

/// A classic accessory byte stream.
///
/// All calls must return immediately. Readiness is reported separately
/// through [`crate::PlatformEvent::StreamReadable`] and
/// [`crate::PlatformEvent::StreamWritable`].
pub trait AccessorySession: Send + fmt::Debug {
    /// Open both directions of the stream.
    fn open(&mut self) -> bool;

    /// Close the stream. Further calls are no-ops.
    fn close(&mut self);

    /// Whether a read would return data.
    fn has_bytes_available(&self) -> bool;

    /// Read up to `buf.len()` bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether a write would accept data.
    fn has_space_available(&self) -> bool;

    /// Write some prefix of `buf`, returning how many bytes were taken.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Durable storage for the registry and the learned source address.
///
/// Calls may block; the orchestrator runs them on the blocking pool.
pub trait PersistentStore: Send + Sync {
    fn load_devices(&self) -> Result<Vec<DeviceRecord>>;

    fn save_devices(&self, records: &[DeviceRecord]) -> Result<()>;

    fn load_source_address(&self) -> Result<Option<Address>>;

    fn save_source_address(&self, address: Option<Address>) -> Result<()>;
}
