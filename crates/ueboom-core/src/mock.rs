//! Mock collaborators for testing.
//!
//! This module provides in-memory implementations of [`BleCentral`],
//! [`AccessorySession`] and [`PersistentStore`] so that the orchestrator can
//! be driven end to end without Bluetooth hardware or a filesystem.
//!
//! # Features
//!
//! - **Call recording**: every central operation is logged for assertions
//! - **Failure injection**: failing connects, writes and saves
//! - **Latency simulation**: delayed connects, to exercise deadlines

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use uuid::Uuid;

use ueboom_types::uuid::CHARACTERISTICS;
use ueboom_types::{Address, DeviceRecord, Message};

use crate::error::{Error, Result};
use crate::traits::{AccessorySession, BleCentral, PeripheralHandle, PersistentStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An operation recorded by [`MockCentral`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralCall {
    StartScan,
    StopScan,
    Connect(PeripheralHandle),
    Disconnect(PeripheralHandle),
    Discover(PeripheralHandle),
    Read(PeripheralHandle, Uuid),
    Write {
        peripheral: PeripheralHandle,
        characteristic: Uuid,
        value: Vec<u8>,
        ack_required: bool,
    },
}

#[derive(Debug)]
struct CentralState {
    calls: Vec<CentralCall>,
    scanning: bool,
    characteristics: Vec<Uuid>,
    values: HashMap<Uuid, Vec<u8>>,
    connect_failure: Option<String>,
    write_failure: Option<String>,
}

/// A scriptable BLE central.
///
/// By default every connect succeeds, every known characteristic is
/// exposed and every write is acknowledged.
///
/// # Example
///
/// ```
/// use ueboom_core::mock::{CentralCall, MockCentral};
/// use ueboom_core::{BleCentral, PeripheralHandle};
///
/// #[tokio::main]
/// async fn main() {
///     let central = MockCentral::new();
///     let p = PeripheralHandle::new("p1");
///     central.connect(&p).await.unwrap();
///     assert_eq!(central.calls(), vec![CentralCall::Connect(p)]);
/// }
/// ```
#[derive(Debug)]
pub struct MockCentral {
    state: Mutex<CentralState>,
    connect_latency_ms: AtomicU64,
}

impl MockCentral {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CentralState {
                calls: Vec::new(),
                scanning: false,
                characteristics: CHARACTERISTICS.iter().map(|(_, uuid)| *uuid).collect(),
                values: HashMap::new(),
                connect_failure: None,
                write_failure: None,
            }),
            connect_latency_ms: AtomicU64::new(0),
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<CentralCall> {
        lock(&self.state).calls.clone()
    }

    /// Number of connect attempts so far.
    pub fn connect_count(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| matches!(c, CentralCall::Connect(_)))
            .count()
    }

    /// Values written so far, as `(characteristic, value)` pairs.
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                CentralCall::Write {
                    characteristic,
                    value,
                    ..
                } => Some((*characteristic, value.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.state).scanning
    }

    /// Restrict the characteristics reported by discovery.
    pub fn set_characteristics(&self, characteristics: Vec<Uuid>) {
        lock(&self.state).characteristics = characteristics;
    }

    /// Value returned when `characteristic` is read.
    pub fn set_value(&self, characteristic: Uuid, value: impl Into<Vec<u8>>) {
        lock(&self.state).values.insert(characteristic, value.into());
    }

    /// Make connects fail with `reason` (or succeed again with `None`).
    pub fn set_connect_failure(&self, reason: Option<&str>) {
        lock(&self.state).connect_failure = reason.map(String::from);
    }

    /// Make writes fail with `reason` (or succeed again with `None`).
    pub fn set_write_failure(&self, reason: Option<&str>) {
        lock(&self.state).write_failure = reason.map(String::from);
    }

    /// Delay every connect by `latency`.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    fn record(&self, call: CentralCall) {
        lock(&self.state).calls.push(call);
    }
}

impl Default for MockCentral {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleCentral for MockCentral {
    async fn start_scan(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(CentralCall::StartScan);
        state.scanning = true;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(CentralCall::StopScan);
        state.scanning = false;
        Ok(())
    }

    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<()> {
        self.record(CentralCall::Connect(peripheral.clone()));
        let latency = self.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        match lock(&self.state).connect_failure.clone() {
            Some(reason) => Err(Error::DeviceNotFound(reason)),
            None => Ok(()),
        }
    }

    async fn disconnect(&self, peripheral: &PeripheralHandle) -> Result<()> {
        self.record(CentralCall::Disconnect(peripheral.clone()));
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        peripheral: &PeripheralHandle,
        _services: &[Uuid],
        characteristics: &[Uuid],
    ) -> Result<Vec<Uuid>> {
        let mut state = lock(&self.state);
        state.calls.push(CentralCall::Discover(peripheral.clone()));
        Ok(state
            .characteristics
            .iter()
            .filter(|uuid| characteristics.contains(uuid))
            .copied()
            .collect())
    }

    async fn read_characteristic(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(CentralCall::Read(peripheral.clone(), characteristic));
        state
            .values
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound(characteristic.to_string()))
    }

    async fn write_characteristic(
        &self,
        peripheral: &PeripheralHandle,
        characteristic: Uuid,
        value: &[u8],
        ack_required: bool,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(CentralCall::Write {
            peripheral: peripheral.clone(),
            characteristic,
            value: value.to_vec(),
            ack_required,
        });
        match state.write_failure.clone() {
            Some(reason) => Err(Error::write_failure(characteristic.to_string(), reason)),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
struct SessionState {
    open_result: bool,
    opened: bool,
    closed: bool,
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    write_capacity: Option<usize>,
    write_error: Option<io::ErrorKind>,
    stalled: bool,
}

/// An in-memory accessory stream.
///
/// Clones share the same stream, so a test keeps one handle while the
/// orchestrator owns another.
#[derive(Debug, Clone)]
pub struct MockSession {
    state: Arc<Mutex<SessionState>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                open_result: true,
                opened: false,
                closed: false,
                incoming: VecDeque::new(),
                written: Vec::new(),
                write_capacity: None,
                write_error: None,
                stalled: false,
            })),
        }
    }

    /// What `open` returns.
    pub fn set_open_result(&self, result: bool) {
        lock(&self.state).open_result = result;
    }

    /// Make bytes available for reading.
    pub fn push_incoming(&self, bytes: &[u8]) {
        lock(&self.state).incoming.extend(bytes.iter().copied());
    }

    /// Make an encoded message available for reading.
    pub fn push_message(&self, message: &Message) {
        self.push_incoming(&message.encode());
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    /// Decode everything written so far.
    pub fn written_messages(&self) -> Vec<Message> {
        let mut buf = BytesMut::from(&lock(&self.state).written[..]);
        Message::decode_all(&mut buf)
    }

    /// Limit how many more bytes writes accept; `None` is unlimited.
    pub fn set_write_capacity(&self, capacity: Option<usize>) {
        lock(&self.state).write_capacity = capacity;
    }

    /// Make every write fail with `kind`.
    pub fn set_write_error(&self, kind: Option<io::ErrorKind>) {
        lock(&self.state).write_error = kind;
    }

    /// Report space available but accept zero bytes.
    pub fn set_stalled(&self, stalled: bool) {
        lock(&self.state).stalled = stalled;
    }

    pub fn is_open(&self) -> bool {
        let state = lock(&self.state);
        state.opened && !state.closed
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessorySession for MockSession {
    fn open(&mut self) -> bool {
        let mut state = lock(&self.state);
        state.opened = state.open_result;
        state.open_result
    }

    fn close(&mut self) {
        lock(&self.state).closed = true;
    }

    fn has_bytes_available(&self) -> bool {
        !lock(&self.state).incoming.is_empty()
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        let n = buf.len().min(state.incoming.len());
        for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn has_space_available(&self) -> bool {
        lock(&self.state).write_capacity != Some(0)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if let Some(kind) = state.write_error {
            return Err(io::Error::from(kind));
        }
        if state.stalled {
            return Ok(0);
        }
        let n = state.write_capacity.map_or(buf.len(), |c| c.min(buf.len()));
        state.written.extend_from_slice(&buf[..n]);
        if let Some(capacity) = state.write_capacity.as_mut() {
            *capacity -= n;
        }
        Ok(n)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    devices: Vec<DeviceRecord>,
    source: Option<Address>,
    fail_saves: bool,
    device_saves: usize,
}

/// A [`PersistentStore`] kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with previously saved records.
    pub fn with_devices(self, devices: Vec<DeviceRecord>) -> Self {
        lock(&self.state).devices = devices;
        self
    }

    /// Seed with a cached source address.
    pub fn with_source_address(self, source: Address) -> Self {
        lock(&self.state).source = Some(source);
        self
    }

    pub fn devices(&self) -> Vec<DeviceRecord> {
        lock(&self.state).devices.clone()
    }

    pub fn source_address(&self) -> Option<Address> {
        lock(&self.state).source
    }

    /// Number of successful registry saves.
    pub fn device_saves(&self) -> usize {
        lock(&self.state).device_saves
    }

    /// Make every save fail.
    pub fn set_fail_saves(&self, fail: bool) {
        lock(&self.state).fail_saves = fail;
    }
}

impl PersistentStore for MemoryStore {
    fn load_devices(&self) -> Result<Vec<DeviceRecord>> {
        Ok(self.devices())
    }

    fn save_devices(&self, records: &[DeviceRecord]) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_saves {
            return Err(Error::Persistence("simulated save failure".into()));
        }
        state.devices = records.to_vec();
        state.device_saves += 1;
        Ok(())
    }

    fn load_source_address(&self) -> Result<Option<Address>> {
        Ok(self.source_address())
    }

    fn save_source_address(&self, address: Option<Address>) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_saves {
            return Err(Error::Persistence("simulated save failure".into()));
        }
        state.source = address;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_central_records_calls() {
        let central = MockCentral::new();
        let p = PeripheralHandle::new("p");
        central.start_scan().await.unwrap();
        central.connect(&p).await.unwrap();
        central
            .write_characteristic(&p, ueboom_types::uuids::POWER, &[1], true)
            .await
            .unwrap();
        assert!(central.is_scanning());
        assert_eq!(central.connect_count(), 1);
        assert_eq!(central.writes(), vec![(ueboom_types::uuids::POWER, vec![1])]);
    }

    #[tokio::test]
    async fn test_mock_central_failures() {
        let central = MockCentral::new();
        let p = PeripheralHandle::new("p");
        central.set_connect_failure(Some("out of range"));
        assert!(central.connect(&p).await.is_err());
        assert!(
            central
                .read_characteristic(&p, ueboom_types::uuids::DEVICE_NAME)
                .await
                .is_err()
        );
    }

    #[test]
    fn test_mock_session_capacity() {
        let mut session = MockSession::new();
        session.set_write_capacity(Some(3));
        assert_eq!(session.write(&[1, 2, 3, 4]).unwrap(), 3);
        assert!(!session.has_space_available());
        assert_eq!(session.written(), vec![1, 2, 3]);
    }

    #[test]
    fn test_memory_store_failure() {
        let store = MemoryStore::new();
        store.set_fail_saves(true);
        assert!(store.save_devices(&[]).is_err());
        assert_eq!(store.device_saves(), 0);
    }
}
