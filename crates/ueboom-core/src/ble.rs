//! [`BleCentral`] on top of `btleplug`.
//!
//! Also contains the event pump that turns adapter events into
//! [`PlatformEvent`]s, and a one-shot scan used by the CLI.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ueboom_types::Address;

use crate::advertisement::Advertisement;
use crate::error::{Error, Result};
use crate::orchestrator::{OrchestratorHandle, PlatformEvent};
use crate::traits::{BleCentral, PeripheralHandle};
use crate::util::format_peripheral_id;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts for individual BLE operations.
///
/// These bound a single platform call. The power transition deadline in
/// [`crate::OrchestratorConfig`] bounds the whole exchange.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use ueboom_core::BleConfig;
///
/// let config = BleConfig::default().connect_timeout(Duration::from_secs(20));
/// assert_eq!(config.connect_timeout, Duration::from_secs(20));
/// ```
#[derive(Debug, Clone)]
pub struct BleConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub discovery_timeout: Duration,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

impl BleConfig {
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or_else(|| Error::DeviceNotFound("no Bluetooth adapter".to_string()))
}

/// Reassemble the manufacturer payload as it appeared on air.
///
/// `btleplug` splits off the little-endian company identifier; address
/// extraction expects it in front.
pub fn manufacturer_payload(company: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(data.len() + 2);
    payload.extend_from_slice(&company.to_le_bytes());
    payload.extend_from_slice(data);
    payload
}

/// `btleplug` implementation of [`BleCentral`].
pub struct BtleplugCentral {
    adapter: Adapter,
    peripherals: RwLock<HashMap<PeripheralHandle, Peripheral>>,
    config: BleConfig,
}

impl BtleplugCentral {
    /// Use the first adapter on the system.
    pub async fn new(config: BleConfig) -> Result<Self> {
        Ok(Self::with_adapter(get_adapter().await?, config))
    }

    pub fn with_adapter(adapter: Adapter, config: BleConfig) -> Self {
        Self {
            adapter,
            peripherals: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &BleConfig {
        &self.config
    }

    async fn peripheral(&self, handle: &PeripheralHandle) -> Result<Peripheral> {
        if let Some(p) = self.peripherals.read().await.get(handle) {
            return Ok(p.clone());
        }

        let found = self
            .adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| format_peripheral_id(&p.id()) == handle.as_str())
            .ok_or_else(|| Error::DeviceNotFound(handle.to_string()))?;
        self.peripherals
            .write()
            .await
            .insert(handle.clone(), found.clone());
        Ok(found)
    }

    async fn remember(&self, id: &PeripheralId) -> Option<PeripheralHandle> {
        let handle = PeripheralHandle::new(format_peripheral_id(id));
        if self.peripherals.read().await.contains_key(&handle) {
            return Some(handle);
        }
        match self.adapter.peripheral(id).await {
            Ok(p) => {
                self.peripherals.write().await.insert(handle.clone(), p);
                Some(handle)
            }
            Err(e) => {
                debug!("Advertising peripheral {} vanished: {}", handle, e);
                None
            }
        }
    }

    fn characteristic(
        peripheral: &Peripheral,
        uuid: Uuid,
    ) -> Result<btleplug::api::Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::CharacteristicNotFound(uuid.to_string()))
    }

    /// Forward adapter events into the orchestrator until `cancel` fires.
    ///
    /// Manufacturer data becomes [`PlatformEvent::Advertisement`] and link
    /// loss becomes [`PlatformEvent::BleDisconnected`]. Scanning itself is
    /// started by the orchestrator.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        handle: OrchestratorHandle,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<()>> {
        let central = Arc::clone(self);
        tokio::spawn(async move {
            let mut events = central.adapter.events().await?;
            loop {
                let event = tokio::select! {
                    event = events.next() => event,
                    _ = cancel.cancelled() => break,
                };
                let Some(event) = event else {
                    warn!("Adapter event stream ended");
                    break;
                };
                for platform in central.translate(event).await {
                    if handle.dispatch(platform).await.is_err() {
                        debug!("Orchestrator stopped; ending event pump");
                        return Ok(());
                    }
                }
            }
            Ok(())
        })
    }

    async fn translate(&self, event: CentralEvent) -> Vec<PlatformEvent> {
        match event {
            CentralEvent::ManufacturerDataAdvertisement {
                id,
                manufacturer_data,
            } => {
                let Some(handle) = self.remember(&id).await else {
                    return Vec::new();
                };
                let rssi = match self.peripheral(&handle).await {
                    Ok(p) => p.properties().await.ok().flatten().and_then(|p| p.rssi),
                    Err(_) => None,
                };
                manufacturer_data
                    .iter()
                    .map(|(company, data)| {
                        PlatformEvent::Advertisement(Advertisement::new(
                            handle.clone(),
                            manufacturer_payload(*company, data),
                            rssi,
                        ))
                    })
                    .collect()
            }
            CentralEvent::DeviceDisconnected(id) => vec![PlatformEvent::BleDisconnected {
                peripheral: PeripheralHandle::new(format_peripheral_id(&id)),
            }],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl BleCentral for BtleplugCentral {
    async fn start_scan(&self) -> Result<()> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, handle: &PeripheralHandle) -> Result<()> {
        let peripheral = self.peripheral(handle).await?;
        if peripheral.is_connected().await.unwrap_or(false) {
            return Ok(());
        }
        info!("Connecting to {}", handle);
        timeout(self.config.connect_timeout, peripheral.connect())
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("connect to {handle}"),
                duration: self.config.connect_timeout,
            })??;
        Ok(())
    }

    async fn disconnect(&self, handle: &PeripheralHandle) -> Result<()> {
        let peripheral = self.peripheral(handle).await?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn discover_characteristics(
        &self,
        handle: &PeripheralHandle,
        services: &[Uuid],
        characteristics: &[Uuid],
    ) -> Result<Vec<Uuid>> {
        let peripheral = self.peripheral(handle).await?;
        timeout(self.config.discovery_timeout, peripheral.discover_services())
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("discover services on {handle}"),
                duration: self.config.discovery_timeout,
            })??;

        let found: Vec<Uuid> = peripheral
            .services()
            .iter()
            .filter(|s| services.contains(&s.uuid))
            .flat_map(|s| s.characteristics.iter().map(|c| c.uuid))
            .filter(|uuid| characteristics.contains(uuid))
            .collect();
        debug!("{} exposes {} known characteristics", handle, found.len());
        Ok(found)
    }

    async fn read_characteristic(
        &self,
        handle: &PeripheralHandle,
        characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        let peripheral = self.peripheral(handle).await?;
        let c = Self::characteristic(&peripheral, characteristic)?;
        let data = timeout(self.config.read_timeout, peripheral.read(&c))
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("read characteristic {}", characteristic),
                duration: self.config.read_timeout,
            })??;
        Ok(data)
    }

    async fn write_characteristic(
        &self,
        handle: &PeripheralHandle,
        characteristic: Uuid,
        value: &[u8],
        ack_required: bool,
    ) -> Result<()> {
        let peripheral = self.peripheral(handle).await?;
        let c = Self::characteristic(&peripheral, characteristic)?;
        let write_type = if ack_required {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        timeout(
            self.config.write_timeout,
            peripheral.write(&c, value, write_type),
        )
        .await
        .map_err(|_| Error::Timeout {
            operation: format!("write characteristic {}", characteristic),
            duration: self.config.write_timeout,
        })??;
        Ok(())
    }
}

/// A speaker seen during [`scan_for_speakers`].
#[derive(Debug, Clone)]
pub struct DiscoveredSpeaker {
    pub address: Address,
    pub peripheral: PeripheralHandle,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

/// Scan for `duration` and return every speaker recognised by its
/// manufacturer data. An empty list is not an error.
pub async fn scan_for_speakers(duration: Duration) -> Result<Vec<DiscoveredSpeaker>> {
    let adapter = get_adapter().await?;
    info!("Starting BLE scan for {} seconds...", duration.as_secs());

    adapter.start_scan(ScanFilter::default()).await?;
    sleep(duration).await;
    adapter.stop_scan().await?;

    let mut found: HashMap<Address, DiscoveredSpeaker> = HashMap::new();
    for peripheral in adapter.peripherals().await? {
        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            Ok(None) => continue,
            Err(e) => {
                debug!("Error reading peripheral properties: {}", e);
                continue;
            }
        };
        let address = properties
            .manufacturer_data
            .iter()
            .find_map(|(company, data)| {
                crate::extract_address(&manufacturer_payload(*company, data))
            });
        if let Some(address) = address {
            found.insert(
                address,
                DiscoveredSpeaker {
                    address,
                    peripheral: PeripheralHandle::new(format_peripheral_id(&peripheral.id())),
                    local_name: properties.local_name.clone(),
                    rssi: properties.rssi,
                },
            );
        }
    }

    let mut speakers: Vec<_> = found.into_values().collect();
    speakers.sort_by_key(|s| s.address);
    info!("Scan complete. Found {} speaker(s)", speakers.len());
    Ok(speakers)
}
