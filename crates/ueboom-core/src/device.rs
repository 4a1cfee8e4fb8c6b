//! The in-memory speaker entity.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use ueboom_types::{Address, DeviceInfo, DeviceRecord, PowerState};

use crate::traits::PeripheralHandle;

/// One physical speaker.
///
/// The address is the identity key and never changes. Everything else is
/// learned over the run: the blobs from GATT reads, accessory metadata and
/// name responses; the flags from transport events.
#[derive(Debug, Clone)]
pub struct Device {
    address: Address,
    pub name: Option<Vec<u8>>,
    pub serial: Option<Vec<u8>>,
    pub model: Option<Vec<u8>>,
    pub firmware: Option<Vec<u8>>,
    pub battery_level: Option<u8>,
    pub rssi: Option<i16>,
    pub classic_connected: bool,
    pub ble_connected: bool,
    pub power_state: PowerState,
    pub pending_timeout: Option<Instant>,
    /// Set when a power transition failed, until acknowledged.
    pub failed: bool,
    pub peripheral: Option<PeripheralHandle>,
}

impl Device {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            name: None,
            serial: None,
            model: None,
            firmware: None,
            battery_level: None,
            rssi: None,
            classic_connected: false,
            ble_connected: false,
            power_state: PowerState::Disconnected,
            pending_timeout: None,
            failed: false,
            peripheral: None,
        }
    }

    /// Rebuild a device from its persisted record.
    ///
    /// Returns `None` if the stored address does not fit in 48 bits.
    pub fn from_record(record: DeviceRecord) -> Option<Self> {
        let address = record.hardware_address()?;
        Some(Self {
            name: record.name,
            serial: record.serial,
            model: record.model,
            firmware: record.firmware,
            ..Self::new(address)
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Present if either transport reports connected.
    pub fn is_present(&self) -> bool {
        self.classic_connected || self.ble_connected
    }

    /// The persisted form.
    pub fn record(&self) -> DeviceRecord {
        DeviceRecord {
            name: self.name.clone(),
            serial: self.serial.clone(),
            model: self.model.clone(),
            firmware: self.firmware.clone(),
            address: self.address.to_u64(),
        }
    }

    pub fn info(&self) -> DeviceInfo {
        self.record().info()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            address: self.address,
            info: self.info(),
            battery_level: self.battery_level,
            rssi: self.rssi,
            classic_connected: self.classic_connected,
            ble_connected: self.ble_connected,
            power_state: self.power_state,
            failed: self.failed,
            transition_pending: self.pending_timeout.is_some(),
        }
    }
}

/// Read-only view of a [`Device`] handed out by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub address: Address,
    pub info: DeviceInfo,
    pub battery_level: Option<u8>,
    pub rssi: Option<i16>,
    pub classic_connected: bool,
    pub ble_connected: bool,
    pub power_state: PowerState,
    pub failed: bool,
    pub transition_pending: bool,
}

impl DeviceSnapshot {
    pub fn is_present(&self) -> bool {
        self.classic_connected || self.ble_connected
    }

    /// Name for display, falling back to the address.
    pub fn display_name(&self) -> String {
        self.info
            .name
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}
