//! Core data types for speaker state and persisted records.

use core::fmt;

use crate::address::Address;

/// Power and connectivity state of a single speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PowerState {
    /// Not reachable over either transport.
    #[default]
    Disconnected,
    /// Seen in an advertisement but not BLE-linked.
    BleDiscovered,
    /// BLE connect requested.
    BleConnecting,
    /// BLE link up, no classic session.
    BleConnected,
    /// Accessory stream open.
    ClassicConnected,
    /// Power-on write pending or awaiting the classic reconnect.
    PoweringOn,
    /// Power-off command sent, awaiting the classic disconnect.
    PoweringOff,
    /// The last power transition timed out or failed.
    Failed,
}

impl PowerState {
    /// Whether a power transition is in flight.
    #[must_use]
    pub fn is_transitioning(self) -> bool {
        matches!(self, PowerState::PoweringOn | PowerState::PoweringOff)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerState::Disconnected => "disconnected",
            PowerState::BleDiscovered => "ble discovered",
            PowerState::BleConnecting => "ble connecting",
            PowerState::BleConnected => "ble connected",
            PowerState::ClassicConnected => "connected",
            PowerState::PoweringOn => "powering on",
            PowerState::PoweringOff => "powering off",
            PowerState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The persisted form of a speaker.
///
/// Blobs are stored as base64 strings and the address as its integer form,
/// which keeps previously saved files readable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceRecord {
    #[cfg_attr(feature = "serde", serde(default, with = "blob"))]
    pub name: Option<Vec<u8>>,
    #[cfg_attr(feature = "serde", serde(default, with = "blob"))]
    pub serial: Option<Vec<u8>>,
    #[cfg_attr(feature = "serde", serde(default, with = "blob"))]
    pub model: Option<Vec<u8>>,
    #[cfg_attr(feature = "serde", serde(default, with = "blob"))]
    pub firmware: Option<Vec<u8>>,
    pub address: u64,
}

impl DeviceRecord {
    /// A record with only the address filled in.
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address: address.to_u64(),
            ..Self::default()
        }
    }

    /// The typed address, or `None` if the stored integer exceeds 48 bits.
    #[must_use]
    pub fn hardware_address(&self) -> Option<Address> {
        Address::from_u64(self.address)
    }

    /// Human-readable view of this record.
    #[must_use]
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            address: self.hardware_address(),
            name: self.name.as_deref().and_then(blob_to_text),
            serial: self.serial.as_deref().and_then(blob_to_text),
            model: self.model.as_deref().and_then(blob_to_text),
            firmware: self.firmware.as_deref().and_then(firmware_to_text),
        }
    }
}

#[cfg(feature = "serde")]
mod blob {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => s.serialize_some(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Text fields of a speaker, decoded for display.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInfo {
    pub address: Option<Address>,
    pub name: Option<String>,
    pub serial: Option<String>,
    pub model: Option<String>,
    pub firmware: Option<String>,
}

/// Decode a characteristic blob as text, trimming trailing NULs.
///
/// Returns `None` for blobs that are empty after trimming.
#[must_use]
pub fn blob_to_text(blob: &[u8]) -> Option<String> {
    let end = blob.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    if end == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&blob[..end]).into_owned())
}

/// Render a firmware blob.
///
/// Firmware strings such as `"1.4.20"` are shown as-is. Binary blobs are
/// rendered as `major.minor.patch` from their first three bytes.
#[must_use]
pub fn firmware_to_text(blob: &[u8]) -> Option<String> {
    let end = blob.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    let trimmed = &blob[..end];

    if let Ok(text) = std::str::from_utf8(trimmed)
        && text.contains('.')
        && text.chars().all(|c| !c.is_control())
    {
        return Some(text.to_string());
    }

    match blob {
        [major, minor, patch, ..] => Some(format!("{major}.{minor}.{patch}")),
        _ => blob_to_text(blob),
    }
}
