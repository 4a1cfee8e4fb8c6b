//! Bluetooth UUIDs for the speaker family.
//!
//! The GATT roles the controller cares about are listed once in
//! [`CHARACTERISTICS`]; [`CharacteristicMap`] builds both lookup directions
//! from that table.

use std::collections::HashMap;

use uuid::{Uuid, uuid};

// --- Service UUIDs ---

/// Vendor control service carrying the power and alarm characteristics.
pub const CONTROL_SERVICE: Uuid = uuid!("757ed3e4-1828-4a0c-8362-c229c3a6da72");

/// Vendor 16-bit service advertised by the speakers.
pub const VENDOR_SERVICE: Uuid = uuid!("000061fe-0000-1000-8000-00805f9b34fb");

/// Both top-level services, in discovery order.
pub const SERVICES: [Uuid; 2] = [CONTROL_SERVICE, VENDOR_SERVICE];

// --- Vendor characteristic UUIDs ---

/// Power characteristic; written with `source address || 0x01` to power on.
pub const POWER: Uuid = uuid!("c6d6dc0d-07f5-47ef-9b59-630622b01fd3");

/// Alarm characteristic.
pub const ALARM: Uuid = uuid!("16e005bb-3862-43c7-8f5c-6f654a4ffdd2");

/// Broadcaster characteristic.
pub const BROADCASTER: Uuid = uuid!("69c0f621-1354-4cf8-98a6-328b8faa1897");

// --- Standard characteristic UUIDs ---

/// Battery level (percentage).
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");

/// Device name.
pub const DEVICE_NAME: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");

/// Model number string; the speakers report their colour variant here.
pub const COLOUR: Uuid = uuid!("00002a24-0000-1000-8000-00805f9b34fb");

/// Serial number string.
pub const SERIAL_NUMBER: Uuid = uuid!("00002a25-0000-1000-8000-00805f9b34fb");

/// Software revision; the speakers put their firmware version here.
pub const FIRMWARE_REVISION: Uuid = uuid!("00002a28-0000-1000-8000-00805f9b34fb");

/// Battery power state.
pub const POWER_STATE: Uuid = uuid!("00002a1a-0000-1000-8000-00805f9b34fb");

/// What a characteristic is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CharacteristicRole {
    Power,
    Alarm,
    Battery,
    Name,
    Colour,
    Serial,
    Firmware,
    Broadcaster,
    PowerState,
}

impl CharacteristicRole {
    /// The four characteristics read opportunistically after a BLE connect.
    pub const INFORMATIONAL: [CharacteristicRole; 4] = [
        CharacteristicRole::Name,
        CharacteristicRole::Serial,
        CharacteristicRole::Firmware,
        CharacteristicRole::Battery,
    ];
}

/// The fixed role table.
pub const CHARACTERISTICS: [(CharacteristicRole, Uuid); 9] = [
    (CharacteristicRole::Power, POWER),
    (CharacteristicRole::Alarm, ALARM),
    (CharacteristicRole::Battery, BATTERY_LEVEL),
    (CharacteristicRole::Name, DEVICE_NAME),
    (CharacteristicRole::Colour, COLOUR),
    (CharacteristicRole::Serial, SERIAL_NUMBER),
    (CharacteristicRole::Firmware, FIRMWARE_REVISION),
    (CharacteristicRole::Broadcaster, BROADCASTER),
    (CharacteristicRole::PowerState, POWER_STATE),
];

/// Bidirectional UUID <-> role lookup, built once from [`CHARACTERISTICS`].
#[derive(Debug, Clone)]
pub struct CharacteristicMap {
    by_uuid: HashMap<Uuid, CharacteristicRole>,
    by_role: HashMap<CharacteristicRole, Uuid>,
}

impl CharacteristicMap {
    pub fn new() -> Self {
        let mut by_uuid = HashMap::with_capacity(CHARACTERISTICS.len());
        let mut by_role = HashMap::with_capacity(CHARACTERISTICS.len());
        for (role, uuid) in CHARACTERISTICS {
            by_uuid.insert(uuid, role);
            by_role.insert(role, uuid);
        }
        Self { by_uuid, by_role }
    }

    /// Role of a characteristic UUID, if it is one of ours.
    #[must_use]
    pub fn role(&self, uuid: &Uuid) -> Option<CharacteristicRole> {
        self.by_uuid.get(uuid).copied()
    }

    /// UUID for a role.
    #[must_use]
    pub fn uuid(&self, role: CharacteristicRole) -> Option<Uuid> {
        self.by_role.get(&role).copied()
    }

    /// Every known characteristic UUID.
    pub fn uuids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.by_uuid.keys().copied()
    }
}

impl Default for CharacteristicMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_is_bidirectional() {
        let map = CharacteristicMap::new();
        for (role, uuid) in CHARACTERISTICS {
            assert_eq!(map.role(&uuid), Some(role));
            assert_eq!(map.uuid(role), Some(uuid));
        }
        assert_eq!(map.uuids().count(), 9);
    }

    #[test]
    fn test_unknown_uuid() {
        let map = CharacteristicMap::default();
        assert_eq!(map.role(&CONTROL_SERVICE), None);
    }

    #[test]
    fn test_short_uuids_expand_to_base() {
        assert_eq!(
            BATTERY_LEVEL.to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(POWER_STATE.as_u128() >> 96, 0x2a1a);
    }
}
