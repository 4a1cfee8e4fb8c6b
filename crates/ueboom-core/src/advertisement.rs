//! Speaker recognition from BLE manufacturer data.
//!
//! Speakers embed their classic hardware address in the manufacturer data,
//! but the layout differs between hardware and firmware revisions. Three
//! placements are known:
//!
//! | Discriminator | Minimum length | Address bytes |
//! |---------------|----------------|---------------|
//! | `0x0300` | 20 | `[14, 20)` |
//! | `0x0300` | 33 | `[27, 33)` (when `[14, 20)` is not a vendor address) |
//! | anything else | 6 | `[0, 6)` |
//!
//! A candidate is accepted only if its first three bytes are one of the
//! vendor OUIs in [`ueboom_types::KNOWN_VENDOR_PREFIXES`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use ueboom_types::{Address, has_known_vendor_prefix};

use crate::traits::PeripheralHandle;

/// Discriminator (big-endian, first two bytes) of the extended layouts.
pub const EXTENDED_LAYOUT: u16 = 768;

const MIN_PAYLOAD_LEN: usize = 6;
const PRIMARY_OFFSET: usize = 14;
const SECONDARY_OFFSET: usize = 27;

/// Extract the speaker's hardware address from a manufacturer payload.
///
/// Returns `None` for payloads that are too short or carry no vendor address.
/// This is the normal outcome for every non-speaker advertisement.
#[must_use]
pub fn extract_address(payload: &[u8]) -> Option<Address> {
    if payload.len() < MIN_PAYLOAD_LEN {
        return None;
    }

    let discriminator = u16::from_be_bytes([payload[0], payload[1]]);

    if payload.len() >= PRIMARY_OFFSET + Address::LEN && discriminator == EXTENDED_LAYOUT {
        if let Some(addr) = candidate_at(payload, PRIMARY_OFFSET) {
            return Some(addr);
        }
        if payload.len() >= SECONDARY_OFFSET + Address::LEN {
            return candidate_at(payload, SECONDARY_OFFSET);
        }
        return None;
    }

    candidate_at(payload, 0)
}

fn candidate_at(payload: &[u8], offset: usize) -> Option<Address> {
    let slice = payload.get(offset..offset + Address::LEN)?;
    if has_known_vendor_prefix(slice) {
        Address::from_slice(slice)
    } else {
        None
    }
}

/// One scan observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Platform handle of the advertising peripheral.
    pub peripheral: PeripheralHandle,
    /// Raw manufacturer payload.
    #[serde(with = "payload_hex")]
    pub payload: Bytes,
    /// Signal strength, if reported.
    pub rssi: Option<i16>,
}

impl Advertisement {
    pub fn new(peripheral: PeripheralHandle, payload: impl Into<Bytes>, rssi: Option<i16>) -> Self {
        Self {
            peripheral,
            payload: payload.into(),
            rssi,
        }
    }

    /// The speaker address carried in the payload, if any.
    #[must_use]
    pub fn address(&self) -> Option<Address> {
        extract_address(&self.payload)
    }
}

mod payload_hex {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&crate::util::hex(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(d)?;
        crate::util::parse_hex(&s)
            .map(Bytes::from)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid hex: {s}")))
    }
}
