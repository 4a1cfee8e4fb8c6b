//! 48-bit Bluetooth hardware addresses.
//!
//! The speaker family is recognised by the first three bytes (the vendor
//! OUI) of its hardware address. Addresses are keyed in the registry by
//! their integer form, which is also what the persisted records store.

use core::fmt;
use core::str::FromStr;

use crate::error::ParseError;

/// Vendor OUI prefixes used by the speaker family.
pub const KNOWN_VENDOR_PREFIXES: [[u8; 3]; 5] = [
    [0x00, 0x0D, 0x44],
    [0x88, 0xC6, 0x26],
    [0x00, 0x02, 0x5B],
    [0xC0, 0x28, 0x8D],
    [0xEC, 0x81, 0x43],
];

/// A 48-bit Bluetooth hardware address, most significant byte first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 6]);

impl Address {
    /// Number of bytes in an address.
    pub const LEN: usize = 6;

    /// Largest integer representable as an address.
    pub const MAX: u64 = 0xFFFF_FFFF_FFFF;

    /// Create an address from its six bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Create an address from a slice that must be exactly six bytes long.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 6]>::try_from(bytes).ok().map(Self)
    }

    /// Create an address from its integer form.
    ///
    /// Returns `None` if the value does not fit in 48 bits.
    #[must_use]
    pub fn from_u64(value: u64) -> Option<Self> {
        if value > Self::MAX {
            return None;
        }
        let be = value.to_be_bytes();
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&be[2..]);
        Some(Self(bytes))
    }

    /// The integer form of this address.
    #[must_use]
    pub fn to_u64(self) -> u64 {
        let mut be = [0u8; 8];
        be[2..].copy_from_slice(&self.0);
        u64::from_be_bytes(be)
    }

    /// The raw bytes, most significant first.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// The vendor OUI (first three bytes).
    #[must_use]
    pub fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// Whether the OUI matches one of [`KNOWN_VENDOR_PREFIXES`].
    #[must_use]
    pub fn is_known_vendor(&self) -> bool {
        has_known_vendor_prefix(&self.0)
    }
}

/// Check whether the first three bytes of `candidate` are a known vendor OUI.
///
/// Candidates shorter than three bytes never match.
#[must_use]
pub fn has_known_vendor_prefix(candidate: &[u8]) -> bool {
    candidate
        .get(..3)
        .is_some_and(|oui| KNOWN_VENDOR_PREFIXES.iter().any(|p| p == oui))
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = ParseError;

    /// Parse `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF` or `AABBCCDDEEFF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();

        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidAddress(s.to_string()));
        }

        u64::from_str_radix(&digits, 16)
            .ok()
            .and_then(Self::from_u64)
            .ok_or_else(|| ParseError::InvalidAddress(s.to_string()))
    }
}

impl From<[u8; 6]> for Address {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<u64> for Address {
    type Error = ParseError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::from_u64(value)
            .ok_or_else(|| ParseError::InvalidAddress(format!("{value:#x} exceeds 48 bits")))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_round_trip() {
        let addr = Address::new([0x00, 0x0D, 0x44, 0xAA, 0xBB, 0xCC]);
        assert_eq!(addr.to_u64(), 0x000D_44AA_BBCC);
        assert_eq!(Address::from_u64(0x000D_44AA_BBCC), Some(addr));
    }

    #[test]
    fn test_from_u64_rejects_wide_values() {
        assert!(Address::from_u64(1 << 48).is_none());
        assert!(Address::try_from(u64::MAX).is_err());
    }

    #[test]
    fn test_parse_colon_separated() {
        let addr: Address = "c0:28:8d:01:02:03".parse().unwrap();
        assert_eq!(addr.as_bytes(), &[0xC0, 0x28, 0x8D, 0x01, 0x02, 0x03]);
        assert_eq!(addr.to_string(), "C0:28:8D:01:02:03");
    }

    #[test]
    fn test_parse_bare_and_dashed() {
        let bare: Address = "EC8143000001".parse().unwrap();
        let dashed: Address = "EC-81-43-00-00-01".parse().unwrap();
        assert_eq!(bare, dashed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Address>().is_err());
        assert!("00:0D:44:AA:BB".parse::<Address>().is_err());
        assert!("GG:0D:44:AA:BB:CC".parse::<Address>().is_err());
        assert!("+0:0D:44:AA:BB:CC".parse::<Address>().is_err());
    }

    #[test]
    fn test_known_vendor() {
        assert!(Address::new([0x88, 0xC6, 0x26, 0, 0, 0]).is_known_vendor());
        assert!(!Address::new([0x88, 0xC6, 0x27, 0, 0, 0]).is_known_vendor());
        assert!(!has_known_vendor_prefix(&[0x00, 0x0D]));
    }

    #[test]
    fn test_from_slice_requires_six_bytes() {
        assert!(Address::from_slice(&[1, 2, 3, 4, 5]).is_none());
        assert!(Address::from_slice(&[1, 2, 3, 4, 5, 6, 7]).is_none());
        assert!(Address::from_slice(&[1, 2, 3, 4, 5, 6]).is_some());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_as_string() {
        let addr = Address::new([0x00, 0x02, 0x5B, 0x10, 0x20, 0x30]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"00:02:5B:10:20:30\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
