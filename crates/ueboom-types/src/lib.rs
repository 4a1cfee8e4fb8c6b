//! Platform-agnostic types for UE Boom Bluetooth speakers.
//!
//! This crate holds everything that does not touch a Bluetooth stack:
//!
//! - Hardware addresses and the vendor prefix table
//! - The length-prefixed command frame codec
//! - GATT service and characteristic UUIDs
//! - Persisted device records and display helpers
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use ueboom_types::Message;
//!
//! let frame = Message::empty(0x1AC).encode();
//! assert_eq!(&frame[..], &[0x02, 0x01, 0xAC]);
//!
//! let mut buf = BytesMut::from(&frame[..]);
//! let msg = Message::decode(&mut buf).unwrap();
//! assert_eq!(msg.command_id(), 0x1AC);
//! ```

pub mod address;
pub mod error;
pub mod message;
pub mod types;
pub mod uuid;

pub use address::{Address, KNOWN_VENDOR_PREFIXES, has_known_vendor_prefix};
pub use error::{ParseError, ParseResult};
pub use message::{MAX_PAYLOAD_LEN, Message};
pub use types::{DeviceInfo, DeviceRecord, PowerState, blob_to_text, firmware_to_text};
pub use uuid::{CharacteristicMap, CharacteristicRole};
pub use uuid as uuids;
