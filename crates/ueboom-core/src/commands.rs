//! Command ids of the accessory protocol.
//!
//! Every command travels as a [`ueboom_types::Message`] frame on the classic
//! accessory stream. Power-on is the exception: it is a GATT write, see
//! [`power_on_value`].

use ueboom_types::{Address, Message};

/// Ask the speaker for the controller's own hardware address.
/// Payload: empty.
pub const REQUEST_SOURCE_ADDRESS: u16 = 0x1AC;

/// Reply to [`REQUEST_SOURCE_ADDRESS`].
/// Payload: the controller address, 6 bytes, most significant first.
pub const SOURCE_ADDRESS_RESPONSE: u16 = 0x1AD;

/// Ask the speaker for its current name.
/// Payload: empty.
pub const REQUEST_NAME: u16 = 0x16D;

/// Current name of the speaker, UTF-8, possibly NUL-padded.
pub const NAME_RESPONSE: u16 = 0x16E;

/// Set the speaker name.
/// Payload: UTF-8 name followed by a NUL byte.
pub const SET_NAME: u16 = 0x16F;

/// Turn the speaker off.
/// Payload: empty.
pub const POWER_OFF: u16 = 0x1B6;

/// Ask the speaker to report its power level.
/// Payload: empty.
pub const REQUEST_POWER_LEVEL: u16 = 0x214;

/// Trailing byte of the power-on characteristic write.
pub const POWER_ON_FLAG: u8 = 0x01;

/// Build the set-name frame for `name`.
pub fn set_name(name: &str) -> crate::Result<Message> {
    let mut payload = Vec::with_capacity(name.len() + 1);
    payload.extend_from_slice(name.as_bytes());
    payload.push(0);
    Ok(Message::new(SET_NAME, payload)?)
}

/// Value written to the power characteristic: `source || 0x01`.
#[must_use]
pub fn power_on_value(source: Address) -> [u8; 7] {
    let mut value = [0u8; 7];
    value[..6].copy_from_slice(source.as_bytes());
    value[6] = POWER_ON_FLAG;
    value
}
