//! Length-prefixed command frames carried over the accessory byte stream.
//!
//! Frame layout:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 1 | length = 2 + payload length |
//! | 1 | 2 | command id (big-endian) |
//! | 3 | n | payload |
//!
//! The length byte counts the two command-id bytes, so a frame is at most
//! 256 bytes and a payload at most [`MAX_PAYLOAD_LEN`] bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ParseError, ParseResult};

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LEN: usize = 253;

/// Size of the command id that the length byte also counts.
const COMMAND_ID_LEN: usize = 2;

/// One protocol-level command or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    command_id: u16,
    payload: Bytes,
}

impl Message {
    /// Create a message, rejecting payloads the frame format cannot describe.
    pub fn new(command_id: u16, payload: impl Into<Bytes>) -> ParseResult<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ParseError::PayloadTooLong {
                max: MAX_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }
        Ok(Self {
            command_id,
            payload,
        })
    }

    /// Create a message without payload.
    #[must_use]
    pub fn empty(command_id: u16) -> Self {
        Self {
            command_id,
            payload: Bytes::new(),
        }
    }

    /// The 16-bit command id.
    #[must_use]
    pub fn command_id(&self) -> u16 {
        self.command_id
    }

    /// The payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the message and return its payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The value of the length prefix for this message.
    #[must_use]
    pub fn length_byte(&self) -> u8 {
        // MAX_PAYLOAD_LEN + 2 == 255, enforced by the constructors.
        (COMMAND_ID_LEN + self.payload.len()) as u8
    }

    /// Size of the encoded frame in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + COMMAND_ID_LEN + self.payload.len()
    }

    /// Append the encoded frame to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.length_byte());
        dst.put_u16(self.command_id);
        dst.put_slice(&self.payload);
    }

    /// Encode the message into a standalone frame.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Extract the next complete frame from the front of `buf`.
    ///
    /// Returns `None` without consuming anything when the buffer does not
    /// yet hold a full frame. Frames whose length byte is too small to
    /// contain a command id are discarded.
    pub fn decode(buf: &mut BytesMut) -> Option<Self> {
        loop {
            let length = usize::from(*buf.first()?);
            if buf.len() < 1 + length {
                return None;
            }

            let mut frame = buf.split_to(1 + length);
            frame.advance(1);

            if length < COMMAND_ID_LEN {
                continue;
            }

            let command_id = frame.get_u16();
            return Some(Self {
                command_id,
                payload: frame.freeze(),
            });
        }
    }

    /// Extract every complete frame currently in `buf`, in order.
    pub fn decode_all(buf: &mut BytesMut) -> Vec<Self> {
        let mut messages = Vec::new();
        while let Some(message) = Self::decode(buf) {
            messages.push(message);
        }
        messages
    }
}
