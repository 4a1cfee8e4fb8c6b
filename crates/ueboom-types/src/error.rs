//! Error types for data parsing in ueboom-types.

use thiserror::Error;

/// Errors that can occur when parsing speaker protocol data.
///
/// This error type is platform-agnostic and does not include
/// Bluetooth-specific errors (those belong in ueboom-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A hardware address could not be parsed.
    #[error("Invalid hardware address: {0}")]
    InvalidAddress(String),

    /// A message payload exceeds what the one-byte length prefix can describe.
    #[error("Payload too long: {actual} bytes (maximum {max})")]
    PayloadTooLong {
        /// Largest payload the frame format allows.
        max: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// Generic malformed data.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using ueboom-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
