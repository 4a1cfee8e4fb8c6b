//! Error types for ueboom-core.
//!
//! # Which errors reach the caller
//!
//! | Condition | Surfaced as |
//! |-----------|-------------|
//! | Advertisement too short or no vendor match | `None` from [`crate::extract_address`] |
//! | Partial frame in the read buffer | `None` from the decoder, bytes kept |
//! | Power-on before the handshake | [`Error::UnknownSourceAddress`] and a failure event |
//! | No acknowledgement within the deadline | device enters `Failed`, failure event |
//! | Stream or characteristic write rejected | [`Error::WriteFailure`], session torn down |
//! | Registry save/load failure | [`Error::Persistence`], logged and ignored |
//!
//! Connectivity failures are reported through state and events rather than
//! return values, since they usually happen long after the triggering call.

use std::time::Duration;

use thiserror::Error;

use ueboom_types::{Address, ParseError};

/// Errors that can occur while controlling speakers.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A power-on was requested before the controller learned its own address.
    #[error("Source address unknown; connect a speaker over classic Bluetooth first")]
    UnknownSourceAddress,

    /// A power transition was not acknowledged in time.
    #[error("Speaker {address} did not respond within {duration:?}")]
    ConnectionTimeout {
        /// The speaker.
        address: Address,
        /// The deadline that elapsed.
        duration: Duration,
    },

    /// A stream or characteristic write was rejected.
    #[error("Write to {target} failed: {reason}")]
    WriteFailure {
        /// What was being written (stream or characteristic).
        target: String,
        /// Description of the failure.
        reason: String,
    },

    /// A single BLE operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Loading or saving persisted state failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No speaker with this address is known.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// A required GATT characteristic is missing.
    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(String),

    /// Operation attempted without the needed transport.
    #[error("Not connected to device")]
    NotConnected,

    /// A power transition is already in flight for this speaker.
    #[error("A power transition is already in progress for {0}")]
    TransitionInProgress(Address),

    /// The accessory session refused to open.
    #[error("Failed to open accessory session for {0}")]
    SessionOpenFailed(Address),

    /// Data received from the speaker could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Parse error from ueboom-types.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The orchestrator task has stopped.
    #[error("Orchestrator is not running")]
    OrchestratorStopped,
}

impl Error {
    /// Build a [`Error::WriteFailure`].
    pub fn write_failure(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::WriteFailure {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using ueboom-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
