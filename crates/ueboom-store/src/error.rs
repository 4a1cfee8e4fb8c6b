//! Error types for ueboom-store.

use std::path::PathBuf;

/// Result type for ueboom-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ueboom-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to create the storage directory.
    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The cached source address could not be parsed.
    #[error("Invalid source address in {path}: {value}")]
    InvalidSourceAddress { path: PathBuf, value: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for ueboom_core::Error {
    fn from(err: Error) -> Self {
        ueboom_core::Error::Persistence(err.to_string())
    }
}
