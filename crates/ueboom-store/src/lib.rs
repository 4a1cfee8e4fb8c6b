//! File-backed persistence of known UE Boom speakers.
//!
//! [`JsonStore`] implements [`ueboom_core::PersistentStore`] with two JSON
//! documents: the speaker list (`speakers.json`) and the learned source
//! address (`sourceaddress.json`). Speaker records keep the byte blobs of
//! [`ueboom_types::DeviceRecord`] as base64 strings and the address as an
//! integer.
//!
//! # Example
//!
//! ```no_run
//! use ueboom_store::JsonStore;
//!
//! let store = JsonStore::open_default();
//! for record in store.read_devices()? {
//!     println!("{:?}", record.info());
//! }
//! # Ok::<(), ueboom_store::Error>(())
//! ```

mod error;
mod store;

pub use error::{Error, Result};
pub use store::{DEVICES_FILE, JsonStore, SOURCE_ADDRESS_FILE};

use std::path::PathBuf;

/// Default directory for the speaker list.
///
/// - Linux: `~/.local/share/ueboom`
/// - macOS: `~/Library/Application Support/ueboom`
/// - Windows: `C:\Users\<user>\AppData\Local\ueboom`
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ueboom")
}

/// Default directory for the source address cache.
///
/// - Linux: `~/.cache/ueboom`
/// - macOS: `~/Library/Caches/ueboom`
/// - Windows: `C:\Users\<user>\AppData\Local\ueboom`
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ueboom")
}
