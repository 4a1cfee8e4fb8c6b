//! JSON file store.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, info};

use ueboom_core::PersistentStore;
use ueboom_types::{Address, DeviceRecord};

use crate::error::{Error, Result};

/// File holding the known speakers, inside the data directory.
pub const DEVICES_FILE: &str = "speakers.json";

/// File holding the learned source address, inside the cache directory.
pub const SOURCE_ADDRESS_FILE: &str = "sourceaddress.json";

/// Persists speakers and the source address as JSON documents.
///
/// The speaker list is user data and lives in the data directory. The
/// source address can be relearned from any speaker, so it is cache.
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash never leaves a truncated document behind.
#[derive(Debug, Clone)]
pub struct JsonStore {
    devices_path: PathBuf,
    source_path: PathBuf,
}

impl JsonStore {
    /// Store files under explicit directories.
    pub fn new(data_dir: impl AsRef<Path>, cache_dir: impl AsRef<Path>) -> Self {
        Self {
            devices_path: data_dir.as_ref().join(DEVICES_FILE),
            source_path: cache_dir.as_ref().join(SOURCE_ADDRESS_FILE),
        }
    }

    /// Store files under the platform data and cache directories.
    pub fn open_default() -> Self {
        Self::new(crate::default_data_dir(), crate::default_cache_dir())
    }

    pub fn devices_path(&self) -> &Path {
        &self.devices_path
    }

    pub fn source_address_path(&self) -> &Path {
        &self.source_path
    }

    /// Read the speaker list. A missing file is an empty list.
    pub fn read_devices(&self) -> Result<Vec<DeviceRecord>> {
        let Some(text) = read_optional(&self.devices_path)? else {
            debug!("No speaker file at {}", self.devices_path.display());
            return Ok(Vec::new());
        };
        let records: Vec<DeviceRecord> = serde_json::from_str(&text)?;
        debug!(
            "Read {} speakers from {}",
            records.len(),
            self.devices_path.display()
        );
        Ok(records)
    }

    pub fn write_devices(&self, records: &[DeviceRecord]) -> Result<()> {
        let text = serde_json::to_string_pretty(records)?;
        write_atomic(&self.devices_path, &text)
    }

    /// Read the cached source address. A missing file or `null` is `None`.
    ///
    /// Older caches hold the six raw bytes in base64 instead of the
    /// colon-separated form; both are accepted.
    pub fn read_source_address(&self) -> Result<Option<Address>> {
        let Some(text) = read_optional(&self.source_path)? else {
            return Ok(None);
        };
        let Some(value) = serde_json::from_str::<Option<String>>(&text)? else {
            return Ok(None);
        };
        match parse_source_address(&value) {
            Some(address) => Ok(Some(address)),
            None => Err(Error::InvalidSourceAddress {
                path: self.source_path.clone(),
                value,
            }),
        }
    }

    /// Write the source address; `None` removes the cache file.
    pub fn write_source_address(&self, source: Option<Address>) -> Result<()> {
        match source {
            Some(address) => {
                let text = serde_json::to_string(&address.to_string())?;
                write_atomic(&self.source_path, &text)
            }
            None => match fs::remove_file(&self.source_path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }
}

impl PersistentStore for JsonStore {
    fn load_devices(&self) -> ueboom_core::Result<Vec<DeviceRecord>> {
        Ok(self.read_devices()?)
    }

    fn save_devices(&self, records: &[DeviceRecord]) -> ueboom_core::Result<()> {
        Ok(self.write_devices(records)?)
    }

    fn load_source_address(&self) -> ueboom_core::Result<Option<Address>> {
        Ok(self.read_source_address()?)
    }

    fn save_source_address(&self, source: Option<Address>) -> ueboom_core::Result<()> {
        Ok(self.write_source_address(source)?)
    }
}

fn parse_source_address(value: &str) -> Option<Address> {
    if let Ok(address) = value.parse() {
        return Some(address);
    }
    let bytes = STANDARD.decode(value).ok()?;
    Address::from_slice(&bytes)
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
        info!("Created directory {}", parent.display());
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    debug!("Wrote {}", path.display());
    Ok(())
}
