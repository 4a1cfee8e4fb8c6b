//! Configuration file management.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use ueboom_store::JsonStore;
use ueboom_types::Address;

use crate::cli::StoreArgs;

/// Environment variable that points at an alternative config file.
pub const CONFIG_ENV: &str = "UEBOOM_CONFIG";

const DEFAULT_SCAN_SECS: u64 = 10;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default speaker address or alias
    #[serde(default)]
    pub device: Option<String>,

    /// Override for the directory holding the speaker list
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Override for the directory holding the source address
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Seconds a power transition may take before it is marked failed
    #[serde(default)]
    pub power_timeout: Option<u64>,

    /// Default scan duration in seconds
    #[serde(default)]
    pub scan_timeout: Option<u64>,

    /// Speaker aliases (friendly name -> address)
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ueboom")
            .join("config.toml")
    }

    /// Load config from file, or return default if not found
    pub fn load() -> Self {
        let path = Self::path();
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::path();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    pub fn scan_duration(&self, arg: Option<u64>) -> Duration {
        Duration::from_secs(arg.or(self.scan_timeout).unwrap_or(DEFAULT_SCAN_SECS))
    }

    pub fn power_timeout(&self) -> Option<Duration> {
        self.power_timeout.map(Duration::from_secs)
    }

    /// Build the JSON store, preferring command-line directories over the
    /// config file and the config file over platform defaults.
    pub fn store(&self, args: &StoreArgs) -> JsonStore {
        let data_dir = args
            .data_dir
            .clone()
            .or_else(|| self.data_dir.clone())
            .unwrap_or_else(ueboom_store::default_data_dir);
        let cache_dir = args
            .cache_dir
            .clone()
            .or_else(|| self.cache_dir.clone())
            .unwrap_or_else(ueboom_store::default_cache_dir);
        JsonStore::new(data_dir, cache_dir)
    }
}

/// Resolve an alias to its address, or return the original if not an alias.
pub fn resolve_alias(device: &str, config: &Config) -> String {
    config
        .aliases
        .get(device)
        .cloned()
        .unwrap_or_else(|| device.to_string())
}

/// Resolve the target speaker from the argument or the configured default,
/// applying aliases to either.
pub fn resolve_device(device: Option<String>, config: &Config) -> Result<Address> {
    let raw = device.or_else(|| config.device.clone()).ok_or_else(|| {
        anyhow!(
            "No speaker specified. Use --device <ADDRESS> or set UEBOOM_DEVICE.\n\
             Run 'boom scan' to find nearby speakers."
        )
    })?;
    let resolved = resolve_alias(&raw, config);
    resolved
        .parse()
        .map_err(|e| anyhow!("'{}' is not a speaker address or alias: {}", raw, e))
}
