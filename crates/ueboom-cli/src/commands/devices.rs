//! Lists the speakers remembered in the store, without touching Bluetooth.

use std::path::PathBuf;

use anyhow::{Context, Result};
use ueboom_store::JsonStore;
use ueboom_types::{Address, DeviceInfo};

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{format_devices_json, format_devices_text};
use crate::util::write_output;

pub fn cmd_devices(
    store: &JsonStore,
    config: &Config,
    format: OutputFormat,
    output: Option<&PathBuf>,
) -> Result<()> {
    let records = store.read_devices().with_context(|| {
        format!(
            "Failed to read speakers from {}",
            store.devices_path().display()
        )
    })?;

    let mut rows: Vec<(DeviceInfo, Vec<String>)> = records
        .iter()
        .map(|record| {
            let info = record.info();
            let aliases = aliases_for(&info, config);
            (info, aliases)
        })
        .collect();
    rows.sort_by_key(|(info, _)| info.address);

    let content = match format {
        OutputFormat::Json => format_devices_json(&rows)?,
        OutputFormat::Text => format_devices_text(&rows),
    };
    write_output(output, &content)
}

/// Alias names whose target parses to this speaker's address.
fn aliases_for(info: &DeviceInfo, config: &Config) -> Vec<String> {
    let Some(address) = info.address else {
        return Vec::new();
    };
    let mut names: Vec<String> = config
        .aliases
        .iter()
        .filter(|(_, target)| target.parse::<Address>().ok() == Some(address))
        .map(|(name, _)| name.clone())
        .collect();
    names.sort();
    names
}
