//! Output formatting for text and JSON.

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::{builder::Builder, settings::Style};
use ueboom_core::{DeviceEvent, DeviceSnapshot, DiscoveredSpeaker, PowerTarget};
use ueboom_types::{DeviceInfo, PowerState};

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self { no_color }
    }

    fn paint_state(&self, state: PowerState) -> String {
        let text = state.to_string();
        if self.no_color {
            return text;
        }
        match state {
            PowerState::ClassicConnected => text.green().to_string(),
            PowerState::PoweringOn | PowerState::PoweringOff | PowerState::BleConnecting => {
                text.yellow().to_string()
            }
            PowerState::Failed => text.red().to_string(),
            _ => text.dimmed().to_string(),
        }
    }
}

fn dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

fn target_text(target: PowerTarget) -> &'static str {
    match target {
        PowerTarget::On => "on",
        PowerTarget::Off => "off",
    }
}

/// One scan result, as written to JSON.
#[derive(Debug, Serialize)]
struct ScanRow<'a> {
    address: String,
    name: Option<&'a str>,
    rssi: Option<i16>,
    peripheral: &'a str,
}

pub fn format_scan_text(speakers: &[DiscoveredSpeaker]) -> String {
    if speakers.is_empty() {
        return "No speakers found.\n".to_string();
    }
    let mut builder = Builder::default();
    builder.push_record(["Address", "Name", "RSSI"]);
    for speaker in speakers {
        builder.push_record([
            speaker.address.to_string(),
            dash(speaker.local_name.as_deref()).to_string(),
            speaker
                .rssi
                .map_or_else(|| "-".to_string(), |r| format!("{r} dBm")),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    format!("{table}\n")
}

pub fn format_scan_json(speakers: &[DiscoveredSpeaker]) -> Result<String> {
    let rows: Vec<_> = speakers
        .iter()
        .map(|s| ScanRow {
            address: s.address.to_string(),
            name: s.local_name.as_deref(),
            rssi: s.rssi,
            peripheral: s.peripheral.as_str(),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&rows)? + "\n")
}

/// Table of remembered speakers, with aliases where one points at them.
pub fn format_devices_text(devices: &[(DeviceInfo, Vec<String>)]) -> String {
    if devices.is_empty() {
        return "No speakers remembered yet.\n\
                Speakers are added when the controller first sees them.\n"
            .to_string();
    }
    let mut builder = Builder::default();
    builder.push_record(["Address", "Name", "Model", "Serial", "Firmware", "Alias"]);
    for (info, aliases) in devices {
        builder.push_record([
            info.address.map_or_else(|| "-".to_string(), |a| a.to_string()),
            dash(info.name.as_deref()).to_string(),
            dash(info.model.as_deref()).to_string(),
            dash(info.serial.as_deref()).to_string(),
            dash(info.firmware.as_deref()).to_string(),
            if aliases.is_empty() {
                "-".to_string()
            } else {
                aliases.join(", ")
            },
        ]);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    format!("{table}\n")
}

pub fn format_devices_json(devices: &[(DeviceInfo, Vec<String>)]) -> Result<String> {
    #[derive(Serialize)]
    struct Row<'a> {
        #[serde(flatten)]
        info: &'a DeviceInfo,
        aliases: &'a [String],
    }
    let rows: Vec<_> = devices
        .iter()
        .map(|(info, aliases)| Row { info, aliases })
        .collect();
    Ok(serde_json::to_string_pretty(&rows)? + "\n")
}

/// A single-line summary of a speaker's live state.
pub fn format_snapshot_line(snapshot: &DeviceSnapshot, opts: &FormatOptions) -> String {
    let mut line = format!(
        "{} {} [{}]",
        snapshot.address,
        snapshot.display_name(),
        opts.paint_state(snapshot.power_state)
    );
    if let Some(level) = snapshot.battery_level {
        line.push_str(&format!(" battery {level}%"));
    }
    if snapshot.failed {
        line.push_str(" (last transition failed)");
    }
    line
}

/// One line per event in text mode, one JSON object per line otherwise.
pub fn format_event_text(event: &DeviceEvent, opts: &FormatOptions) -> String {
    match event {
        DeviceEvent::Discovered { address, rssi } => match rssi {
            Some(rssi) => format!("{address} discovered ({rssi} dBm)"),
            None => format!("{address} discovered"),
        },
        DeviceEvent::StateChanged { address, from, to } => {
            format!("{address} {} -> {}", from, opts.paint_state(*to))
        }
        DeviceEvent::RecordUpdated { address, info } => format!(
            "{address} name={} model={} serial={} firmware={}",
            dash(info.name.as_deref()),
            dash(info.model.as_deref()),
            dash(info.serial.as_deref()),
            dash(info.firmware.as_deref()),
        ),
        DeviceEvent::BatteryChanged { address, level } => {
            format!("{address} battery {level}%")
        }
        DeviceEvent::PowerTransitionStarted { address, target } => {
            format!("{address} powering {}", target_text(*target))
        }
        DeviceEvent::PowerTransitionCompleted { address, target } => {
            format!("{address} powered {}", target_text(*target))
        }
        DeviceEvent::PowerTransitionFailed {
            address,
            target,
            reason,
        } => {
            let text = format!("{address} power {} failed: {reason}", target_text(*target));
            if opts.no_color {
                text
            } else {
                text.red().to_string()
            }
        }
        DeviceEvent::FailureCleared { address } => format!("{address} failure cleared"),
        DeviceEvent::SourceAddressLearned { source } => {
            format!("source address learned: {source}")
        }
        DeviceEvent::PersistenceFailed { error } => format!("could not save state: {error}"),
        other => format!("{other:?}"),
    }
}

pub fn format_event_json(event: &DeviceEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}
