//! Scan command implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use ueboom_core::scan_for_speakers;

use crate::cli::OutputFormat;
use crate::format::{format_scan_json, format_scan_text};
use crate::util::write_output;

pub async fn cmd_scan(
    duration: Duration,
    format: OutputFormat,
    output: Option<&PathBuf>,
    quiet: bool,
) -> Result<()> {
    if !quiet && format == OutputFormat::Text {
        eprintln!("Scanning for {}s...", duration.as_secs());
    }

    let speakers = scan_for_speakers(duration)
        .await
        .context("Failed to scan for speakers")?;

    let content = match format {
        OutputFormat::Json => format_scan_json(&speakers)?,
        OutputFormat::Text => format_scan_text(&speakers),
    };
    write_output(output, &content)?;

    if !quiet && format == OutputFormat::Text && !speakers.is_empty() {
        eprintln!("Tip: name a speaker with 'boom alias set <name> <address>'");
    }
    Ok(())
}
