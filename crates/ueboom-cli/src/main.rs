//! Command-line interface for UE Boom Bluetooth speakers.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby speakers |
//! | `devices` | List remembered speakers |
//! | `watch` | Follow speaker events |
//! | `power` | Toggle a speaker's power |
//! | `alias` | Manage speaker aliases |
//! | `source-address` | Show or set the controller address |
//! | `completions` | Generate shell completions |
//!
//! Settings live in `config.toml` under the platform config directory, or
//! wherever `UEBOOM_CONFIG` points.

mod cli;
mod commands;
mod config;
mod format;
mod util;

use std::io;
use std::time::Duration;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{cmd_alias, cmd_devices, cmd_power, cmd_scan, cmd_source_address, cmd_watch};
use config::{Config, resolve_device};
use format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "boom", &mut io::stdout());
        return Ok(());
    }

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let opts = FormatOptions::new(cli.no_color);
    let output = cli.output.as_ref();

    match cli.command {
        Commands::Scan { timeout, format } => {
            cmd_scan(config.scan_duration(timeout), format, output, cli.quiet).await?;
        }
        Commands::Devices { format } => {
            cmd_devices(&config.store(&cli.store), &config, format, output)?;
        }
        Commands::Watch { duration, format } => {
            let duration = (duration > 0).then(|| Duration::from_secs(duration));
            cmd_watch(
                &config,
                config.store(&cli.store),
                duration,
                format,
                output,
                &opts,
            )
            .await?;
        }
        Commands::Power { device, timeout } => {
            let address = resolve_device(device.device, &config)?;
            cmd_power(
                &config,
                config.store(&cli.store),
                address,
                Duration::from_secs(timeout),
                cli.quiet,
                &opts,
            )
            .await?;
        }
        Commands::Alias { action } => cmd_alias(action, cli.quiet)?,
        Commands::SourceAddress { action } => {
            cmd_source_address(&config.store(&cli.store), action, cli.quiet)?;
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
