//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reusable speaker selection arguments
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Speaker address or alias, or use UEBOOM_DEVICE env var
    #[arg(short, long, env = "UEBOOM_DEVICE")]
    pub device: Option<String>,
}

/// Overrides for where speakers and the source address are stored
#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Directory holding speakers.json
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory holding sourceaddress.json
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(name = "boom")]
#[command(author, version, about = "CLI for UE Boom Bluetooth speakers", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan for nearby speakers
    Scan {
        /// Scan duration in seconds (default from config, else 10)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List remembered speakers
    Devices {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Follow speaker events until interrupted
    Watch {
        /// Stop after this many seconds (0 runs until Ctrl+C)
        #[arg(short, long, default_value = "0")]
        duration: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Toggle a speaker's power
    Power {
        #[command(flatten)]
        device: DeviceArgs,

        /// Seconds to wait for the speaker to be seen before giving up
        #[arg(short = 'T', long, default_value = "30")]
        timeout: u64,
    },

    /// Manage speaker aliases
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },

    /// Show or set the controller's own Bluetooth address
    SourceAddress {
        #[command(subcommand)]
        action: Option<SourceAddressAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum AliasAction {
    /// List all aliases
    List,
    /// Map a friendly name to a speaker address
    Set {
        /// Alias name
        name: String,
        /// Speaker address
        address: String,
    },
    /// Remove an alias
    Remove {
        /// Alias name
        name: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum SourceAddressAction {
    /// Print the cached address
    Show,
    /// Store an address, e.g. the adapter's own MAC
    Set {
        /// Address such as A4:83:E7:11:22:33
        address: String,
    },
    /// Forget the cached address
    Clear,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_power() {
        let cli = Cli::try_parse_from(["boom", "power", "--device", "kitchen"]).unwrap();
        match cli.command {
            Commands::Power { device, timeout } => {
                assert_eq!(device.device.as_deref(), Some("kitchen"));
                assert_eq!(timeout, 30);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_source_address_defaults_to_show() {
        let cli = Cli::try_parse_from(["boom", "source-address"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::SourceAddress { action: None }
        ));
    }

    #[test]
    fn test_global_store_overrides() {
        let cli = Cli::try_parse_from(["boom", "devices", "--data-dir", "/tmp/x"]).unwrap();
        assert_eq!(cli.store.data_dir, Some(PathBuf::from("/tmp/x")));
    }
}
