//! Alias command implementation.
//!
//! Manages friendly speaker names (aliases) that map to hardware addresses.

use anyhow::{Result, bail};
use tabled::{builder::Builder, settings::Style};
use ueboom_types::Address;

use crate::cli::AliasAction;
use crate::config::Config;

pub fn cmd_alias(action: AliasAction, quiet: bool) -> Result<()> {
    let mut config = Config::load();

    match action {
        AliasAction::List => {
            if config.aliases.is_empty() {
                if !quiet {
                    println!("No aliases configured.");
                    println!();
                    println!("Add an alias with: boom alias set <name> <address>");
                }
            } else {
                let mut builder = Builder::default();
                builder.push_record(["Alias", "Speaker Address"]);

                let mut aliases: Vec<_> = config.aliases.iter().collect();
                aliases.sort_by_key(|(name, _)| name.as_str());
                for (name, address) in aliases {
                    builder.push_record([name.as_str(), address.as_str()]);
                }

                let mut table = builder.build();
                table.with(Style::rounded());
                println!("{}", table);
            }
        }
        AliasAction::Set { name, address } => {
            if name.parse::<Address>().is_ok() {
                bail!(
                    "Alias name '{}' looks like a speaker address. \
                     Use a friendly name instead (e.g., 'kitchen', 'patio').",
                    name
                );
            }
            let Ok(parsed) = address.parse::<Address>() else {
                bail!("'{}' is not a valid speaker address", address);
            };
            let address = parsed.to_string();

            let was_update = config.aliases.contains_key(&name);
            config.aliases.insert(name.clone(), address.clone());
            config.save()?;

            if !quiet {
                if was_update {
                    println!("Updated alias '{}' → {}", name, address);
                } else {
                    println!("Added alias '{}' → {}", name, address);
                }
            }
        }
        AliasAction::Remove { name } => {
            if config.aliases.remove(&name).is_some() {
                config.save()?;
                if !quiet {
                    println!("Removed alias '{}'", name);
                }
            } else {
                bail!("Alias '{}' not found", name);
            }
        }
    }

    Ok(())
}
