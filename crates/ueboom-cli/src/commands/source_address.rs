//! Shows or edits the cached controller address.
//!
//! Speakers learn the controller's address during the classic handshake.
//! Desktop stacks rarely offer classic accessory sessions, so the address
//! can also be entered by hand.

use anyhow::{Context, Result, anyhow};
use ueboom_store::JsonStore;
use ueboom_types::Address;

use crate::cli::SourceAddressAction;

pub fn cmd_source_address(
    store: &JsonStore,
    action: Option<SourceAddressAction>,
    quiet: bool,
) -> Result<()> {
    match action.unwrap_or(SourceAddressAction::Show) {
        SourceAddressAction::Show => {
            let source = store.read_source_address().with_context(|| {
                format!(
                    "Failed to read {}",
                    store.source_address_path().display()
                )
            })?;
            match source {
                Some(address) => println!("{}", address),
                None if quiet => {}
                None => {
                    println!("No source address cached.");
                    println!();
                    println!("Set one with: boom source-address set <address>");
                }
            }
        }
        SourceAddressAction::Set { address } => {
            let parsed: Address = address
                .parse()
                .map_err(|e| anyhow!("'{}' is not a valid address: {}", address, e))?;
            store
                .write_source_address(Some(parsed))
                .context("Failed to save source address")?;
            if !quiet {
                println!("Source address set to {}", parsed);
            }
        }
        SourceAddressAction::Clear => {
            store
                .write_source_address(None)
                .context("Failed to clear source address")?;
            if !quiet {
                println!("Source address cleared");
            }
        }
    }
    Ok(())
}
