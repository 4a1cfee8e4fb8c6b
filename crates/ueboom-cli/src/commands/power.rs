//! Power command implementation.
//!
//! Starts the orchestrator, waits until the speaker is seen, toggles its
//! power and waits for the outcome. The orchestrator enforces the power
//! deadline itself and reports a timeout as a failed transition.

use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, timeout_at};
use tracing::info;
use ueboom_core::{DeviceEvent, EventReceiver, OrchestratorHandle, PowerState, PowerTarget};
use ueboom_store::JsonStore;
use ueboom_types::Address;

use crate::config::Config;
use crate::format::{FormatOptions, format_snapshot_line};
use crate::util::LiveSession;

pub async fn cmd_power(
    config: &Config,
    store: JsonStore,
    address: Address,
    discovery_timeout: Duration,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let session = LiveSession::start(config, store).await?;
    let result = toggle(&session.handle, address, discovery_timeout, quiet, opts).await;
    session.stop().await?;
    result
}

async fn toggle(
    handle: &OrchestratorHandle,
    address: Address,
    discovery_timeout: Duration,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let mut events = handle.subscribe();

    if !quiet {
        eprintln!("Looking for {}...", address);
    }
    wait_until_seen(handle, &mut events, address, discovery_timeout).await?;

    let target = handle.toggle_power(address).await?;
    info!("Powering {} {:?}", address, target);
    if !quiet {
        eprintln!(
            "Powering {} {}...",
            address,
            match target {
                PowerTarget::On => "on",
                PowerTarget::Off => "off",
            }
        );
    }

    loop {
        match events.recv().await {
            Ok(DeviceEvent::PowerTransitionCompleted { address: a, .. }) if a == address => break,
            Ok(DeviceEvent::PowerTransitionFailed {
                address: a, reason, ..
            }) if a == address => bail!("Power transition failed: {}", reason),
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => bail!("Orchestrator stopped before the speaker answered"),
        }
    }

    if !quiet && let Some(snapshot) = handle.device(address).await? {
        println!("{}", format_snapshot_line(&snapshot, opts));
    }
    Ok(())
}

/// Wait until the speaker is reachable by at least one transport or has
/// been seen advertising.
async fn wait_until_seen(
    handle: &OrchestratorHandle,
    events: &mut EventReceiver,
    address: Address,
    limit: Duration,
) -> Result<()> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(snapshot) = handle.device(address).await?
            && snapshot.power_state != PowerState::Disconnected
        {
            return Ok(());
        }
        match timeout_at(deadline, events.recv()).await {
            Ok(Ok(_)) | Ok(Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) => bail!("Orchestrator stopped"),
            Err(_) => bail!(
                "Speaker {} not seen within {}s. Is it nearby and awake enough to advertise?",
                address,
                limit.as_secs()
            ),
        }
    }
}
