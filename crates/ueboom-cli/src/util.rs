//! Utility functions for CLI operations.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ueboom_core::{
    BleConfig, BtleplugCentral, ConnectionOrchestrator, OrchestratorConfig, OrchestratorHandle,
};
use ueboom_store::JsonStore;

use crate::config::Config;

pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

/// A running orchestrator wired to the local adapter and the JSON store.
pub struct LiveSession {
    pub handle: OrchestratorHandle,
    task: JoinHandle<()>,
    pump: JoinHandle<ueboom_core::Result<()>>,
    cancel: CancellationToken,
}

impl LiveSession {
    pub async fn start(config: &Config, store: JsonStore) -> Result<Self> {
        let central = Arc::new(
            BtleplugCentral::new(BleConfig::default())
                .await
                .context("No Bluetooth adapter available")?,
        );

        let mut orchestrator = OrchestratorConfig::default();
        if let Some(timeout) = config.power_timeout() {
            orchestrator = orchestrator.power_timeout(timeout);
        }

        debug!(
            "Using {} and {}",
            store.devices_path().display(),
            store.source_address_path().display()
        );
        let (handle, task) =
            ConnectionOrchestrator::start(central.clone(), Arc::new(store), orchestrator);
        let cancel = CancellationToken::new();
        let pump = central.spawn_event_pump(handle.clone(), cancel.clone());

        Ok(Self {
            handle,
            task,
            pump,
            cancel,
        })
    }

    /// Stop the event pump, then the orchestrator, waiting for state to be saved.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        match self.pump.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("BLE event stream ended with error: {}", e),
            Err(e) => warn!("BLE event task failed: {}", e),
        }
        if let Err(e) = self.handle.shutdown().await {
            debug!("Orchestrator already stopped: {}", e);
        }
        self.task.await.context("Orchestrator task failed")?;
        Ok(())
    }
}
