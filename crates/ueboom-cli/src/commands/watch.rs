//! Watch command implementation.
//!
//! Runs the orchestrator against the local adapter and prints every event
//! until Ctrl+C or the optional duration elapses.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use ueboom_store::JsonStore;

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{FormatOptions, format_event_json, format_event_text, format_snapshot_line};
use crate::util::{LiveSession, write_output};

pub async fn cmd_watch(
    config: &Config,
    store: JsonStore,
    duration: Option<Duration>,
    format: OutputFormat,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
) -> Result<()> {
    let session = LiveSession::start(config, store).await?;
    let mut events = session.handle.subscribe();
    let mut sink = LineSink::new(output);

    if format == OutputFormat::Text {
        for snapshot in session.handle.devices().await? {
            sink.emit(&format_snapshot_line(&snapshot, opts))?;
        }
        eprintln!("Watching for speaker events (Ctrl+C to stop)...");
    }

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nShutting down...");
                break;
            }
            _ = &mut deadline => break,
            received = events.recv() => match received {
                Ok(event) => {
                    let line = match format {
                        OutputFormat::Json => format_event_json(&event)?,
                        OutputFormat::Text => format_event_text(&event, opts),
                    };
                    sink.emit(&line)?;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Missed {} events", missed);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.stop().await
}

/// Writes lines to stdout as they arrive, or rewrites the whole log to the
/// output file so it always holds every line seen so far.
struct LineSink<'a> {
    output: Option<&'a PathBuf>,
    log: String,
}

impl<'a> LineSink<'a> {
    fn new(output: Option<&'a PathBuf>) -> Self {
        Self {
            output,
            log: String::new(),
        }
    }

    fn emit(&mut self, line: &str) -> Result<()> {
        match self.output {
            Some(_) => {
                self.log.push_str(line);
                self.log.push('\n');
                write_output(self.output, &self.log)
            }
            None => write_output(None, &format!("{line}\n")),
        }
    }
}
