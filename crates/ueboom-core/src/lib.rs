//! Connection orchestration for UE Boom Bluetooth speakers.
//!
//! Speakers are reached over two transports. A classic accessory session
//! carries the framed control protocol (name, power-off, the controller's
//! own address). BLE carries advertisements, device information and the
//! power-on write, which works while the speaker is asleep.
//!
//! # Features
//!
//! - **Recognition**: pull the speaker address out of manufacturer data
//! - **Framing**: [`AccessoryStreamAdapter`] turns a byte stream into
//!   [`Message`]s and back
//! - **Power control**: toggle with a deadline and a sticky failure state
//! - **Registry**: speakers are remembered across runs through a
//!   [`PersistentStore`]
//! - **Events**: every state change is broadcast as a [`DeviceEvent`]
//!
//! # Architecture
//!
//! Each speaker has a [`DeviceStateMachine`] that consumes transport events
//! and emits [`Action`]s without doing any I/O. The
//! [`ConnectionOrchestrator`] task owns all machines, executes their actions
//! against a [`BleCentral`] and the accessory sessions, and feeds outcomes
//! back in. [`BtleplugCentral`] is the BLE implementation; the [`mock`]
//! module has in-memory ones.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use ueboom_core::mock::MemoryStore;
//! use ueboom_core::{BleConfig, BtleplugCentral, ConnectionOrchestrator, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let central = Arc::new(BtleplugCentral::new(BleConfig::default()).await?);
//!     let (handle, task) = ConnectionOrchestrator::start(
//!         central.clone(),
//!         Arc::new(MemoryStore::new()),
//!         OrchestratorConfig::default(),
//!     );
//!     let cancel = CancellationToken::new();
//!     central.spawn_event_pump(handle.clone(), cancel.clone());
//!
//!     let mut events = handle.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!
//!     cancel.cancel();
//!     handle.shutdown().await?;
//!     task.await?;
//!     Ok(())
//! }
//! ```

pub mod advertisement;
pub mod ble;
pub mod commands;
pub mod device;
pub mod error;
pub mod events;
pub mod mock;
pub mod orchestrator;
pub mod registry;
pub mod source;
pub mod state;
pub mod stream;
pub mod traits;
pub mod util;

pub use ueboom_types::types;
pub use ueboom_types::uuid;
pub use ueboom_types::{Address, DeviceInfo, DeviceRecord, Message, PowerState};

pub use advertisement::{Advertisement, extract_address};
pub use ble::{BleConfig, BtleplugCentral, DiscoveredSpeaker, scan_for_speakers};
pub use device::{Device, DeviceSnapshot};
pub use error::{Error, Result};
pub use events::{
    DeviceEvent, EventDispatcher, EventReceiver, EventSender, FailureReason, PowerTarget,
};
pub use orchestrator::{
    ConnectionOrchestrator, OrchestratorConfig, OrchestratorHandle, PlatformEvent,
};
pub use registry::DeviceRegistry;
pub use source::SourceAddress;
pub use state::{Action, DeviceStateMachine};
pub use stream::AccessoryStreamAdapter;
pub use traits::{AccessoryInfo, AccessorySession, BleCentral, PeripheralHandle, PersistentStore};
