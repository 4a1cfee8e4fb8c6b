//! Change notifications for the presentation layer.
//!
//! Every observable change of a speaker is emitted as a [`DeviceEvent`]
//! through a broadcast channel owned by the orchestrator.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use ueboom_types::{Address, DeviceInfo, PowerState};

/// Direction of a power transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerTarget {
    On,
    Off,
}

/// Why a power transition failed.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
#[non_exhaustive]
pub enum FailureReason {
    /// Power-on requested before the handshake taught us our address.
    UnknownSourceAddress,
    /// No acknowledgement before the deadline.
    Timeout,
    /// The power write or command could not be delivered.
    WriteFailed(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::UnknownSourceAddress => f.write_str("source address unknown"),
            FailureReason::Timeout => f.write_str("timed out"),
            FailureReason::WriteFailed(reason) => write!(f, "write failed: {reason}"),
        }
    }
}

/// Events emitted by the orchestrator.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceEvent {
    /// A speaker was seen for the first time this run.
    Discovered { address: Address, rssi: Option<i16> },
    /// The power/connectivity state changed.
    StateChanged {
        address: Address,
        from: PowerState,
        to: PowerState,
    },
    /// Name, serial, model or firmware changed.
    RecordUpdated { address: Address, info: DeviceInfo },
    /// Battery level changed.
    BatteryChanged { address: Address, level: u8 },
    /// A power transition was started.
    PowerTransitionStarted { address: Address, target: PowerTarget },
    /// A power transition was acknowledged by the speaker.
    PowerTransitionCompleted { address: Address, target: PowerTarget },
    /// A power transition failed; the failure flag is now set.
    PowerTransitionFailed {
        address: Address,
        target: PowerTarget,
        reason: FailureReason,
    },
    /// The failure flag was cleared.
    FailureCleared { address: Address },
    /// The controller learned (or re-learned) its own address.
    SourceAddressLearned { source: Address },
    /// Writing persisted state failed. The run continues in memory.
    PersistenceFailed { error: String },
}

impl DeviceEvent {
    /// The speaker this event is about, if any.
    pub fn address(&self) -> Option<Address> {
        match self {
            DeviceEvent::Discovered { address, .. }
            | DeviceEvent::StateChanged { address, .. }
            | DeviceEvent::RecordUpdated { address, .. }
            | DeviceEvent::BatteryChanged { address, .. }
            | DeviceEvent::PowerTransitionStarted { address, .. }
            | DeviceEvent::PowerTransitionCompleted { address, .. }
            | DeviceEvent::PowerTransitionFailed { address, .. }
            | DeviceEvent::FailureCleared { address } => Some(*address),
            DeviceEvent::SourceAddressLearned { .. } | DeviceEvent::PersistenceFailed { .. } => {
                None
            }
        }
    }
}

/// Sender for device events.
pub type EventSender = broadcast::Sender<DeviceEvent>;

/// Receiver for device events.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: DeviceEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
