//! The single integration point for platform Bluetooth events.
//!
//! [`ConnectionOrchestrator::start`] spawns one task that owns the registry,
//! the accessory sessions and the per-speaker timers. Everything reaches it
//! through an mpsc inbox: platform callbacks via
//! [`OrchestratorHandle::dispatch`], user operations via the other handle
//! methods, and completions of the BLE operations it started itself. State
//! transitions therefore never run concurrently with each other.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ueboom_core::mock::{MemoryStore, MockCentral};
//! use ueboom_core::{ConnectionOrchestrator, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (handle, task) = ConnectionOrchestrator::start(
//!         Arc::new(MockCentral::new()),
//!         Arc::new(MemoryStore::new()),
//!         OrchestratorConfig::default(),
//!     );
//!     let mut events = handle.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{event:?}");
//!         }
//!     });
//!
//!     for speaker in handle.devices().await? {
//!         println!("{} {}", speaker.address, speaker.power_state);
//!     }
//!     handle.shutdown().await?;
//!     task.await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use ueboom_types::uuid::SERVICES;
use ueboom_types::{Address, CharacteristicMap, CharacteristicRole, DeviceRecord, Message};

use crate::advertisement::Advertisement;
use crate::device::DeviceSnapshot;
use crate::error::{Error, Result};
use crate::events::{DeviceEvent, EventDispatcher, EventReceiver, PowerTarget};
use crate::registry::DeviceRegistry;
use crate::source::SourceAddress;
use crate::state::{Action, DEFAULT_POWER_TIMEOUT, DeviceStateMachine};
use crate::stream::{AccessoryStreamAdapter, DEFAULT_READ_CHUNK};
use crate::traits::{
    AccessoryInfo, AccessorySession, BleCentral, PeripheralHandle, PersistentStore,
};

/// Orchestrator tuning.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use ueboom_core::OrchestratorConfig;
///
/// let config = OrchestratorConfig::default().power_timeout(Duration::from_secs(20));
/// assert_eq!(config.power_timeout, Duration::from_secs(20));
/// ```
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline for power transitions, counted from the toggle.
    pub power_timeout: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
    /// Capacity of the command inbox.
    pub inbox_capacity: usize,
    /// Bytes read from an accessory stream per call.
    pub read_chunk: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            power_timeout: DEFAULT_POWER_TIMEOUT,
            event_capacity: 100,
            inbox_capacity: 256,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

impl OrchestratorConfig {
    /// Set the power transition deadline.
    #[must_use]
    pub fn power_timeout(mut self, timeout: Duration) -> Self {
        self.power_timeout = timeout;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the inbox capacity.
    #[must_use]
    pub fn inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }

    /// Set the accessory read chunk size.
    #[must_use]
    pub fn read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes;
        self
    }
}

/// Notifications from the platform Bluetooth stack.
#[derive(Debug)]
pub enum PlatformEvent {
    /// A scan produced manufacturer data.
    Advertisement(Advertisement),
    BleConnected {
        peripheral: PeripheralHandle,
    },
    BleConnectFailed {
        peripheral: PeripheralHandle,
        reason: String,
    },
    BleDisconnected {
        peripheral: PeripheralHandle,
    },
    /// Discovery finished; `characteristics` are the ones found.
    GattReady {
        peripheral: PeripheralHandle,
        characteristics: Vec<Uuid>,
    },
    GattDiscoveryFailed {
        peripheral: PeripheralHandle,
        reason: String,
    },
    CharacteristicValue {
        peripheral: PeripheralHandle,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    WriteConfirmed {
        peripheral: PeripheralHandle,
        characteristic: Uuid,
    },
    WriteFailed {
        peripheral: PeripheralHandle,
        characteristic: Uuid,
        reason: String,
    },
    /// A classic accessory connected; `session` is its unopened stream.
    AccessoryConnected {
        address: Address,
        info: AccessoryInfo,
        session: Box<dyn AccessorySession>,
    },
    AccessoryDisconnected {
        address: Address,
    },
    /// The accessory stream has bytes to read.
    StreamReadable {
        address: Address,
    },
    /// The accessory stream can take more bytes.
    StreamWritable {
        address: Address,
    },
}

enum Command {
    Platform(PlatformEvent),
    TimerFired {
        address: Address,
        generation: u64,
    },
    TogglePower {
        address: Address,
        reply: oneshot::Sender<Result<PowerTarget>>,
    },
    Rename {
        address: Address,
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    RequestPowerLevel {
        address: Address,
        reply: oneshot::Sender<Result<()>>,
    },
    AcknowledgeFailure {
        address: Address,
        reply: oneshot::Sender<Result<bool>>,
    },
    Device {
        address: Address,
        reply: oneshot::Sender<Option<DeviceSnapshot>>,
    },
    Devices {
        reply: oneshot::Sender<Vec<DeviceSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum PersistJob {
    Devices(Vec<DeviceRecord>),
    SourceAddress(Address),
}

/// Cloneable handle to a running orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<Command>,
    events: EventDispatcher,
    source: SourceAddress,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Platform(event) => f.debug_tuple("Platform").field(event).finish(),
            Command::TimerFired {
                address,
                generation,
            } => f
                .debug_struct("TimerFired")
                .field("address", address)
                .field("generation", generation)
                .finish(),
            Command::TogglePower { address, .. } => write!(f, "TogglePower({address})"),
            Command::Rename { address, .. } => write!(f, "Rename({address})"),
            Command::RequestPowerLevel { address, .. } => write!(f, "RequestPowerLevel({address})"),
            Command::AcknowledgeFailure { address, .. } => {
                write!(f, "AcknowledgeFailure({address})")
            }
            Command::Device { address, .. } => write!(f, "Device({address})"),
            Command::Devices { .. } => f.write_str("Devices"),
            Command::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl OrchestratorHandle {
    /// Feed a platform notification into the orchestrator.
    pub async fn dispatch(&self, event: PlatformEvent) -> Result<()> {
        self.tx
            .send(Command::Platform(event))
            .await
            .map_err(|_| Error::OrchestratorStopped)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Error::OrchestratorStopped)?;
        rx.await.map_err(|_| Error::OrchestratorStopped)
    }

    /// Power the speaker off if it has a classic session, on otherwise.
    ///
    /// Returns the direction started. Completion or failure is reported
    /// through events.
    pub async fn toggle_power(&self, address: Address) -> Result<PowerTarget> {
        self.request(|reply| Command::TogglePower { address, reply })
            .await?
    }

    /// Rename a speaker. The new name appears once the speaker confirms it.
    pub async fn rename(&self, address: Address, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.request(|reply| Command::Rename {
            address,
            name,
            reply,
        })
        .await?
    }

    pub async fn request_power_level(&self, address: Address) -> Result<()> {
        self.request(|reply| Command::RequestPowerLevel { address, reply })
            .await?
    }

    /// Clear the failure flag. Returns whether it was set.
    pub async fn acknowledge_failure(&self, address: Address) -> Result<bool> {
        self.request(|reply| Command::AcknowledgeFailure { address, reply })
            .await?
    }

    pub async fn device(&self, address: Address) -> Result<Option<DeviceSnapshot>> {
        self.request(|reply| Command::Device { address, reply })
            .await
    }

    /// All known speakers, ordered by address.
    pub async fn devices(&self) -> Result<Vec<DeviceSnapshot>> {
        self.request(|reply| Command::Devices { reply }).await
    }

    /// The controller address learned from the speakers, if any.
    pub fn source_address(&self) -> Option<Address> {
        self.source.get()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Stop scanning, close sessions and flush persisted state.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Owner of all speaker state. See the module documentation.
pub struct ConnectionOrchestrator {
    central: Arc<dyn BleCentral>,
    store: Arc<dyn PersistentStore>,
    config: OrchestratorConfig,
    registry: DeviceRegistry,
    source: SourceAddress,
    sessions: HashMap<Address, AccessoryStreamAdapter>,
    timers: HashMap<Address, (u64, CancellationToken)>,
    characteristics: CharacteristicMap,
    events: EventDispatcher,
    inbox: mpsc::WeakSender<Command>,
    persist: Option<mpsc::UnboundedSender<PersistJob>>,
    persist_worker: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl ConnectionOrchestrator {
    /// Spawn the orchestrator task.
    ///
    /// The task loads persisted state, starts scanning once, and then runs
    /// until [`OrchestratorHandle::shutdown`] is called or every handle is
    /// dropped. Must be called from within a Tokio runtime.
    pub fn start(
        central: Arc<dyn BleCentral>,
        store: Arc<dyn PersistentStore>,
        config: OrchestratorConfig,
    ) -> (OrchestratorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.inbox_capacity.max(1));
        let events = EventDispatcher::new(config.event_capacity);
        let source = SourceAddress::new();
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let persist_worker = tokio::spawn(persistence_worker(
            Arc::clone(&store),
            persist_rx,
            events.clone(),
        ));

        let orchestrator = Self {
            central,
            store,
            registry: DeviceRegistry::new(source.clone(), config.power_timeout),
            config,
            source: source.clone(),
            sessions: HashMap::new(),
            timers: HashMap::new(),
            characteristics: CharacteristicMap::new(),
            events: events.clone(),
            inbox: tx.downgrade(),
            persist: Some(persist_tx),
            persist_worker: Some(persist_worker),
            cancel: CancellationToken::new(),
        };

        let handle = OrchestratorHandle { tx, events, source };
        let task = tokio::spawn(orchestrator.run(rx));
        (handle, task)
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        self.load().await;

        match self.central.start_scan().await {
            Ok(()) => info!("Scanning for speakers"),
            Err(e) => warn!("Failed to start scanning: {}", e),
        }

        while let Some(command) = inbox.recv().await {
            match command {
                Command::Shutdown { reply } => {
                    self.stop().await;
                    let _ = reply.send(());
                    return;
                }
                other => self.handle(other),
            }
        }

        debug!("All handles dropped");
        self.stop().await;
    }

    async fn load(&mut self) {
        let store = Arc::clone(&self.store);
        let loaded =
            tokio::task::spawn_blocking(move || (store.load_devices(), store.load_source_address()))
                .await;

        let (devices, source) = match loaded {
            Ok(result) => result,
            Err(e) => {
                warn!("Loading persisted state failed: {}", e);
                return;
            }
        };

        match devices {
            Ok(records) => {
                let added = self.registry.load(records);
                info!("Loaded {} known speakers", added);
            }
            Err(e) => {
                warn!("Failed to load known speakers: {}", e);
                self.events.send(DeviceEvent::PersistenceFailed {
                    error: e.to_string(),
                });
            }
        }

        match source {
            Ok(Some(address)) => {
                info!("Cached source address is {}", address);
                self.source.set(Some(address));
            }
            Ok(None) => debug!("No cached source address"),
            Err(e) => warn!("Failed to load source address: {}", e),
        }
    }

    async fn stop(&mut self) {
        info!("Stopping orchestrator");
        self.cancel.cancel();
        self.timers.clear();

        if let Err(e) = self.central.stop_scan().await {
            warn!("Failed to stop scanning: {}", e);
        }
        for (_, mut adapter) in self.sessions.drain() {
            adapter.close();
        }

        self.persist_devices();
        if let Some(source) = self.source.get() {
            self.persist_job(PersistJob::SourceAddress(source));
        }
        self.persist = None;
        if let Some(worker) = self.persist_worker.take()
            && let Err(e) = worker.await
        {
            warn!("Persistence worker failed: {}", e);
        }
    }

    fn handle(&mut self, command: Command) {
        trace!("Handling {:?}", command);
        match command {
            Command::Platform(event) => self.on_platform_event(event),
            Command::TimerFired {
                address,
                generation,
            } => {
                if self
                    .timers
                    .get(&address)
                    .is_some_and(|(armed, _)| *armed == generation)
                {
                    self.timers.remove(&address);
                }
                self.with_device(address, |sm| sm.on_timeout(generation));
            }
            Command::TogglePower { address, reply } => {
                let result = self.with_device_result(address, |sm| sm.toggle_power(Instant::now()));
                let _ = reply.send(result);
            }
            Command::Rename {
                address,
                name,
                reply,
            } => {
                let result = self.with_device_result(address, |sm| sm.rename(&name));
                let _ = reply.send(result);
            }
            Command::RequestPowerLevel { address, reply } => {
                let result = self.with_device_result(address, |sm| sm.request_power_level());
                let _ = reply.send(result);
            }
            Command::AcknowledgeFailure { address, reply } => {
                let result = self.with_device_result(address, |sm| Ok(sm.acknowledge_failure()));
                let _ = reply.send(result);
            }
            Command::Device { address, reply } => {
                let _ = reply.send(
                    self.registry
                        .get(&address)
                        .map(|sm| sm.device().snapshot()),
                );
            }
            Command::Devices { reply } => {
                let _ = reply.send(self.registry.snapshots());
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn on_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::Advertisement(adv) => self.on_advertisement(adv),
            PlatformEvent::BleConnected { peripheral } => {
                self.with_peripheral(&peripheral, |sm| sm.on_ble_connected());
            }
            PlatformEvent::BleConnectFailed { peripheral, reason } => {
                self.with_peripheral(&peripheral, |sm| sm.on_ble_connect_failed(&reason));
            }
            PlatformEvent::BleDisconnected { peripheral } => {
                self.with_peripheral(&peripheral, |sm| sm.on_ble_disconnected());
            }
            PlatformEvent::GattReady {
                peripheral,
                characteristics,
            } => {
                let roles: Vec<CharacteristicRole> = characteristics
                    .iter()
                    .filter_map(|uuid| self.characteristics.role(uuid))
                    .collect();
                self.with_peripheral(&peripheral, |sm| sm.on_gatt_ready(roles));
            }
            PlatformEvent::GattDiscoveryFailed { peripheral, reason } => {
                self.with_peripheral(&peripheral, |sm| sm.on_gatt_discovery_failed(&reason));
            }
            PlatformEvent::CharacteristicValue {
                peripheral,
                characteristic,
                value,
            } => {
                let Some(role) = self.characteristics.role(&characteristic) else {
                    debug!("Ignoring value of unknown characteristic {}", characteristic);
                    return;
                };
                self.with_peripheral(&peripheral, |sm| sm.on_characteristic_value(role, &value));
            }
            PlatformEvent::WriteConfirmed {
                peripheral,
                characteristic,
            } => {
                if let Some(role) = self.characteristics.role(&characteristic) {
                    self.with_peripheral(&peripheral, |sm| sm.on_write_confirmed(role));
                }
            }
            PlatformEvent::WriteFailed {
                peripheral,
                characteristic,
                reason,
            } => {
                if let Some(role) = self.characteristics.role(&characteristic) {
                    self.with_peripheral(&peripheral, |sm| sm.on_write_failed(role, &reason));
                }
            }
            PlatformEvent::AccessoryConnected {
                address,
                info,
                session,
            } => self.on_accessory_connected(address, info, session),
            PlatformEvent::AccessoryDisconnected { address } => {
                if let Some(mut adapter) = self.sessions.remove(&address) {
                    adapter.close();
                }
                self.with_device(address, |sm| sm.on_classic_disconnected());
            }
            PlatformEvent::StreamReadable { address } => self.on_stream_readable(address),
            PlatformEvent::StreamWritable { address } => self.on_stream_writable(address),
        }
    }

    fn on_advertisement(&mut self, adv: Advertisement) {
        let Some(address) = adv.address() else {
            trace!("Ignoring advertisement from {}", adv.peripheral);
            return;
        };

        let (_, created) = self.registry.get_or_create(address);
        if let Some(old) = self.registry.bind_peripheral(address, adv.peripheral.clone()) {
            debug!(
                "{} moved from peripheral {} to {}",
                address, old, adv.peripheral
            );
            let linked = self
                .registry
                .get(&address)
                .is_some_and(|sm| sm.device().ble_connected);
            self.with_device(address, |sm| sm.on_peripheral_rebound());
            if linked {
                self.release_peripheral(old);
            }
        }
        if created {
            info!("Discovered speaker {}", address);
            self.events.send(DeviceEvent::Discovered {
                address,
                rssi: adv.rssi,
            });
            self.persist_devices();
        }

        self.with_device(address, |sm| sm.on_advertisement(adv.rssi));
    }

    fn on_accessory_connected(
        &mut self,
        address: Address,
        info: AccessoryInfo,
        session: Box<dyn AccessorySession>,
    ) {
        let (_, created) = self.registry.get_or_create(address);
        if created {
            info!("New speaker {} connected", address);
            self.events.send(DeviceEvent::Discovered {
                address,
                rssi: None,
            });
        }

        if let Some(mut stale) = self.sessions.remove(&address) {
            stale.close();
        }
        let mut adapter = AccessoryStreamAdapter::new(address, session, self.config.read_chunk);
        match adapter.open() {
            Ok(()) => {
                self.sessions.insert(address, adapter);
                self.with_device(address, |sm| sm.on_classic_connected(&info));
            }
            Err(e) => warn!("{}", e),
        }

        if created {
            self.persist_devices();
        }
    }

    fn on_stream_readable(&mut self, address: Address) {
        let Some(adapter) = self.sessions.get_mut(&address) else {
            return;
        };
        match adapter.on_readable() {
            Ok(messages) if messages.is_empty() => {}
            Ok(messages) => self.with_device(address, |sm| {
                for message in &messages {
                    sm.on_message(message);
                }
            }),
            Err(e) => {
                self.session_failed(address, &e);
                self.flush(address);
            }
        }
    }

    fn on_stream_writable(&mut self, address: Address) {
        let Some(adapter) = self.sessions.get_mut(&address) else {
            return;
        };
        if let Err(e) = adapter.on_writable() {
            self.session_failed(address, &e);
            self.flush(address);
        }
    }

    // --- Routing into state machines ---

    fn with_device(&mut self, address: Address, f: impl FnOnce(&mut DeviceStateMachine)) {
        match self.registry.get_mut(&address) {
            Some(sm) => f(sm),
            None => {
                debug!("Ignoring event for unknown speaker {}", address);
                return;
            }
        }
        self.flush(address);
    }

    fn with_device_result<T>(
        &mut self,
        address: Address,
        f: impl FnOnce(&mut DeviceStateMachine) -> Result<T>,
    ) -> Result<T> {
        let result = match self.registry.get_mut(&address) {
            Some(sm) => f(sm),
            None => return Err(Error::DeviceNotFound(address.to_string())),
        };
        self.flush(address);
        result
    }

    fn with_peripheral(
        &mut self,
        peripheral: &PeripheralHandle,
        f: impl FnOnce(&mut DeviceStateMachine),
    ) {
        match self.registry.address_for(peripheral) {
            Some(address) => self.with_device(address, f),
            None => debug!("Ignoring event for unknown peripheral {}", peripheral),
        }
    }

    /// Execute queued actions until the machine stops producing new ones.
    fn flush(&mut self, address: Address) {
        loop {
            let actions = match self.registry.get_mut(&address) {
                Some(sm) => sm.take_actions(),
                None => return,
            };
            if actions.is_empty() {
                return;
            }
            for action in actions {
                self.execute(address, action);
            }
        }
    }

    fn execute(&mut self, address: Address, action: Action) {
        match action {
            Action::ConnectBle => self.connect_ble(address),
            Action::DisconnectBle => self.disconnect_ble(address),
            Action::DiscoverGatt => self.discover_gatt(address),
            Action::ReadCharacteristic(role) => self.read_characteristic(address, role),
            Action::WriteCharacteristic {
                role,
                value,
                ack_required,
            } => self.write_characteristic(address, role, value, ack_required),
            Action::Send(message) => self.send(address, &message),
            Action::ArmTimer {
                deadline,
                generation,
            } => self.arm_timer(address, deadline, generation),
            Action::CancelTimer => self.cancel_timer(address),
            Action::Persist => self.persist_devices(),
            Action::PersistSourceAddress(source) => {
                self.persist_job(PersistJob::SourceAddress(source));
            }
            Action::Emit(event) => self.events.send(event),
        }
    }

    // --- Side effects ---

    /// Run a platform operation in the background and feed its outcome back
    /// into the inbox.
    fn spawn_platform<F>(&self, operation: F)
    where
        F: Future<Output = Option<PlatformEvent>> + Send + 'static,
    {
        let Some(tx) = self.inbox.upgrade() else {
            return;
        };
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let event = tokio::select! {
                event = operation => event,
                _ = cancel.cancelled() => None,
            };
            if let Some(event) = event {
                let _ = tx.send(Command::Platform(event)).await;
            }
        });
    }

    fn connect_ble(&mut self, address: Address) {
        let Some(peripheral) = self.registry.peripheral_for(&address).cloned() else {
            debug!("No BLE peripheral seen for {} yet", address);
            if let Some(sm) = self.registry.get_mut(&address) {
                sm.on_ble_connect_failed("no advertisement seen yet");
            }
            return;
        };
        debug!("Connecting to {} over BLE", address);
        let central = Arc::clone(&self.central);
        self.spawn_platform(async move {
            Some(match central.connect(&peripheral).await {
                Ok(()) => PlatformEvent::BleConnected { peripheral },
                Err(e) => PlatformEvent::BleConnectFailed {
                    peripheral,
                    reason: e.to_string(),
                },
            })
        });
    }

    fn disconnect_ble(&mut self, address: Address) {
        let Some(peripheral) = self.registry.peripheral_for(&address).cloned() else {
            return;
        };
        let central = Arc::clone(&self.central);
        self.spawn_platform(async move {
            match central.disconnect(&peripheral).await {
                Ok(()) => Some(PlatformEvent::BleDisconnected { peripheral }),
                Err(e) => {
                    warn!("BLE disconnect from {} failed: {}", peripheral, e);
                    None
                }
            }
        });
    }

    /// Drop a link on a handle the registry no longer maps to a speaker.
    fn release_peripheral(&self, peripheral: PeripheralHandle) {
        let central = Arc::clone(&self.central);
        self.spawn_platform(async move {
            if let Err(e) = central.disconnect(&peripheral).await {
                debug!("Releasing stale peripheral {} failed: {}", peripheral, e);
            }
            None
        });
    }

    fn discover_gatt(&mut self, address: Address) {
        let Some(peripheral) = self.registry.peripheral_for(&address).cloned() else {
            return;
        };
        let central = Arc::clone(&self.central);
        let wanted: Vec<Uuid> = self.characteristics.uuids().collect();
        self.spawn_platform(async move {
            Some(
                match central
                    .discover_characteristics(&peripheral, &SERVICES, &wanted)
                    .await
                {
                    Ok(characteristics) => PlatformEvent::GattReady {
                        peripheral,
                        characteristics,
                    },
                    Err(e) => PlatformEvent::GattDiscoveryFailed {
                        peripheral,
                        reason: e.to_string(),
                    },
                },
            )
        });
    }

    fn read_characteristic(&mut self, address: Address, role: CharacteristicRole) {
        let (Some(peripheral), Some(characteristic)) = (
            self.registry.peripheral_for(&address).cloned(),
            self.characteristics.uuid(role),
        ) else {
            return;
        };
        let central = Arc::clone(&self.central);
        self.spawn_platform(async move {
            match central
                .read_characteristic(&peripheral, characteristic)
                .await
            {
                Ok(value) => Some(PlatformEvent::CharacteristicValue {
                    peripheral,
                    characteristic,
                    value,
                }),
                Err(e) => {
                    debug!("Reading {:?} from {} failed: {}", role, peripheral, e);
                    None
                }
            }
        });
    }

    fn write_characteristic(
        &mut self,
        address: Address,
        role: CharacteristicRole,
        value: Vec<u8>,
        ack_required: bool,
    ) {
        let Some(characteristic) = self.characteristics.uuid(role) else {
            return;
        };
        let Some(peripheral) = self.registry.peripheral_for(&address).cloned() else {
            if let Some(sm) = self.registry.get_mut(&address) {
                sm.on_write_failed(role, "no BLE peripheral");
            }
            return;
        };
        let central = Arc::clone(&self.central);
        self.spawn_platform(async move {
            Some(
                match central
                    .write_characteristic(&peripheral, characteristic, &value, ack_required)
                    .await
                {
                    Ok(()) => PlatformEvent::WriteConfirmed {
                        peripheral,
                        characteristic,
                    },
                    Err(e) => PlatformEvent::WriteFailed {
                        peripheral,
                        characteristic,
                        reason: e.to_string(),
                    },
                },
            )
        });
    }

    fn send(&mut self, address: Address, message: &Message) {
        let Some(adapter) = self.sessions.get_mut(&address) else {
            warn!(
                "No accessory session for {}; dropping command {:#05x}",
                address,
                message.command_id()
            );
            return;
        };
        if let Err(e) = adapter.send(message) {
            self.session_failed(address, &e);
        }
    }

    /// Tear down a broken session and run the disconnect path.
    fn session_failed(&mut self, address: Address, error: &Error) {
        if let Some(mut adapter) = self.sessions.remove(&address) {
            adapter.close();
        }
        if let Some(sm) = self.registry.get_mut(&address) {
            sm.on_session_failed(&error.to_string());
        }
    }

    fn arm_timer(&mut self, address: Address, deadline: Instant, generation: u64) {
        self.cancel_timer(address);
        let Some(tx) = self.inbox.upgrade() else {
            return;
        };
        let token = self.cancel.child_token();
        self.timers.insert(address, (generation, token.clone()));
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    let _ = tx.send(Command::TimerFired { address, generation }).await;
                }
                _ = token.cancelled() => {}
            }
        });
    }

    fn cancel_timer(&mut self, address: Address) {
        if let Some((_, token)) = self.timers.remove(&address) {
            token.cancel();
        }
    }

    fn persist_devices(&mut self) {
        let records = self.registry.records();
        self.persist_job(PersistJob::Devices(records));
    }

    fn persist_job(&mut self, job: PersistJob) {
        let Some(tx) = &self.persist else {
            return;
        };
        if tx.send(job).is_err() {
            warn!("Persistence worker is gone; change not saved");
        }
    }
}

/// Applies saves one at a time, in submission order, on the blocking pool.
async fn persistence_worker(
    store: Arc<dyn PersistentStore>,
    mut jobs: mpsc::UnboundedReceiver<PersistJob>,
    events: EventDispatcher,
) {
    while let Some(job) = jobs.recv().await {
        let store = Arc::clone(&store);
        let outcome = tokio::task::spawn_blocking(move || match job {
            PersistJob::Devices(records) => store
                .save_devices(&records)
                .map(|()| format!("{} speakers", records.len())),
            PersistJob::SourceAddress(address) => store
                .save_source_address(Some(address))
                .map(|()| format!("source address {address}")),
        })
        .await;

        match outcome {
            Ok(Ok(what)) => debug!("Saved {}", what),
            Ok(Err(e)) => {
                warn!("Failed to persist state: {}", e);
                events.send(DeviceEvent::PersistenceFailed {
                    error: e.to_string(),
                });
            }
            Err(e) => warn!("Persistence task failed: {}", e),
        }
    }
}
