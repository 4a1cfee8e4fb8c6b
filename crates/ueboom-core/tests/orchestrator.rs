//! End-to-end orchestrator tests against the in-memory collaborators.
//!
//! Time is paused, so power deadlines elapse as soon as every task is idle.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use ueboom_core::commands::{
    NAME_RESPONSE, POWER_OFF, REQUEST_NAME, REQUEST_POWER_LEVEL, REQUEST_SOURCE_ADDRESS, SET_NAME,
    SOURCE_ADDRESS_RESPONSE, power_on_value,
};
use ueboom_core::mock::{MemoryStore, MockCentral, MockSession};
use ueboom_core::uuid::POWER;
use ueboom_core::{
    AccessoryInfo, Address, Advertisement, ConnectionOrchestrator, DeviceEvent, DeviceRecord,
    Error, EventReceiver, FailureReason, Message, OrchestratorConfig, OrchestratorHandle,
    PeripheralHandle, PlatformEvent, PowerState, PowerTarget,
};

const SPEAKER: Address = Address::new([0x00, 0x0D, 0x44, 0xAA, 0xBB, 0xCC]);
const SOURCE: Address = Address::new([0xA4, 0x83, 0xE7, 0x11, 0x22, 0x33]);
const WAIT: Duration = Duration::from_secs(120);

struct Harness {
    central: Arc<MockCentral>,
    store: Arc<MemoryStore>,
    handle: OrchestratorHandle,
    events: EventReceiver,
    task: tokio::task::JoinHandle<()>,
}

fn start(store: MemoryStore) -> Harness {
    let central = Arc::new(MockCentral::new());
    let store = Arc::new(store);
    let (handle, task) = ConnectionOrchestrator::start(
        central.clone(),
        store.clone(),
        OrchestratorConfig::default(),
    );
    let events = handle.subscribe();
    Harness {
        central,
        store,
        handle,
        events,
        task,
    }
}

fn known_speaker() -> MemoryStore {
    MemoryStore::new().with_devices(vec![DeviceRecord::new(SPEAKER)])
}

fn advertisement() -> PlatformEvent {
    advertisement_from("peripheral-1")
}

fn advertisement_from(peripheral: &str) -> PlatformEvent {
    PlatformEvent::Advertisement(Advertisement::new(
        PeripheralHandle::new(peripheral),
        vec![0x00, 0x0D, 0x44, 0xAA, 0xBB, 0xCC, 0x01, 0x02],
        Some(-60),
    ))
}

async fn wait_for(
    events: &mut EventReceiver,
    mut matches: impl FnMut(&DeviceEvent) -> bool,
) -> DeviceEvent {
    timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => {}
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await
    .expect("expected event was not emitted")
}

async fn wait_for_state(events: &mut EventReceiver, state: PowerState) {
    wait_for(events, |e| matches!(e, DeviceEvent::StateChanged { to, .. } if *to == state)).await;
}

/// Connect `session` as the speaker's classic accessory.
async fn connect_classic(h: &mut Harness, session: &MockSession) {
    h.handle
        .dispatch(PlatformEvent::AccessoryConnected {
            address: SPEAKER,
            info: AccessoryInfo {
                name: Some("Boom".into()),
                model: Some("UE BOOM 3".into()),
                ..AccessoryInfo::default()
            },
            session: Box::new(session.clone()),
        })
        .await
        .unwrap();
    wait_for_state(&mut h.events, PowerState::ClassicConnected).await;
}

fn sent_commands(session: &MockSession) -> Vec<u16> {
    session
        .written_messages()
        .iter()
        .map(Message::command_id)
        .collect()
}

async fn shutdown(h: Harness) -> (Arc<MockCentral>, Arc<MemoryStore>) {
    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
    (h.central, h.store)
}

#[tokio::test(start_paused = true)]
async fn test_scan_starts_once() {
    let h = start(MemoryStore::new());
    assert!(h.handle.devices().await.unwrap().is_empty());
    assert!(h.central.is_scanning());

    let (central, _) = shutdown(h).await;
    let calls = central.calls();
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, ueboom_core::mock::CentralCall::StartScan))
            .count(),
        1
    );
    assert!(!central.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_advertisement_discovers_and_connects_once() {
    let mut h = start(MemoryStore::new());

    h.handle.dispatch(advertisement()).await.unwrap();
    h.handle.dispatch(advertisement()).await.unwrap();

    let discovered = wait_for(&mut h.events, |e| matches!(e, DeviceEvent::Discovered { .. })).await;
    assert_eq!(
        discovered,
        DeviceEvent::Discovered {
            address: SPEAKER,
            rssi: Some(-60)
        }
    );
    wait_for_state(&mut h.events, PowerState::BleConnected).await;

    // Sightings while linked do not reconnect.
    h.handle.dispatch(advertisement()).await.unwrap();
    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert!(snapshot.ble_connected);
    assert_eq!(h.central.connect_count(), 1);

    let (_, store) = shutdown(h).await;
    assert_eq!(store.devices(), vec![DeviceRecord::new(SPEAKER)]);
}

#[tokio::test(start_paused = true)]
async fn test_unrecognised_advertisement_is_ignored() {
    let h = start(MemoryStore::new());
    h.handle
        .dispatch(PlatformEvent::Advertisement(Advertisement::new(
            PeripheralHandle::new("headphones"),
            vec![0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC],
            None,
        )))
        .await
        .unwrap();
    assert!(h.handle.devices().await.unwrap().is_empty());
    assert_eq!(h.central.connect_count(), 0);
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_battery_read_after_gatt_discovery() {
    let mut h = start(MemoryStore::new());
    h.central.set_value(ueboom_core::uuid::BATTERY_LEVEL, vec![87]);

    h.handle.dispatch(advertisement()).await.unwrap();
    let event = wait_for(&mut h.events, |e| matches!(e, DeviceEvent::BatteryChanged { .. })).await;
    assert_eq!(
        event,
        DeviceEvent::BatteryChanged {
            address: SPEAKER,
            level: 87
        }
    );
    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert_eq!(snapshot.battery_level, Some(87));
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_classic_handshake_learns_source_address() {
    let mut h = start(MemoryStore::new());
    let session = MockSession::new();
    connect_classic(&mut h, &session).await;

    assert_eq!(
        sent_commands(&session),
        vec![REQUEST_SOURCE_ADDRESS, REQUEST_POWER_LEVEL]
    );
    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert_eq!(snapshot.info.name.as_deref(), Some("Boom"));
    assert_eq!(snapshot.info.model.as_deref(), Some("UE BOOM 3"));

    let response = Message::new(SOURCE_ADDRESS_RESPONSE, SOURCE.as_bytes().to_vec()).unwrap();
    session.push_message(&response);
    h.handle
        .dispatch(PlatformEvent::StreamReadable { address: SPEAKER })
        .await
        .unwrap();
    let event = wait_for(&mut h.events, |e| {
        matches!(e, DeviceEvent::SourceAddressLearned { .. })
    })
    .await;
    assert_eq!(event, DeviceEvent::SourceAddressLearned { source: SOURCE });
    assert_eq!(h.handle.source_address(), Some(SOURCE));

    let (_, store) = shutdown(h).await;
    assert_eq!(store.source_address(), Some(SOURCE));
    assert!(session.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_cached_source_address_is_loaded() {
    let h = start(known_speaker().with_source_address(SOURCE));
    // Any round trip guarantees loading finished.
    assert_eq!(h.handle.devices().await.unwrap().len(), 1);
    assert_eq!(h.handle.source_address(), Some(SOURCE));
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_power_off_completes_when_session_closes() {
    let mut h = start(MemoryStore::new());
    let session = MockSession::new();
    connect_classic(&mut h, &session).await;

    assert_eq!(
        h.handle.toggle_power(SPEAKER).await.unwrap(),
        PowerTarget::Off
    );
    assert_eq!(sent_commands(&session).last(), Some(&POWER_OFF));

    h.handle
        .dispatch(PlatformEvent::AccessoryDisconnected { address: SPEAKER })
        .await
        .unwrap();
    wait_for(&mut h.events, |e| {
        matches!(
            e,
            DeviceEvent::PowerTransitionCompleted {
                target: PowerTarget::Off,
                ..
            }
        )
    })
    .await;

    // The deadline was cancelled with the transition.
    tokio::time::sleep(Duration::from_secs(30)).await;
    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert!(!snapshot.failed);
    assert!(!snapshot.transition_pending);
    assert_eq!(snapshot.power_state, PowerState::Disconnected);
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_power_off_times_out() {
    let mut h = start(MemoryStore::new());
    let session = MockSession::new();
    connect_classic(&mut h, &session).await;

    h.handle.toggle_power(SPEAKER).await.unwrap();
    let event = wait_for(&mut h.events, |e| {
        matches!(e, DeviceEvent::PowerTransitionFailed { .. })
    })
    .await;
    assert_eq!(
        event,
        DeviceEvent::PowerTransitionFailed {
            address: SPEAKER,
            target: PowerTarget::Off,
            reason: FailureReason::Timeout,
        }
    );

    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert_eq!(snapshot.power_state, PowerState::Failed);
    assert!(snapshot.failed);

    assert!(h.handle.acknowledge_failure(SPEAKER).await.unwrap());
    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert_eq!(snapshot.power_state, PowerState::ClassicConnected);
    assert!(!h.handle.acknowledge_failure(SPEAKER).await.unwrap());
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_power_on_without_source_address_fails_immediately() {
    let h = start(known_speaker());

    let result = h.handle.toggle_power(SPEAKER).await;
    assert!(matches!(result, Err(Error::UnknownSourceAddress)));

    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert!(snapshot.failed);
    assert!(!snapshot.transition_pending);
    assert_eq!(h.central.connect_count(), 0);
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_power_on_waits_for_ble_then_writes() {
    let mut h = start(known_speaker().with_source_address(SOURCE));

    assert_eq!(h.handle.toggle_power(SPEAKER).await.unwrap(), PowerTarget::On);
    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert_eq!(snapshot.power_state, PowerState::PoweringOn);
    assert!(h.central.writes().is_empty());

    h.handle.dispatch(advertisement()).await.unwrap();
    wait_for(&mut h.events, |e| {
        matches!(
            e,
            DeviceEvent::PowerTransitionCompleted {
                target: PowerTarget::On,
                ..
            }
        )
    })
    .await;

    assert_eq!(
        h.central.writes(),
        vec![(POWER, power_on_value(SOURCE).to_vec())]
    );
    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert_eq!(snapshot.power_state, PowerState::BleConnected);
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_power_on_write_failure_fails_transition() {
    let mut h = start(known_speaker().with_source_address(SOURCE));
    h.central.set_write_failure(Some("rejected"));

    h.handle.dispatch(advertisement()).await.unwrap();
    wait_for_state(&mut h.events, PowerState::BleConnected).await;
    h.handle.toggle_power(SPEAKER).await.unwrap();

    let event = wait_for(&mut h.events, |e| {
        matches!(e, DeviceEvent::PowerTransitionFailed { .. })
    })
    .await;
    assert!(matches!(
        event,
        DeviceEvent::PowerTransitionFailed {
            reason: FailureReason::WriteFailed(_),
            ..
        }
    ));
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_power_on_times_out_while_connecting() {
    let mut h = start(known_speaker().with_source_address(SOURCE));
    h.central.set_connect_latency(Duration::from_secs(60));

    h.handle.dispatch(advertisement()).await.unwrap();
    h.handle.toggle_power(SPEAKER).await.unwrap();

    let event = wait_for(&mut h.events, |e| {
        matches!(e, DeviceEvent::PowerTransitionFailed { .. })
    })
    .await;
    assert_eq!(
        event,
        DeviceEvent::PowerTransitionFailed {
            address: SPEAKER,
            target: PowerTarget::On,
            reason: FailureReason::Timeout,
        }
    );
    // Still a single attempt in flight.
    assert_eq!(h.central.connect_count(), 1);
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_power_on_timeout_then_late_classic_connect() {
    let mut h = start(known_speaker().with_source_address(SOURCE));
    h.central.set_connect_latency(Duration::from_secs(60));

    h.handle.dispatch(advertisement()).await.unwrap();
    h.handle.toggle_power(SPEAKER).await.unwrap();
    wait_for_state(&mut h.events, PowerState::Failed).await;

    // The speaker came up after the deadline.
    let session = MockSession::new();
    connect_classic(&mut h, &session).await;

    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert_eq!(snapshot.power_state, PowerState::ClassicConnected);
    assert!(snapshot.failed);

    assert!(h.handle.acknowledge_failure(SPEAKER).await.unwrap());
    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert!(!snapshot.failed);
    assert_eq!(snapshot.power_state, PowerState::ClassicConnected);
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_new_peripheral_handle_while_connecting() {
    let mut h = start(known_speaker());
    h.central.set_connect_latency(Duration::from_secs(5));

    h.handle.dispatch(advertisement_from("peripheral-1")).await.unwrap();
    h.handle.dispatch(advertisement_from("peripheral-2")).await.unwrap();
    wait_for_state(&mut h.events, PowerState::BleConnected).await;

    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert!(snapshot.ble_connected);
    assert_eq!(h.central.connect_count(), 2);
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_new_peripheral_handle_while_linked() {
    let mut h = start(known_speaker());

    h.handle.dispatch(advertisement_from("peripheral-1")).await.unwrap();
    wait_for_state(&mut h.events, PowerState::BleConnected).await;
    h.handle.dispatch(advertisement_from("peripheral-2")).await.unwrap();
    wait_for_state(&mut h.events, PowerState::BleConnected).await;

    let (central, _) = shutdown(h).await;
    let calls = central.calls();
    assert!(calls.contains(&ueboom_core::mock::CentralCall::Disconnect(
        PeripheralHandle::new("peripheral-1")
    )));
    assert!(calls.contains(&ueboom_core::mock::CentralCall::Connect(
        PeripheralHandle::new("peripheral-2")
    )));
}

#[tokio::test(start_paused = true)]
async fn test_second_toggle_is_rejected_while_pending() {
    let mut h = start(MemoryStore::new());
    let session = MockSession::new();
    connect_classic(&mut h, &session).await;

    h.handle.toggle_power(SPEAKER).await.unwrap();
    let result = h.handle.toggle_power(SPEAKER).await;
    assert!(matches!(result, Err(Error::TransitionInProgress(a)) if a == SPEAKER));
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_rename_round_trip() {
    let mut h = start(MemoryStore::new());
    let session = MockSession::new();
    connect_classic(&mut h, &session).await;

    h.handle.rename(SPEAKER, "Patio").await.unwrap();
    let written = session.written_messages();
    let set = written
        .iter()
        .find(|m| m.command_id() == SET_NAME)
        .expect("set name sent");
    assert_eq!(&set.payload()[..], &b"Patio\0"[..]);
    assert_eq!(sent_commands(&session).last(), Some(&REQUEST_NAME));

    session.push_message(&Message::new(NAME_RESPONSE, b"Patio".to_vec()).unwrap());
    h.handle
        .dispatch(PlatformEvent::StreamReadable { address: SPEAKER })
        .await
        .unwrap();
    wait_for(&mut h.events, |e| {
        matches!(e, DeviceEvent::RecordUpdated { info, .. } if info.name.as_deref() == Some("Patio"))
    })
    .await;

    let (_, store) = shutdown(h).await;
    assert_eq!(store.devices()[0].name.as_deref(), Some(&b"Patio"[..]));
}

#[tokio::test(start_paused = true)]
async fn test_rename_requires_classic_session() {
    let h = start(known_speaker());
    assert!(matches!(
        h.handle.rename(SPEAKER, "Patio").await,
        Err(Error::NotConnected)
    ));
    let unknown = Address::new([0x88, 0xC6, 0x26, 0, 0, 9]);
    assert!(matches!(
        h.handle.rename(unknown, "Patio").await,
        Err(Error::DeviceNotFound(_))
    ));
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_stalled_stream_tears_down_session() {
    let mut h = start(MemoryStore::new());
    let session = MockSession::new();
    session.set_stalled(true);

    h.handle
        .dispatch(PlatformEvent::AccessoryConnected {
            address: SPEAKER,
            info: AccessoryInfo::default(),
            session: Box::new(session.clone()),
        })
        .await
        .unwrap();
    wait_for_state(&mut h.events, PowerState::ClassicConnected).await;
    wait_for_state(&mut h.events, PowerState::Disconnected).await;

    assert!(session.is_closed());
    let snapshot = h.handle.device(SPEAKER).await.unwrap().unwrap();
    assert!(!snapshot.classic_connected);
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_persistence_failure_is_reported() {
    let store = MemoryStore::new();
    store.set_fail_saves(true);
    let mut h = start(store);

    h.handle.dispatch(advertisement()).await.unwrap();
    wait_for(&mut h.events, |e| {
        matches!(e, DeviceEvent::PersistenceFailed { .. })
    })
    .await;
    // The speaker is still tracked in memory.
    assert_eq!(h.handle.devices().await.unwrap().len(), 1);
    shutdown(h).await;
}

#[tokio::test(start_paused = true)]
async fn test_dropping_every_handle_stops_the_task() {
    let h = start(known_speaker());
    let Harness {
        handle,
        task,
        store,
        ..
    } = h;
    handle.devices().await.unwrap();
    drop(handle);

    timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(store.devices(), vec![DeviceRecord::new(SPEAKER)]);
}

#[tokio::test(start_paused = true)]
async fn test_handle_reports_stopped_after_shutdown() {
    let h = start(MemoryStore::new());
    let handle = h.handle.clone();
    shutdown(h).await;

    assert!(!handle.is_running());
    assert!(matches!(
        handle.devices().await,
        Err(Error::OrchestratorStopped)
    ));
}
