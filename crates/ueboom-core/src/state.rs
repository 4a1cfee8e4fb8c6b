//! Per-speaker power and connectivity state machine.
//!
//! The machine does no I/O. Each handler updates the [`Device`] and queues
//! [`Action`]s that the orchestrator executes afterwards; completions come
//! back in as further handler calls. Waiting for a BLE link before the
//! power-on write is therefore a recorded intent, fulfilled by whichever
//! handler observes the link, never a blocking wait.
//!
//! ```text
//!                 advertisement
//!  Disconnected ----------------> BleDiscovered -> BleConnecting
//!       ^                                              |
//!       | connect failed                 connected     v
//!       +------------------------------------------ BleConnected
//!
//!  ClassicConnected --toggle--> PoweringOff --classic lost--> (settled)
//!  BleConnected     --toggle--> PoweringOn  --write acked / classic up--> (settled)
//!  PoweringOn | PoweringOff --deadline--> Failed --transport change--> (settled)
//! ```
//!
//! Leaving `Failed` does not clear [`Device::failed`]; only an
//! acknowledgement or the next toggle does.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use ueboom_types::{Address, CharacteristicRole, Message, PowerState};

use crate::commands;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::events::{DeviceEvent, FailureReason, PowerTarget};
use crate::source::SourceAddress;
use crate::traits::AccessoryInfo;

/// Deadline for a power transition, counted from the toggle.
pub const DEFAULT_POWER_TIMEOUT: Duration = Duration::from_secs(15);

/// Side effects requested by a [`DeviceStateMachine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Connect the BLE link of this speaker.
    ConnectBle,
    /// Drop the BLE link of this speaker.
    DisconnectBle,
    /// Discover the speaker's services and characteristics.
    DiscoverGatt,
    ReadCharacteristic(CharacteristicRole),
    WriteCharacteristic {
        role: CharacteristicRole,
        value: Vec<u8>,
        ack_required: bool,
    },
    /// Send a frame on the accessory stream.
    Send(Message),
    /// Replace any pending deadline with this one.
    ArmTimer { deadline: Instant, generation: u64 },
    CancelTimer,
    /// Save the device registry.
    Persist,
    PersistSourceAddress(Address),
    Emit(DeviceEvent),
}

/// State machine for one speaker.
#[derive(Debug)]
pub struct DeviceStateMachine {
    device: Device,
    source: SourceAddress,
    power_timeout: Duration,
    ble_connect_in_flight: bool,
    /// Characteristics found by the last discovery on the current link.
    gatt: Option<HashSet<CharacteristicRole>>,
    intent: Option<PowerTarget>,
    power_write_in_flight: bool,
    timer_generation: u64,
    actions: Vec<Action>,
}

impl DeviceStateMachine {
    pub fn new(device: Device, source: SourceAddress, power_timeout: Duration) -> Self {
        Self {
            device,
            source,
            power_timeout,
            ble_connect_in_flight: false,
            gatt: None,
            intent: None,
            power_write_in_flight: false,
            timer_generation: 0,
            actions: Vec::new(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn address(&self) -> Address {
        self.device.address()
    }

    pub fn state(&self) -> PowerState {
        self.device.power_state
    }

    /// The power transition in flight, if any.
    pub fn intent(&self) -> Option<PowerTarget> {
        self.intent
    }

    pub fn is_failed(&self) -> bool {
        self.device.failed
    }

    pub fn is_ble_connecting(&self) -> bool {
        self.ble_connect_in_flight
    }

    /// Generation of the most recently armed or cancelled timer.
    pub fn timer_generation(&self) -> u64 {
        self.timer_generation
    }

    /// Drain the queued actions.
    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    pub(crate) fn set_peripheral(&mut self, peripheral: crate::traits::PeripheralHandle) {
        self.device.peripheral = Some(peripheral);
    }

    // --- BLE transport ---

    /// A scan reported this speaker.
    ///
    /// Connects at most once until the attempt settles; repeated sightings
    /// while linked or connecting only refresh the signal strength.
    pub fn on_advertisement(&mut self, rssi: Option<i16>) {
        if rssi.is_some() {
            self.device.rssi = rssi;
        }
        if self.device.ble_connected || self.ble_connect_in_flight {
            return;
        }
        if self.intent.is_none() && !self.device.classic_connected {
            self.set_state(PowerState::BleDiscovered);
        }
        self.request_ble_connect();
    }

    pub fn on_ble_connected(&mut self) {
        self.ble_connect_in_flight = false;
        if !self.device.ble_connected {
            info!("{} connected over BLE", self.address());
        }
        self.device.ble_connected = true;
        self.gatt = None;
        self.actions.push(Action::DiscoverGatt);
        self.settle();
    }

    pub fn on_ble_connect_failed(&mut self, reason: &str) {
        info!("BLE connect to {} failed: {}", self.address(), reason);
        self.ble_connect_in_flight = false;
        self.device.ble_connected = false;
        self.gatt = None;
        self.settle();
    }

    /// The speaker now advertises under a different peripheral handle.
    ///
    /// Completions for the old handle will never be delivered, so a pending
    /// connect counts as failed and a live link as dropped.
    pub fn on_peripheral_rebound(&mut self) {
        if self.ble_connect_in_flight {
            self.on_ble_connect_failed("peripheral handle replaced");
        } else if self.device.ble_connected {
            self.on_ble_disconnected();
        }
    }

    /// The BLE link dropped.
    ///
    /// Without a classic session a reconnect is attempted to find out
    /// whether the speaker is still in range.
    pub fn on_ble_disconnected(&mut self) {
        if !self.device.ble_connected {
            return;
        }
        info!("{} disconnected from BLE", self.address());
        self.device.ble_connected = false;
        self.gatt = None;
        self.power_write_in_flight = false;
        if self.device.classic_connected {
            self.settle();
        } else {
            self.request_ble_connect();
        }
    }

    /// Discovery finished; `roles` are the characteristics found.
    pub fn on_gatt_ready(&mut self, roles: impl IntoIterator<Item = CharacteristicRole>) {
        let roles: HashSet<_> = roles.into_iter().collect();
        debug!("{} exposes {} known characteristics", self.address(), roles.len());
        for role in CharacteristicRole::INFORMATIONAL {
            if roles.contains(&role) {
                self.actions.push(Action::ReadCharacteristic(role));
            }
        }
        self.gatt = Some(roles);
        self.try_power_write();
    }

    pub fn on_gatt_discovery_failed(&mut self, reason: &str) {
        warn!("GATT discovery on {} failed: {}", self.address(), reason);
        self.gatt = None;
    }

    pub fn on_characteristic_value(&mut self, role: CharacteristicRole, value: &[u8]) {
        let changed = match role {
            CharacteristicRole::Name => replace_blob(&mut self.device.name, value),
            CharacteristicRole::Serial => replace_blob(&mut self.device.serial, value),
            CharacteristicRole::Firmware => replace_blob(&mut self.device.firmware, value),
            CharacteristicRole::Battery => {
                if let Some(&level) = value.first()
                    && self.device.battery_level != Some(level)
                {
                    self.device.battery_level = Some(level);
                    self.emit(DeviceEvent::BatteryChanged {
                        address: self.address(),
                        level,
                    });
                }
                false
            }
            other => {
                debug!("Ignoring {:?} value from {}", other, self.address());
                false
            }
        };
        if changed {
            self.record_changed();
        }
    }

    pub fn on_write_confirmed(&mut self, role: CharacteristicRole) {
        if role == CharacteristicRole::Power && self.intent == Some(PowerTarget::On) {
            info!("{} acknowledged power on", self.address());
            self.complete_transition();
        }
    }

    /// A characteristic write was rejected. A failed power write ends the
    /// transition and drops the link.
    pub fn on_write_failed(&mut self, role: CharacteristicRole, reason: &str) {
        warn!("Write of {:?} on {} failed: {}", role, self.address(), reason);
        if role == CharacteristicRole::Power && self.intent == Some(PowerTarget::On) {
            self.fail_transition(FailureReason::WriteFailed(reason.to_string()));
            self.actions.push(Action::DisconnectBle);
        }
    }

    // --- Classic transport ---

    /// The accessory session for this speaker is open.
    pub fn on_classic_connected(&mut self, info: &AccessoryInfo) {
        info!("{} connected over classic Bluetooth", self.address());
        self.device.classic_connected = true;

        // The name reported by 0x16E is authoritative, accessory metadata
        // only seeds it.
        let mut changed = false;
        if self.device.name.is_none()
            && let Some(name) = &info.name
        {
            changed |= replace_blob(&mut self.device.name, name.as_bytes());
        }
        for (slot, value) in [
            (&mut self.device.model, &info.model),
            (&mut self.device.serial, &info.serial),
            (&mut self.device.firmware, &info.firmware),
        ] {
            if let Some(value) = value {
                changed |= replace_blob(slot, value.as_bytes());
            }
        }
        if changed {
            self.record_changed();
        }

        if self.intent == Some(PowerTarget::On) {
            self.complete_transition();
        }
        self.settle();

        self.actions.push(Action::Send(Message::empty(
            commands::REQUEST_SOURCE_ADDRESS,
        )));
        self.actions
            .push(Action::Send(Message::empty(commands::REQUEST_POWER_LEVEL)));
    }

    /// The accessory session closed.
    pub fn on_classic_disconnected(&mut self) {
        if !self.device.classic_connected {
            return;
        }
        info!("{} disconnected from classic Bluetooth", self.address());
        self.classic_lost();
        if self.intent == Some(PowerTarget::Off) {
            self.complete_transition();
        }
        self.settle();
    }

    /// The accessory stream broke (write rejected or read error).
    pub fn on_session_failed(&mut self, reason: &str) {
        warn!("Accessory session for {} failed: {}", self.address(), reason);
        if self.device.classic_connected {
            self.classic_lost();
        }
        if self.intent == Some(PowerTarget::Off) {
            self.fail_transition(FailureReason::WriteFailed(reason.to_string()));
        } else {
            self.settle();
        }
    }

    /// A decoded frame arrived on the accessory stream.
    pub fn on_message(&mut self, message: &Message) {
        let payload = message.payload();
        match message.command_id() {
            commands::SOURCE_ADDRESS_RESPONSE => match Address::from_slice(payload) {
                Some(source) => {
                    if self.source.replace_if_different(source) {
                        info!("Learned source address {} from {}", source, self.address());
                        self.actions.push(Action::PersistSourceAddress(source));
                        self.emit(DeviceEvent::SourceAddressLearned { source });
                    } else {
                        debug!("Source address {} unchanged", source);
                    }
                }
                None => warn!(
                    "Ignoring source address response of {} bytes from {}",
                    payload.len(),
                    self.address()
                ),
            },
            commands::NAME_RESPONSE => {
                let name = trim_trailing_nuls(payload);
                if self.device.name.as_deref() != Some(name) {
                    debug!("{} reported a new name", self.address());
                    self.device.name = Some(name.to_vec());
                    self.record_changed();
                }
            }
            other => debug!(
                "Unhandled command {:#05x} from {} ({} bytes)",
                other,
                self.address(),
                payload.len()
            ),
        }
    }

    /// A deadline armed with `generation` elapsed.
    ///
    /// Stale generations (re-armed or cancelled since) are ignored.
    pub fn on_timeout(&mut self, generation: u64) {
        if generation != self.timer_generation || self.device.pending_timeout.is_none() {
            debug!("Ignoring stale timer {} for {}", generation, self.address());
            return;
        }
        warn!(
            "{} did not respond within {:?}",
            self.address(),
            self.power_timeout
        );
        self.fail_transition(FailureReason::Timeout);
    }

    // --- User operations ---

    /// Turn the speaker off if it has a classic session, otherwise on.
    ///
    /// Powering on needs the learned source address. Without it the toggle
    /// fails immediately, sets the failure flag and arms no deadline.
    pub fn toggle_power(&mut self, now: Instant) -> Result<PowerTarget> {
        if self.intent.is_some() {
            return Err(Error::TransitionInProgress(self.address()));
        }

        if self.device.classic_connected {
            self.begin_transition(PowerTarget::Off, now);
            self.actions
                .push(Action::Send(Message::empty(commands::POWER_OFF)));
            return Ok(PowerTarget::Off);
        }

        if self.source.get().is_none() {
            warn!(
                "Cannot power on {}: source address unknown",
                self.address()
            );
            self.device.failed = true;
            self.emit(DeviceEvent::PowerTransitionFailed {
                address: self.address(),
                target: PowerTarget::On,
                reason: FailureReason::UnknownSourceAddress,
            });
            return Err(Error::UnknownSourceAddress);
        }

        self.begin_transition(PowerTarget::On, now);
        if self.gatt.is_some() {
            self.try_power_write();
        } else if !self.device.ble_connected && !self.ble_connect_in_flight {
            self.request_ble_connect();
        }
        Ok(PowerTarget::On)
    }

    /// Ask the speaker to rename itself, then to report its name.
    ///
    /// The stored name only changes when the speaker answers.
    pub fn rename(&mut self, name: &str) -> Result<()> {
        if !self.device.classic_connected {
            return Err(Error::NotConnected);
        }
        let set = commands::set_name(name)?;
        self.actions.push(Action::Send(set));
        self.actions
            .push(Action::Send(Message::empty(commands::REQUEST_NAME)));
        Ok(())
    }

    pub fn request_power_level(&mut self) -> Result<()> {
        if !self.device.classic_connected {
            return Err(Error::NotConnected);
        }
        self.actions
            .push(Action::Send(Message::empty(commands::REQUEST_POWER_LEVEL)));
        Ok(())
    }

    /// Clear the failure flag. Returns whether it was set.
    pub fn acknowledge_failure(&mut self) -> bool {
        if !self.device.failed {
            return false;
        }
        self.device.failed = false;
        self.emit(DeviceEvent::FailureCleared {
            address: self.address(),
        });
        self.settle();
        true
    }

    // --- Internals ---

    fn request_ble_connect(&mut self) {
        self.ble_connect_in_flight = true;
        self.actions.push(Action::ConnectBle);
        self.settle();
    }

    /// Clear the classic flag and, unless BLE is linked or linking, probe
    /// for presence with a BLE connect. The caller settles.
    fn classic_lost(&mut self) {
        self.device.classic_connected = false;
        if !self.device.ble_connected && !self.ble_connect_in_flight {
            self.ble_connect_in_flight = true;
            self.actions.push(Action::ConnectBle);
        }
    }

    fn try_power_write(&mut self) {
        if self.intent != Some(PowerTarget::On)
            || self.power_write_in_flight
            || self.device.classic_connected
        {
            return;
        }
        let Some(gatt) = &self.gatt else {
            return;
        };
        if !gatt.contains(&CharacteristicRole::Power) {
            self.fail_transition(FailureReason::WriteFailed(
                "power characteristic not found".into(),
            ));
            return;
        }
        let Some(source) = self.source.get() else {
            self.fail_transition(FailureReason::UnknownSourceAddress);
            return;
        };
        info!("Sending power on to {}", self.address());
        self.power_write_in_flight = true;
        self.actions.push(Action::WriteCharacteristic {
            role: CharacteristicRole::Power,
            value: commands::power_on_value(source).to_vec(),
            ack_required: true,
        });
    }

    fn begin_transition(&mut self, target: PowerTarget, now: Instant) {
        if self.device.failed {
            self.device.failed = false;
            self.emit(DeviceEvent::FailureCleared {
                address: self.address(),
            });
        }
        self.intent = Some(target);
        self.set_state(match target {
            PowerTarget::On => PowerState::PoweringOn,
            PowerTarget::Off => PowerState::PoweringOff,
        });
        self.arm_timer(now + self.power_timeout);
        self.emit(DeviceEvent::PowerTransitionStarted {
            address: self.address(),
            target,
        });
    }

    fn complete_transition(&mut self) {
        let Some(target) = self.intent.take() else {
            return;
        };
        self.cancel_timer();
        self.power_write_in_flight = false;
        self.emit(DeviceEvent::PowerTransitionCompleted {
            address: self.address(),
            target,
        });
        self.settle();
    }

    fn fail_transition(&mut self, reason: FailureReason) {
        let Some(target) = self.intent.take() else {
            return;
        };
        self.cancel_timer();
        self.power_write_in_flight = false;
        self.device.failed = true;
        self.set_state(PowerState::Failed);
        self.emit(DeviceEvent::PowerTransitionFailed {
            address: self.address(),
            target,
            reason,
        });
    }

    fn arm_timer(&mut self, deadline: Instant) {
        self.timer_generation = self.timer_generation.wrapping_add(1);
        self.device.pending_timeout = Some(deadline);
        self.actions.push(Action::ArmTimer {
            deadline,
            generation: self.timer_generation,
        });
    }

    fn cancel_timer(&mut self) {
        if self.device.pending_timeout.take().is_some() {
            self.timer_generation = self.timer_generation.wrapping_add(1);
            self.actions.push(Action::CancelTimer);
        }
    }

    /// Derive the resting state from the transport flags.
    ///
    /// A failed transition leaves `Failed` on display until the next
    /// transport change; the failure flag itself outlives it.
    fn settle(&mut self) {
        if self.intent.is_some() {
            return;
        }
        let next = if self.device.classic_connected {
            PowerState::ClassicConnected
        } else if self.device.ble_connected {
            PowerState::BleConnected
        } else if self.ble_connect_in_flight {
            PowerState::BleConnecting
        } else {
            PowerState::Disconnected
        };
        self.set_state(next);
    }

    fn set_state(&mut self, next: PowerState) {
        let from = self.device.power_state;
        if from == next {
            return;
        }
        debug!("{}: {} -> {}", self.address(), from, next);
        self.device.power_state = next;
        self.emit(DeviceEvent::StateChanged {
            address: self.address(),
            from,
            to: next,
        });
    }

    fn record_changed(&mut self) {
        self.actions.push(Action::Persist);
        self.emit(DeviceEvent::RecordUpdated {
            address: self.address(),
            info: self.device.info(),
        });
    }

    fn emit(&mut self, event: DeviceEvent) {
        self.actions.push(Action::Emit(event));
    }
}

fn replace_blob(slot: &mut Option<Vec<u8>>, value: &[u8]) -> bool {
    if value.is_empty() || slot.as_deref() == Some(value) {
        return false;
    }
    *slot = Some(value.to_vec());
    true
}

fn trim_trailing_nuls(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: Address = Address::new([0x00, 0x0D, 0x44, 0xAA, 0xBB, 0xCC]);
    const SOURCE: Address = Address::new([0xA4, 0x83, 0xE7, 0x11, 0x22, 0x33]);

    fn machine(source: Option<Address>) -> DeviceStateMachine {
        DeviceStateMachine::new(
            Device::new(ADDR),
            SourceAddress::with_value(source),
            DEFAULT_POWER_TIMEOUT,
        )
    }

    fn sends(actions: &[Action]) -> Vec<u16> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(m) => Some(m.command_id()),
                _ => None,
            })
            .collect()
    }

    fn has_timer(actions: &[Action]) -> bool {
        actions.iter().any(|a| matches!(a, Action::ArmTimer { .. }))
    }

    fn classic_connected(source: Option<Address>) -> DeviceStateMachine {
        let mut sm = machine(source);
        sm.on_classic_connected(&AccessoryInfo::default());
        sm.take_actions();
        sm
    }

    #[test]
    fn test_advertisement_connects_once() {
        let mut sm = machine(None);
        sm.on_advertisement(Some(-50));
        let actions = sm.take_actions();
        assert!(actions.contains(&Action::ConnectBle));
        assert_eq!(sm.state(), PowerState::BleConnecting);
        assert!(actions.contains(&Action::Emit(DeviceEvent::StateChanged {
            address: ADDR,
            from: PowerState::Disconnected,
            to: PowerState::BleDiscovered,
        })));

        sm.on_advertisement(Some(-40));
        assert!(sm.take_actions().is_empty());
        assert_eq!(sm.device().rssi, Some(-40));
    }

    #[test]
    fn test_ble_connect_discovers_and_reads() {
        let mut sm = machine(None);
        sm.on_advertisement(None);
        sm.on_ble_connected();
        assert_eq!(sm.state(), PowerState::BleConnected);
        assert!(sm.take_actions().contains(&Action::DiscoverGatt));

        sm.on_gatt_ready([
            CharacteristicRole::Power,
            CharacteristicRole::Name,
            CharacteristicRole::Battery,
        ]);
        let actions = sm.take_actions();
        assert_eq!(
            actions,
            vec![
                Action::ReadCharacteristic(CharacteristicRole::Name),
                Action::ReadCharacteristic(CharacteristicRole::Battery),
            ]
        );
    }

    #[test]
    fn test_ble_connect_failure_returns_to_disconnected() {
        let mut sm = machine(None);
        sm.on_advertisement(None);
        sm.on_ble_connect_failed("out of range");
        assert_eq!(sm.state(), PowerState::Disconnected);
        assert!(!sm.device().ble_connected);
        assert!(!sm.is_ble_connecting());

        // The next sighting may try again.
        sm.take_actions();
        sm.on_advertisement(None);
        assert!(sm.take_actions().contains(&Action::ConnectBle));
    }

    #[test]
    fn test_classic_connect_sends_handshake() {
        let mut sm = machine(None);
        sm.on_classic_connected(&AccessoryInfo::default());
        assert_eq!(sm.state(), PowerState::ClassicConnected);
        assert_eq!(
            sends(&sm.take_actions()),
            vec![commands::REQUEST_SOURCE_ADDRESS, commands::REQUEST_POWER_LEVEL]
        );
    }

    #[test]
    fn test_classic_connect_seeds_record() {
        let mut sm = machine(None);
        sm.on_classic_connected(&AccessoryInfo {
            name: Some("Patio".into()),
            model: Some("Blue".into()),
            serial: None,
            firmware: Some("1.2.3".into()),
        });
        let actions = sm.take_actions();
        assert!(actions.contains(&Action::Persist));
        assert_eq!(sm.device().info().name.as_deref(), Some("Patio"));
        assert_eq!(sm.device().info().firmware.as_deref(), Some("1.2.3"));
    }

    #[test]
    fn test_accessory_name_does_not_override_known_name() {
        let mut sm = machine(None);
        sm.on_message(&Message::new(commands::NAME_RESPONSE, &b"Confirmed"[..]).unwrap());
        sm.on_classic_connected(&AccessoryInfo {
            name: Some("Stale".into()),
            ..AccessoryInfo::default()
        });
        assert_eq!(sm.device().info().name.as_deref(), Some("Confirmed"));
    }

    #[test]
    fn test_classic_disconnect_probes_ble() {
        let mut sm = classic_connected(None);
        sm.on_classic_disconnected();
        assert!(sm.take_actions().contains(&Action::ConnectBle));
        assert_eq!(sm.state(), PowerState::BleConnecting);
    }

    #[test]
    fn test_classic_disconnect_while_ble_linked_does_not_probe() {
        let mut sm = machine(None);
        sm.on_advertisement(None);
        sm.on_ble_connected();
        sm.on_classic_connected(&AccessoryInfo::default());
        sm.take_actions();

        sm.on_classic_disconnected();
        assert!(!sm.take_actions().contains(&Action::ConnectBle));
        assert_eq!(sm.state(), PowerState::BleConnected);
    }

    #[test]
    fn test_ble_disconnect_probes_without_classic() {
        let mut sm = machine(None);
        sm.on_advertisement(None);
        sm.on_ble_connected();
        sm.take_actions();

        sm.on_ble_disconnected();
        assert!(sm.take_actions().contains(&Action::ConnectBle));

        // A duplicate notification does nothing.
        sm.on_ble_connect_failed("gone");
        sm.take_actions();
        sm.on_ble_disconnected();
        assert!(sm.take_actions().is_empty());
        assert_eq!(sm.state(), PowerState::Disconnected);
    }

    #[test]
    fn test_source_address_response_updates_cell() {
        let mut sm = classic_connected(None);
        let response = Message::new(commands::SOURCE_ADDRESS_RESPONSE, SOURCE.as_bytes().to_vec()).unwrap();
        sm.on_message(&response);
        let actions = sm.take_actions();
        assert!(actions.contains(&Action::PersistSourceAddress(SOURCE)));
        assert!(actions.contains(&Action::Emit(DeviceEvent::SourceAddressLearned { source: SOURCE })));
        assert_eq!(sm.source.get(), Some(SOURCE));

        // Same value again: nothing to do.
        sm.on_message(&response);
        assert!(sm.take_actions().is_empty());
    }

    #[test]
    fn test_malformed_source_address_ignored() {
        let mut sm = classic_connected(None);
        sm.on_message(&Message::new(commands::SOURCE_ADDRESS_RESPONSE, vec![1, 2, 3]).unwrap());
        assert!(sm.take_actions().is_empty());
        assert_eq!(sm.source.get(), None);
    }

    #[test]
    fn test_name_response_is_record_of_truth() {
        let mut sm = classic_connected(None);
        sm.rename("Den").unwrap();
        let actions = sm.take_actions();
        assert_eq!(sends(&actions), vec![commands::SET_NAME, commands::REQUEST_NAME]);
        assert_eq!(sm.device().name, None);

        sm.on_message(&Message::new(commands::NAME_RESPONSE, &b"Den\0"[..]).unwrap());
        let actions = sm.take_actions();
        assert!(actions.contains(&Action::Persist));
        assert_eq!(sm.device().name.as_deref(), Some(&b"Den"[..]));
    }

    #[test]
    fn test_rename_requires_classic() {
        let mut sm = machine(None);
        assert!(matches!(sm.rename("x"), Err(Error::NotConnected)));
        assert!(matches!(sm.request_power_level(), Err(Error::NotConnected)));
    }

    #[test]
    fn test_power_off_arms_timer() {
        let mut sm = classic_connected(Some(SOURCE));
        let now = Instant::now();
        assert_eq!(sm.toggle_power(now).unwrap(), PowerTarget::Off);
        let actions = sm.take_actions();
        assert_eq!(sends(&actions), vec![commands::POWER_OFF]);
        assert!(actions.contains(&Action::ArmTimer {
            deadline: now + DEFAULT_POWER_TIMEOUT,
            generation: 1,
        }));
        assert_eq!(sm.state(), PowerState::PoweringOff);
        assert_eq!(sm.device().pending_timeout, Some(now + DEFAULT_POWER_TIMEOUT));
    }

    #[test]
    fn test_power_off_acknowledged_by_disconnect() {
        let mut sm = classic_connected(Some(SOURCE));
        sm.toggle_power(Instant::now()).unwrap();
        sm.take_actions();

        sm.on_classic_disconnected();
        let actions = sm.take_actions();
        assert!(actions.contains(&Action::CancelTimer));
        assert!(actions.contains(&Action::Emit(DeviceEvent::PowerTransitionCompleted {
            address: ADDR,
            target: PowerTarget::Off,
        })));
        assert_eq!(sm.device().pending_timeout, None);
        assert_eq!(sm.intent(), None);
        assert_eq!(sm.state(), PowerState::BleConnecting);
    }

    #[test]
    fn test_power_off_timeout_fails() {
        let mut sm = classic_connected(Some(SOURCE));
        sm.toggle_power(Instant::now()).unwrap();
        sm.take_actions();

        sm.on_timeout(sm.timer_generation());
        let actions = sm.take_actions();
        assert_eq!(sm.state(), PowerState::Failed);
        assert!(sm.is_failed());
        assert_eq!(sm.device().pending_timeout, None);
        assert_eq!(sm.intent(), None);
        assert!(actions.contains(&Action::Emit(DeviceEvent::PowerTransitionFailed {
            address: ADDR,
            target: PowerTarget::Off,
            reason: FailureReason::Timeout,
        })));
    }

    #[test]
    fn test_stale_timeout_ignored() {
        let mut sm = classic_connected(Some(SOURCE));
        sm.toggle_power(Instant::now()).unwrap();
        let stale = sm.timer_generation();
        sm.on_classic_disconnected();
        sm.take_actions();

        sm.on_timeout(stale);
        assert!(sm.take_actions().is_empty());
        assert!(!sm.is_failed());
    }

    #[test]
    fn test_power_on_without_source_fails_immediately() {
        let mut sm = machine(None);
        sm.on_advertisement(None);
        sm.on_ble_connected();
        sm.take_actions();

        let err = sm.toggle_power(Instant::now()).unwrap_err();
        assert!(matches!(err, Error::UnknownSourceAddress));
        let actions = sm.take_actions();
        assert!(!has_timer(&actions));
        assert!(sm.is_failed());
        assert_eq!(sm.device().pending_timeout, None);
        assert_eq!(sm.intent(), None);
        assert_eq!(sm.state(), PowerState::BleConnected);
    }

    #[test]
    fn test_power_on_defers_until_ble_linked() {
        let mut sm = machine(Some(SOURCE));
        let now = Instant::now();
        assert_eq!(sm.toggle_power(now).unwrap(), PowerTarget::On);
        let actions = sm.take_actions();
        assert!(actions.contains(&Action::ConnectBle));
        assert!(has_timer(&actions));
        assert!(!actions.iter().any(|a| matches!(a, Action::WriteCharacteristic { .. })));
        assert_eq!(sm.state(), PowerState::PoweringOn);

        sm.on_ble_connected();
        assert_eq!(sm.state(), PowerState::PoweringOn);
        sm.on_gatt_ready([CharacteristicRole::Power]);
        let actions = sm.take_actions();
        assert!(actions.contains(&Action::WriteCharacteristic {
            role: CharacteristicRole::Power,
            value: vec![0xA4, 0x83, 0xE7, 0x11, 0x22, 0x33, 0x01],
            ack_required: true,
        }));
        // The deadline still counts from the toggle.
        assert_eq!(sm.device().pending_timeout, Some(now + DEFAULT_POWER_TIMEOUT));

        sm.on_write_confirmed(CharacteristicRole::Power);
        let actions = sm.take_actions();
        assert!(actions.contains(&Action::CancelTimer));
        assert_eq!(sm.state(), PowerState::BleConnected);
    }

    #[test]
    fn test_power_on_writes_immediately_when_ready() {
        let mut sm = machine(Some(SOURCE));
        sm.on_advertisement(None);
        sm.on_ble_connected();
        sm.on_gatt_ready([CharacteristicRole::Power]);
        sm.take_actions();

        sm.toggle_power(Instant::now()).unwrap();
        let actions = sm.take_actions();
        assert!(actions.iter().any(|a| matches!(a, Action::WriteCharacteristic { .. })));
        assert!(!actions.contains(&Action::ConnectBle));
    }

    #[test]
    fn test_power_on_acknowledged_by_classic_connect() {
        let mut sm = machine(Some(SOURCE));
        sm.toggle_power(Instant::now()).unwrap();
        sm.take_actions();

        sm.on_classic_connected(&AccessoryInfo::default());
        let actions = sm.take_actions();
        assert!(actions.contains(&Action::CancelTimer));
        assert_eq!(sm.state(), PowerState::ClassicConnected);
        assert_eq!(sm.intent(), None);
    }

    #[test]
    fn test_power_write_failure() {
        let mut sm = machine(Some(SOURCE));
        sm.toggle_power(Instant::now()).unwrap();
        sm.on_ble_connected();
        sm.on_gatt_ready([CharacteristicRole::Power]);
        sm.take_actions();

        sm.on_write_failed(CharacteristicRole::Power, "rejected");
        let actions = sm.take_actions();
        assert!(actions.contains(&Action::DisconnectBle));
        assert!(actions.contains(&Action::CancelTimer));
        assert_eq!(sm.state(), PowerState::Failed);
    }

    #[test]
    fn test_toggle_rejected_while_in_flight() {
        let mut sm = classic_connected(Some(SOURCE));
        sm.toggle_power(Instant::now()).unwrap();
        assert!(matches!(
            sm.toggle_power(Instant::now()),
            Err(Error::TransitionInProgress(a)) if a == ADDR
        ));
    }

    #[test]
    fn test_failed_state_follows_transports_until_acknowledged() {
        let mut sm = classic_connected(Some(SOURCE));
        sm.toggle_power(Instant::now()).unwrap();
        sm.on_timeout(sm.timer_generation());
        assert_eq!(sm.state(), PowerState::Failed);

        // The speaker turned off late; the state tracks the link again.
        sm.on_classic_disconnected();
        assert_eq!(sm.state(), PowerState::BleConnecting);
        assert!(sm.is_failed());
        sm.on_ble_connected();
        assert_eq!(sm.state(), PowerState::BleConnected);
        assert!(sm.is_failed());
        sm.take_actions();

        assert!(sm.acknowledge_failure());
        let actions = sm.take_actions();
        assert!(actions.contains(&Action::Emit(DeviceEvent::FailureCleared { address: ADDR })));
        assert_eq!(sm.state(), PowerState::BleConnected);
        assert!(!sm.acknowledge_failure());
    }

    #[test]
    fn test_late_classic_connect_after_failed_power_on() {
        let mut sm = machine(Some(SOURCE));
        sm.toggle_power(Instant::now()).unwrap();
        sm.on_timeout(sm.timer_generation());
        assert_eq!(sm.state(), PowerState::Failed);

        sm.on_classic_connected(&AccessoryInfo::default());
        assert_eq!(sm.state(), PowerState::ClassicConnected);
        assert!(sm.is_failed());
    }

    #[test]
    fn test_rebound_abandons_pending_connect() {
        let mut sm = machine(None);
        sm.on_advertisement(None);
        sm.take_actions();

        sm.on_peripheral_rebound();
        assert!(!sm.is_ble_connecting());
        sm.on_advertisement(None);
        assert!(sm.take_actions().contains(&Action::ConnectBle));
        assert_eq!(sm.state(), PowerState::BleConnecting);
    }

    #[test]
    fn test_rebound_drops_live_link() {
        let mut sm = machine(None);
        sm.on_advertisement(None);
        sm.on_ble_connected();
        sm.take_actions();

        sm.on_peripheral_rebound();
        assert!(!sm.device().ble_connected);
        assert!(sm.take_actions().contains(&Action::ConnectBle));
        assert_eq!(sm.state(), PowerState::BleConnecting);
    }

    #[test]
    fn test_new_toggle_clears_failure() {
        let mut sm = classic_connected(Some(SOURCE));
        sm.toggle_power(Instant::now()).unwrap();
        sm.on_timeout(sm.timer_generation());
        sm.take_actions();

        sm.toggle_power(Instant::now()).unwrap();
        let actions = sm.take_actions();
        assert!(actions.contains(&Action::Emit(DeviceEvent::FailureCleared { address: ADDR })));
        assert!(!sm.is_failed());
        assert_eq!(sm.state(), PowerState::PoweringOff);
    }

    #[test]
    fn test_rearming_replaces_timer() {
        let mut sm = classic_connected(Some(SOURCE));
        sm.toggle_power(Instant::now()).unwrap();
        let first = sm.timer_generation();
        sm.on_timeout(first);
        sm.toggle_power(Instant::now()).unwrap();
        assert!(sm.timer_generation() > first);

        // The old deadline firing late must not fail the new transition.
        sm.on_timeout(first);
        assert_eq!(sm.intent(), Some(PowerTarget::Off));
    }

    #[test]
    fn test_session_failure_during_power_off() {
        let mut sm = classic_connected(Some(SOURCE));
        sm.toggle_power(Instant::now()).unwrap();
        sm.take_actions();

        sm.on_session_failed("zero bytes written");
        let actions = sm.take_actions();
        assert!(sm.is_failed());
        assert!(!sm.device().classic_connected);
        assert!(actions.contains(&Action::ConnectBle));
    }

    #[test]
    fn test_characteristic_updates() {
        let mut sm = machine(None);
        sm.on_characteristic_value(CharacteristicRole::Serial, b"ABC123");
        assert!(sm.take_actions().contains(&Action::Persist));

        sm.on_characteristic_value(CharacteristicRole::Serial, b"ABC123");
        assert!(sm.take_actions().is_empty());

        sm.on_characteristic_value(CharacteristicRole::Battery, &[77]);
        assert_eq!(
            sm.take_actions(),
            vec![Action::Emit(DeviceEvent::BatteryChanged {
                address: ADDR,
                level: 77
            })]
        );
        assert_eq!(sm.device().battery_level, Some(77));
    }
}
