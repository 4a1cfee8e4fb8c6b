//! The authoritative map from hardware address to speaker.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use ueboom_types::{Address, DeviceRecord};

use crate::device::{Device, DeviceSnapshot};
use crate::source::SourceAddress;
use crate::state::DeviceStateMachine;
use crate::traits::PeripheralHandle;

/// All speakers known this run, each with its state machine.
///
/// Entries are created from persisted records or on first observation and
/// are never removed; an absent speaker is represented by its state.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: HashMap<Address, DeviceStateMachine>,
    peripherals: HashMap<PeripheralHandle, Address>,
    source: SourceAddress,
    power_timeout: Duration,
}

impl DeviceRegistry {
    pub fn new(source: SourceAddress, power_timeout: Duration) -> Self {
        Self {
            devices: HashMap::new(),
            peripherals: HashMap::new(),
            source,
            power_timeout,
        }
    }

    /// Add persisted records. Returns how many were added.
    ///
    /// Records with an out-of-range address or an address already present
    /// are skipped.
    pub fn load(&mut self, records: impl IntoIterator<Item = DeviceRecord>) -> usize {
        let mut added = 0;
        for record in records {
            let raw = record.address;
            let Some(device) = Device::from_record(record) else {
                warn!("Skipping stored speaker with invalid address {:#x}", raw);
                continue;
            };
            let address = device.address();
            if self.devices.contains_key(&address) {
                debug!("Skipping duplicate stored speaker {}", address);
                continue;
            }
            self.devices.insert(
                address,
                DeviceStateMachine::new(device, self.source.clone(), self.power_timeout),
            );
            added += 1;
        }
        added
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.devices.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<&DeviceStateMachine> {
        self.devices.get(address)
    }

    pub fn get_mut(&mut self, address: &Address) -> Option<&mut DeviceStateMachine> {
        self.devices.get_mut(address)
    }

    /// Look up a speaker, creating it if this is the first observation.
    ///
    /// The flag is `true` when the entry was created.
    pub fn get_or_create(&mut self, address: Address) -> (&mut DeviceStateMachine, bool) {
        let mut created = false;
        let source = &self.source;
        let power_timeout = self.power_timeout;
        let machine = self.devices.entry(address).or_insert_with(|| {
            created = true;
            debug!("New speaker {}", address);
            DeviceStateMachine::new(Device::new(address), source.clone(), power_timeout)
        });
        (machine, created)
    }

    /// Remember which BLE peripheral carries `address`.
    ///
    /// Returns the handle this one replaced. Events for the replaced handle
    /// no longer reach the speaker, so the caller must abandon whatever was
    /// pending on it.
    pub fn bind_peripheral(
        &mut self,
        address: Address,
        peripheral: PeripheralHandle,
    ) -> Option<PeripheralHandle> {
        if self.peripherals.get(&peripheral) == Some(&address) {
            return None;
        }
        let machine = self.devices.get_mut(&address)?;
        let old = machine.device().peripheral.clone();
        if let Some(old) = &old {
            self.peripherals.remove(old);
        }
        machine.set_peripheral(peripheral.clone());
        self.peripherals.insert(peripheral, address);
        old
    }

    /// The speaker a peripheral belongs to.
    pub fn address_for(&self, peripheral: &PeripheralHandle) -> Option<Address> {
        self.peripherals.get(peripheral).copied()
    }

    pub fn peripheral_for(&self, address: &Address) -> Option<&PeripheralHandle> {
        self.devices.get(address)?.device().peripheral.as_ref()
    }

    /// Persisted form of every speaker, ordered by address.
    pub fn records(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<_> = self.devices.values().map(|m| m.device().record()).collect();
        records.sort_by_key(|r| r.address);
        records
    }

    /// Snapshot of every speaker, ordered by address.
    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let mut snapshots: Vec<_> = self
            .devices
            .values()
            .map(|m| m.device().snapshot())
            .collect();
        snapshots.sort_by_key(|s| s.address);
        snapshots
    }
}
