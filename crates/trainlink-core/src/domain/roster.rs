//! The roster: every device observed or cataloged so far.
//!
//! A plain ordered map with fold-in semantics.  Sequencing, locking and
//! subscriber fan-out live with the owner (server store or client mirror);
//! the roster itself is pure data so both sides share identical apply logic.

use std::collections::BTreeMap;

use tracing::trace;

use crate::domain::device::{Device, DeviceKey};
use crate::protocol::command::Command;
use crate::protocol::frame::FrameSource;

#[derive(Debug, Clone, Default)]
pub struct Roster {
    devices: BTreeMap<DeviceKey, Device>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, key: &DeviceKey) -> Option<&Device> {
        self.devices.get(key)
    }

    /// All devices, ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Inserts or replaces a device wholesale (snapshot replay).
    pub fn put(&mut self, device: Device) {
        self.devices.insert(device.key, device);
    }

    pub fn remove(&mut self, key: &DeviceKey) -> Option<Device> {
        self.devices.remove(key)
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Records a catalog entry from a base roster record.  Creates the
    /// device if it was unknown.  Returns `true` when anything changed.
    pub fn catalog(&mut self, key: DeviceKey, name: Option<String>) -> bool {
        let device = self
            .devices
            .entry(key)
            .or_insert_with(|| Device::new(key));
        if name.is_some() && device.name != name {
            device.name = name;
            return true;
        }
        false
    }

    /// Folds one addressed command into the roster, creating the target
    /// device on first sight.
    ///
    /// Returns the updated device when its state changed, `None` when the
    /// command was redundant or carries no device address.
    pub fn apply(&mut self, command: &Command, seq: u64, origin: FrameSource) -> Option<Device> {
        let key = command.device_key()?;
        let device = self.devices.entry(key).or_insert_with(|| {
            trace!("first sight of {key}");
            Device::new(key)
        });
        if device.apply(command) {
            device.touch(seq, origin);
            return Some(device.clone());
        }
        None
    }

    /// Applies the halt broadcast to every unit, returning each device
    /// that changed.
    pub fn apply_halt(&mut self, seq: u64, origin: FrameSource) -> Vec<Device> {
        let mut changed = Vec::new();
        for device in self.devices.values_mut() {
            if device.apply_halt() {
                device.touch(seq, origin);
                changed.push(device.clone());
            }
        }
        changed
    }
}
