//! Device identity and observed state.
//!
//! The state store tracks one [`Device`] per addressable unit on the layout.
//! State is the accumulated effect of every command observed for that device,
//! tagged with a monotonically increasing update sequence so replicas can
//! order deltas.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::command::{
    AccessoryOp, Command, Direction, EngineOp, ExtendedOp, PowerOp, SwitchOp,
};
use crate::protocol::frame::FrameSource;

/// The kind of addressable unit a key refers to.
///
/// Engine 12 and train 12 are distinct devices; the scope disambiguates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceScope {
    Engine,
    Train,
    Switch,
    Accessory,
    Route,
    PowerDistrict,
}

impl fmt::Display for DeviceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceScope::Engine => "engine",
            DeviceScope::Train => "train",
            DeviceScope::Switch => "switch",
            DeviceScope::Accessory => "accessory",
            DeviceScope::Route => "route",
            DeviceScope::PowerDistrict => "power district",
        };
        f.write_str(s)
    }
}

/// Unique identity of one device: scope plus wire address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKey {
    pub scope: DeviceScope,
    pub address: u16,
}

impl DeviceKey {
    pub fn new(scope: DeviceScope, address: u16) -> Self {
        Self { scope, address }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.scope, self.address)
    }
}

/// Observed state of an engine or train.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    pub speed: Option<u8>,
    pub direction: Option<Direction>,
    pub bell_on: Option<bool>,
    pub rpm_level: Option<u8>,
    pub momentum: Option<u8>,
    pub started_up: Option<bool>,
    pub last_numeric: Option<u8>,
    pub last_dialog: Option<u8>,
    pub last_sound_effect: Option<u8>,
    pub last_lighting_effect: Option<u8>,
}

/// Observed state, by device scope.
///
/// Fields a device class does not have simply never appear for it: a switch
/// carries only its last commanded position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Unit(UnitState),
    Switch { position: Option<SwitchOp> },
    Accessory { last_op: Option<AccessoryOp> },
    Route { fired: bool },
    PowerDistrict { power_on: Option<bool> },
}

impl DeviceState {
    /// Blank state for a device of the given scope.
    pub fn initial(scope: DeviceScope) -> Self {
        match scope {
            DeviceScope::Engine | DeviceScope::Train => DeviceState::Unit(UnitState::default()),
            DeviceScope::Switch => DeviceState::Switch { position: None },
            DeviceScope::Accessory => DeviceState::Accessory { last_op: None },
            DeviceScope::Route => DeviceState::Route { fired: false },
            DeviceScope::PowerDistrict => DeviceState::PowerDistrict { power_on: None },
        }
    }
}

/// One tracked device: identity, optional catalog name, and observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub key: DeviceKey,
    /// Roster name reported by the base unit, when known.
    pub name: Option<String>,
    pub state: DeviceState,
    /// Store-global sequence of the update that produced this snapshot.
    pub update_seq: u64,
    /// Which link the last update was observed on.
    pub last_origin: Option<FrameSource>,
    /// Unix microseconds of the last update.
    pub updated_at_us: u64,
}

impl Device {
    pub fn new(key: DeviceKey) -> Self {
        Self {
            key,
            name: None,
            state: DeviceState::initial(key.scope),
            update_seq: 0,
            last_origin: None,
            updated_at_us: 0,
        }
    }

    /// Stamps the update metadata after a state change.
    pub fn touch(&mut self, seq: u64, origin: FrameSource) {
        self.update_seq = seq;
        self.last_origin = Some(origin);
        self.updated_at_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
    }

    /// Folds one command into this device's state.
    ///
    /// Returns `true` when the state actually changed.  Redundant commands
    /// (bell-on while the bell is already on) return `false` so callers can
    /// suppress no-op broadcasts.
    pub fn apply(&mut self, command: &Command) -> bool {
        match (command, &mut self.state) {
            (Command::Engine { op, .. } | Command::Train { op, .. }, DeviceState::Unit(unit)) => {
                apply_engine_op(unit, op)
            }
            (
                Command::EngineExtended { op, .. } | Command::TrainExtended { op, .. },
                DeviceState::Unit(unit),
            ) => apply_extended_op(unit, op),
            (Command::Switch { op, .. }, DeviceState::Switch { position }) => {
                replace(position, *op)
            }
            (Command::Accessory { op, .. }, DeviceState::Accessory { last_op }) => {
                // Accessory activations are momentary; every one is a change.
                *last_op = Some(*op);
                true
            }
            (Command::Route { .. }, DeviceState::Route { fired }) => {
                *fired = true;
                true
            }
            (Command::PowerDistrict { op, .. }, DeviceState::PowerDistrict { power_on }) => {
                replace(power_on, matches!(op, PowerOp::On))
            }
            _ => false,
        }
    }

    /// Applies the halt broadcast: speed to zero, RPM to idle.
    pub fn apply_halt(&mut self) -> bool {
        if let DeviceState::Unit(unit) = &mut self.state {
            let mut changed = replace(&mut unit.speed, 0);
            changed |= replace(&mut unit.rpm_level, 0);
            changed
        } else {
            false
        }
    }
}

fn replace<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    if slot.as_ref() == Some(&value) {
        return false;
    }
    *slot = Some(value);
    true
}

fn apply_engine_op(unit: &mut UnitState, op: &EngineOp) -> bool {
    match *op {
        EngineOp::AbsoluteSpeed(s) => replace(&mut unit.speed, s),
        EngineOp::SetDirection(d) => replace(&mut unit.direction, d),
        EngineOp::ToggleDirection => {
            let next = match unit.direction {
                Some(Direction::Forward) => Direction::Reverse,
                _ => Direction::Forward,
            };
            unit.direction = Some(next);
            true
        }
        // Boost and brake nudge physical speed without reporting a value.
        EngineOp::BoostSpeed | EngineOp::BrakeSpeed => false,
        EngineOp::OpenFrontCoupler | EngineOp::OpenRearCoupler | EngineOp::BlowHorn => true,
        EngineOp::Numeric(d) => {
            unit.last_numeric = Some(d);
            true
        }
        EngineOp::RingBell => {
            let next = !unit.bell_on.unwrap_or(false);
            unit.bell_on = Some(next);
            true
        }
        EngineOp::BellOn => replace(&mut unit.bell_on, true),
        EngineOp::BellOff => replace(&mut unit.bell_on, false),
        EngineOp::DieselRpm(l) => replace(&mut unit.rpm_level, l),
        EngineOp::Momentum(m) => replace(&mut unit.momentum, m),
        EngineOp::StopImmediate => replace(&mut unit.speed, 0),
        EngineOp::StartupSequence => replace(&mut unit.started_up, true),
        EngineOp::ShutdownSequence => replace(&mut unit.started_up, false),
    }
}

fn apply_extended_op(unit: &mut UnitState, op: &ExtendedOp) -> bool {
    match *op {
        ExtendedOp::Dialog(id) => {
            unit.last_dialog = Some(id);
            true
        }
        ExtendedOp::SoundEffect(id) => {
            unit.last_sound_effect = Some(id);
            true
        }
        ExtendedOp::LightingEffect(id) => replace(&mut unit.last_lighting_effect, id),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_speed_changes_state_once() {
        let mut device = Device::new(DeviceKey::new(DeviceScope::Engine, 7));
        let cmd = Command::engine(7, EngineOp::AbsoluteSpeed(40)).unwrap();
        assert!(device.apply(&cmd));
        // Same speed again is a no-op.
        assert!(!device.apply(&cmd));
    }

    #[test]
    fn test_bell_on_twice_is_suppressed() {
        let mut device = Device::new(DeviceKey::new(DeviceScope::Train, 3));
        let on = Command::train(3, EngineOp::BellOn).unwrap();
        assert!(device.apply(&on));
        assert!(!device.apply(&on));
        let off = Command::train(3, EngineOp::BellOff).unwrap();
        assert!(device.apply(&off));
    }

    #[test]
    fn test_toggle_direction_flips_from_unknown_to_forward() {
        let mut device = Device::new(DeviceKey::new(DeviceScope::Engine, 9));
        let toggle = Command::engine(9, EngineOp::ToggleDirection).unwrap();
        device.apply(&toggle);
        assert!(matches!(
            device.state,
            DeviceState::Unit(UnitState {
                direction: Some(Direction::Forward),
                ..
            })
        ));
        device.apply(&toggle);
        assert!(matches!(
            device.state,
            DeviceState::Unit(UnitState {
                direction: Some(Direction::Reverse),
                ..
            })
        ));
    }

    #[test]
    fn test_switch_position_replace() {
        let mut device = Device::new(DeviceKey::new(DeviceScope::Switch, 12));
        let out = Command::switch(12, SwitchOp::Out).unwrap();
        assert!(device.apply(&out));
        assert!(!device.apply(&out));
        let through = Command::switch(12, SwitchOp::Throw).unwrap();
        assert!(device.apply(&through));
    }

    #[test]
    fn test_halt_zeroes_speed_and_rpm() {
        let mut device = Device::new(DeviceKey::new(DeviceScope::Engine, 2));
        device.apply(&Command::engine(2, EngineOp::AbsoluteSpeed(80)).unwrap());
        device.apply(&Command::engine(2, EngineOp::DieselRpm(5)).unwrap());
        assert!(device.apply_halt());
        assert!(matches!(
            device.state,
            DeviceState::Unit(UnitState {
                speed: Some(0),
                rpm_level: Some(0),
                ..
            })
        ));
        // Already stopped: no change.
        assert!(!device.apply_halt());
    }

    #[test]
    fn test_mismatched_command_scope_is_ignored() {
        let mut device = Device::new(DeviceKey::new(DeviceScope::Switch, 5));
        let cmd = Command::engine(5, EngineOp::RingBell).unwrap();
        assert!(!device.apply(&cmd));
    }
}
