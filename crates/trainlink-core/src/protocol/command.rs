//! Logical command model for the TMCC/Legacy/PDI protocol family.
//!
//! A [`Command`] is the typed, validated form of one directive to the layout:
//! "engine 67 forward", "switch 12 out", "power district 3 off".  Commands are
//! immutable once constructed and never cross a wire directly; they always
//! pass through the codec ([`crate::protocol::codec`]) to become byte frames.
//!
//! Parameter ranges are enforced at construction.  An out-of-range speed or
//! address fails fast with a [`ValidationError`] instead of being clamped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::device::{DeviceKey, DeviceScope};

/// Engine and train addresses occupy 7 bits on the wire.
pub const MAX_UNIT_ADDRESS: u16 = 99;
/// Route addresses occupy 5 bits on the wire.
pub const MAX_ROUTE_ADDRESS: u16 = 31;
/// Legacy absolute speed steps.
pub const MAX_ABSOLUTE_SPEED: u8 = 199;
/// Diesel RPM run levels.
pub const MAX_RPM_LEVEL: u8 = 7;
/// Momentum levels.
pub const MAX_MOMENTUM: u8 = 7;
/// Numeric keypad digits.
pub const MAX_NUMERIC: u8 = 9;
/// Extended (multi-word) command parameters are 7 bits.
pub const MAX_EXTENDED_PARAM: u8 = 0x7F;

/// Errors raised when a command is constructed with out-of-range parameters.
///
/// These never reach the wire: a command that fails validation is rejected
/// before encoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{scope} address {address} out of range 1..={max}")]
    AddressOutOfRange {
        scope: DeviceScope,
        address: u16,
        max: u16,
    },
    #[error("{what} value {value} out of range 0..={max}")]
    ValueOutOfRange {
        what: &'static str,
        value: u16,
        max: u16,
    },
}

fn check_address(scope: DeviceScope, address: u16, max: u16) -> Result<(), ValidationError> {
    if address == 0 || address > max {
        return Err(ValidationError::AddressOutOfRange {
            scope,
            address,
            max,
        });
    }
    Ok(())
}

fn check_value(what: &'static str, value: u8, max: u8) -> Result<(), ValidationError> {
    if value > max {
        return Err(ValidationError::ValueOutOfRange {
            what,
            value: value as u16,
            max: max as u16,
        });
    }
    Ok(())
}

/// Travel direction of an engine or train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Short-form Legacy operations addressed to an engine or train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineOp {
    /// Absolute speed, 0..=199.
    AbsoluteSpeed(u8),
    SetDirection(Direction),
    ToggleDirection,
    BoostSpeed,
    BrakeSpeed,
    OpenFrontCoupler,
    OpenRearCoupler,
    /// Keypad digit 0..=9.
    Numeric(u8),
    BlowHorn,
    RingBell,
    BellOn,
    BellOff,
    /// Diesel RPM run level 0..=7.
    DieselRpm(u8),
    /// Momentum level 0..=7.
    Momentum(u8),
    StopImmediate,
    StartupSequence,
    ShutdownSequence,
}

/// Extended (9-byte multi-word) Legacy operations.
///
/// A multi-word command is modeled as ONE `Command` carrying an extended
/// variant; it is never represented as two separate commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtendedOp {
    /// Railroad dialog clip, 0..=127.
    Dialog(u8),
    /// Sound effect id, 0..=127.
    SoundEffect(u8),
    /// Lighting effect id, 0..=127.
    LightingEffect(u8),
}

/// Switch (turnout) positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchOp {
    /// Straight-through path.
    Throw,
    /// Diverging path.
    Out,
}

/// Accessory operations (TMCC1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessoryOp {
    Aux1,
    Aux2,
    /// Keypad digit 0..=9.
    Numeric(u8),
}

/// Power-district operations (PDI BPC2 modules).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerOp {
    On,
    Off,
}

/// The device attribute a command mutates.
///
/// Used by the dispatcher to collapse redundant submissions (two speed
/// changes for the same engine queued back to back keep only the newer one)
/// and by the state store to suppress no-op broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Speed,
    Direction,
    Bell,
    Horn,
    Coupler,
    Numeric,
    Rpm,
    Momentum,
    Power,
    Position,
    Aux,
    Sound,
    Lighting,
    System,
}

/// One validated directive to a layout device (or to the whole layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// System-wide emergency stop.  Broadcast; not addressable.
    Halt,
    Engine { address: u16, op: EngineOp },
    Train { address: u16, op: EngineOp },
    /// Extended-encoding engine command (Legacy 9-byte form).
    EngineExtended { address: u16, op: ExtendedOp },
    /// Extended-encoding train command (Legacy 9-byte form).
    TrainExtended { address: u16, op: ExtendedOp },
    Switch { address: u16, op: SwitchOp },
    Accessory { address: u16, op: AccessoryOp },
    /// Fire a route.  Routes have a narrower 5-bit address space.
    Route { address: u16 },
    PowerDistrict { address: u16, op: PowerOp },
}

impl Command {
    /// Builds a validated engine command.
    pub fn engine(address: u16, op: EngineOp) -> Result<Self, ValidationError> {
        check_address(DeviceScope::Engine, address, MAX_UNIT_ADDRESS)?;
        validate_engine_op(&op)?;
        Ok(Command::Engine { address, op })
    }

    /// Builds a validated train command.
    pub fn train(address: u16, op: EngineOp) -> Result<Self, ValidationError> {
        check_address(DeviceScope::Train, address, MAX_UNIT_ADDRESS)?;
        validate_engine_op(&op)?;
        Ok(Command::Train { address, op })
    }

    /// Builds a validated extended (multi-word) engine command.
    pub fn engine_extended(address: u16, op: ExtendedOp) -> Result<Self, ValidationError> {
        check_address(DeviceScope::Engine, address, MAX_UNIT_ADDRESS)?;
        validate_extended_op(&op)?;
        Ok(Command::EngineExtended { address, op })
    }

    /// Builds a validated extended (multi-word) train command.
    pub fn train_extended(address: u16, op: ExtendedOp) -> Result<Self, ValidationError> {
        check_address(DeviceScope::Train, address, MAX_UNIT_ADDRESS)?;
        validate_extended_op(&op)?;
        Ok(Command::TrainExtended { address, op })
    }

    /// Builds a validated switch command.
    pub fn switch(address: u16, op: SwitchOp) -> Result<Self, ValidationError> {
        check_address(DeviceScope::Switch, address, MAX_UNIT_ADDRESS)?;
        Ok(Command::Switch { address, op })
    }

    /// Builds a validated accessory command.
    pub fn accessory(address: u16, op: AccessoryOp) -> Result<Self, ValidationError> {
        check_address(DeviceScope::Accessory, address, MAX_UNIT_ADDRESS)?;
        if let AccessoryOp::Numeric(d) = op {
            check_value("accessory numeric", d, MAX_NUMERIC)?;
        }
        Ok(Command::Accessory { address, op })
    }

    /// Builds a validated route-fire command.
    pub fn route(address: u16) -> Result<Self, ValidationError> {
        check_address(DeviceScope::Route, address, MAX_ROUTE_ADDRESS)?;
        Ok(Command::Route { address })
    }

    /// Builds a validated power-district command.
    pub fn power_district(address: u16, op: PowerOp) -> Result<Self, ValidationError> {
        check_address(DeviceScope::PowerDistrict, address, MAX_UNIT_ADDRESS)?;
        Ok(Command::PowerDistrict { address, op })
    }

    /// The device this command targets, or `None` for broadcast commands.
    pub fn device_key(&self) -> Option<DeviceKey> {
        match *self {
            Command::Halt => None,
            Command::Engine { address, .. } | Command::EngineExtended { address, .. } => {
                Some(DeviceKey::new(DeviceScope::Engine, address))
            }
            Command::Train { address, .. } | Command::TrainExtended { address, .. } => {
                Some(DeviceKey::new(DeviceScope::Train, address))
            }
            Command::Switch { address, .. } => Some(DeviceKey::new(DeviceScope::Switch, address)),
            Command::Accessory { address, .. } => {
                Some(DeviceKey::new(DeviceScope::Accessory, address))
            }
            Command::Route { address } => Some(DeviceKey::new(DeviceScope::Route, address)),
            Command::PowerDistrict { address, .. } => {
                Some(DeviceKey::new(DeviceScope::PowerDistrict, address))
            }
        }
    }

    /// The attribute this command mutates, for dedup and delta suppression.
    pub fn attribute(&self) -> AttributeKind {
        match self {
            Command::Halt => AttributeKind::System,
            Command::Engine { op, .. } | Command::Train { op, .. } => match op {
                EngineOp::AbsoluteSpeed(_)
                | EngineOp::BoostSpeed
                | EngineOp::BrakeSpeed
                | EngineOp::StopImmediate => AttributeKind::Speed,
                EngineOp::SetDirection(_) | EngineOp::ToggleDirection => AttributeKind::Direction,
                EngineOp::OpenFrontCoupler | EngineOp::OpenRearCoupler => AttributeKind::Coupler,
                EngineOp::Numeric(_) => AttributeKind::Numeric,
                EngineOp::BlowHorn => AttributeKind::Horn,
                EngineOp::RingBell | EngineOp::BellOn | EngineOp::BellOff => AttributeKind::Bell,
                EngineOp::DieselRpm(_) => AttributeKind::Rpm,
                EngineOp::Momentum(_) => AttributeKind::Momentum,
                EngineOp::StartupSequence | EngineOp::ShutdownSequence => AttributeKind::Power,
            },
            Command::EngineExtended { op, .. } | Command::TrainExtended { op, .. } => match op {
                ExtendedOp::Dialog(_) | ExtendedOp::SoundEffect(_) => AttributeKind::Sound,
                ExtendedOp::LightingEffect(_) => AttributeKind::Lighting,
            },
            Command::Switch { .. } => AttributeKind::Position,
            Command::Accessory { .. } => AttributeKind::Aux,
            Command::Route { .. } => AttributeKind::System,
            Command::PowerDistrict { .. } => AttributeKind::Power,
        }
    }
}

fn validate_engine_op(op: &EngineOp) -> Result<(), ValidationError> {
    match *op {
        EngineOp::AbsoluteSpeed(s) => check_value("absolute speed", s, MAX_ABSOLUTE_SPEED),
        EngineOp::Numeric(d) => check_value("numeric", d, MAX_NUMERIC),
        EngineOp::DieselRpm(l) => check_value("diesel rpm", l, MAX_RPM_LEVEL),
        EngineOp::Momentum(m) => check_value("momentum", m, MAX_MOMENTUM),
        _ => Ok(()),
    }
}

fn validate_extended_op(op: &ExtendedOp) -> Result<(), ValidationError> {
    match *op {
        ExtendedOp::Dialog(v) => check_value("dialog", v, MAX_EXTENDED_PARAM),
        ExtendedOp::SoundEffect(v) => check_value("sound effect", v, MAX_EXTENDED_PARAM),
        ExtendedOp::LightingEffect(v) => check_value("lighting effect", v, MAX_EXTENDED_PARAM),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
