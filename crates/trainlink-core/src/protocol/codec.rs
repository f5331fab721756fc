//! TMCC/Legacy wire codec.
//!
//! Three frame shapes share the serial link:
//!
//! * TMCC1 short frame, 4 bytes: `[0xFE, word_hi, word_lo, checksum]`.
//!   The 16-bit word packs a 2-bit device ident, a 7-bit address shifted
//!   left by 7, and a 7-bit operation field.
//! * Legacy short frame, 4 bytes: `[0xF8|0xF9, word_hi, word_lo, checksum]`.
//!   0xF8 addresses an engine, 0xF9 a train.  The word packs the 7-bit
//!   address shifted left by 9 and a 9-bit operation field.
//! * Legacy extended frame, 10 bytes: `[0xFA, unit, addr, 0xFB, kind, param,
//!   0xFB, 0, 0, checksum]`.  Three two-byte words after the marker, the
//!   second and third introduced by the 0xFB continuation marker.
//!
//! Every frame ends in a two's-complement checksum byte: the sum of all
//! frame bytes including the checksum is zero mod 256.  A flipped bit
//! anywhere in the frame fails the check and the frame is discarded.

use crate::protocol::command::{
    AccessoryOp, Command, Direction, EngineOp, ExtendedOp, PowerOp, SwitchOp,
};
use crate::protocol::pdi::{self, PdiMessage};
use crate::protocol::ProtocolError;

// ── Frame markers ─────────────────────────────────────────────────────────────

pub const TMCC1_MARKER: u8 = 0xFE;
pub const LEGACY_ENGINE_MARKER: u8 = 0xF8;
pub const LEGACY_TRAIN_MARKER: u8 = 0xF9;
pub const LEGACY_EXTENDED_MARKER: u8 = 0xFA;
pub const LEGACY_CONTINUATION: u8 = 0xFB;

pub const SHORT_FRAME_LEN: usize = 4;
pub const EXTENDED_FRAME_LEN: usize = 10;

// ── TMCC1 word layout ─────────────────────────────────────────────────────────

const TMCC1_HALT_WORD: u16 = 0xFFFF;
const TMCC1_SWITCH_IDENT: u16 = 0x4000;
const TMCC1_ACC_IDENT: u16 = 0x8000;
const TMCC1_ROUTE_IDENT: u16 = 0xD000;
const TMCC1_ADDRESS_SHIFT: u16 = 7;
const TMCC1_OP_MASK: u16 = 0x007F;

const TMCC1_SWITCH_THROUGH: u16 = 0x00;
const TMCC1_SWITCH_OUT: u16 = 0x1F;
const TMCC1_ACC_AUX1: u16 = 0x09;
const TMCC1_ACC_AUX2: u16 = 0x0D;
const TMCC1_ACC_NUMERIC: u16 = 0x10;
const TMCC1_ROUTE_FIRE: u16 = 0x1F;

// ── Legacy word layout ────────────────────────────────────────────────────────

const LEGACY_ADDRESS_SHIFT: u16 = 9;
const LEGACY_OP_MASK: u16 = 0x01FF;

const OP_ABSOLUTE_SPEED: u16 = 0x0000; // plus speed 0..=199
const OP_MOMENTUM: u16 = 0x00C8; // plus level 0..=7
const OP_STOP_IMMEDIATE: u16 = 0x00FB;
const OP_FORWARD: u16 = 0x0100;
const OP_TOGGLE_DIRECTION: u16 = 0x0101;
const OP_REVERSE: u16 = 0x0103;
const OP_BOOST: u16 = 0x0104;
const OP_FRONT_COUPLER: u16 = 0x0105;
const OP_REAR_COUPLER: u16 = 0x0106;
const OP_BRAKE: u16 = 0x0107;
const OP_NUMERIC: u16 = 0x0110; // plus digit 0..=9
const OP_BLOW_HORN: u16 = 0x011C;
const OP_RING_BELL: u16 = 0x011D;
const OP_DIESEL_RPM: u16 = 0x01A0; // plus level 0..=7
const OP_BELL_OFF: u16 = 0x01F4;
const OP_BELL_ON: u16 = 0x01F5;
const OP_STARTUP_SEQ: u16 = 0x01FB;
const OP_SHUTDOWN_SEQ: u16 = 0x01FD;

// Extended frame word-2 kind field.
const EXT_KIND_DIALOG: u8 = 0x01;
const EXT_KIND_SOUND: u8 = 0x02;
const EXT_KIND_LIGHTING: u8 = 0x03;

/// Result of decoding one wire frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A device command, from either a TMCC frame or a command-bearing
    /// PDI frame.
    Command(Command),
    /// PDI base traffic that carries no device command (pings, roster
    /// records, bulk-state requests).
    Pdi(PdiMessage),
}

/// Two's-complement checksum: the value that makes the byte sum zero.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    0u8.wrapping_sub(sum)
}

/// Verifies the trailing checksum of a complete frame.
fn verify_checksum(frame: &[u8]) -> Result<(), ProtocolError> {
    let (body, tail) = frame.split_at(frame.len() - 1);
    let expected = checksum(body);
    if tail[0] != expected {
        return Err(ProtocolError::Checksum {
            expected,
            got: tail[0],
        });
    }
    Ok(())
}

/// Encodes a command into its wire frame.
///
/// Total by construction: every validated [`Command`] has exactly one
/// encoding.  Power-district commands encode as PDI frames, everything
/// else as TMCC frames.
pub fn encode(command: &Command) -> Vec<u8> {
    match *command {
        Command::Halt => short_frame(TMCC1_MARKER, TMCC1_HALT_WORD),
        Command::Engine { address, op } => {
            short_frame(LEGACY_ENGINE_MARKER, legacy_word(address, &op))
        }
        Command::Train { address, op } => {
            short_frame(LEGACY_TRAIN_MARKER, legacy_word(address, &op))
        }
        Command::EngineExtended { address, op } => {
            extended_frame(LEGACY_ENGINE_MARKER, address, &op)
        }
        Command::TrainExtended { address, op } => extended_frame(LEGACY_TRAIN_MARKER, address, &op),
        Command::Switch { address, op } => {
            let low = match op {
                SwitchOp::Throw => TMCC1_SWITCH_THROUGH,
                SwitchOp::Out => TMCC1_SWITCH_OUT,
            };
            short_frame(
                TMCC1_MARKER,
                TMCC1_SWITCH_IDENT | (address << TMCC1_ADDRESS_SHIFT) | low,
            )
        }
        Command::Accessory { address, op } => {
            let low = match op {
                AccessoryOp::Aux1 => TMCC1_ACC_AUX1,
                AccessoryOp::Aux2 => TMCC1_ACC_AUX2,
                AccessoryOp::Numeric(d) => TMCC1_ACC_NUMERIC | d as u16,
            };
            short_frame(
                TMCC1_MARKER,
                TMCC1_ACC_IDENT | (address << TMCC1_ADDRESS_SHIFT) | low,
            )
        }
        Command::Route { address } => short_frame(
            TMCC1_MARKER,
            TMCC1_ROUTE_IDENT | (address << TMCC1_ADDRESS_SHIFT) | TMCC1_ROUTE_FIRE,
        ),
        Command::PowerDistrict { address, op } => pdi::encode(&PdiMessage::Bpc2Set {
            address,
            on: matches!(op, PowerOp::On),
        }),
    }
}

/// Decodes one complete wire frame, TMCC or PDI.
///
/// PDI frames carry their own framing and are handed to the PDI decoder
/// whole.  A TMCC frame is length- and checksum-verified before its marker
/// is inspected, so a bit flip anywhere in the frame, marker byte included,
/// surfaces as a checksum error instead of a bogus marker or length error.
pub fn decode(frame: &[u8]) -> Result<Decoded, ProtocolError> {
    let marker = *frame.first().ok_or(ProtocolError::Truncated {
        needed: 1,
        got: 0,
    })?;
    if marker == pdi::PDI_SOP {
        return match pdi::decode(frame)? {
            PdiMessage::TmccTx(cmd) | PdiMessage::TmccRx(cmd) => Ok(Decoded::Command(cmd)),
            PdiMessage::Bpc2Set { address, on } | PdiMessage::Bpc2Rx { address, on } => {
                let op = if on { PowerOp::On } else { PowerOp::Off };
                Ok(Decoded::Command(Command::PowerDistrict { address, op }))
            }
            other => Ok(Decoded::Pdi(other)),
        };
    }
    if frame.len() != SHORT_FRAME_LEN && frame.len() != EXTENDED_FRAME_LEN {
        let needed = if frame.len() < EXTENDED_FRAME_LEN {
            SHORT_FRAME_LEN
        } else {
            EXTENDED_FRAME_LEN
        };
        return Err(ProtocolError::Truncated {
            needed,
            got: frame.len(),
        });
    }
    verify_checksum(frame)?;
    match (marker, frame.len()) {
        (TMCC1_MARKER, SHORT_FRAME_LEN) => decode_tmcc1(frame).map(Decoded::Command),
        (LEGACY_ENGINE_MARKER | LEGACY_TRAIN_MARKER, SHORT_FRAME_LEN) => {
            decode_legacy_short(frame).map(Decoded::Command)
        }
        (LEGACY_EXTENDED_MARKER, EXTENDED_FRAME_LEN) => decode_extended(frame).map(Decoded::Command),
        (TMCC1_MARKER | LEGACY_ENGINE_MARKER | LEGACY_TRAIN_MARKER | LEGACY_EXTENDED_MARKER, _) => {
            Err(ProtocolError::Malformed("frame length does not match marker"))
        }
        (other, _) => Err(ProtocolError::UnknownMarker(other)),
    }
}

fn short_frame(marker: u8, word: u16) -> Vec<u8> {
    let mut frame = vec![marker, (word >> 8) as u8, word as u8];
    frame.push(checksum(&frame));
    frame
}

fn legacy_word(address: u16, op: &EngineOp) -> u16 {
    (address << LEGACY_ADDRESS_SHIFT) | legacy_op_bits(op)
}

fn legacy_op_bits(op: &EngineOp) -> u16 {
    match *op {
        EngineOp::AbsoluteSpeed(s) => OP_ABSOLUTE_SPEED | s as u16,
        EngineOp::SetDirection(Direction::Forward) => OP_FORWARD,
        EngineOp::SetDirection(Direction::Reverse) => OP_REVERSE,
        EngineOp::ToggleDirection => OP_TOGGLE_DIRECTION,
        EngineOp::BoostSpeed => OP_BOOST,
        EngineOp::BrakeSpeed => OP_BRAKE,
        EngineOp::OpenFrontCoupler => OP_FRONT_COUPLER,
        EngineOp::OpenRearCoupler => OP_REAR_COUPLER,
        EngineOp::Numeric(d) => OP_NUMERIC | d as u16,
        EngineOp::BlowHorn => OP_BLOW_HORN,
        EngineOp::RingBell => OP_RING_BELL,
        EngineOp::BellOn => OP_BELL_ON,
        EngineOp::BellOff => OP_BELL_OFF,
        EngineOp::DieselRpm(l) => OP_DIESEL_RPM | l as u16,
        EngineOp::Momentum(m) => OP_MOMENTUM | m as u16,
        EngineOp::StopImmediate => OP_STOP_IMMEDIATE,
        EngineOp::StartupSequence => OP_STARTUP_SEQ,
        EngineOp::ShutdownSequence => OP_SHUTDOWN_SEQ,
    }
}

fn extended_frame(unit_marker: u8, address: u16, op: &ExtendedOp) -> Vec<u8> {
    let (kind, param) = match *op {
        ExtendedOp::Dialog(v) => (EXT_KIND_DIALOG, v),
        ExtendedOp::SoundEffect(v) => (EXT_KIND_SOUND, v),
        ExtendedOp::LightingEffect(v) => (EXT_KIND_LIGHTING, v),
    };
    let mut frame = vec![
        LEGACY_EXTENDED_MARKER,
        unit_marker,
        address as u8,
        LEGACY_CONTINUATION,
        kind,
        param,
        LEGACY_CONTINUATION,
        0x00,
        0x00,
    ];
    frame.push(checksum(&frame));
    frame
}

// Callers in `decode` have already verified length and checksum.
fn take_short_word(frame: &[u8]) -> u16 {
    ((frame[1] as u16) << 8) | frame[2] as u16
}

fn decode_tmcc1(frame: &[u8]) -> Result<Command, ProtocolError> {
    let word = take_short_word(frame);
    if word == TMCC1_HALT_WORD {
        return Ok(Command::Halt);
    }
    let low = word & TMCC1_OP_MASK;
    let address = (word >> TMCC1_ADDRESS_SHIFT) & 0x7F;
    match word & 0xC000 {
        TMCC1_SWITCH_IDENT => {
            let op = match low {
                TMCC1_SWITCH_THROUGH => SwitchOp::Throw,
                TMCC1_SWITCH_OUT => SwitchOp::Out,
                _ => return Err(ProtocolError::UnknownOpcode { word }),
            };
            Command::switch(address, op).map_err(|_| ProtocolError::Malformed("switch address"))
        }
        TMCC1_ACC_IDENT => {
            let op = match low {
                TMCC1_ACC_AUX1 => AccessoryOp::Aux1,
                TMCC1_ACC_AUX2 => AccessoryOp::Aux2,
                d if (TMCC1_ACC_NUMERIC..TMCC1_ACC_NUMERIC + 10).contains(&d) => {
                    AccessoryOp::Numeric((d - TMCC1_ACC_NUMERIC) as u8)
                }
                _ => return Err(ProtocolError::UnknownOpcode { word }),
            };
            Command::accessory(address, op)
                .map_err(|_| ProtocolError::Malformed("accessory address"))
        }
        _ if word & 0xF000 == TMCC1_ROUTE_IDENT && low == TMCC1_ROUTE_FIRE => {
            let address = (word >> TMCC1_ADDRESS_SHIFT) & 0x1F;
            Command::route(address).map_err(|_| ProtocolError::Malformed("route address"))
        }
        _ => Err(ProtocolError::UnknownOpcode { word }),
    }
}

fn decode_legacy_short(frame: &[u8]) -> Result<Command, ProtocolError> {
    let word = take_short_word(frame);
    let address = word >> LEGACY_ADDRESS_SHIFT;
    let op = legacy_op_from_bits(word & LEGACY_OP_MASK)
        .ok_or(ProtocolError::UnknownOpcode { word })?;
    let build = if frame[0] == LEGACY_TRAIN_MARKER {
        Command::train
    } else {
        Command::engine
    };
    build(address, op).map_err(|_| ProtocolError::Malformed("unit address"))
}

fn legacy_op_from_bits(bits: u16) -> Option<EngineOp> {
    let op = match bits {
        s if s <= OP_ABSOLUTE_SPEED + 0xC7 => EngineOp::AbsoluteSpeed(s as u8),
        m if (OP_MOMENTUM..OP_MOMENTUM + 8).contains(&m) => {
            EngineOp::Momentum((m - OP_MOMENTUM) as u8)
        }
        OP_STOP_IMMEDIATE => EngineOp::StopImmediate,
        OP_FORWARD => EngineOp::SetDirection(Direction::Forward),
        OP_TOGGLE_DIRECTION => EngineOp::ToggleDirection,
        OP_REVERSE => EngineOp::SetDirection(Direction::Reverse),
        OP_BOOST => EngineOp::BoostSpeed,
        OP_FRONT_COUPLER => EngineOp::OpenFrontCoupler,
        OP_REAR_COUPLER => EngineOp::OpenRearCoupler,
        OP_BRAKE => EngineOp::BrakeSpeed,
        d if (OP_NUMERIC..OP_NUMERIC + 10).contains(&d) => EngineOp::Numeric((d - OP_NUMERIC) as u8),
        OP_BLOW_HORN => EngineOp::BlowHorn,
        OP_RING_BELL => EngineOp::RingBell,
        l if (OP_DIESEL_RPM..OP_DIESEL_RPM + 8).contains(&l) => {
            EngineOp::DieselRpm((l - OP_DIESEL_RPM) as u8)
        }
        OP_BELL_OFF => EngineOp::BellOff,
        OP_BELL_ON => EngineOp::BellOn,
        OP_STARTUP_SEQ => EngineOp::StartupSequence,
        OP_SHUTDOWN_SEQ => EngineOp::ShutdownSequence,
        _ => return None,
    };
    Some(op)
}

fn decode_extended(frame: &[u8]) -> Result<Command, ProtocolError> {
    if frame[3] != LEGACY_CONTINUATION || frame[6] != LEGACY_CONTINUATION {
        return Err(ProtocolError::Malformed("missing continuation marker"));
    }
    let address = frame[2] as u16;
    let op = match frame[4] {
        EXT_KIND_DIALOG => ExtendedOp::Dialog(frame[5]),
        EXT_KIND_SOUND => ExtendedOp::SoundEffect(frame[5]),
        EXT_KIND_LIGHTING => ExtendedOp::LightingEffect(frame[5]),
        _ => return Err(ProtocolError::Malformed("extended kind")),
    };
    let build = match frame[1] {
        LEGACY_ENGINE_MARKER => Command::engine_extended,
        LEGACY_TRAIN_MARKER => Command::train_extended,
        _ => return Err(ProtocolError::Malformed("extended unit marker")),
    };
    build(address, op).map_err(|_| ProtocolError::Malformed("extended address or param"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::command::SwitchOp;

    fn roundtrip(cmd: Command) {
        let bytes = encode(&cmd);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, Decoded::Command(cmd), "frame {bytes:02x?}");
    }

    #[test]
    fn test_halt_encodes_as_tmcc1_broadcast() {
        let bytes = encode(&Command::Halt);
        assert_eq!(bytes[..3], [0xFE, 0xFF, 0xFF]);
        assert_eq!(bytes.len(), SHORT_FRAME_LEN);
        roundtrip(Command::Halt);
    }

    #[test]
    fn test_engine_speed_word_layout() {
        let cmd = Command::engine(67, EngineOp::AbsoluteSpeed(120)).unwrap();
        let bytes = encode(&cmd);
        // 67 << 9 | 120 = 0x8678
        assert_eq!(bytes[..3], [0xF8, 0x86, 0x78]);
        roundtrip(cmd);
    }

    #[test]
    fn test_train_uses_its_own_marker() {
        let cmd = Command::train(67, EngineOp::AbsoluteSpeed(120)).unwrap();
        assert_eq!(encode(&cmd)[0], 0xF9);
        roundtrip(cmd);
    }

    #[test]
    fn test_switch_out_word_layout() {
        let cmd = Command::switch(12, SwitchOp::Out).unwrap();
        let bytes = encode(&cmd);
        // 0x4000 | 12 << 7 | 0x1F = 0x461F
        assert_eq!(bytes[..3], [0xFE, 0x46, 0x1F]);
        roundtrip(cmd);
    }

    #[test]
    fn test_route_word_layout() {
        let cmd = Command::route(5).unwrap();
        let bytes = encode(&cmd);
        // 0xD01F | 5 << 7 = 0xD29F
        assert_eq!(bytes[..3], [0xFE, 0xD2, 0x9F]);
        roundtrip(cmd);
    }

    #[test]
    fn test_whole_sum_is_zero_mod_256() {
        let bytes = encode(&Command::engine(8, EngineOp::RingBell).unwrap());
        let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(sum, 0);
    }

    #[test]
    fn test_single_bit_corruption_fails_checksum() {
        let cmd = Command::engine(31, EngineOp::AbsoluteSpeed(55)).unwrap();
        let clean = encode(&cmd);
        for byte in 0..clean.len() {
            for bit in 0..8 {
                let mut corrupt = clean.clone();
                corrupt[byte] ^= 1 << bit;
                assert!(
                    matches!(decode(&corrupt), Err(ProtocolError::Checksum { .. })),
                    "flip byte {byte} bit {bit} was not caught"
                );
            }
        }
    }

    #[test]
    fn test_marker_flip_onto_another_marker_fails_checksum() {
        // 0xF8 ^ 0x02 = 0xFA: the corrupt frame still starts with a real
        // marker, so only the checksum can reject it.
        let mut corrupt = encode(&Command::engine(31, EngineOp::AbsoluteSpeed(55)).unwrap());
        corrupt[0] ^= 0x02;
        assert_eq!(corrupt[0], LEGACY_EXTENDED_MARKER);
        assert!(matches!(
            decode(&corrupt),
            Err(ProtocolError::Checksum { .. })
        ));
    }

    #[test]
    fn test_extended_frame_is_ten_bytes_with_continuations() {
        let cmd = Command::engine_extended(9, ExtendedOp::Dialog(0x22)).unwrap();
        let bytes = encode(&cmd);
        assert_eq!(bytes.len(), EXTENDED_FRAME_LEN);
        assert_eq!(bytes[0], 0xFA);
        assert_eq!(bytes[3], 0xFB);
        assert_eq!(bytes[6], 0xFB);
        roundtrip(cmd);
    }

    #[test]
    fn test_extended_decodes_as_one_command() {
        roundtrip(Command::train_extended(44, ExtendedOp::SoundEffect(0x10)).unwrap());
        roundtrip(Command::engine_extended(1, ExtendedOp::LightingEffect(3)).unwrap());
    }

    #[test]
    fn test_unknown_marker_is_rejected() {
        assert_eq!(
            decode(&[0x42, 0x00, 0x00, 0xBE]),
            Err(ProtocolError::UnknownMarker(0x42))
        );
    }

    #[test]
    fn test_unknown_legacy_opcode_is_rejected() {
        // Opcode 0x1FF is unassigned.  Build the frame by hand with a valid
        // checksum so only the opcode check can fire.
        let word: u16 = (9 << 9) | 0x1FF;
        let mut frame = vec![0xF8, (word >> 8) as u8, word as u8];
        frame.push(checksum(&frame));
        assert_eq!(decode(&frame), Err(ProtocolError::UnknownOpcode { word }));
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let bytes = encode(&Command::Halt);
        assert!(matches!(
            decode(&bytes[..2]),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_power_district_routes_through_pdi() {
        let cmd = Command::power_district(3, PowerOp::Off).unwrap();
        let bytes = encode(&cmd);
        assert_eq!(bytes[0], pdi::PDI_SOP);
        assert_eq!(*bytes.last().unwrap(), pdi::PDI_EOP);
        roundtrip(cmd);
    }

    #[test]
    fn test_every_engine_op_roundtrips() {
        let ops = [
            EngineOp::AbsoluteSpeed(0),
            EngineOp::AbsoluteSpeed(199),
            EngineOp::SetDirection(Direction::Forward),
            EngineOp::SetDirection(Direction::Reverse),
            EngineOp::ToggleDirection,
            EngineOp::BoostSpeed,
            EngineOp::BrakeSpeed,
            EngineOp::OpenFrontCoupler,
            EngineOp::OpenRearCoupler,
            EngineOp::Numeric(9),
            EngineOp::BlowHorn,
            EngineOp::RingBell,
            EngineOp::BellOn,
            EngineOp::BellOff,
            EngineOp::DieselRpm(7),
            EngineOp::Momentum(7),
            EngineOp::StopImmediate,
            EngineOp::StartupSequence,
            EngineOp::ShutdownSequence,
        ];
        for op in ops {
            roundtrip(Command::engine(99, op).unwrap());
        }
    }
}
