//! PDI (base unit) wire codec.
//!
//! PDI frames bracket a payload with start/end markers and escape any
//! payload byte that collides with a marker:
//!
//! ```text
//! [0xD1] [stuffed payload] [stuffed checksum] [0xDF]
//! ```
//!
//! The checksum is computed over the UNSTUFFED payload, then the payload
//! and checksum are stuffed together: every occurrence of 0xD1, 0xDE or
//! 0xDF inside them is preceded by the 0xDE stuff marker.  The checksum is
//! the two's-complement of the byte sum, so the keep-alive ping frame is
//! exactly `[0xD1, 0x29, 0xD7, 0xDF]`.
//!
//! The first payload byte is the PDI opcode.  Base roster records carry a
//! device address and an ASCII name; BPC2 frames switch power districts;
//! TMCC relay frames embed a complete TMCC frame as their payload.

use crate::protocol::codec;
use crate::protocol::command::Command;
use crate::protocol::ProtocolError;
use crate::domain::device::{DeviceKey, DeviceScope};

pub const PDI_SOP: u8 = 0xD1;
pub const PDI_STF: u8 = 0xDE;
pub const PDI_EOP: u8 = 0xDF;

// ── PDI opcodes ───────────────────────────────────────────────────────────────

pub const PDI_ALL_GET: u8 = 0x01;
pub const PDI_BASE_ENGINE: u8 = 0x20;
pub const PDI_BASE_TRAIN: u8 = 0x21;
pub const PDI_BASE_ACC: u8 = 0x22;
pub const PDI_BASE_ROUTE: u8 = 0x24;
pub const PDI_BASE_SWITCH: u8 = 0x25;
pub const PDI_TMCC_TX: u8 = 0x27;
pub const PDI_TMCC_RX: u8 = 0x28;
pub const PDI_PING: u8 = 0x29;
pub const PDI_BPC2_GET: u8 = 0x40;
pub const PDI_BPC2_SET: u8 = 0x41;
pub const PDI_BPC2_RX: u8 = 0x42;

/// The keep-alive frame a base unit expects every few seconds.
pub const PING_FRAME: [u8; 4] = [PDI_SOP, PDI_PING, 0xD7, PDI_EOP];

/// One decoded PDI payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PdiMessage {
    /// Keep-alive; no payload beyond the opcode.
    Ping,
    /// Ask the base to stream its full roster.
    AllGet,
    /// TMCC command relayed TO the base for rail transmission.
    TmccTx(Command),
    /// TMCC command the base observed on the rails.
    TmccRx(Command),
    /// Roster record for one device, with its catalog name when set.
    BaseRecord { key: DeviceKey, name: Option<String> },
    /// Query a power district's state.
    Bpc2Get { address: u16 },
    /// Command a power district on or off.
    Bpc2Set { address: u16, on: bool },
    /// Power district state reported by the module.
    Bpc2Rx { address: u16, on: bool },
}

/// Stuffs payload bytes and brackets them into a complete frame.
fn build_frame(payload: &[u8]) -> Vec<u8> {
    let ck = codec::checksum(payload);
    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(PDI_SOP);
    for &b in payload.iter().chain(std::iter::once(&ck)) {
        if matches!(b, PDI_SOP | PDI_STF | PDI_EOP) {
            frame.push(PDI_STF);
        }
        frame.push(b);
    }
    frame.push(PDI_EOP);
    frame
}

/// Removes stuffing from the bytes between SOP and EOP.
fn unstuff(body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::with_capacity(body.len());
    let mut escaped = false;
    for &b in body {
        if escaped {
            out.push(b);
            escaped = false;
        } else if b == PDI_STF {
            escaped = true;
        } else {
            out.push(b);
        }
    }
    if escaped {
        return Err(ProtocolError::Malformed("trailing stuff marker"));
    }
    Ok(out)
}

fn scope_for_base_opcode(opcode: u8) -> Option<DeviceScope> {
    match opcode {
        PDI_BASE_ENGINE => Some(DeviceScope::Engine),
        PDI_BASE_TRAIN => Some(DeviceScope::Train),
        PDI_BASE_ACC => Some(DeviceScope::Accessory),
        PDI_BASE_ROUTE => Some(DeviceScope::Route),
        PDI_BASE_SWITCH => Some(DeviceScope::Switch),
        _ => None,
    }
}

fn base_opcode_for_scope(scope: DeviceScope) -> Option<u8> {
    match scope {
        DeviceScope::Engine => Some(PDI_BASE_ENGINE),
        DeviceScope::Train => Some(PDI_BASE_TRAIN),
        DeviceScope::Accessory => Some(PDI_BASE_ACC),
        DeviceScope::Route => Some(PDI_BASE_ROUTE),
        DeviceScope::Switch => Some(PDI_BASE_SWITCH),
        DeviceScope::PowerDistrict => None,
    }
}

/// Encodes a PDI message into a complete stuffed frame.
pub fn encode(message: &PdiMessage) -> Vec<u8> {
    let payload: Vec<u8> = match message {
        PdiMessage::Ping => vec![PDI_PING],
        PdiMessage::AllGet => vec![PDI_ALL_GET],
        PdiMessage::TmccTx(cmd) => {
            let mut p = vec![PDI_TMCC_TX];
            p.extend_from_slice(&codec::encode(cmd));
            p
        }
        PdiMessage::TmccRx(cmd) => {
            let mut p = vec![PDI_TMCC_RX];
            p.extend_from_slice(&codec::encode(cmd));
            p
        }
        PdiMessage::BaseRecord { key, name } => {
            // Roster records for power districts travel as BPC2 frames,
            // never as base records.
            let opcode = base_opcode_for_scope(key.scope).unwrap_or(PDI_BASE_ENGINE);
            let mut p = vec![opcode, key.address as u8];
            if let Some(name) = name {
                p.extend_from_slice(name.as_bytes());
            }
            p
        }
        PdiMessage::Bpc2Get { address } => vec![PDI_BPC2_GET, *address as u8],
        PdiMessage::Bpc2Set { address, on } => vec![PDI_BPC2_SET, *address as u8, *on as u8],
        PdiMessage::Bpc2Rx { address, on } => vec![PDI_BPC2_RX, *address as u8, *on as u8],
    };
    build_frame(&payload)
}

/// Decodes one complete PDI frame (SOP through EOP inclusive).
pub fn decode(frame: &[u8]) -> Result<PdiMessage, ProtocolError> {
    if frame.len() < 4 {
        return Err(ProtocolError::Truncated {
            needed: 4,
            got: frame.len(),
        });
    }
    if frame[0] != PDI_SOP || *frame.last().unwrap_or(&0) != PDI_EOP {
        return Err(ProtocolError::Malformed("missing frame bracket"));
    }
    let unstuffed = unstuff(&frame[1..frame.len() - 1])?;
    if unstuffed.len() < 2 {
        return Err(ProtocolError::Truncated {
            needed: 2,
            got: unstuffed.len(),
        });
    }
    let (payload, ck) = unstuffed.split_at(unstuffed.len() - 1);
    let expected = codec::checksum(payload);
    if ck[0] != expected {
        return Err(ProtocolError::Checksum {
            expected,
            got: ck[0],
        });
    }

    let opcode = payload[0];
    match opcode {
        PDI_PING => Ok(PdiMessage::Ping),
        PDI_ALL_GET => Ok(PdiMessage::AllGet),
        PDI_TMCC_TX | PDI_TMCC_RX => {
            let inner = &payload[1..];
            match codec::decode(inner)? {
                codec::Decoded::Command(cmd) => {
                    if opcode == PDI_TMCC_TX {
                        Ok(PdiMessage::TmccTx(cmd))
                    } else {
                        Ok(PdiMessage::TmccRx(cmd))
                    }
                }
                codec::Decoded::Pdi(_) => Err(ProtocolError::Malformed("nested pdi frame")),
            }
        }
        PDI_BPC2_GET => {
            let address = *payload
                .get(1)
                .ok_or(ProtocolError::Malformed("bpc2 payload"))? as u16;
            Ok(PdiMessage::Bpc2Get { address })
        }
        PDI_BPC2_SET | PDI_BPC2_RX => {
            if payload.len() < 3 {
                return Err(ProtocolError::Malformed("bpc2 payload"));
            }
            let address = payload[1] as u16;
            let on = payload[2] != 0;
            if opcode == PDI_BPC2_SET {
                Ok(PdiMessage::Bpc2Set { address, on })
            } else {
                Ok(PdiMessage::Bpc2Rx { address, on })
            }
        }
        _ => {
            let scope =
                scope_for_base_opcode(opcode).ok_or(ProtocolError::UnknownPdiOpcode(opcode))?;
            if payload.len() < 2 {
                return Err(ProtocolError::Malformed("base record payload"));
            }
            let address = payload[1] as u16;
            let name_bytes = &payload[2..];
            let name = if name_bytes.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(name_bytes).into_owned())
            };
            Ok(PdiMessage::BaseRecord {
                key: DeviceKey::new(scope, address),
                name,
            })
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
