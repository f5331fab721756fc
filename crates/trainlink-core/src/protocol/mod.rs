//! Wire protocol: command model, TMCC/Legacy codec, and PDI codec.

pub mod codec;
pub mod command;
pub mod frame;
pub mod pdi;

use thiserror::Error;

/// Errors raised while decoding wire bytes.
///
/// Decode failures are per-frame: the caller logs and discards the frame,
/// the stream itself stays up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame truncated: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("unknown frame marker {0:#04x}")]
    UnknownMarker(u8),

    #[error("unknown opcode bits {word:#06x}")]
    UnknownOpcode { word: u16 },

    #[error("unknown pdi opcode {0:#04x}")]
    UnknownPdiOpcode(u8),

    #[error("checksum mismatch: expected {expected:#04x}, got {got:#04x}")]
    Checksum { expected: u8, got: u8 },

    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}
