//! Frame envelope and marker classification.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::codec;
use crate::protocol::pdi;
use crate::protocol::ProtocolError;

/// Which physical link a frame arrived on (or should leave on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameSource {
    /// Direct serial link to the command base.
    Serial,
    /// TCP link to a Base 3 unit.
    Base3,
    /// Synthesized locally (dispatcher, tests).
    Local,
}

impl fmt::Display for FrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameSource::Serial => "serial",
            FrameSource::Base3 => "base3",
            FrameSource::Local => "local",
        };
        f.write_str(s)
    }
}

/// Protocol family of a frame, determined by its leading marker byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Tmcc,
    Pdi,
}

impl FrameKind {
    /// Classifies a leading marker byte.
    pub fn classify(marker: u8) -> Result<Self, ProtocolError> {
        match marker {
            pdi::PDI_SOP => Ok(FrameKind::Pdi),
            codec::TMCC1_MARKER
            | codec::LEGACY_ENGINE_MARKER
            | codec::LEGACY_TRAIN_MARKER
            | codec::LEGACY_EXTENDED_MARKER => Ok(FrameKind::Tmcc),
            other => Err(ProtocolError::UnknownMarker(other)),
        }
    }
}

/// Fixed length of a TMCC frame given its marker, in bytes.
///
/// PDI frames are variable length and bounded by the EOP marker instead.
pub fn tmcc_frame_len(marker: u8) -> Option<usize> {
    match marker {
        codec::TMCC1_MARKER | codec::LEGACY_ENGINE_MARKER | codec::LEGACY_TRAIN_MARKER => {
            Some(codec::SHORT_FRAME_LEN)
        }
        codec::LEGACY_EXTENDED_MARKER => Some(codec::EXTENDED_FRAME_LEN),
        _ => None,
    }
}

/// One complete wire frame plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub source: FrameSource,
}

impl Frame {
    pub fn new(bytes: Vec<u8>, source: FrameSource) -> Self {
        Self { bytes, source }
    }

    pub fn kind(&self) -> Result<FrameKind, ProtocolError> {
        let marker = *self.bytes.first().ok_or(ProtocolError::Truncated {
            needed: 1,
            got: 0,
        })?;
        FrameKind::classify(marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_marker() {
        assert_eq!(FrameKind::classify(0xD1).unwrap(), FrameKind::Pdi);
        assert_eq!(FrameKind::classify(0xFE).unwrap(), FrameKind::Tmcc);
        assert_eq!(FrameKind::classify(0xF8).unwrap(), FrameKind::Tmcc);
        assert_eq!(FrameKind::classify(0xF9).unwrap(), FrameKind::Tmcc);
        assert_eq!(FrameKind::classify(0xFA).unwrap(), FrameKind::Tmcc);
        assert!(matches!(
            FrameKind::classify(0x00),
            Err(ProtocolError::UnknownMarker(0x00))
        ));
    }

    #[test]
    fn test_tmcc_lengths() {
        assert_eq!(tmcc_frame_len(0xFE), Some(4));
        assert_eq!(tmcc_frame_len(0xFA), Some(10));
        assert_eq!(tmcc_frame_len(0xD1), None);
    }
}
