//! Binary codec for sync protocol messages.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][seq:8][timestamp_us:8][payload:N]
//! ```
//! Total header size: 24 bytes. All multi-byte integers are big-endian.
//! Structured payloads (devices, commands) are bincode; scalar payloads are
//! packed by hand.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use uuid::Uuid;

use crate::sync::messages::{
    DisconnectReason, HelloAckMessage, HelloMessage, MessageType, SyncMessage, HEADER_SIZE,
    PROTOCOL_VERSION,
};

/// Errors that can occur during sync message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum SyncError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload length field does not match the data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`SyncMessage`] into a byte vector including the 24-byte header.
///
/// The sequence number is **not** set by this function; pass a pre-incremented
/// value from a [`crate::sync::SequenceCounter`].
pub fn encode_message(
    msg: &SyncMessage,
    sequence_number: u64,
    timestamp_us: u64,
) -> Result<Vec<u8>, SyncError> {
    let payload = encode_payload(msg)?;
    let payload_len = payload.len() as u32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());

    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&sequence_number.to_be_bytes());
    buf.extend_from_slice(&timestamp_us.to_be_bytes());

    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Encodes a [`SyncMessage`] using the current system time as the timestamp.
pub fn encode_message_now(msg: &SyncMessage, sequence_number: u64) -> Result<Vec<u8>, SyncError> {
    let timestamp_us = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;
    encode_message(msg, sequence_number, timestamp_us)
}

/// Decodes one [`SyncMessage`] from the beginning of `bytes`.
///
/// Returns the decoded message and the total number of bytes consumed
/// (header + payload), so the caller can advance their read cursor.
pub fn decode_message(bytes: &[u8]) -> Result<(SyncMessage, usize), SyncError> {
    if bytes.len() < HEADER_SIZE {
        return Err(SyncError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(SyncError::UnsupportedVersion(version));
    }

    let msg_type_byte = bytes[1];
    let msg_type = MessageType::try_from(msg_type_byte)
        .map_err(|_| SyncError::UnknownMessageType(msg_type_byte))?;

    // bytes[2..4] are reserved, ignored on decode

    let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

    let total_needed = HEADER_SIZE + payload_len;
    if bytes.len() < total_needed {
        return Err(SyncError::PayloadLengthMismatch {
            declared: payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..HEADER_SIZE + payload_len];
    let msg = decode_payload(msg_type, payload)?;
    Ok((msg, total_needed))
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(msg: &SyncMessage) -> Result<Vec<u8>, SyncError> {
    let mut buf = Vec::new();
    match msg {
        SyncMessage::Hello(m) => encode_hello(&mut buf, m),
        SyncMessage::HelloAck(m) => encode_hello_ack(&mut buf, m),
        SyncMessage::SnapshotBegin {
            device_count,
            as_of_seq,
        } => {
            buf.extend_from_slice(&device_count.to_be_bytes());
            buf.extend_from_slice(&as_of_seq.to_be_bytes());
        }
        SyncMessage::SnapshotDevice(device) | SyncMessage::Delta(device) => {
            let bytes = bincode::serialize(device)
                .map_err(|e| SyncError::MalformedPayload(format!("device serialize: {e}")))?;
            buf.extend_from_slice(&bytes);
        }
        SyncMessage::SnapshotEnd { as_of_seq } => {
            buf.extend_from_slice(&as_of_seq.to_be_bytes());
        }
        SyncMessage::CommandForward(cmd) => {
            let bytes = bincode::serialize(cmd)
                .map_err(|e| SyncError::MalformedPayload(format!("command serialize: {e}")))?;
            buf.extend_from_slice(&bytes);
        }
        SyncMessage::Rejected { description } => {
            write_length_prefixed_string(&mut buf, description);
        }
        SyncMessage::Ping(token) => buf.extend_from_slice(&token.to_be_bytes()),
        SyncMessage::Pong(token) => buf.extend_from_slice(&token.to_be_bytes()),
        SyncMessage::Disconnect { reason } => buf.push(*reason as u8),
    }
    Ok(buf)
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(msg_type: MessageType, payload: &[u8]) -> Result<SyncMessage, SyncError> {
    match msg_type {
        MessageType::Hello => decode_hello(payload).map(SyncMessage::Hello),
        MessageType::HelloAck => decode_hello_ack(payload).map(SyncMessage::HelloAck),
        MessageType::SnapshotBegin => {
            require_len(payload, 12, "SnapshotBegin")?;
            let device_count = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let as_of_seq = read_u64(payload, 4)?;
            Ok(SyncMessage::SnapshotBegin {
                device_count,
                as_of_seq,
            })
        }
        MessageType::SnapshotDevice => {
            let device = bincode::deserialize(payload)
                .map_err(|e| SyncError::MalformedPayload(format!("device deserialize: {e}")))?;
            Ok(SyncMessage::SnapshotDevice(device))
        }
        MessageType::SnapshotEnd => {
            let as_of_seq = read_u64(payload, 0)?;
            Ok(SyncMessage::SnapshotEnd { as_of_seq })
        }
        MessageType::Delta => {
            let device = bincode::deserialize(payload)
                .map_err(|e| SyncError::MalformedPayload(format!("device deserialize: {e}")))?;
            Ok(SyncMessage::Delta(device))
        }
        MessageType::CommandForward => {
            let cmd = bincode::deserialize(payload)
                .map_err(|e| SyncError::MalformedPayload(format!("command deserialize: {e}")))?;
            Ok(SyncMessage::CommandForward(cmd))
        }
        MessageType::Rejected => {
            let (description, _) = read_length_prefixed_string(payload, 0)?;
            Ok(SyncMessage::Rejected { description })
        }
        MessageType::Ping => Ok(SyncMessage::Ping(read_u64(payload, 0)?)),
        MessageType::Pong => Ok(SyncMessage::Pong(read_u64(payload, 0)?)),
        MessageType::Disconnect => {
            require_len(payload, 1, "Disconnect")?;
            let reason = DisconnectReason::try_from(payload[0]).map_err(|_| {
                SyncError::MalformedPayload(format!("unknown disconnect reason: {}", payload[0]))
            })?;
            Ok(SyncMessage::Disconnect { reason })
        }
    }
}

// ── Per-message encode helpers ────────────────────────────────────────────────

fn encode_hello(buf: &mut Vec<u8>, m: &HelloMessage) {
    buf.extend_from_slice(m.client_id.as_bytes());
    buf.push(m.protocol_version);
    write_length_prefixed_string(buf, &m.client_name);
}

fn encode_hello_ack(buf: &mut Vec<u8>, m: &HelloAckMessage) {
    buf.push(if m.accepted { 0x01 } else { 0x00 });
    buf.push(m.reject_reason);
    buf.push(m.server_version);
    buf.extend_from_slice(&m.device_count.to_be_bytes());
}

// ── Per-message decode helpers ────────────────────────────────────────────────

fn decode_hello(p: &[u8]) -> Result<HelloMessage, SyncError> {
    // 16 (uuid) + 1 (proto ver) + 2 (name_len) + name
    require_len(p, 19, "Hello")?;
    let client_id = read_uuid(p, 0)?;
    let protocol_version = p[16];
    let (client_name, _) = read_length_prefixed_string(p, 17)?;
    Ok(HelloMessage {
        client_id,
        protocol_version,
        client_name,
    })
}

fn decode_hello_ack(p: &[u8]) -> Result<HelloAckMessage, SyncError> {
    // 1 (accepted) + 1 (reject) + 1 (ver) + 4 (device count) = 7
    require_len(p, 7, "HelloAck")?;
    let accepted = p[0] != 0;
    let reject_reason = p[1];
    let server_version = p[2];
    let device_count = u32::from_be_bytes([p[3], p[4], p[5], p[6]]);
    Ok(HelloAckMessage {
        accepted,
        reject_reason,
        server_version,
        device_count,
    })
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), SyncError> {
    if buf.len() < needed {
        Err(SyncError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, SyncError> {
    if buf.len() < offset + 8 {
        return Err(SyncError::InsufficientData {
            needed: offset + 8,
            available: buf.len(),
        });
    }
    Ok(u64::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
        buf[offset + 4],
        buf[offset + 5],
        buf[offset + 6],
        buf[offset + 7],
    ]))
}

fn read_uuid(buf: &[u8], offset: usize) -> Result<Uuid, SyncError> {
    if buf.len() < offset + 16 {
        return Err(SyncError::MalformedPayload(format!(
            "need 16 bytes for UUID at offset {offset}, got {}",
            buf.len().saturating_sub(offset)
        )));
    }
    let bytes: [u8; 16] = buf[offset..offset + 16]
        .try_into()
        .map_err(|_| SyncError::MalformedPayload("uuid slice".to_string()))?;
    Ok(Uuid::from_bytes(bytes))
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize) as u16;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&bytes[..len as usize]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), SyncError> {
    if buf.len() < offset + 2 {
        return Err(SyncError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(SyncError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| SyncError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
