//! All state-sync protocol message types.
//!
//! These travel between the layout server and remote clients over TCP.
//! The wire format is defined in [`crate::sync::codec`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::device::Device;
use crate::protocol::command::Command;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current sync protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common message header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Default TCP port the sync server listens on.
pub const DEFAULT_SYNC_PORT: u16 = 5110;

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes in the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    // Session control (0x00-0x0F)
    Hello = 0x01,
    HelloAck = 0x02,
    Ping = 0x07,
    Pong = 0x08,
    Disconnect = 0x09,
    Rejected = 0x0A,
    // Snapshot replay (0x10-0x1F)
    SnapshotBegin = 0x10,
    SnapshotDevice = 0x11,
    SnapshotEnd = 0x12,
    Delta = 0x13,
    // Command forwarding (0x20-0x2F)
    CommandForward = 0x20,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Hello),
            0x02 => Ok(MessageType::HelloAck),
            0x07 => Ok(MessageType::Ping),
            0x08 => Ok(MessageType::Pong),
            0x09 => Ok(MessageType::Disconnect),
            0x0A => Ok(MessageType::Rejected),
            0x10 => Ok(MessageType::SnapshotBegin),
            0x11 => Ok(MessageType::SnapshotDevice),
            0x12 => Ok(MessageType::SnapshotEnd),
            0x13 => Ok(MessageType::Delta),
            0x20 => Ok(MessageType::CommandForward),
            _ => Err(()),
        }
    }
}

/// Reason codes carried by DISCONNECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DisconnectReason {
    UserInitiated = 0x01,
    Timeout = 0x02,
    ServerShutdown = 0x03,
    ProtocolViolation = 0x04,
}

impl TryFrom<u8> for DisconnectReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(DisconnectReason::UserInitiated),
            0x02 => Ok(DisconnectReason::Timeout),
            0x03 => Ok(DisconnectReason::ServerShutdown),
            0x04 => Ok(DisconnectReason::ProtocolViolation),
            _ => Err(()),
        }
    }
}

// ── Message payloads ──────────────────────────────────────────────────────────

/// First message on a new connection, client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub client_id: Uuid,
    pub protocol_version: u8,
    pub client_name: String,
}

/// Server reply to HELLO.  When accepted, a full snapshot follows
/// immediately on the same connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAckMessage {
    pub accepted: bool,
    /// Nonzero only when `accepted` is false.
    pub reject_reason: u8,
    pub server_version: u8,
    /// Devices the coming snapshot will carry.
    pub device_count: u32,
}

/// One sync protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    Hello(HelloMessage),
    HelloAck(HelloAckMessage),
    /// Brackets a snapshot; `as_of_seq` is the store sequence the snapshot
    /// reflects.  Deltas after SNAPSHOT_END carry higher sequences.
    SnapshotBegin {
        device_count: u32,
        as_of_seq: u64,
    },
    SnapshotDevice(Device),
    SnapshotEnd {
        as_of_seq: u64,
    },
    /// One device changed.  Carries the full device, not a diff, so a
    /// missed delta is repaired by the next one for the same device.
    Delta(Device),
    /// Client asks the server to dispatch a command to the physical layout.
    CommandForward(Command),
    /// Server refused a forwarded command.
    Rejected {
        description: String,
    },
    Ping(u64),
    Pong(u64),
    Disconnect {
        reason: DisconnectReason,
    },
}

impl SyncMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            SyncMessage::Hello(_) => MessageType::Hello,
            SyncMessage::HelloAck(_) => MessageType::HelloAck,
            SyncMessage::SnapshotBegin { .. } => MessageType::SnapshotBegin,
            SyncMessage::SnapshotDevice(_) => MessageType::SnapshotDevice,
            SyncMessage::SnapshotEnd { .. } => MessageType::SnapshotEnd,
            SyncMessage::Delta(_) => MessageType::Delta,
            SyncMessage::CommandForward(_) => MessageType::CommandForward,
            SyncMessage::Rejected { .. } => MessageType::Rejected,
            SyncMessage::Ping(_) => MessageType::Ping,
            SyncMessage::Pong(_) => MessageType::Pong,
            SyncMessage::Disconnect { .. } => MessageType::Disconnect,
        }
    }
}
