//! # trainlink-core
//!
//! Shared library for TrainLink containing the TMCC/Legacy/PDI wire codecs,
//! the device domain model, and the state-sync protocol.
//!
//! This crate is used by both the layout server and remote clients.
//! It has zero dependencies on sockets, serial ports, or async runtimes.
//!
//! A TrainLink deployment bridges a Lionel-style three-rail layout to the
//! network: the server owns the physical links to a command base, decodes
//! everything it hears into typed [`protocol::command::Command`] values,
//! folds them into a device roster, and replicates that roster to any number
//! of clients over TCP.  This crate defines:
//!
//! - **`protocol`** - The rail-side wire formats.  TMCC1 and Legacy frames
//!   are fixed-length marker-prefixed words; PDI frames are variable-length
//!   and byte-stuffed.  Both end in a two's-complement checksum.
//!
//! - **`domain`** - Pure device bookkeeping with no I/O.  [`domain::roster::Roster`]
//!   folds commands into per-device state and reports what changed.
//!
//! - **`sync`** - The network-side replication protocol: snapshot plus
//!   deltas, framed with a 24-byte binary header.

pub mod domain;
pub mod protocol;
pub mod sync;

// Re-export the most-used types at the crate root so callers can write
// `trainlink_core::Command` instead of `trainlink_core::protocol::command::Command`.
pub use domain::device::{Device, DeviceKey, DeviceScope, DeviceState, UnitState};
pub use domain::roster::Roster;
pub use protocol::command::{
    AccessoryOp, AttributeKind, Command, Direction, EngineOp, ExtendedOp, PowerOp, SwitchOp,
    ValidationError,
};
pub use protocol::frame::{Frame, FrameKind, FrameSource};
pub use protocol::ProtocolError;
pub use sync::{SyncError, SyncMessage};
