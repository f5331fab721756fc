//! Mirror client for a TrainLink server.
//!
//! Maintains a live replica of the server's device roster over TCP and
//! forwards commands back for dispatch to the physical layout.  The mirror
//! never applies a command locally; state only changes when the server
//! echoes it as a delta, so every client shows what the rails actually saw.

pub mod config;
pub mod connection;
pub mod discovery;
pub mod mirror;

pub use config::ClientConfig;
pub use connection::{ClientError, ClientEvent, SyncClient};
pub use discovery::{locate, DiscoveredServer};
pub use mirror::{Mirror, MirrorEvent};
