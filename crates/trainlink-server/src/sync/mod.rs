//! State sync service: TCP server, per-client sessions.

mod server;
mod session;

pub use server::SyncServer;
