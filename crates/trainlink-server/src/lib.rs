//! Bridge between model-railroad control clients and the physical layout.
//!
//! The server owns the physical links (serial and Base 3 TCP), folds every
//! frame seen on the rails into an authoritative device roster, and serves
//! that roster to mirror clients over a TCP sync protocol.  Outbound
//! commands from any client funnel through a single dispatcher so the rails
//! see one writer.

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod handle;
pub mod ingest;
pub mod mux;
pub mod state;
pub mod sync;
pub mod transport;

pub use config::ServerConfig;
pub use dispatch::{DispatchError, Dispatcher};
pub use handle::LayoutHandle;
pub use state::StateStore;
pub use sync::SyncServer;
