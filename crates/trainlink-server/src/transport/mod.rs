//! Transport adapters for the physical links to the command base.
//!
//! Two production links exist: a direct serial connection to a legacy base
//! and a TCP connection to a Base 3 unit.  Both speak the same byte stream
//! (TMCC frames, plus PDI frames on the Base 3).  The [`FrameTransport`]
//! trait abstracts the link so the multiplexer and the tests do not care
//! which one they are driving; tests use [`mock::MockTransport`].

use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;
use trainlink_core::FrameSource;

pub mod base3;
pub mod framing;
pub mod mock;
pub mod serial;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open serial port {path}: {source}")]
    SerialOpen {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("unsupported baud rate {0}")]
    InvalidBaudRate(u32),

    #[error("failed to connect to base at {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link closed by remote side")]
    Closed,

    #[error("transport is not connected")]
    NotConnected,
}

/// One physical (or mock) link to a command base.
///
/// An implementation owns at most one open connection at a time.  The
/// multiplexer calls `connect` before the first I/O and again after any
/// error; implementations drop the old connection state on reconnect.
#[async_trait]
pub trait FrameTransport: Send {
    /// Human-readable link label for logs.
    fn label(&self) -> String;

    /// Which [`FrameSource`] frames read from this link are tagged with.
    fn source(&self) -> FrameSource;

    /// Opens (or reopens) the link.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Reads a chunk of raw bytes from the link into `buf`.
    ///
    /// Returns the number of bytes read.  Chunks carry no frame alignment
    /// guarantees; the caller reassembles frames with a
    /// [`framing::FrameSplitter`].
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Writes one complete frame to the link.
    async fn write_frame(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Closes the link.  Safe to call when not connected.
    async fn disconnect(&mut self);
}
