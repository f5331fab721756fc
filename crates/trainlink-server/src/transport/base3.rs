//! TCP link to a Base 3 unit.
//!
//! The Base 3 exposes the same byte stream as the serial port over TCP,
//! plus PDI traffic (roster records, power districts).  It drops idle
//! connections, so the multiplexer sends a PDI keep-alive ping on every
//! link whose source is [`FrameSource::Base3`].

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::info;
use trainlink_core::FrameSource;

use super::{FrameTransport, TransportError};

/// TCP port a Base 3 listens on.
pub const DEFAULT_BASE3_PORT: u16 = 50001;

/// Base 3 TCP transport adapter.
pub struct Base3Adapter {
    addr: SocketAddr,
    stream: Option<TcpStream>,
}

impl Base3Adapter {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, stream: None }
    }
}

#[async_trait]
impl FrameTransport for Base3Adapter {
    fn label(&self) -> String {
        format!("base3 {}", self.addr)
    }

    fn source(&self) -> FrameSource {
        FrameSource::Base3
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stream = None;
        let stream =
            TcpStream::connect(self.addr)
                .await
                .map_err(|source| TransportError::ConnectFailed {
                    addr: self.addr,
                    source,
                })?;
        stream.set_nodelay(true)?;
        info!("connected to {}", self.label());
        self.stream = Some(stream);
        Ok(())
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let n = stream.read(buf).await?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        Ok(n)
    }

    async fn write_frame(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.write_all(bytes).await?;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.stream = None;
    }
}
