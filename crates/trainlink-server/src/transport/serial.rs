//! Serial link to a legacy command base.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::info;
use trainlink_core::FrameSource;

use super::{FrameTransport, TransportError};

/// Baud rates the command base hardware accepts.
pub const VALID_BAUD_RATES: [u32; 5] = [9600, 19_200, 38_400, 57_600, 115_200];

/// Factory default for every base shipped.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Serial transport adapter.
pub struct SerialAdapter {
    path: String,
    baud_rate: u32,
    stream: Option<SerialStream>,
}

impl SerialAdapter {
    /// Creates an adapter for `path` at `baud_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidBaudRate`] for rates the base
    /// hardware does not speak.  The port itself is opened lazily in
    /// [`FrameTransport::connect`].
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Result<Self, TransportError> {
        if !VALID_BAUD_RATES.contains(&baud_rate) {
            return Err(TransportError::InvalidBaudRate(baud_rate));
        }
        Ok(Self {
            path: path.into(),
            baud_rate,
            stream: None,
        })
    }
}

#[async_trait]
impl FrameTransport for SerialAdapter {
    fn label(&self) -> String {
        format!("serial {} @ {} baud", self.path, self.baud_rate)
    }

    fn source(&self) -> FrameSource {
        FrameSource::Serial
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.stream = None;
        let stream = tokio_serial::new(&self.path, self.baud_rate)
            .open_native_async()
            .map_err(|source| TransportError::SerialOpen {
                path: self.path.clone(),
                source,
            })?;
        info!("opened {}", self.label());
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
        stream.flush().await?;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_default_baud_is_accepted() {
        assert!(SerialAdapter::new("/dev/ttyUSB0", DEFAULT_BAUD_RATE).is_ok());
    }

    #[test]
    fn test_every_listed_baud_is_accepted() {
        for rate in VALID_BAUD_RATES {
            assert!(SerialAdapter::new("/dev/ttyUSB0", rate).is_ok(), "{rate}");
        }
    }

    #[test]
    fn test_unsupported_baud_is_rejected() {
        let Err(err) = SerialAdapter::new("/dev/ttyUSB0", 4800) else {
            panic!("4800 baud must be rejected");
        };
        assert!(matches!(err, TransportError::InvalidBaudRate(4800)));
    }

    #[tokio::test]
    async fn test_io_before_connect_reports_not_connected() {
        let mut adapter = SerialAdapter::new("/dev/ttyUSB0", 9600).unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(
            adapter.read_chunk(&mut buf).await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            adapter.write_frame(&[0xFE]).await,
            Err(TransportError::NotConnected)
        ));
    }
}
