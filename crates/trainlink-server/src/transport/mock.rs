//! Mock transport for unit and integration testing.
//!
//! Allows tests to inject inbound bytes as if they arrived from the rails
//! and to inspect every frame the system wrote, without serial hardware or
//! sockets.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use trainlink_core::FrameSource;

use super::{FrameTransport, TransportError};

/// Test handle paired with a [`MockTransport`].
///
/// Kept by the test while the transport itself is handed to the code under
/// test.
#[derive(Clone)]
pub struct MockHandle {
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_writes: Arc<Mutex<u32>>,
}

impl MockHandle {
    /// Injects bytes, as if read from the wire.
    pub fn inject(&self, bytes: &[u8]) {
        self.inbound_tx
            .send(bytes.to_vec())
            .expect("mock transport receiver dropped");
    }

    /// Every frame written so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().expect("lock poisoned").clone()
    }

    /// Makes the next `n` writes fail with an I/O error.
    pub fn fail_next_writes(&self, n: u32) {
        *self.fail_writes.lock().expect("lock poisoned") = n;
    }
}

/// A [`FrameTransport`] backed by in-memory channels.
pub struct MockTransport {
    source: FrameSource,
    inbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    fail_writes: Arc<Mutex<u32>>,
    connected: bool,
}

impl MockTransport {
    /// Creates a mock link tagged with `source` plus its test handle.
    pub fn new(source: FrameSource) -> (Self, MockHandle) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let written = Arc::new(Mutex::new(Vec::new()));
        let fail_writes = Arc::new(Mutex::new(0));
        let handle = MockHandle {
            inbound_tx,
            written: Arc::clone(&written),
            fail_writes: Arc::clone(&fail_writes),
        };
        let transport = Self {
            source,
            inbound_rx,
            written,
            fail_writes,
            connected: false,
        };
        (transport, handle)
    }
}

#[async_trait]
impl FrameTransport for MockTransport {
    fn label(&self) -> String {
        format!("mock {}", self.source)
    }

    fn source(&self) -> FrameSource {
        self.source
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let bytes = self.inbound_rx.recv().await.ok_or(TransportError::Closed)?;
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    async fn write_frame(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        {
            let mut remaining = self.fail_writes.lock().expect("lock poisoned");
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "injected write failure",
                )));
            }
        }
        self.written
            .lock()
            .expect("lock poisoned")
            .push(bytes.to_vec());
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}
