//! Frame multiplexer: merges every physical link into one inbound stream
//! and routes outbound frames to the right link.
//!
//! One task per link owns its transport exclusively.  The task reconnects
//! with exponential backoff (500 ms doubling to a 30 s cap), reassembles
//! frames with a [`FrameSplitter`], and pushes them into the shared inbound
//! channel.  Because that channel has a single consumer, every observer of
//! the system sees commands in one global order no matter which link they
//! arrived on.
//!
//! Outbound frames go through a [`MuxHandle`]: PDI frames prefer a Base 3
//! link (serial bases do not speak PDI), everything else goes to the
//! primary link, which is simply the first one configured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, info, warn};
use trainlink_core::protocol::pdi::{PDI_SOP, PING_FRAME};
use trainlink_core::{Frame, FrameSource};

use crate::transport::framing::FrameSplitter;
use crate::transport::{FrameTransport, TransportError};

/// Error type for outbound routing.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("no link can carry this frame")]
    NoRoute,
    #[error("link task has shut down")]
    LinkClosed,
    #[error("link is down")]
    LinkDown,
    #[error("link write failed: {0}")]
    WriteFailed(String),
}

/// Tuning knobs for the link tasks.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// First reconnect delay after a link failure.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Keep-alive interval for Base 3 links.
    pub ping_interval: Duration,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            ping_interval: Duration::from_secs(3),
        }
    }
}

/// How long a link task waits in a read before servicing outbound traffic.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Link read buffer size.
const READ_BUF: usize = 1024;

/// Depth of the per-link outbound queue.
const OUTBOUND_DEPTH: usize = 64;

/// Depth of the merged inbound frame channel.
const INBOUND_DEPTH: usize = 256;

/// One queued outbound frame plus the channel that tells the sender
/// whether the physical write happened.
struct Outbound {
    bytes: Vec<u8>,
    done: oneshot::Sender<Result<(), MuxError>>,
}

struct Route {
    source: FrameSource,
    tx: mpsc::Sender<Outbound>,
}

/// Cloneable handle for sending frames out to the rails.
#[derive(Clone)]
pub struct MuxHandle {
    routes: Arc<Vec<Route>>,
}

impl MuxHandle {
    /// Sends one complete frame to the link best suited to carry it.
    ///
    /// Resolves only after the link task has written the frame to the
    /// wire; a queued frame that never makes it out reports an error.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), MuxError> {
        let route = self.pick_route(&bytes).ok_or(MuxError::NoRoute)?;
        Self::deliver(route, bytes).await
    }

    async fn deliver(route: &Route, bytes: Vec<u8>) -> Result<(), MuxError> {
        let (done, confirmed) = oneshot::channel();
        route
            .tx
            .send(Outbound { bytes, done })
            .await
            .map_err(|_| MuxError::LinkClosed)?;
        confirmed.await.map_err(|_| MuxError::LinkClosed)?
    }

    /// PDI frames need a Base 3; anything else takes the primary link.
    fn pick_route(&self, bytes: &[u8]) -> Option<&Route> {
        if bytes.first() == Some(&PDI_SOP) {
            if let Some(route) = self.routes.iter().find(|r| r.source == FrameSource::Base3) {
                return Some(route);
            }
        }
        self.routes.first()
    }

    /// Sends a frame to the link of the given source.
    pub async fn send_to(&self, source: FrameSource, bytes: Vec<u8>) -> Result<(), MuxError> {
        let route = self
            .routes
            .iter()
            .find(|r| r.source == source)
            .ok_or(MuxError::NoRoute)?;
        Self::deliver(route, bytes).await
    }

    /// Whether any link of the given source is configured.
    pub fn has_source(&self, source: FrameSource) -> bool {
        self.routes.iter().any(|r| r.source == source)
    }
}

/// Spawns one task per transport and returns the outbound handle plus the
/// merged inbound frame stream.
pub fn start(
    transports: Vec<Box<dyn FrameTransport>>,
    config: MuxConfig,
    running: Arc<AtomicBool>,
) -> (MuxHandle, mpsc::Receiver<Frame>) {
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_DEPTH);
    let mut routes = Vec::with_capacity(transports.len());

    for transport in transports {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_DEPTH);
        routes.push(Route {
            source: transport.source(),
            tx: outbound_tx,
        });
        tokio::spawn(link_task(
            transport,
            inbound_tx.clone(),
            outbound_rx,
            config.clone(),
            Arc::clone(&running),
        ));
    }

    (
        MuxHandle {
            routes: Arc::new(routes),
        },
        inbound_rx,
    )
}

/// Owns one transport for its whole life: connect, pump, reconnect.
async fn link_task(
    mut transport: Box<dyn FrameTransport>,
    inbound_tx: mpsc::Sender<Frame>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    config: MuxConfig,
    running: Arc<AtomicBool>,
) {
    let label = transport.label();
    let source = transport.source();
    let mut backoff = config.initial_backoff;

    while running.load(Ordering::Relaxed) {
        match transport.connect().await {
            Ok(()) => {
                backoff = config.initial_backoff;
                let reason = pump_link(
                    transport.as_mut(),
                    &inbound_tx,
                    &mut outbound_rx,
                    &config,
                    &running,
                )
                .await;
                transport.disconnect().await;
                match reason {
                    PumpExit::Shutdown => break,
                    PumpExit::LinkError(e) => {
                        warn!("{label}: link failed: {e}; reconnecting in {backoff:?}")
                    }
                }
            }
            Err(e) => {
                warn!("{label}: connect failed: {e}; retrying in {backoff:?}");
            }
        }

        reject_while_down(&mut outbound_rx, backoff).await;
        backoff = (backoff * 2).min(config.max_backoff);
    }

    info!("{label} ({source}) link task stopped");
}

/// Waits out the reconnect backoff, failing any frame queued in the
/// meantime so senders hear about the dead link instead of stalling.
async fn reject_while_down(outbound_rx: &mut mpsc::Receiver<Outbound>, wait: Duration) {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        match time::timeout(remaining, outbound_rx.recv()).await {
            Ok(Some(job)) => {
                let _ = job.done.send(Err(MuxError::LinkDown));
            }
            Ok(None) => {
                time::sleep(remaining).await;
                return;
            }
            Err(_elapsed) => return,
        }
    }
}

enum PumpExit {
    Shutdown,
    LinkError(TransportError),
}

/// Services one connected link until it fails or the system shuts down.
///
/// Reads are bounded by a short timeout so outbound traffic and keep-alive
/// pings are serviced even when the rails are quiet.
async fn pump_link(
    transport: &mut dyn FrameTransport,
    inbound_tx: &mpsc::Sender<Frame>,
    outbound_rx: &mut mpsc::Receiver<Outbound>,
    config: &MuxConfig,
    running: &AtomicBool,
) -> PumpExit {
    let source = transport.source();
    let wants_ping = source == FrameSource::Base3;
    let mut splitter = FrameSplitter::new();
    let mut buf = vec![0u8; READ_BUF];
    let mut last_ping = Instant::now();

    loop {
        if !running.load(Ordering::Relaxed) {
            return PumpExit::Shutdown;
        }

        // Inbound slice.
        match time::timeout(READ_SLICE, transport.read_chunk(&mut buf)).await {
            Ok(Ok(n)) => {
                for bytes in splitter.push(&buf[..n]) {
                    debug!("{source}: frame {bytes:02x?}");
                    if inbound_tx.send(Frame::new(bytes, source)).await.is_err() {
                        // Consumer gone; the application is shutting down.
                        return PumpExit::Shutdown;
                    }
                }
            }
            Ok(Err(e)) => return PumpExit::LinkError(e),
            Err(_elapsed) => {}
        }

        // Outbound slice: drain whatever queued up during the read.  Each
        // frame is acknowledged only after the transport accepted it.
        while let Ok(job) = outbound_rx.try_recv() {
            match transport.write_frame(&job.bytes).await {
                Ok(()) => {
                    let _ = job.done.send(Ok(()));
                }
                Err(e) => {
                    let _ = job.done.send(Err(MuxError::WriteFailed(e.to_string())));
                    return PumpExit::LinkError(e);
                }
            }
        }

        // Keep-alive so the base does not drop an idle connection.
        if wants_ping && last_ping.elapsed() >= config.ping_interval {
            if let Err(e) = transport.write_frame(&PING_FRAME).await {
                return PumpExit::LinkError(e);
            }
            last_ping = Instant::now();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
