//! Connection to the server: reconnect loop, handshake, message pump.
//!
//! A dedicated reader task owns the read half of the socket; the write
//! half sits behind a mutex so command forwarding, PONG replies, and the
//! client's own keep-alive pings can share it.  Every (re)connect starts
//! a fresh handshake and a fresh snapshot, so the mirror heals itself
//! after any outage.  The client pings the server periodically and drops
//! a connection that has gone silent, so a dead server that never closes
//! the socket cannot wedge it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time;
use tracing::{debug, info, warn};
use trainlink_core::sync::{
    decode_message, encode_message_now, DisconnectReason, HelloMessage, SequenceCounter,
    SyncMessage, HEADER_SIZE, PROTOCOL_VERSION,
};
use trainlink_core::{Command, Device, DeviceKey, SyncError};
use uuid::Uuid;

use crate::mirror::{Mirror, MirrorEvent};

/// First reconnect delay; doubles per failed attempt up to the cap and
/// resets once a handshake goes through.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(500);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Keep-alive interval: how often the client pings the server.
const PING_INTERVAL: Duration = Duration::from_secs(3);

/// A server that has sent nothing for this long is treated as dead.
const SERVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Application event queue depth.
const EVENT_DEPTH: usize = 256;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to a server")]
    NotConnected,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Codec(#[from] SyncError),
    #[error("server went silent past the keep-alive window")]
    ServerSilent,
}

/// Connection lifecycle plus mirror changes, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Handshake accepted; a snapshot is streaming.
    Connected,
    /// Connection lost; the mirror is stale until the next snapshot.
    SyncLost,
    Mirror(MirrorEvent),
}

/// Handle to a running sync client.
#[derive(Clone)]
pub struct SyncClient {
    mirror: Arc<RwLock<Mirror>>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    seq: Arc<SequenceCounter>,
    running: Arc<AtomicBool>,
}

impl SyncClient {
    /// Spawns the connection task and returns the handle plus the event
    /// stream.
    pub fn connect(
        addr: SocketAddr,
        client_name: String,
        running: Arc<AtomicBool>,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_DEPTH);
        let client = Self {
            mirror: Arc::new(RwLock::new(Mirror::new())),
            writer: Arc::new(Mutex::new(None)),
            seq: Arc::new(SequenceCounter::new()),
            running,
        };

        tokio::spawn(run_loop(
            addr,
            client_name,
            Uuid::new_v4(),
            client.clone(),
            events_tx,
        ));

        (client, events_rx)
    }

    /// Forwards a command to the server for dispatch to the rails.
    ///
    /// The mirror is never updated optimistically; the change arrives as a
    /// delta once the server has put it on the wire.
    pub async fn forward(&self, command: Command) -> Result<(), ClientError> {
        let bytes = encode_message_now(&SyncMessage::CommandForward(command), self.seq.next())?;
        let mut guard = self.writer.lock().await;
        let wr = guard.as_mut().ok_or(ClientError::NotConnected)?;
        wr.write_all(&bytes).await?;
        Ok(())
    }

    pub async fn device(&self, key: &DeviceKey) -> Option<Device> {
        self.mirror.read().await.device(key).cloned()
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.mirror.read().await.devices().cloned().collect()
    }

    pub async fn is_synced(&self) -> bool {
        self.mirror.read().await.is_synced()
    }

    /// Stops the connection task after its current attempt.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

async fn run_loop(
    addr: SocketAddr,
    client_name: String,
    client_id: Uuid,
    client: SyncClient,
    events: mpsc::Sender<ClientEvent>,
) {
    let mut backoff = INITIAL_RECONNECT_DELAY;
    while client.running.load(Ordering::Relaxed) {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("set_nodelay failed: {e}");
                }
                let (rd, wr) = stream.into_split();
                *client.writer.lock().await = Some(wr);

                let hello = SyncMessage::Hello(HelloMessage {
                    client_id,
                    protocol_version: PROTOCOL_VERSION,
                    client_name: client_name.clone(),
                });
                match send(&client.writer, &hello, &client.seq).await {
                    Ok(()) => {
                        info!("connected to {addr}");
                        backoff = INITIAL_RECONNECT_DELAY;
                        if let Err(e) = pump(rd, &client, &events).await {
                            debug!("connection to {addr} ended: {e}");
                        }
                    }
                    Err(e) => warn!("handshake with {addr} failed: {e}"),
                }

                *client.writer.lock().await = None;
                client.mirror.write().await.mark_stale();
                let _ = events.send(ClientEvent::SyncLost).await;
            }
            Err(e) => {
                debug!("connect to {addr} failed: {e}");
            }
        }

        time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_RECONNECT_DELAY);
    }
    info!("sync client stopped");
}

/// Services one established connection until it fails, is closed, or the
/// server goes silent.
async fn pump(
    mut rd: OwnedReadHalf,
    client: &SyncClient,
    events: &mpsc::Sender<ClientEvent>,
) -> Result<(), ClientError> {
    let (inbound_tx, mut inbound) = mpsc::channel::<Result<SyncMessage, ClientError>>(EVENT_DEPTH);
    let reader = tokio::spawn(async move {
        loop {
            let result = read_message(&mut rd).await;
            let failed = result.is_err();
            if inbound_tx.send(result).await.is_err() || failed {
                return;
            }
        }
    });

    let outcome = async {
        let mut keepalive = time::interval(PING_INTERVAL);
        keepalive.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut last_heard = Instant::now();
        let mut nonce: u64 = 0;

        loop {
            if !client.running.load(Ordering::Relaxed) {
                // Best effort; the socket is going away either way.
                let bye = SyncMessage::Disconnect {
                    reason: DisconnectReason::UserInitiated,
                };
                let _ = send(&client.writer, &bye, &client.seq).await;
                return Ok(());
            }
            tokio::select! {
                incoming = inbound.recv() => {
                    let msg = match incoming {
                        Some(result) => result?,
                        None => return Ok(()),
                    };
                    last_heard = Instant::now();
                    match msg {
                        SyncMessage::HelloAck(ack) => {
                            if !ack.accepted {
                                warn!("server rejected handshake (reason {})", ack.reject_reason);
                                return Ok(());
                            }
                            debug!(
                                "handshake accepted, snapshot of {} devices coming",
                                ack.device_count
                            );
                            let _ = events.send(ClientEvent::Connected).await;
                        }
                        SyncMessage::Ping(nonce) => {
                            send(&client.writer, &SyncMessage::Pong(nonce), &client.seq).await?;
                        }
                        SyncMessage::Pong(_) => {}
                        SyncMessage::Disconnect { reason } => {
                            info!("server closed the session ({reason:?})");
                            return Ok(());
                        }
                        other => {
                            let event = client.mirror.write().await.handle(other);
                            if let Some(event) = event {
                                let _ = events.send(ClientEvent::Mirror(event)).await;
                            }
                        }
                    }
                }
                _ = keepalive.tick() => {
                    if last_heard.elapsed() >= SERVER_TIMEOUT {
                        warn!("server silent for {:?}, dropping the connection", last_heard.elapsed());
                        return Err(ClientError::ServerSilent);
                    }
                    nonce = nonce.wrapping_add(1);
                    send(&client.writer, &SyncMessage::Ping(nonce), &client.seq).await?;
                }
            }
        }
    }
    .await;
    reader.abort();
    outcome
}

async fn read_message(rd: &mut OwnedReadHalf) -> Result<SyncMessage, ClientError> {
    let mut header = [0u8; HEADER_SIZE];
    rd.read_exact(&mut header).await?;
    let payload_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload_len);
    buf.extend_from_slice(&header);
    buf.resize(HEADER_SIZE + payload_len, 0);
    rd.read_exact(&mut buf[HEADER_SIZE..]).await?;

    let (msg, _consumed) = decode_message(&buf)?;
    Ok(msg)
}

async fn send(
    writer: &Mutex<Option<OwnedWriteHalf>>,
    msg: &SyncMessage,
    seq: &SequenceCounter,
) -> Result<(), ClientError> {
    let bytes = encode_message_now(msg, seq.next())?;
    let mut guard = writer.lock().await;
    let wr = guard.as_mut().ok_or(ClientError::NotConnected)?;
    wr.write_all(&bytes).await?;
    Ok(())
}
