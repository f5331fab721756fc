//! One connected sync client: handshake, snapshot, then live deltas.
//!
//! Lifecycle is strictly linear: the client's HELLO is answered with
//! HELLO_ACK, a full roster snapshot streams out, and only then does the
//! session go live, interleaving deltas from the store with whatever the
//! client sends.  Subscribing to the store BEFORE taking the snapshot means
//! no change can fall between them; a delta that is also in the snapshot is
//! harmless because deltas carry full device state.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, warn};
use trainlink_core::sync::{
    decode_message, encode_message_now, HelloAckMessage, HelloMessage,
    SequenceCounter, SyncMessage, HEADER_SIZE, PROTOCOL_VERSION,
};
use trainlink_core::SyncError;

use crate::dispatch::Dispatcher;
use crate::state::StateStore;

/// Client protocol version we cannot speak.
pub const REJECT_VERSION_MISMATCH: u8 = 1;
/// Session limit reached.
pub const REJECT_SERVER_FULL: u8 = 2;

/// How long we wait for the client's HELLO before giving up.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Depth of the channel between the reader task and the session loop.
const INBOUND_DEPTH: usize = 16;

/// Depth of the queue of rejection replies from in-flight dispatches.
const REPLY_DEPTH: usize = 16;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Codec(#[from] SyncError),
    #[error("client never sent HELLO")]
    HelloTimeout,
    #[error("expected HELLO, got {0:?}")]
    NotHello(&'static str),
}

/// Decrements the session count when the session ends, however it ends.
struct SessionSlot(Arc<AtomicUsize>);

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Drives one client connection to completion.
pub async fn run(
    stream: TcpStream,
    peer: SocketAddr,
    store: StateStore,
    dispatcher: Dispatcher,
    sessions: Arc<AtomicUsize>,
    max_sessions: usize,
) {
    let over_limit = sessions.fetch_add(1, Ordering::Relaxed) >= max_sessions;
    let _slot = SessionSlot(sessions);

    if let Err(e) = serve(stream, peer, store, dispatcher, over_limit).await {
        debug!("sync session {peer} ended: {e}");
    }
}

async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    store: StateStore,
    dispatcher: Dispatcher,
    over_limit: bool,
) -> Result<(), SessionError> {
    stream.set_nodelay(true)?;
    let (mut rd, mut wr) = stream.into_split();
    let seq = SequenceCounter::new();

    // Handshake.
    let hello = match time::timeout(HELLO_TIMEOUT, read_message(&mut rd)).await {
        Ok(result) => match result? {
            SyncMessage::Hello(hello) => hello,
            other => return Err(SessionError::NotHello(message_name(&other))),
        },
        Err(_elapsed) => return Err(SessionError::HelloTimeout),
    };

    if let Some(reason) = reject_reason(&hello, over_limit) {
        warn!(
            "sync: rejecting {} ({peer}): reason {reason}",
            hello.client_name
        );
        let ack = SyncMessage::HelloAck(HelloAckMessage {
            accepted: false,
            reject_reason: reason,
            server_version: PROTOCOL_VERSION,
            device_count: 0,
        });
        send(&mut wr, &ack, &seq).await?;
        return Ok(());
    }

    info!(
        "sync: {} ({}) connected from {peer}",
        hello.client_name, hello.client_id
    );

    // Subscribe first so nothing slips between snapshot and live deltas.
    let mut deltas = store.subscribe().await;
    let (devices, as_of_seq) = store.snapshot().await;

    send(
        &mut wr,
        &SyncMessage::HelloAck(HelloAckMessage {
            accepted: true,
            reject_reason: 0,
            server_version: PROTOCOL_VERSION,
            device_count: devices.len() as u32,
        }),
        &seq,
    )
    .await?;
    send(
        &mut wr,
        &SyncMessage::SnapshotBegin {
            device_count: devices.len() as u32,
            as_of_seq,
        },
        &seq,
    )
    .await?;
    for device in devices {
        send(&mut wr, &SyncMessage::SnapshotDevice(device), &seq).await?;
    }
    send(&mut wr, &SyncMessage::SnapshotEnd { as_of_seq }, &seq).await?;

    // Live phase.  The reader task owns the read half, so a delta write
    // never cancels a partially read frame, and forwarded commands are
    // dispatched off the loop so a slow rail write never stalls deltas.
    let (inbound_tx, mut inbound) = mpsc::channel(INBOUND_DEPTH);
    let reader = tokio::spawn(async move {
        loop {
            let result = read_message(&mut rd).await;
            let failed = result.is_err();
            if inbound_tx.send(result).await.is_err() || failed {
                return;
            }
        }
    });
    let (reply_tx, mut replies) = mpsc::channel(REPLY_DEPTH);

    let outcome = async {
        loop {
            tokio::select! {
                incoming = inbound.recv() => {
                    match incoming {
                        Some(Ok(SyncMessage::CommandForward(command))) => {
                            debug!("sync: {peer} forwarded {command:?}");
                            let dispatcher = dispatcher.clone();
                            let reply_tx = reply_tx.clone();
                            tokio::spawn(async move {
                                if let Err(e) = dispatcher.submit_and_wait(command).await {
                                    let rejected = SyncMessage::Rejected {
                                        description: e.to_string(),
                                    };
                                    let _ = reply_tx.send(rejected).await;
                                }
                            });
                        }
                        Some(Ok(SyncMessage::Ping(nonce))) => {
                            send(&mut wr, &SyncMessage::Pong(nonce), &seq).await?;
                        }
                        Some(Ok(SyncMessage::Disconnect { reason })) => {
                            info!("sync: {peer} disconnected ({reason:?})");
                            return Ok(());
                        }
                        Some(Ok(other)) => {
                            debug!("sync: {peer} sent unexpected {}", message_name(&other));
                        }
                        Some(Err(e)) => return Err(e),
                        None => return Ok(()),
                    }
                }
                reply = replies.recv() => {
                    // The loop holds a sender, so the channel never closes
                    // while we are here.
                    if let Some(msg) = reply {
                        send(&mut wr, &msg, &seq).await?;
                    }
                }
                delta = deltas.recv() => {
                    match delta {
                        Some(device) => send(&mut wr, &SyncMessage::Delta(device), &seq).await?,
                        // Channel closed: either the store dropped us for lagging
                        // or the server is going down.  Closing the connection
                        // makes the client reconnect and take a fresh snapshot.
                        None => {
                            info!("sync: delta feed for {peer} closed, ending session");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
    .await;
    reader.abort();
    outcome
}

fn reject_reason(hello: &HelloMessage, over_limit: bool) -> Option<u8> {
    if hello.protocol_version != PROTOCOL_VERSION {
        Some(REJECT_VERSION_MISMATCH)
    } else if over_limit {
        Some(REJECT_SERVER_FULL)
    } else {
        None
    }
}

fn message_name(msg: &SyncMessage) -> &'static str {
    match msg {
        SyncMessage::Hello(_) => "HELLO",
        SyncMessage::HelloAck(_) => "HELLO_ACK",
        SyncMessage::SnapshotBegin { .. } => "SNAPSHOT_BEGIN",
        SyncMessage::SnapshotDevice(_) => "SNAPSHOT_DEVICE",
        SyncMessage::SnapshotEnd { .. } => "SNAPSHOT_END",
        SyncMessage::Delta(_) => "DELTA",
        SyncMessage::CommandForward(_) => "COMMAND_FORWARD",
        SyncMessage::Rejected { .. } => "REJECTED",
        SyncMessage::Ping(_) => "PING",
        SyncMessage::Pong(_) => "PONG",
        SyncMessage::Disconnect { .. } => "DISCONNECT",
    }
}

/// Reads one framed message: fixed header first, then the payload the
/// header promises.
async fn read_message(rd: &mut OwnedReadHalf) -> Result<SyncMessage, SessionError> {
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
    wr: &mut OwnedWriteHalf,
    msg: &SyncMessage,
    seq: &SequenceCounter,
) -> Result<(), SessionError> {
    let bytes = encode_message_now(msg, seq.next())?;
    wr.write_all(&bytes).await?;
    Ok(())
}
