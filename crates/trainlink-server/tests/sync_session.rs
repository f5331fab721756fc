//! End-to-end sync service tests: a real TCP client against a server
//! backed by a mock rail link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use trainlink_core::protocol::codec::encode;
use trainlink_core::sync::{
    decode_message, encode_message_now, HelloMessage, SequenceCounter, SyncMessage, HEADER_SIZE,
    PROTOCOL_VERSION,
};
use trainlink_core::{Command, DeviceKey, DeviceScope, EngineOp, FrameSource};
use trainlink_server::mux::{self, MuxConfig};
use trainlink_server::transport::mock::{MockHandle, MockTransport};
use trainlink_server::{ingest, Dispatcher, StateStore, SyncServer};
use uuid::Uuid;

struct Rig {
    server_addr: std::net::SocketAddr,
    store: StateStore,
    rail: MockHandle,
    running: Arc<AtomicBool>,
}

async fn start_rig() -> Rig {
    let (transport, rail) = MockTransport::new(FrameSource::Serial);
    let running = Arc::new(AtomicBool::new(true));
    let (mux_handle, inbound) = mux::start(
        vec![Box::new(transport)],
        MuxConfig::default(),
        running.clone(),
    );
    let store = StateStore::new();
    ingest::start(inbound, store.clone());
    let dispatcher = Dispatcher::start(mux_handle, store.clone());
    let server = SyncServer::start(
        "127.0.0.1:0".parse().unwrap(),
        4,
        store.clone(),
        dispatcher,
        running.clone(),
    )
    .await
    .unwrap();

    Rig {
        server_addr: server.local_addr(),
        store,
        rail,
        running,
    }
}

async fn read_message(stream: &mut TcpStream) -> SyncMessage {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await.unwrap();
    let payload_len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload_len);
    buf.extend_from_slice(&header);
    buf.resize(HEADER_SIZE + payload_len, 0);
    stream.read_exact(&mut buf[HEADER_SIZE..]).await.unwrap();
    decode_message(&buf).unwrap().0
}

async fn send_message(stream: &mut TcpStream, msg: &SyncMessage, seq: &SequenceCounter) {
    let bytes = encode_message_now(msg, seq.next()).unwrap();
    stream.write_all(&bytes).await.unwrap();
}

fn hello(version: u8) -> SyncMessage {
    SyncMessage::Hello(HelloMessage {
        client_id: Uuid::new_v4(),
        protocol_version: version,
        client_name: "test-client".to_string(),
    })
}

/// Runs the handshake and drains the snapshot, returning its devices.
async fn connect_and_sync(addr: std::net::SocketAddr) -> (TcpStream, SequenceCounter, Vec<trainlink_core::Device>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let seq = SequenceCounter::new();
    send_message(&mut stream, &hello(PROTOCOL_VERSION), &seq).await;

    let ack = read_message(&mut stream).await;
    let device_count = match ack {
        SyncMessage::HelloAck(ack) => {
            assert!(ack.accepted);
            ack.device_count
        }
        other => panic!("expected HELLO_ACK, got {other:?}"),
    };

    match read_message(&mut stream).await {
        SyncMessage::SnapshotBegin {
            device_count: n, ..
        } => assert_eq!(n, device_count),
        other => panic!("expected SNAPSHOT_BEGIN, got {other:?}"),
    }
    let mut devices = Vec::new();
    loop {
        match read_message(&mut stream).await {
            SyncMessage::SnapshotDevice(device) => devices.push(device),
            SyncMessage::SnapshotEnd { .. } => break,
            other => panic!("expected snapshot stream, got {other:?}"),
        }
    }
    assert_eq!(devices.len(), device_count as usize);
    (stream, seq, devices)
}

#[tokio::test]
async fn test_handshake_snapshot_and_live_delta() {
    let rig = start_rig().await;

    // Seed one device before any client connects.
    rig.store
        .apply(
            &Command::engine(5, EngineOp::AbsoluteSpeed(30)).unwrap(),
            FrameSource::Local,
        )
        .await;

    let (mut stream, _seq, devices) = connect_and_sync(rig.server_addr).await;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].key, DeviceKey::new(DeviceScope::Engine, 5));

    // A change observed on the rails flows out as a delta.
    rig.rail
        .inject(&encode(&Command::engine(5, EngineOp::AbsoluteSpeed(90)).unwrap()));
    match read_message(&mut stream).await {
        SyncMessage::Delta(device) => {
            assert_eq!(device.key, DeviceKey::new(DeviceScope::Engine, 5));
        }
        other => panic!("expected DELTA, got {other:?}"),
    }

    rig.running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_forwarded_command_reaches_the_rails_and_comes_back_as_delta() {
    let rig = start_rig().await;
    let (mut stream, seq, _devices) = connect_and_sync(rig.server_addr).await;

    let cmd = Command::engine(12, EngineOp::RingBell).unwrap();
    send_message(&mut stream, &SyncMessage::CommandForward(cmd), &seq).await;

    // The dispatcher applies the command after the link accepts it, so the
    // forwarding client sees its own change as a delta.
    match read_message(&mut stream).await {
        SyncMessage::Delta(device) => {
            assert_eq!(device.key, DeviceKey::new(DeviceScope::Engine, 12));
        }
        other => panic!("expected DELTA, got {other:?}"),
    }

    // And the frame went out on the mock link.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rig.rail.written(), vec![encode(&cmd)]);

    rig.running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_forward_split_across_writes_survives_interleaved_delta() {
    let rig = start_rig().await;
    let (mut stream, seq, _devices) = connect_and_sync(rig.server_addr).await;

    let cmd = Command::engine(21, EngineOp::AbsoluteSpeed(44)).unwrap();
    let bytes = encode_message_now(&SyncMessage::CommandForward(cmd), seq.next()).unwrap();

    // Send only part of the header, as a congested client socket would.
    stream.write_all(&bytes[..10]).await.unwrap();
    stream.flush().await.unwrap();

    // A rail change lands while the forward is still half received.  The
    // delta must go out without corrupting the partially read frame.
    rig.rail
        .inject(&encode(&Command::engine(5, EngineOp::RingBell).unwrap()));
    match read_message(&mut stream).await {
        SyncMessage::Delta(device) => {
            assert_eq!(device.key, DeviceKey::new(DeviceScope::Engine, 5));
        }
        other => panic!("expected DELTA, got {other:?}"),
    }

    // The rest of the forward arrives and is still executed.
    stream.write_all(&bytes[10..]).await.unwrap();
    match read_message(&mut stream).await {
        SyncMessage::Delta(device) => {
            assert_eq!(device.key, DeviceKey::new(DeviceScope::Engine, 21));
        }
        other => panic!("expected DELTA, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rig.rail.written().contains(&encode(&cmd)));

    rig.running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_deltas_flow_while_a_forward_is_stuck_retrying() {
    let rig = start_rig().await;
    let (mut stream, seq, _devices) = connect_and_sync(rig.server_addr).await;

    // Every rail write fails, so the forwarded command retries for seconds.
    rig.rail.fail_next_writes(u32::MAX);
    let cmd = Command::engine(30, EngineOp::AbsoluteSpeed(77)).unwrap();
    send_message(&mut stream, &SyncMessage::CommandForward(cmd), &seq).await;

    // Rail traffic keeps flowing out as deltas in the meantime.
    rig.rail
        .inject(&encode(&Command::engine(2, EngineOp::RingBell).unwrap()));
    let delta = tokio::time::timeout(Duration::from_secs(2), read_message(&mut stream))
        .await
        .expect("delta stalled behind the in-flight forward");
    match delta {
        SyncMessage::Delta(device) => {
            assert_eq!(device.key, DeviceKey::new(DeviceScope::Engine, 2));
        }
        other => panic!("expected DELTA, got {other:?}"),
    }

    rig.running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_ping_is_answered_with_matching_pong() {
    let rig = start_rig().await;
    let (mut stream, seq, _devices) = connect_and_sync(rig.server_addr).await;

    send_message(&mut stream, &SyncMessage::Ping(0xC0FFEE), &seq).await;
    match read_message(&mut stream).await {
        SyncMessage::Pong(nonce) => assert_eq!(nonce, 0xC0FFEE),
        other => panic!("expected PONG, got {other:?}"),
    }

    rig.running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_version_mismatch_is_rejected() {
    let rig = start_rig().await;

    let mut stream = TcpStream::connect(rig.server_addr).await.unwrap();
    let seq = SequenceCounter::new();
    send_message(&mut stream, &hello(PROTOCOL_VERSION + 1), &seq).await;

    match read_message(&mut stream).await {
        SyncMessage::HelloAck(ack) => {
            assert!(!ack.accepted);
            assert_ne!(ack.reject_reason, 0);
        }
        other => panic!("expected rejecting HELLO_ACK, got {other:?}"),
    }

    rig.running.store(false, Ordering::Relaxed);
}

#[tokio::test]
async fn test_two_clients_see_the_same_delta() {
    let rig = start_rig().await;
    let (mut first, _s1, _) = connect_and_sync(rig.server_addr).await;
    let (mut second, _s2, _) = connect_and_sync(rig.server_addr).await;

    rig.rail
        .inject(&encode(&Command::switch(7, trainlink_core::SwitchOp::Out).unwrap()));

    for stream in [&mut first, &mut second] {
        match read_message(stream).await {
            SyncMessage::Delta(device) => {
                assert_eq!(device.key, DeviceKey::new(DeviceScope::Switch, 7));
            }
            other => panic!("expected DELTA, got {other:?}"),
        }
    }

    rig.running.store(false, Ordering::Relaxed);
}
