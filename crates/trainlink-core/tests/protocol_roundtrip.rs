//! Integration tests for the trainlink-core codecs.
//!
//! These exercise the rail-side codec (TMCC and PDI), the roster, and the
//! sync codec together through the public API: a command is encoded to rail
//! bytes, decoded back, folded into a roster, and the resulting device is
//! shipped through a sync delta the way the server does it.

use trainlink_core::{
    protocol::codec::{self, Decoded},
    protocol::pdi::{self, PdiMessage},
    sync::{
        decode_message, encode_message,
        messages::{HelloAckMessage, HelloMessage, SyncMessage},
        SequenceCounter,
    },
    AccessoryOp, Command, DeviceKey, DeviceScope, DeviceState, Direction, EngineOp, ExtendedOp,
    FrameSource, PowerOp, Roster, SwitchOp, UnitState,
};
use uuid::Uuid;

/// Encodes a command to rail bytes and decodes it back.
fn rail_roundtrip(cmd: Command) {
    let bytes = codec::encode(&cmd);
    let decoded = codec::decode(&bytes).expect("decode must succeed");
    assert_eq!(decoded, Decoded::Command(cmd), "frame {bytes:02x?}");
}

#[test]
fn test_rail_roundtrip_every_command_family() {
    rail_roundtrip(Command::Halt);
    rail_roundtrip(Command::engine(67, EngineOp::AbsoluteSpeed(120)).unwrap());
    rail_roundtrip(Command::train(8, EngineOp::SetDirection(Direction::Reverse)).unwrap());
    rail_roundtrip(Command::engine_extended(9, ExtendedOp::Dialog(0x22)).unwrap());
    rail_roundtrip(Command::train_extended(10, ExtendedOp::LightingEffect(4)).unwrap());
    rail_roundtrip(Command::switch(12, SwitchOp::Out).unwrap());
    rail_roundtrip(Command::accessory(3, AccessoryOp::Numeric(5)).unwrap());
    rail_roundtrip(Command::route(31).unwrap());
    rail_roundtrip(Command::power_district(2, PowerOp::On).unwrap());
}

#[test]
fn test_decoded_command_folds_into_roster() {
    let bytes = codec::encode(&Command::engine(67, EngineOp::AbsoluteSpeed(88)).unwrap());
    let Decoded::Command(cmd) = codec::decode(&bytes).unwrap() else {
        panic!("expected a command");
    };

    let mut roster = Roster::new();
    let device = roster.apply(&cmd, 1, FrameSource::Serial).expect("state must change");

    assert_eq!(device.key, DeviceKey::new(DeviceScope::Engine, 67));
    assert!(matches!(
        device.state,
        DeviceState::Unit(UnitState {
            speed: Some(88),
            ..
        })
    ));
}

#[test]
fn test_roster_device_ships_through_sync_delta() {
    let mut roster = Roster::new();
    let cmd = Command::engine(5, EngineOp::RingBell).unwrap();
    let device = roster.apply(&cmd, 42, FrameSource::Serial).unwrap();

    let counter = SequenceCounter::new();
    let bytes = encode_message(&SyncMessage::Delta(device.clone()), counter.next(), 0)
        .expect("encode must succeed");
    let (decoded, consumed) = decode_message(&bytes).expect("decode must succeed");

    assert_eq!(consumed, bytes.len(), "all bytes must be consumed");
    assert_eq!(decoded, SyncMessage::Delta(device));
}

#[test]
fn test_sync_hello_handshake_roundtrip() {
    let hello = SyncMessage::Hello(HelloMessage {
        client_id: Uuid::new_v4(),
        protocol_version: 0x01,
        client_name: "integration-test".to_string(),
    });
    let ack = SyncMessage::HelloAck(HelloAckMessage {
        accepted: true,
        reject_reason: 0,
        server_version: 0x01,
        device_count: 3,
    });

    for msg in [hello, ack] {
        let bytes = encode_message(&msg, 0, 12345).unwrap();
        let (decoded, _) = decode_message(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }
}

#[test]
fn test_pdi_relayed_tmcc_command_matches_direct_decode() {
    // A command heard via the Base 3 arrives wrapped in a PDI TMCC_RX frame;
    // the same command heard on serial arrives bare.  Both must decode to
    // the identical Command.
    let cmd = Command::train(22, EngineOp::BellOn).unwrap();

    let bare = codec::decode(&codec::encode(&cmd)).unwrap();
    let wrapped = codec::decode(&pdi::encode(&PdiMessage::TmccRx(cmd))).unwrap();

    assert_eq!(bare, wrapped);
}

#[test]
fn test_snapshot_stream_rebuilds_identical_roster() {
    // Server side: build up some state.
    let mut server = Roster::new();
    server.apply(
        &Command::engine(1, EngineOp::AbsoluteSpeed(60)).unwrap(),
        1,
        FrameSource::Local,
    );
    server.apply(&Command::switch(4, SwitchOp::Throw).unwrap(), 2, FrameSource::Local);
    server.apply(
        &Command::power_district(2, PowerOp::On).unwrap(),
        3,
        FrameSource::Base3,
    );
    server.catalog(DeviceKey::new(DeviceScope::Engine, 1), Some("GP38".into()));

    // Ship every device as a snapshot message and replay on a blank mirror.
    let counter = SequenceCounter::new();
    let mut mirror = Roster::new();
    for device in server.iter() {
        let bytes =
            encode_message(&SyncMessage::SnapshotDevice(device.clone()), counter.next(), 0)
                .unwrap();
        let (msg, _) = decode_message(&bytes).unwrap();
        let SyncMessage::SnapshotDevice(device) = msg else {
            panic!("expected a snapshot device");
        };
        mirror.put(device);
    }

    assert_eq!(mirror.len(), server.len());
    for device in server.iter() {
        assert_eq!(mirror.get(&device.key), Some(device));
    }
}
