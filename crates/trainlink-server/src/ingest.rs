//! Inbound frame pump: the single consumer of the merged link stream.
//!
//! Every frame observed on the rails, whether we sent it or another
//! controller did, folds into the state store here.  Being the only
//! consumer gives every mirror one global ordering of changes.
//!
//! Decode failures are logged and dropped; a corrupt frame must never take
//! the pump down.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use trainlink_core::protocol::codec::{decode, Decoded};
use trainlink_core::protocol::pdi::PdiMessage;
use trainlink_core::Frame;

use crate::state::StateStore;

/// Spawns the pump over the merged inbound stream.
pub fn start(mut inbound: mpsc::Receiver<Frame>, store: StateStore) {
    tokio::spawn(async move {
        while let Some(frame) = inbound.recv().await {
            handle_frame(&frame, &store).await;
        }
        debug!("ingest pump stopped");
    });
}

async fn handle_frame(frame: &Frame, store: &StateStore) {
    match decode(&frame.bytes) {
        Ok(Decoded::Command(command)) => {
            debug!("{}: observed {command:?}", frame.source);
            store.apply(&command, frame.source).await;
        }
        Ok(Decoded::Pdi(message)) => handle_pdi(frame, message, store).await,
        Err(e) => {
            warn!(
                "{}: dropping undecodable frame {:02x?}: {e}",
                frame.source, frame.bytes
            );
        }
    }
}

async fn handle_pdi(frame: &Frame, message: PdiMessage, store: &StateStore) {
    match message {
        PdiMessage::BaseRecord { key, name } => {
            info!("{}: roster record {key} {name:?}", frame.source);
            if let Some(name) = name {
                store.catalog(key, name).await;
            }
        }
        // Keep-alive echo from the base; nothing to fold in.
        PdiMessage::Ping => {}
        // Our own roster request reflected back, or another controller's.
        PdiMessage::AllGet => {}
        other => {
            debug!("{}: ignoring {other:?}", frame.source);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use trainlink_core::protocol::codec::encode;
    use trainlink_core::protocol::pdi;
    use trainlink_core::{Command, DeviceKey, DeviceScope, EngineOp, FrameSource};

    #[tokio::test]
    async fn test_observed_command_updates_the_store() {
        let (tx, rx) = mpsc::channel(8);
        let store = StateStore::new();
        start(rx, store.clone());

        let cmd = Command::engine(8, EngineOp::AbsoluteSpeed(70)).unwrap();
        tx.send(Frame::new(encode(&cmd), FrameSource::Serial))
            .await
            .unwrap();

        let key = DeviceKey::new(DeviceScope::Engine, 8);
        for _ in 0..50 {
            if store.query(&key).await.is_some() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("command never folded into the store");
    }

    #[tokio::test]
    async fn test_base_record_catalogs_the_device() {
        let (tx, rx) = mpsc::channel(8);
        let store = StateStore::new();
        start(rx, store.clone());

        let key = DeviceKey::new(DeviceScope::Engine, 23);
        let bytes = pdi::encode(&PdiMessage::BaseRecord {
            key,
            name: Some("Hudson".into()),
        });
        tx.send(Frame::new(bytes, FrameSource::Base3)).await.unwrap();

        for _ in 0..50 {
            if let Some(device) = store.query(&key).await {
                assert_eq!(device.name.as_deref(), Some("Hudson"));
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("roster record never cataloged");
    }

    #[tokio::test]
    async fn test_corrupt_frame_does_not_stop_the_pump() {
        let (tx, rx) = mpsc::channel(8);
        let store = StateStore::new();
        start(rx, store.clone());

        // Bad checksum first, then a good frame.
        let cmd = Command::engine(4, EngineOp::BellOn).unwrap();
        let mut bad = encode(&cmd);
        bad[3] ^= 0xFF;
        tx.send(Frame::new(bad, FrameSource::Serial)).await.unwrap();
        tx.send(Frame::new(encode(&cmd), FrameSource::Serial))
            .await
            .unwrap();

        let key = DeviceKey::new(DeviceScope::Engine, 4);
        for _ in 0..50 {
            if store.query(&key).await.is_some() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("pump stopped after a corrupt frame");
    }
}
