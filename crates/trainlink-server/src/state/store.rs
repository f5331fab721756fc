//! The authoritative roster, shared between the ingest pump, the dispatcher
//! and every sync session.
//!
//! All mutation goes through [`StateStore::apply`], which stamps each change
//! with a monotonically increasing sequence number before fanning it out to
//! subscribers.  A slow subscriber never blocks the writer: deltas it cannot
//! keep up with are dropped, and the snapshot protocol lets it resync.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};
use trainlink_core::sync::SequenceCounter;
use trainlink_core::{Command, Device, DeviceKey, FrameSource, Roster};

/// Per-subscriber delta queue depth.
const SUBSCRIBER_DEPTH: usize = 256;

/// Thread-safe wrapper around the [`Roster`].
#[derive(Clone)]
pub struct StateStore {
    roster: Arc<RwLock<Roster>>,
    seq: Arc<SequenceCounter>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<Device>>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            roster: Arc::new(RwLock::new(Roster::new())),
            seq: Arc::new(SequenceCounter::new()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Applies a command to the roster and publishes every device it changed.
    ///
    /// Returns the devices whose state actually moved; no-op commands
    /// produce no deltas and do not advance the sequence.
    pub async fn apply(&self, command: &Command, origin: FrameSource) -> Vec<Device> {
        let changed = {
            let mut roster = self.roster.write().await;
            // The counter only advances under the write lock, and only when
            // the roster actually moved, so no-ops leave no sequence gap.
            let next = self.seq.current() + 1;
            let changed: Vec<Device> = match command {
                Command::Halt => roster.apply_halt(next, origin),
                _ => roster.apply(command, next, origin).into_iter().collect(),
            };
            if !changed.is_empty() {
                self.seq.next();
            }
            changed
        };
        for device in &changed {
            debug!(
                "state: {} -> seq {} (via {origin})",
                device.key, device.update_seq
            );
        }
        self.publish(&changed).await;
        changed
    }

    /// Records a device name from the base roster without touching state.
    pub async fn catalog(&self, key: DeviceKey, name: String) -> Option<Device> {
        let updated = {
            let mut roster = self.roster.write().await;
            if roster.catalog(key, Some(name)) {
                roster.get(&key).cloned()
            } else {
                None
            }
        };
        if let Some(device) = &updated {
            self.publish(std::slice::from_ref(device)).await;
        }
        updated
    }

    /// Point lookup.
    pub async fn query(&self, key: &DeviceKey) -> Option<Device> {
        self.roster.read().await.get(key).cloned()
    }

    /// Consistent copy of the whole roster plus the sequence it is current at.
    ///
    /// Both are captured under one read lock, so a client that replays this
    /// snapshot and then every delta with a higher sequence sees exactly the
    /// server's state.
    pub async fn snapshot(&self) -> (Vec<Device>, u64) {
        let roster = self.roster.read().await;
        let devices = roster.iter().cloned().collect();
        (devices, self.seq.current())
    }

    /// Registers a delta subscriber.
    pub async fn subscribe(&self) -> mpsc::Receiver<Device> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_DEPTH);
        self.subscribers.lock().await.push(tx);
        rx
    }

    pub fn current_seq(&self) -> u64 {
        self.seq.current()
    }

    pub async fn device_count(&self) -> usize {
        self.roster.read().await.len()
    }

    /// Fans changed devices out to subscribers.
    ///
    /// A subscriber whose queue is full is dropped outright rather than
    /// backpressuring the rails; its receiver closes and the owner must
    /// resync from a fresh snapshot.
    async fn publish(&self, changed: &[Device]) {
        if changed.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock().await;
        for device in changed {
            subscribers.retain(|tx| {
                if tx.is_closed() {
                    return false;
                }
                match tx.try_send(device.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("state: dropping subscriber that cannot keep up");
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use trainlink_core::{DeviceScope, DeviceState, EngineOp};

    #[tokio::test]
    async fn test_apply_creates_and_updates_device() {
        let store = StateStore::new();
        let cmd = Command::engine(12, EngineOp::AbsoluteSpeed(80)).unwrap();

        let changed = store.apply(&cmd, FrameSource::Local).await;
        assert_eq!(changed.len(), 1);
        let key = DeviceKey::new(DeviceScope::Engine, 12);
        let device = store.query(&key).await.unwrap();
        match device.state {
            DeviceState::Unit(unit) => assert_eq!(unit.speed, Some(80)),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_noop_command_produces_no_delta() {
        let store = StateStore::new();
        let cmd = Command::engine(12, EngineOp::AbsoluteSpeed(80)).unwrap();
        store.apply(&cmd, FrameSource::Local).await;
        let seq_before = store.current_seq();

        // Same speed again: nothing moves.
        let changed = store.apply(&cmd, FrameSource::Local).await;
        assert!(changed.is_empty());
        assert_eq!(store.current_seq(), seq_before);
    }

    #[tokio::test]
    async fn test_halt_stops_every_unit() {
        let store = StateStore::new();
        store
            .apply(
                &Command::engine(1, EngineOp::AbsoluteSpeed(50)).unwrap(),
                FrameSource::Local,
            )
            .await;
        store
            .apply(
                &Command::train(2, EngineOp::AbsoluteSpeed(90)).unwrap(),
                FrameSource::Local,
            )
            .await;

        let changed = store.apply(&Command::Halt, FrameSource::Serial).await;
        assert_eq!(changed.len(), 2);
        for device in changed {
            match device.state {
                DeviceState::Unit(unit) => assert_eq!(unit.speed, Some(0)),
                other => panic!("unexpected state: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_subscriber_sees_deltas() {
        let store = StateStore::new();
        let mut rx = store.subscribe().await;

        store
            .apply(&Command::engine(5, EngineOp::RingBell).unwrap(), FrameSource::Serial)
            .await;
        let delta = rx.recv().await.unwrap();
        assert_eq!(delta.key, DeviceKey::new(DeviceScope::Engine, 5));
    }

    #[tokio::test]
    async fn test_snapshot_sequence_matches_roster() {
        let store = StateStore::new();
        store
            .apply(
                &Command::engine(1, EngineOp::AbsoluteSpeed(10)).unwrap(),
                FrameSource::Local,
            )
            .await;
        store
            .apply(
                &Command::switch(4, trainlink_core::SwitchOp::Throw).unwrap(),
                FrameSource::Base3,
            )
            .await;

        let (devices, seq) = store.snapshot().await;
        assert_eq!(devices.len(), 2);
        assert_eq!(seq, store.current_seq());
    }

    #[tokio::test]
    async fn test_deltas_arrive_in_apply_order_with_increasing_seq() {
        let store = StateStore::new();
        let mut rx = store.subscribe().await;

        for speed in [10u8, 20, 30, 40] {
            store
                .apply(
                    &Command::engine(7, EngineOp::AbsoluteSpeed(speed)).unwrap(),
                    FrameSource::Local,
                )
                .await;
        }

        let mut last_seq = 0;
        for expected in [10u8, 20, 30, 40] {
            let delta = rx.recv().await.unwrap();
            match delta.state {
                DeviceState::Unit(unit) => assert_eq!(unit.speed, Some(expected)),
                other => panic!("unexpected state: {other:?}"),
            }
            assert!(delta.update_seq > last_seq);
            last_seq = delta.update_seq;
        }
    }

    #[tokio::test]
    async fn test_overflowing_subscriber_is_dropped_not_the_writer() {
        let store = StateStore::new();
        let mut rx = store.subscribe().await;

        // Never drain rx: once its queue fills, the store must cut it
        // loose instead of stalling.
        for i in 0..(SUBSCRIBER_DEPTH + 10) {
            let speed = (i % 200) as u8;
            store
                .apply(
                    &Command::engine(3, EngineOp::AbsoluteSpeed(speed)).unwrap(),
                    FrameSource::Local,
                )
                .await;
        }

        // Drain what was queued; the channel then reports closed.
        while rx.recv().await.is_some() {}
        assert_eq!(store.subscribers.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn test_catalog_publishes_name_change() {
        let store = StateStore::new();
        let mut rx = store.subscribe().await;
        let key = DeviceKey::new(DeviceScope::Engine, 42);

        let updated = store.catalog(key, "Polar Express".into()).await;
        assert_eq!(updated.unwrap().name.as_deref(), Some("Polar Express"));
        assert_eq!(rx.recv().await.unwrap().key, key);

        // Same name again is a no-op.
        assert!(store.catalog(key, "Polar Express".into()).await.is_none());
    }
}
