//! Local replica of the server's roster.
//!
//! The mirror is pure data, fed one sync message at a time by the
//! connection task.  A snapshot stages into a fresh roster and replaces
//! the old one atomically at SNAPSHOT_END, so readers never observe a
//! half-applied snapshot after a reconnect.  Deltas carry full device
//! state, which makes replaying one that was also in the snapshot
//! harmless.

use tracing::{debug, warn};
use trainlink_core::sync::SyncMessage;
use trainlink_core::{Device, DeviceKey, Roster};

/// What a handled message meant to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    /// A full snapshot finished; the whole roster may have changed.
    SnapshotComplete { devices: usize, as_of_seq: u64 },
    /// One device changed.
    DeviceChanged(Device),
    /// The server refused a forwarded command.
    CommandRejected { description: String },
}

#[derive(Debug, Default)]
pub struct Mirror {
    roster: Roster,
    staging: Option<Roster>,
    as_of_seq: u64,
    synced: bool,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a snapshot has completed since the last reconnect.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// Store sequence this mirror is current at.
    pub fn as_of_seq(&self) -> u64 {
        self.as_of_seq
    }

    pub fn device(&self, key: &DeviceKey) -> Option<&Device> {
        self.roster.get(key)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.roster.iter()
    }

    pub fn len(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    /// Marks the mirror stale, e.g. when the connection drops.  The roster
    /// is kept for display but no longer tracks the server.
    pub fn mark_stale(&mut self) {
        self.synced = false;
        self.staging = None;
    }

    /// Folds one server message into the replica.
    pub fn handle(&mut self, message: SyncMessage) -> Option<MirrorEvent> {
        match message {
            SyncMessage::SnapshotBegin { device_count, .. } => {
                debug!("mirror: snapshot of {device_count} devices starting");
                self.staging = Some(Roster::new());
                None
            }
            SyncMessage::SnapshotDevice(device) => {
                match self.staging.as_mut() {
                    Some(staging) => staging.put(device),
                    None => warn!("mirror: SNAPSHOT_DEVICE outside a snapshot, ignored"),
                }
                None
            }
            SyncMessage::SnapshotEnd { as_of_seq } => {
                let Some(staging) = self.staging.take() else {
                    warn!("mirror: SNAPSHOT_END outside a snapshot, ignored");
                    return None;
                };
                let devices = staging.len();
                self.roster = staging;
                self.as_of_seq = as_of_seq;
                self.synced = true;
                Some(MirrorEvent::SnapshotComplete { devices, as_of_seq })
            }
            SyncMessage::Delta(device) => {
                // A delta older than what we already hold is a reordering
                // artifact; the state we have is newer.
                if let Some(existing) = self.roster.get(&device.key) {
                    if device.update_seq < existing.update_seq {
                        debug!("mirror: stale delta for {} ignored", device.key);
                        return None;
                    }
                }
                self.as_of_seq = self.as_of_seq.max(device.update_seq);
                self.roster.put(device.clone());
                Some(MirrorEvent::DeviceChanged(device))
            }
            SyncMessage::Rejected { description } => {
                Some(MirrorEvent::CommandRejected { description })
            }
            other => {
                debug!("mirror: no state in {other:?}");
                None
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use trainlink_core::{Command, DeviceScope, EngineOp, FrameSource};

    fn device_at(address: u16, speed: u8, seq: u64) -> Device {
        let mut roster = Roster::new();
        roster
            .apply(
                &Command::engine(address, EngineOp::AbsoluteSpeed(speed)).unwrap(),
                seq,
                FrameSource::Local,
            )
            .unwrap()
    }

    fn snapshot(mirror: &mut Mirror, devices: Vec<Device>, as_of_seq: u64) {
        mirror.handle(SyncMessage::SnapshotBegin {
            device_count: devices.len() as u32,
            as_of_seq,
        });
        for device in devices {
            mirror.handle(SyncMessage::SnapshotDevice(device));
        }
        let event = mirror.handle(SyncMessage::SnapshotEnd { as_of_seq });
        assert!(matches!(event, Some(MirrorEvent::SnapshotComplete { .. })));
    }

    #[test]
    fn test_snapshot_replaces_the_roster() {
        let mut mirror = Mirror::new();
        snapshot(&mut mirror, vec![device_at(1, 10, 1)], 1);
        assert_eq!(mirror.len(), 1);

        // A later snapshot no longer containing engine 1 removes it.
        snapshot(&mut mirror, vec![device_at(2, 20, 5)], 5);
        assert!(mirror
            .device(&DeviceKey::new(DeviceScope::Engine, 1))
            .is_none());
        assert_eq!(mirror.len(), 1);
        assert_eq!(mirror.as_of_seq(), 5);
    }

    #[test]
    fn test_delta_updates_one_device() {
        let mut mirror = Mirror::new();
        snapshot(&mut mirror, vec![device_at(1, 10, 1)], 1);

        let event = mirror.handle(SyncMessage::Delta(device_at(1, 90, 2)));
        assert!(matches!(event, Some(MirrorEvent::DeviceChanged(_))));
        assert_eq!(mirror.as_of_seq(), 2);
    }

    #[test]
    fn test_stale_delta_is_ignored() {
        let mut mirror = Mirror::new();
        snapshot(&mut mirror, vec![device_at(1, 10, 7)], 7);

        let event = mirror.handle(SyncMessage::Delta(device_at(1, 90, 3)));
        assert!(event.is_none());
        assert_eq!(mirror.as_of_seq(), 7);
    }

    #[test]
    fn test_half_applied_snapshot_is_invisible() {
        let mut mirror = Mirror::new();
        snapshot(&mut mirror, vec![device_at(1, 10, 1)], 1);

        // A new snapshot begins but never ends (connection died).
        mirror.handle(SyncMessage::SnapshotBegin {
            device_count: 2,
            as_of_seq: 9,
        });
        mirror.handle(SyncMessage::SnapshotDevice(device_at(2, 20, 8)));
        mirror.mark_stale();

        // Readers still see the last complete roster.
        assert_eq!(mirror.len(), 1);
        assert!(mirror
            .device(&DeviceKey::new(DeviceScope::Engine, 1))
            .is_some());
        assert!(!mirror.is_synced());
    }

    #[test]
    fn test_rejection_surfaces_as_event() {
        let mut mirror = Mirror::new();
        let event = mirror.handle(SyncMessage::Rejected {
            description: "gave up after 5 write attempts".to_string(),
        });
        assert_eq!(
            event,
            Some(MirrorEvent::CommandRejected {
                description: "gave up after 5 write attempts".to_string()
            })
        );
    }
}
