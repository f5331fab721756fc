//! In-process API over the running bridge.
//!
//! Everything the sync service offers over TCP is available here to code
//! living in the same process (the CLI, tests, future embedders): submit
//! commands, query devices, follow the delta stream.

use tokio::sync::mpsc;
use trainlink_core::{Command, Device, DeviceKey};

use crate::dispatch::{DispatchError, Dispatcher};
use crate::state::StateStore;

#[derive(Clone)]
pub struct LayoutHandle {
    dispatcher: Dispatcher,
    store: StateStore,
}

impl LayoutHandle {
    pub fn new(dispatcher: Dispatcher, store: StateStore) -> Self {
        Self { dispatcher, store }
    }

    /// Sends a command to the layout and waits until it reached the rails.
    pub async fn submit(&self, command: Command) -> Result<(), DispatchError> {
        self.dispatcher.submit_and_wait(command).await
    }

    /// Current state of one device, if it has ever been observed.
    pub async fn query(&self, key: &DeviceKey) -> Option<Device> {
        self.store.query(key).await
    }

    /// Consistent roster copy plus the sequence it reflects.
    pub async fn snapshot(&self) -> (Vec<Device>, u64) {
        self.store.snapshot().await
    }

    /// Stream of device changes from now on.
    pub async fn subscribe(&self) -> mpsc::Receiver<Device> {
        self.store.subscribe().await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
