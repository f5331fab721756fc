//! Command dispatcher: the single writer to the rails.
//!
//! Commands from every producer (sync sessions, the local API, startup
//! bootstrap) funnel through one queue.  The worker drains the queue in
//! bursts, collapses redundant writes to the same device attribute so only
//! the newest survives, encodes each winner and pushes it to the mux with
//! bounded retries.  Only after the frame is accepted by a link does the
//! command fold into the state store, so mirrors never see state the rails
//! never saw.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, warn};
use trainlink_core::protocol::codec::encode;
use trainlink_core::{AttributeKind, Command, DeviceKey, FrameSource};

use crate::mux::MuxHandle;
use crate::state::StateStore;

/// Write attempts per command before giving up.
const MAX_ATTEMPTS: u32 = 5;

/// Delay before the first retry; doubles after each failed attempt.
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Submission queue depth.
const QUEUE_DEPTH: usize = 128;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("gave up after {attempts} write attempts")]
    Exhausted { attempts: u32 },
    #[error("dispatcher has shut down")]
    Shutdown,
}

/// Resolves once the submitted command reached the rails (or definitively
/// did not).
pub struct DispatchTicket {
    rx: oneshot::Receiver<Result<(), DispatchError>>,
}

impl DispatchTicket {
    pub async fn wait(self) -> Result<(), DispatchError> {
        self.rx.await.unwrap_or(Err(DispatchError::Shutdown))
    }
}

struct Job {
    command: Command,
    done: oneshot::Sender<Result<(), DispatchError>>,
}

/// Cloneable submission handle.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
}

impl Dispatcher {
    /// Spawns the worker and returns the submission handle.
    pub fn start(mux: MuxHandle, store: StateStore) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(worker(rx, mux, store));
        Self { tx }
    }

    /// Queues a command for transmission.
    pub async fn submit(&self, command: Command) -> Result<DispatchTicket, DispatchError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Job { command, done })
            .await
            .map_err(|_| DispatchError::Shutdown)?;
        Ok(DispatchTicket { rx })
    }

    /// Queues a command and waits for the outcome.
    pub async fn submit_and_wait(&self, command: Command) -> Result<(), DispatchError> {
        self.submit(command).await?.wait().await
    }
}

async fn worker(mut rx: mpsc::Receiver<Job>, mux: MuxHandle, store: StateStore) {
    while let Some(first) = rx.recv().await {
        // Take the burst that queued up behind the first job, then collapse
        // it so only the newest write per (device, attribute) goes out.
        let mut batch = vec![first];
        while let Ok(job) = rx.try_recv() {
            batch.push(job);
        }
        for job in collapse(batch) {
            run_job(job, &mux, &store).await;
        }
    }
    debug!("dispatch worker stopped");
}

/// Last-write-wins within a burst.
///
/// A job superseded by a newer write to the same attribute resolves `Ok`
/// immediately: its intent is satisfied by the newer command.  Commands
/// without a device key (the halt broadcast) are never collapsed.
fn collapse(batch: Vec<Job>) -> Vec<Job> {
    let mut keep = vec![true; batch.len()];
    let mut seen: HashMap<(DeviceKey, AttributeKind), usize> = HashMap::new();
    for (i, job) in batch.iter().enumerate().rev() {
        let Some(key) = job.command.device_key() else {
            continue;
        };
        match seen.entry((key, job.command.attribute())) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(i);
            }
            std::collections::hash_map::Entry::Occupied(_) => keep[i] = false,
        }
    }

    let mut kept = Vec::with_capacity(batch.len());
    for (job, keep) in batch.into_iter().zip(keep) {
        if keep {
            kept.push(job);
        } else {
            debug!("dispatch: {:?} superseded in burst", job.command);
            let _ = job.done.send(Ok(()));
        }
    }
    kept
}

async fn run_job(job: Job, mux: &MuxHandle, store: &StateStore) {
    let bytes = encode(&job.command);
    let mut attempts = 0;
    let mut delay = RETRY_DELAY;
    let result = loop {
        attempts += 1;
        match mux.send(bytes.clone()).await {
            Ok(()) => break Ok(()),
            Err(e) if attempts < MAX_ATTEMPTS => {
                warn!(
                    "dispatch: write attempt {attempts}/{MAX_ATTEMPTS} failed: {e}"
                );
                time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                warn!("dispatch: giving up on {:?}: {e}", job.command);
                break Err(DispatchError::Exhausted { attempts });
            }
        }
    };

    if result.is_ok() {
        store.apply(&job.command, FrameSource::Local).await;
    }
    let _ = job.done.send(result);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
