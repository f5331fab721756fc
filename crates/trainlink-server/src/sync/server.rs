//! TCP accept loop for the sync service.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time;
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::state::StateStore;
use crate::sync::session;

/// Poll interval for the shutdown flag while waiting for connections.
const ACCEPT_SLICE: Duration = Duration::from_millis(500);

/// The listening sync service.
pub struct SyncServer {
    local_addr: SocketAddr,
}

impl SyncServer {
    /// Binds the listener and spawns the accept loop.
    pub async fn start(
        bind_addr: SocketAddr,
        max_clients: usize,
        store: StateStore,
        dispatcher: Dispatcher,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("sync: listening on {local_addr}");

        tokio::spawn(accept_loop(
            listener, max_clients, store, dispatcher, running,
        ));

        Ok(Self { local_addr })
    }

    /// The address actually bound (useful when the configured port is 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

async fn accept_loop(
    listener: TcpListener,
    max_clients: usize,
    store: StateStore,
    dispatcher: Dispatcher,
    running: Arc<AtomicBool>,
) {
    let sessions = Arc::new(AtomicUsize::new(0));

    while running.load(Ordering::Relaxed) {
        match time::timeout(ACCEPT_SLICE, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                tokio::spawn(session::run(
                    stream,
                    peer,
                    store.clone(),
                    dispatcher.clone(),
                    Arc::clone(&sessions),
                    max_clients,
                ));
            }
            Ok(Err(e)) => warn!("sync: accept failed: {e}"),
            Err(_elapsed) => {}
        }
    }
    info!("sync: accept loop stopped");
}
