//! UDP discovery responder.
//!
//! Runs on a dedicated OS thread with a plain blocking socket; the 500 ms
//! read timeout keeps the thread responsive to the shutdown flag without
//! burning CPU.  Discovery traffic is rare enough that a thread is simpler
//! than wiring this into the async runtime.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};
use trainlink_core::sync::discovery::{encode_here, is_locate, MAX_DATAGRAM};

/// Answers LOCATE broadcasts with this server's sync address.
pub struct DiscoveryResponder {
    handle: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl DiscoveryResponder {
    /// Binds the discovery port and starts answering.
    pub fn start(
        discovery_port: u16,
        sync_port: u16,
        server_name: String,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", discovery_port))?;
        socket.set_read_timeout(Some(Duration::from_millis(500)))?;
        info!("discovery: answering on udp/{discovery_port}");

        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("discovery".into())
            .spawn(move || respond_loop(socket, sync_port, server_name, thread_running))?;

        Ok(Self {
            handle: Some(handle),
            running,
        })
    }

    /// Signals the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn respond_loop(
    socket: UdpSocket,
    sync_port: u16,
    server_name: String,
    running: Arc<AtomicBool>,
) {
    let reply = encode_here(sync_port, &server_name);
    let mut buf = [0u8; MAX_DATAGRAM];

    while running.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                if is_locate(&buf[..len]) {
                    debug!("discovery: LOCATE from {peer}");
                    if let Err(e) = socket.send_to(&reply, peer) {
                        warn!("discovery: reply to {peer} failed: {e}");
                    }
                } else {
                    debug!("discovery: ignoring {len}-byte datagram from {peer}");
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("discovery: recv failed: {e}");
                thread::sleep(Duration::from_millis(500));
            }
        }
    }
    debug!("discovery: responder stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use trainlink_core::sync::discovery::{encode_locate, parse_here};

    #[test]
    fn test_responder_answers_locate() {
        let running = Arc::new(AtomicBool::new(true));
        // Port 0: let the OS pick, then probe the bound port directly.
        let probe = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        probe
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let server = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        server
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        let thread_running = Arc::clone(&running);
        let handle = thread::spawn(move || {
            respond_loop(server, 5110, "test-layout".into(), thread_running)
        });

        probe.send_to(&encode_locate(), server_addr).unwrap();
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, _) = probe.recv_from(&mut buf).unwrap();
        let (port, name) = parse_here(&buf[..len]).unwrap();
        assert_eq!(port, 5110);
        assert_eq!(name, "test-layout");

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn test_responder_ignores_noise() {
        let running = Arc::new(AtomicBool::new(true));
        let probe = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        probe
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();

        let server = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
        server
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        let thread_running = Arc::clone(&running);
        let handle = thread::spawn(move || {
            respond_loop(server, 5110, "test-layout".into(), thread_running)
        });

        probe.send_to(b"not a locate", server_addr).unwrap();
        let mut buf = [0u8; MAX_DATAGRAM];
        assert!(probe.recv_from(&mut buf).is_err());

        running.store(false, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
