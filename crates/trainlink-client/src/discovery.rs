//! Finding servers on the local network.
//!
//! Broadcasts a LOCATE datagram and collects HERE replies until the
//! deadline.  Plain blocking sockets on the caller's thread; discovery
//! happens once at startup, before the async runtime has anything to do.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use tracing::debug;
use trainlink_core::sync::discovery::{encode_locate, parse_here, MAX_DATAGRAM};

/// One server that answered a LOCATE broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredServer {
    /// Address of the server's sync service.
    pub addr: SocketAddr,
    pub name: String,
}

/// Broadcasts LOCATE and gathers every reply arriving within `wait`.
pub fn locate(discovery_port: u16, wait: Duration) -> std::io::Result<Vec<DiscoveredServer>> {
    let socket = UdpSocket::bind(("0.0.0.0", 0))?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(Duration::from_millis(200)))?;

    let broadcast: SocketAddr = (IpAddr::from([255, 255, 255, 255]), discovery_port).into();
    socket.send_to(&encode_locate(), broadcast)?;

    let deadline = Instant::now() + wait;
    let mut found = Vec::new();
    let mut buf = [0u8; MAX_DATAGRAM];

    while Instant::now() < deadline {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                let Some((sync_port, name)) = parse_here(&buf[..len]) else {
                    debug!("discovery: unparseable reply from {peer}");
                    continue;
                };
                let server = DiscoveredServer {
                    addr: SocketAddr::new(peer.ip(), sync_port),
                    name,
                };
                if !found.contains(&server) {
                    debug!("discovery: found {} at {}", server.name, server.addr);
                    found.push(server);
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(e),
        }
    }

    Ok(found)
}
