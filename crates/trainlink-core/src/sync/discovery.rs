//! Discovery datagrams: how clients find a server on the local network.
//!
//! A client broadcasts a LOCATE datagram to the discovery port; every
//! server answers with a HERE datagram naming the TCP port its sync
//! service listens on.  Both datagrams are tiny and hand-packed; UDP loss
//! is handled by the client simply broadcasting again.

/// UDP port the discovery responder listens on.
pub const DEFAULT_DISCOVERY_PORT: u16 = 5111;

/// LOCATE datagram magic.
const LOCATE_MAGIC: &[u8; 4] = b"TLK?";
/// HERE datagram magic.
const HERE_MAGIC: &[u8; 4] = b"TLK!";

/// Largest datagram either side will send.
pub const MAX_DATAGRAM: usize = 64;

/// Builds a LOCATE datagram.
pub fn encode_locate() -> Vec<u8> {
    LOCATE_MAGIC.to_vec()
}

/// Whether a received datagram is a LOCATE request.
pub fn is_locate(datagram: &[u8]) -> bool {
    datagram == LOCATE_MAGIC
}

/// Builds a HERE reply: magic, sync port, then the server's name.
pub fn encode_here(sync_port: u16, server_name: &str) -> Vec<u8> {
    let name = &server_name.as_bytes()[..server_name.len().min(MAX_DATAGRAM - 7)];
    let mut out = Vec::with_capacity(7 + name.len());
    out.extend_from_slice(HERE_MAGIC);
    out.extend_from_slice(&sync_port.to_be_bytes());
    out.push(name.len() as u8);
    out.extend_from_slice(name);
    out
}

/// Parses a HERE reply into `(sync_port, server_name)`.
pub fn parse_here(datagram: &[u8]) -> Option<(u16, String)> {
    if datagram.len() < 7 || &datagram[..4] != HERE_MAGIC {
        return None;
    }
    let sync_port = u16::from_be_bytes([datagram[4], datagram[5]]);
    let name_len = datagram[6] as usize;
    if datagram.len() < 7 + name_len {
        return None;
    }
    let name = String::from_utf8_lossy(&datagram[7..7 + name_len]).into_owned();
    Some((sync_port, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_is_recognized() {
        assert!(is_locate(&encode_locate()));
        assert!(!is_locate(b"TLK!"));
        assert!(!is_locate(b""));
    }

    #[test]
    fn test_here_roundtrip() {
        let datagram = encode_here(5110, "layout-server");
        let (port, name) = parse_here(&datagram).unwrap();
        assert_eq!(port, 5110);
        assert_eq!(name, "layout-server");
    }

    #[test]
    fn test_here_rejects_garbage() {
        assert!(parse_here(b"TLK?").is_none());
        assert!(parse_here(&[0u8; 3]).is_none());
        // Name length pointing past the end.
        assert!(parse_here(&[b'T', b'L', b'K', b'!', 0x13, 0xF6, 9, b'x']).is_none());
    }

    #[test]
    fn test_here_truncates_long_names() {
        let long = "x".repeat(200);
        let datagram = encode_here(5110, &long);
        assert!(datagram.len() <= MAX_DATAGRAM);
        let (_, name) = parse_here(&datagram).unwrap();
        assert_eq!(name.len(), MAX_DATAGRAM - 7);
    }
}
