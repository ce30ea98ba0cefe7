//! Best-effort UDP multicast worker discovery.
//!
//! The master multicasts a beacon; workers running the responder answer
//! over TCP to the beacon sender. Diagnostic convenience only; nothing in
//! the framework depends on it.

use std::collections::HashSet;
use std::io::Read;
use std::net::{IpAddr, SocketAddr, TcpListener, UdpSocket};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use workgrid_protocol::discovery::{BEACON, MULTICAST_GROUP, MULTICAST_PORT, RESPONSE, RESPONSE_PORT};
use workgrid_protocol::frame::scan_header;

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct DiscoveryParams {
    pub ttl: u32,
    pub timeout: Duration,
    pub repeat: u32,
}

impl Default for DiscoveryParams {
    fn default() -> Self {
        DiscoveryParams {
            ttl: 1,
            timeout: Duration::from_secs(2),
            repeat: 3,
        }
    }
}

/// Multicast `repeat` beacons and collect responder addresses until the
/// timeout elapses.
pub fn discover_workers(params: &DiscoveryParams) -> Result<HashSet<IpAddr>, Error> {
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], RESPONSE_PORT)))?;
    listener.set_nonblocking(true)?;

    let beacon = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?;
    beacon.set_multicast_ttl_v4(params.ttl)?;
    for _ in 0..params.repeat {
        beacon.send_to(BEACON, (MULTICAST_GROUP, MULTICAST_PORT))?;
    }

    let mut found = HashSet::new();
    let deadline = Instant::now() + params.timeout;
    while Instant::now() < deadline {
        match listener.accept() {
            Ok((mut stream, peer)) => {
                if read_response(&mut stream) {
                    debug!("discovered worker at {}", peer.ip());
                    found.insert(peer.ip());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => warn!("discovery accept failed: {e}"),
        }
    }
    Ok(found)
}

/// Read one plain frame and check it carries the response payload.
fn read_response(stream: &mut std::net::TcpStream) -> bool {
    let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));

    let mut buf = Vec::with_capacity(64);
    let mut chunk = [0u8; 64];
    loop {
        match scan_header(&buf) {
            Ok(Some(header)) => {
                let total = header.header_len + header.payload_len;
                if buf.len() >= total {
                    return &buf[header.header_len..total] == RESPONSE;
                }
            }
            Ok(None) => {}
            Err(_) => return false,
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return false,
            Ok(nbytes) => buf.extend_from_slice(&chunk[..nbytes]),
        }
    }
}
