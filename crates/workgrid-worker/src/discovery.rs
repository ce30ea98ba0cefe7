//! The worker half of auto-discovery: answer multicast beacons over TCP.
//! Best effort; the responder is a daemon thread with no shutdown hook.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use workgrid_net::{NetConfig, SecureStream};
use workgrid_protocol::discovery::{BEACON, MULTICAST_GROUP, MULTICAST_PORT, RESPONSE, RESPONSE_PORT};

use crate::error::Error;

/// Join the multicast group and answer beacons until the process exits.
pub fn start_responder() -> Result<(), Error> {
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], MULTICAST_PORT)))?;
    socket.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;

    thread::Builder::new()
        .name("discovery-responder".to_string())
        .spawn(move || responder_loop(&socket))?;
    Ok(())
}

/// A datagram is answered only when it is exactly the beacon payload.
fn is_beacon(datagram: &[u8]) -> bool {
    datagram == BEACON
}

fn responder_loop(socket: &UdpSocket) {
    let config = Arc::new(NetConfig::plaintext());
    let mut buf = [0u8; 64];

    loop {
        let (nbytes, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) => {
                warn!("discovery receive failed: {e}");
                continue;
            }
        };
        if !is_beacon(&buf[..nbytes]) {
            debug!("ignoring non-beacon datagram from {peer}");
            continue;
        }

        let reply_to = SocketAddr::new(peer.ip(), RESPONSE_PORT);
        match SecureStream::connect(reply_to, config.clone()) {
            Ok(mut stream) => {
                if let Err(e) = stream.send(RESPONSE) {
                    debug!("discovery response to {reply_to} failed: {e}");
                }
            }
            Err(e) => debug!("could not reach prober at {reply_to}: {e}"),
        }
    }
}
