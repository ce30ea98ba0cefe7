//! Wire constants of the best-effort UDP multicast discovery helper.

use std::net::Ipv4Addr;

/// Multicast group beacons are sent to.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 5, 6, 7);
/// UDP port workers listen on for beacons.
pub const MULTICAST_PORT: u16 = 32152;
/// TCP port the prober listens on for responses.
pub const RESPONSE_PORT: u16 = 32153;

/// Beacon datagram payload.
pub const BEACON: &[u8] = b"DISCOVERY";
/// Framed response payload.
pub const RESPONSE: &[u8] = b"DISCOVERY_RESPONSE";
