//! The runtime request record flowing through a dispatcher queue, and the
//! one-shot exchange helper used wherever a process talks to a remote
//! listener.

use std::net::SocketAddr;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::warn;

use workgrid_net::{NetConfig, SecureStream};
use workgrid_protocol::{Body, Envelope, Kind, Origin, Reply};

use crate::error::Error;

/// Where a request's reply goes.
pub enum Responder {
    /// Reply over the originating connection.
    Network(SecureStream),
    /// Reply into a local channel a caller thread is parked on.
    Local(Sender<Reply>),
    /// Fire-and-forget; nothing waits for a reply.
    None,
}

/// A request in flight through a dispatcher queue.
pub struct Request {
    pub kind: Kind,
    pub body: Body,
    pub origin: Origin,
    responder: Responder,
    responded: bool,
}

impl Request {
    pub fn network(kind: Kind, body: Body, origin: Origin, stream: SecureStream) -> Self {
        Request {
            kind,
            body,
            origin,
            responder: Responder::Network(stream),
            responded: false,
        }
    }

    pub fn local(kind: Kind, body: Body, origin: Origin, reply_tx: Sender<Reply>) -> Self {
        Request {
            kind,
            body,
            origin,
            responder: Responder::Local(reply_tx),
            responded: false,
        }
    }

    /// A dispatcher-internal request with no reply channel.
    pub fn internal(kind: Kind, body: Body) -> Self {
        Request {
            kind,
            body,
            origin: Origin::Master,
            responder: Responder::None,
            responded: false,
        }
    }

    /// Send `reply` to the originator. Failures are logged, not
    /// propagated: a peer that vanished mid-reply is its own problem.
    pub fn respond(&mut self, reply: &Reply) {
        self.responded = true;
        match &mut self.responder {
            Responder::Network(stream) => {
                let sent = reply
                    .encode()
                    .map_err(Error::from)
                    .and_then(|payload| stream.send(&payload).map_err(Error::from));
                if let Err(e) = sent {
                    warn!("failed to send reply to {}: {e}", stream.peer_addr());
                }
            }
            Responder::Local(reply_tx) => {
                let _ = reply_tx.send(reply.clone());
            }
            Responder::None => {}
        }
    }

    /// Retire the request: a request that was never answered gets the
    /// default reply so its caller does not block forever. Dropping the
    /// responder closes the connection.
    pub fn retire(mut self) {
        if !self.responded && !matches!(self.responder, Responder::None) {
            self.respond(&Reply::Default);
        }
    }
}

/// Connect to `addr`, send one request, and return the decoded reply.
/// Every exchange uses a fresh connection.
pub fn exchange(
    addr: SocketAddr,
    net: &Arc<NetConfig>,
    kind: Kind,
    body: &Body,
) -> Result<Reply, Error> {
    let mut stream = SecureStream::connect(addr, net.clone())?;
    let payload = Envelope::new(kind, body.clone()).encode()?;
    stream.send(&payload)?;
    Ok(Reply::decode(&stream.recv()?)?)
}
