//! The mirror bus: the loopback parking service for task children.
//!
//! The worker parent owns the local mirrors; a task child runs in its own
//! OS process and cannot wait on them directly. Instead it sends a bus op
//! over a plain framed loopback connection and blocks on the reply, which
//! the parent sends once the mirror fires. Bus ops are worker-local and
//! are not part of the master protocol.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Acquire;
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use workgrid_net::{NetConfig, SecureListener, SecureStream};
use workgrid_primitives::{MirrorTable, TokenKind};
use workgrid_protocol::Value;

use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MirrorOp {
    WaitEvent { id: u64 },
    AcquireLock { id: u64 },
    AcquireSemaphore { id: u64 },
    PopQueue { id: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MirrorReply {
    Woken,
    Item(Value),
    Failed(String),
}

/// The parent-side bus. Accepts loopback connections for the lifetime of
/// the worker; each parked op occupies one short-lived thread.
pub struct MirrorBus {
    port: u16,
    listener: Option<SecureListener>,
    mirrors: Arc<MirrorTable>,
}

impl MirrorBus {
    /// Bind the bus on an ephemeral loopback port.
    pub fn bind(mirrors: Arc<MirrorTable>) -> Result<Self, Error> {
        let config = Arc::new(NetConfig::plaintext_blocking());
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let listener = SecureListener::bind(addr, config)?;
        let port = listener.local_addr()?.port();

        Ok(MirrorBus {
            port,
            listener: Some(listener),
            mirrors,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the accept loop on a background thread until `stop` is set
    /// (and the listener is poked awake).
    pub fn start(&mut self, stop: Arc<AtomicBool>) -> Result<(), Error> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| Error::IoError(std::io::Error::other("mirror bus already started")))?;
        let mirrors = self.mirrors.clone();

        thread::Builder::new()
            .name("mirror-bus".to_string())
            .spawn(move || accept_loop(listener, mirrors, stop))?;
        Ok(())
    }
}

fn accept_loop(listener: SecureListener, mirrors: Arc<MirrorTable>, stop: Arc<AtomicBool>) {
    loop {
        let stream = match listener.accept() {
            Ok(stream) => stream,
            Err(e) => {
                if stop.load(Acquire) {
                    break;
                }
                warn!("mirror bus accept failed: {e}");
                continue;
            }
        };
        if stop.load(Acquire) {
            break;
        }

        let mirrors = mirrors.clone();
        let spawned = thread::Builder::new()
            .name("mirror-park".to_string())
            .spawn(move || park(stream, mirrors));
        if let Err(e) = spawned {
            warn!("could not spawn mirror parker: {e}");
        }
    }
    debug!("mirror bus stopped");
}

/// Serve one parked op: block on the mirror, then reply.
fn park(mut stream: SecureStream, mirrors: Arc<MirrorTable>) {
    let op = match stream.recv().map_err(Error::from).and_then(|payload| {
        serde_json::from_slice::<MirrorOp>(&payload).map_err(Error::from)
    }) {
        Ok(op) => op,
        Err(e) => {
            debug!("dropping malformed bus op: {e}");
            return;
        }
    };

    let reply = match &op {
        MirrorOp::WaitEvent { id } => mirrors.wait_event(*id).map(|()| MirrorReply::Woken),
        MirrorOp::AcquireLock { id } => mirrors
            .acquire_token(TokenKind::Lock, *id)
            .map(|()| MirrorReply::Woken),
        MirrorOp::AcquireSemaphore { id } => mirrors
            .acquire_token(TokenKind::Semaphore, *id)
            .map(|()| MirrorReply::Woken),
        MirrorOp::PopQueue { id } => mirrors.pop_queue(*id).map(MirrorReply::Item),
    };
    let reply = reply.unwrap_or_else(|e| MirrorReply::Failed(e.to_string()));

    let sent = serde_json::to_vec(&reply)
        .map_err(Error::from)
        .and_then(|payload| stream.send(&payload).map_err(Error::from));
    if let Err(e) = sent {
        debug!("failed to answer bus op {op:?}: {e}");
    }
}

/// Child side: send one op and block until the parent answers. The
/// connection deliberately has no timeout; parked waits are unbounded.
pub fn request(port: u16, op: &MirrorOp) -> Result<MirrorReply, Error> {
    let config = Arc::new(NetConfig::plaintext_blocking());
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let mut stream = SecureStream::connect(addr, config)?;

    stream.send(&serde_json::to_vec(op)?)?;
    Ok(serde_json::from_slice(&stream.recv()?)?)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn running_bus() -> (u16, Arc<MirrorTable>, Arc<AtomicBool>) {
        let mirrors = Arc::new(MirrorTable::default());
        let mut bus = MirrorBus::bind(mirrors.clone()).unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let port = bus.port();
        bus.start(stop.clone()).unwrap();
        (port, mirrors, stop)
    }

    #[test]
    fn event_wait_over_the_bus() {
        let (port, mirrors, _stop) = running_bus();
        mirrors.register_event(1);

        let waiter = thread::spawn(move || request(port, &MirrorOp::WaitEvent { id: 1 }).unwrap());
        thread::sleep(Duration::from_millis(50));
        mirrors.set_event(1).unwrap();

        assert_eq!(waiter.join().unwrap(), MirrorReply::Woken);
    }

    #[test]
    fn token_acquire_over_the_bus() {
        let (port, mirrors, _stop) = running_bus();
        mirrors.register_token(TokenKind::Lock, 2);

        let waiter =
            thread::spawn(move || request(port, &MirrorOp::AcquireLock { id: 2 }).unwrap());
        thread::sleep(Duration::from_millis(50));
        mirrors.grant_token(TokenKind::Lock, 2).unwrap();

        assert_eq!(waiter.join().unwrap(), MirrorReply::Woken);
    }

    #[test]
    fn queue_pop_over_the_bus() {
        let (port, mirrors, _stop) = running_bus();
        mirrors.register_queue(3);

        let getter = thread::spawn(move || request(port, &MirrorOp::PopQueue { id: 3 }).unwrap());
        thread::sleep(Duration::from_millis(50));
        mirrors.push_queue(3, json!([1, 2])).unwrap();

        assert_eq!(getter.join().unwrap(), MirrorReply::Item(json!([1, 2])));
    }

    #[test]
    fn unregistered_ids_fail_without_parking() {
        let (port, _mirrors, _stop) = running_bus();
        let reply = request(port, &MirrorOp::WaitEvent { id: 99 }).unwrap();
        assert!(matches!(reply, MirrorReply::Failed(_)));
    }

    #[test]
    fn concurrent_ops_park_independently() {
        let (port, mirrors, _stop) = running_bus();
        mirrors.register_token(TokenKind::Semaphore, 1);
        mirrors.register_queue(2);

        let acquirer =
            thread::spawn(move || request(port, &MirrorOp::AcquireSemaphore { id: 1 }).unwrap());
        let popper = thread::spawn(move || request(port, &MirrorOp::PopQueue { id: 2 }).unwrap());

        thread::sleep(Duration::from_millis(50));
        mirrors.grant_token(TokenKind::Semaphore, 1).unwrap();
        mirrors.push_queue(2, json!("x")).unwrap();

        assert_eq!(acquirer.join().unwrap(), MirrorReply::Woken);
        assert_eq!(popper.join().unwrap(), MirrorReply::Item(json!("x")));
    }
}
