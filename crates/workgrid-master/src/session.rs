//! Master-side worker records and the per-worker request session.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Release};

use tracing::debug;

use workgrid_net::NetConfig;
use workgrid_primitives::request::exchange;
use workgrid_protocol::{Body, Kind, Origin, Reply};

use crate::error::Error;

/// One configured worker. The alive flag is cleared by the first failed
/// outbound request and never set again; listener threads and the
/// round-robin cursor read it and tolerate a stale view.
pub struct WorkerEntry {
    pub id: u32,
    pub addr: SocketAddr,
    alive: AtomicBool,
}

impl WorkerEntry {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        WorkerEntry {
            id,
            addr,
            alive: AtomicBool::new(true),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Acquire)
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Release);
    }
}

/// The workgroup's fixed worker table. Membership never changes after
/// construction; only alive flags do.
pub struct WorkerTable {
    entries: Vec<Arc<WorkerEntry>>,
}

impl WorkerTable {
    pub fn new(entries: Vec<Arc<WorkerEntry>>) -> Self {
        WorkerTable { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&Arc<WorkerEntry>> {
        self.entries.get(id as usize)
    }

    pub fn entries(&self) -> &[Arc<WorkerEntry>] {
        &self.entries
    }

    pub fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_alive()).count()
    }

    /// Attribute an inbound connection to a worker. The peer IP must be a
    /// configured worker address; when several workers share the IP the
    /// claimed `WORKER` body field disambiguates. Anything else is
    /// unattributable and the session is dropped.
    pub fn attribute(&self, peer_ip: IpAddr, claimed: Option<Origin>) -> Option<Origin> {
        match claimed {
            Some(Origin::Worker(id)) => {
                let entry = self.get(id)?;
                (entry.addr.ip() == peer_ip).then_some(Origin::Worker(id))
            }
            Some(Origin::Master) => None,
            None => {
                let mut candidates = self.entries.iter().filter(|e| e.addr.ip() == peer_ip);
                let first = candidates.next()?;
                match candidates.next() {
                    // Ambiguous without a claimed id.
                    Some(_) => None,
                    None => Some(Origin::Worker(first.id)),
                }
            }
        }
    }
}

/// The master's handle to one remote worker: synchronous request/reply
/// over a fresh connection per request.
pub struct WorkerSession<'a> {
    entry: &'a WorkerEntry,
    net: Arc<NetConfig>,
}

impl<'a> WorkerSession<'a> {
    pub fn new(entry: &'a WorkerEntry, net: Arc<NetConfig>) -> Self {
        WorkerSession { entry, net }
    }

    /// Liveness handshake. Tells the worker its assigned id and the
    /// master's listener port; the worker learns the master's address
    /// from the connection itself. Unlike [`WorkerSession::call`] this
    /// surfaces the transport cause, which workgroup construction
    /// reports to the user.
    pub fn handshake(&self, master_port: u16) -> Result<(), workgrid_primitives::Error> {
        let body = Body::empty()
            .and_worker(Origin::Worker(self.entry.id))
            .and_value(workgrid_protocol::Value::from(master_port));
        match exchange(self.entry.addr, &self.net, Kind::CheckAlive, &body)? {
            Reply::Alive => Ok(()),
            other => Err(workgrid_primitives::Error::UnexpectedReply(format!(
                "{other:?}"
            ))),
        }
    }

    /// Send a request and discard the reply.
    pub fn send(&self, kind: Kind, body: Body) -> Result<(), Error> {
        self.call(kind, body).map(|_| ())
    }

    /// Send a request and return the decoded reply. Any transport error
    /// marks the worker dead; retry and salvage are the dispatcher's
    /// business, not the session's.
    pub fn call(&self, kind: Kind, body: Body) -> Result<Reply, Error> {
        if !self.entry.is_alive() {
            return Err(Error::DeadWorker(self.entry.id));
        }

        match exchange(self.entry.addr, &self.net, kind, &body) {
            Ok(reply) => Ok(reply),
            Err(e) => {
                debug!("request to worker #{} failed: {e}", self.entry.id);
                self.entry.mark_dead();
                Err(Error::DeadWorker(self.entry.id))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn table() -> WorkerTable {
        WorkerTable::new(vec![
            Arc::new(WorkerEntry::new(0, "10.0.0.1:32151".parse().unwrap())),
            Arc::new(WorkerEntry::new(1, "10.0.0.2:32151".parse().unwrap())),
            Arc::new(WorkerEntry::new(2, "10.0.0.2:32152".parse().unwrap())),
        ])
    }

    #[test]
    fn attribute_by_unique_ip() {
        let table = table();
        let origin = table.attribute("10.0.0.1".parse().unwrap(), None);
        assert_eq!(origin, Some(Origin::Worker(0)));
    }

    #[test]
    fn attribute_shared_ip_needs_claim() {
        let table = table();
        let ip: IpAddr = "10.0.0.2".parse().unwrap();

        assert_eq!(table.attribute(ip, None), None);
        assert_eq!(
            table.attribute(ip, Some(Origin::Worker(2))),
            Some(Origin::Worker(2))
        );
    }

    #[test]
    fn attribute_rejects_unknown_ip() {
        let table = table();
        let ip: IpAddr = "192.168.9.9".parse().unwrap();
        assert_eq!(table.attribute(ip, None), None);
        // A claimed id cannot launder an unknown source address.
        assert_eq!(table.attribute(ip, Some(Origin::Worker(1))), None);
    }

    #[test]
    fn attribute_rejects_master_claim() {
        let table = table();
        assert_eq!(
            table.attribute("10.0.0.1".parse().unwrap(), Some(Origin::Master)),
            None
        );
    }

    #[test]
    fn dead_workers_stay_dead() {
        let table = table();
        assert_eq!(table.live_count(), 3);

        table.get(1).unwrap().mark_dead();
        assert_eq!(table.live_count(), 2);
        assert!(!table.get(1).unwrap().is_alive());

        table.get(1).unwrap().mark_dead();
        assert_eq!(table.live_count(), 2);
    }

    #[test]
    fn session_refuses_dead_worker() {
        let entry = WorkerEntry::new(0, "10.0.0.1:32151".parse().unwrap());
        entry.mark_dead();
        let session = WorkerSession::new(&entry, Arc::new(NetConfig::plaintext()));
        assert!(matches!(
            session.send(Kind::SetEvent, Body::with_id(1)),
            Err(Error::DeadWorker(0))
        ));
    }
}
