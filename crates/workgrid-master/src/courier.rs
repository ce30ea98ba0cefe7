//! The master-loopback courier: primitive calls made on the master are
//! requests enqueued straight into the dispatcher queue, with replies
//! posted to a channel the calling thread parks on.

use std::sync::Arc;

use crossbeam_channel::{Sender, bounded};

use workgrid_primitives::request::Request;
use workgrid_primitives::{Courier, Error, TokenKind};
use workgrid_protocol::{Body, Kind, Origin, Reply, Value};

use crate::workgroup::Shared;

pub(crate) struct MasterCourier {
    queue_tx: Sender<Request>,
    shared: Arc<Shared>,
}

impl MasterCourier {
    pub fn new(queue_tx: Sender<Request>, shared: Arc<Shared>) -> Self {
        MasterCourier { queue_tx, shared }
    }
}

impl Courier for MasterCourier {
    fn send(&self, kind: Kind, body: Body) -> Result<(), Error> {
        self.queue_tx
            .send(Request::internal(kind, body))
            .map_err(|_| Error::Halted)
    }

    fn call(&self, kind: Kind, body: Body) -> Result<Reply, Error> {
        let (reply_tx, reply_rx) = bounded(1);
        self.queue_tx
            .send(Request::local(kind, body, Origin::Master, reply_tx))
            .map_err(|_| Error::Halted)?;
        // The dispatcher posts the reply once the handler has run; if it
        // exits first the channel disconnects and the caller unblocks.
        reply_rx.recv().map_err(|_| Error::Halted)
    }

    fn wait_event(&self, id: u64) -> Result<(), Error> {
        self.shared.mirrors.wait_event(id)
    }

    fn acquire_token(&self, kind: TokenKind, id: u64) -> Result<(), Error> {
        self.shared.mirrors.acquire_token(kind, id)
    }

    fn pop_queue(&self, id: u64) -> Result<Value, Error> {
        self.shared.mirrors.pop_queue(id)
    }
}
