//! The master's accept loop. Each accepted connection gets a short-lived
//! handler thread whose only job is to frame one request, attribute it,
//! and enqueue it for the dispatcher.

use std::sync::Arc;
use std::sync::atomic::Ordering::Acquire;
use std::thread;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use workgrid_net::{SecureListener, SecureStream};
use workgrid_primitives::request::Request;
use workgrid_protocol::Envelope;

use crate::workgroup::Shared;

pub(crate) fn run(listener: SecureListener, queue_tx: Sender<Request>, shared: Arc<Shared>) {
    loop {
        let stream = match listener.accept() {
            Ok(stream) => stream,
            Err(e) => {
                if !shared.serving.load(Acquire) {
                    break;
                }
                warn!("accept failed: {e}");
                continue;
            }
        };

        if !shared.serving.load(Acquire) {
            break;
        }

        let queue_tx = queue_tx.clone();
        let shared = shared.clone();
        let spawned = thread::Builder::new()
            .name("session-handler".to_string())
            .spawn(move || handle_connection(stream, queue_tx, shared));
        if let Err(e) = spawned {
            warn!("could not spawn session handler: {e}");
        }
    }
    debug!("listener stopped");
}

fn handle_connection(mut stream: SecureStream, queue_tx: Sender<Request>, shared: Arc<Shared>) {
    let peer = stream.peer_addr();

    let payload = match stream.recv() {
        Ok(payload) => payload,
        Err(e) => {
            debug!("dropping session from {peer}: {e}");
            return;
        }
    };

    let envelope = match Envelope::decode(&payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("dropping undecodable request from {peer}: {e}");
            return;
        }
    };

    if envelope.kind.is_internal() {
        warn!("dropping internal kind {:?} sent over the network by {peer}", envelope.kind);
        return;
    }

    // Sessions from addresses outside the worker table are dropped
    // without an answer.
    let Some(origin) = shared.workers.attribute(peer.ip(), envelope.body.worker) else {
        debug!("dropping session from unattributable address {peer}");
        return;
    };

    let request = Request::network(envelope.kind, envelope.body, origin, stream);
    if queue_tx.send(request).is_err() {
        debug!("dispatcher gone, dropping request from {peer}");
    }
}
