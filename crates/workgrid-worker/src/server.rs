//! The worker server: accepts requests from the registered master and
//! serves them through a single handler loop, mirroring the master's
//! listener/dispatcher pair.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Release};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info, warn};

use workgrid_net::{NetConfig, SecureListener, SecureStream};
use workgrid_primitives::request::Request;
use workgrid_primitives::{MirrorTable, TokenKind};
use workgrid_protocol::{Envelope, Kind, NetClassSpec, Origin, Reply};

use crate::DEFAULT_WORKER_PORT;
use crate::error::Error;
use crate::executor::TaskExecutor;
use crate::mirror_bus::MirrorBus;
use crate::runner::ChildConfig;
use crate::{discovery, registry::TaskRegistry};

/// Worker server parameters.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub net: NetConfig,
    /// Port to listen on; 0 picks an ephemeral port.
    pub port: u16,
    /// Answer discovery beacons.
    pub announce: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            net: NetConfig::plaintext(),
            port: DEFAULT_WORKER_PORT,
            announce: false,
        }
    }
}

/// The master this worker belongs to, learned from the `ALV` handshake.
#[derive(Debug, Clone, Copy)]
struct MasterInfo {
    ip: IpAddr,
    port: u16,
    worker_id: u32,
}

/// State shared between the accept loop, connection handlers, and the
/// handler loop.
struct WorkerState {
    tasks: Mutex<HashMap<u64, TaskExecutor>>,
    classes: Mutex<HashMap<u64, NetClassSpec>>,
    master: OnceLock<MasterInfo>,
}

/// A bound, not-yet-serving worker. [`WorkerServer::run`] blocks until
/// the keep-running flag is cleared (and the listener poked awake).
pub struct WorkerServer {
    config: WorkerConfig,
    net: Arc<NetConfig>,
    listener: SecureListener,
    mirrors: Arc<MirrorTable>,
    bus: MirrorBus,
    state: Arc<WorkerState>,
}

impl WorkerServer {
    /// Bind the listener and the mirror bus. The task registry itself
    /// lives in the binary's `main`, which re-enters runner mode for
    /// task children; the server only spawns those children.
    pub fn bind(config: WorkerConfig) -> Result<Self, Error> {
        let net = Arc::new(config.net.clone());
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = SecureListener::bind(bind_addr, net.clone())?;

        let mirrors = Arc::new(MirrorTable::default());
        let bus = MirrorBus::bind(mirrors.clone())?;

        Ok(WorkerServer {
            config,
            net,
            listener,
            mirrors,
            bus,
            state: Arc::new(WorkerState {
                tasks: Mutex::new(HashMap::new()),
                classes: Mutex::new(HashMap::new()),
                master: OnceLock::new(),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `keep_running` is cleared. The accept loop runs on the
    /// calling thread; call [`wake_listener`] after clearing the flag to
    /// unblock it.
    pub fn run(mut self, keep_running: Arc<AtomicBool>) -> Result<(), Error> {
        let local = self.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        self.bus.start(stop.clone())?;

        if self.config.announce {
            discovery::start_responder()?;
        }

        let (queue_tx, queue_rx) = unbounded::<Request>();
        let handler = HandlerLoop {
            state: self.state.clone(),
            mirrors: self.mirrors.clone(),
            net: self.net.clone(),
            bus_port: self.bus.port(),
        };
        let handler_thread: JoinHandle<()> = thread::Builder::new()
            .name("worker-handler".to_string())
            .spawn(move || handler.run(queue_rx))?;

        info!("worker serving on {local} ({})", self.config.net.mode);
        while keep_running.load(Acquire) {
            let stream = match self.listener.accept() {
                Ok(stream) => stream,
                Err(e) => {
                    if !keep_running.load(Acquire) {
                        break;
                    }
                    warn!("accept failed: {e}");
                    continue;
                }
            };
            if !keep_running.load(Acquire) {
                break;
            }

            let queue_tx = queue_tx.clone();
            let state = self.state.clone();
            let spawned = thread::Builder::new()
                .name("session-handler".to_string())
                .spawn(move || handle_connection(stream, queue_tx, state));
            if let Err(e) = spawned {
                warn!("could not spawn session handler: {e}");
            }
        }

        stop.store(true, Release);
        wake_listener(SocketAddr::from(([127, 0, 0, 1], self.bus.port())));
        let _ = queue_tx.send(Request::internal(Kind::Halt, Default::default()));
        let _ = handler_thread.join();
        info!("worker stopped");
        Ok(())
    }
}

/// Poke a parked accept loop awake after clearing its keep-running flag.
pub fn wake_listener(addr: SocketAddr) {
    let _ = std::net::TcpStream::connect_timeout(&addr, std::time::Duration::from_millis(500));
}

/// Frame one request, answer `ALV` inline, and enqueue everything else
/// for the handler loop.
fn handle_connection(mut stream: SecureStream, queue_tx: Sender<Request>, state: Arc<WorkerState>) {
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

    if envelope.kind == Kind::CheckAlive {
        return check_alive(stream, envelope, state);
    }
    if envelope.kind.is_internal() {
        warn!("dropping internal kind {:?} from {peer}", envelope.kind);
        return;
    }

    // Only the registered master may address this worker.
    let Some(master) = state.master.get() else {
        debug!("dropping request from {peer}: no master registered");
        return;
    };
    if master.ip != peer.ip() {
        debug!("dropping request from non-master address {peer}");
        return;
    }

    let request = Request::network(envelope.kind, envelope.body, Origin::Master, stream);
    if queue_tx.send(request).is_err() {
        debug!("handler loop gone, dropping request from {peer}");
    }
}

/// The `ALV` handshake: learn the master's address, the return port, and
/// this worker's assigned id, then confirm liveness.
fn check_alive(mut stream: SecureStream, envelope: Envelope, state: Arc<WorkerState>) {
    let peer = stream.peer_addr();
    let Some(Origin::Worker(worker_id)) = envelope.body.worker else {
        debug!("dropping ALV without a worker id from {peer}");
        return;
    };
    let port = envelope
        .body
        .value
        .as_ref()
        .and_then(workgrid_protocol::Value::as_u64)
        .map_or(workgrid_protocol::DEFAULT_PORT, |port| port as u16);

    let master = state.master.get_or_init(|| {
        info!("registered master at {} (worker id {worker_id})", peer.ip());
        MasterInfo {
            ip: peer.ip(),
            port,
            worker_id,
        }
    });
    if master.ip != peer.ip() {
        warn!("dropping ALV from {peer}: master already registered at {}", master.ip);
        return;
    }

    match Reply::Alive.encode() {
        Ok(reply) => {
            if let Err(e) = stream.send(&reply) {
                warn!("failed to answer ALV from {peer}: {e}");
            }
        }
        Err(e) => warn!("could not encode ALV reply: {e}"),
    }
}

/// The worker's serialized request handler, the analog of the master's
/// dispatcher.
struct HandlerLoop {
    state: Arc<WorkerState>,
    mirrors: Arc<MirrorTable>,
    net: Arc<NetConfig>,
    bus_port: u16,
}

impl HandlerLoop {
    fn run(self, queue_rx: Receiver<Request>) {
        while let Ok(request) = queue_rx.recv() {
            if request.kind == Kind::Halt {
                request.retire();
                break;
            }
            self.handle(request);
        }
        debug!("worker handler loop stopped");
    }

    fn handle(&self, mut request: Request) {
        match request.kind {
            Kind::SubmitTask => self.submit(&mut request),
            Kind::TerminateTask => self.terminate(&request),
            Kind::GetResult => self.with_task(&mut request, |task| Reply::Value(task.result())),
            Kind::TaskRunning => self.with_task(&mut request, |task| Reply::Bool(task.running())),
            Kind::GetException => {
                self.with_task(&mut request, |task| Reply::Value(task.exception()))
            }
            Kind::ExceptionRaised => {
                self.with_task(&mut request, |task| Reply::Bool(task.exception_raised()))
            }
            Kind::RegisterEvent => {
                if let Some(id) = request.body.id {
                    self.mirrors.register_event(id);
                }
            }
            Kind::SetEvent => {
                if let Some(id) = request.body.id
                    && let Err(e) = self.mirrors.set_event(id)
                {
                    warn!("set of unknown event: {e}");
                }
            }
            Kind::RegisterQueue => {
                if let Some(id) = request.body.queue {
                    self.mirrors.register_queue(id);
                }
            }
            Kind::PutOnQueue => {
                if let (Some(id), Some(item)) = (request.body.queue, request.body.data.take())
                    && let Err(e) = self.mirrors.push_queue(id, item)
                {
                    warn!("delivery to unknown queue: {e}");
                }
            }
            Kind::RegisterLock => {
                if let Some(id) = request.body.id {
                    self.mirrors.register_token(TokenKind::Lock, id);
                }
            }
            Kind::ReleaseLock => self.grant(&request, TokenKind::Lock),
            Kind::RegisterSemaphore => {
                if let Some(id) = request.body.id {
                    self.mirrors.register_token(TokenKind::Semaphore, id);
                }
            }
            Kind::ReleaseSemaphore => self.grant(&request, TokenKind::Semaphore),
            Kind::RegisterNetClass => {
                if let Some(class) = request.body.class.take() {
                    self.state
                        .classes
                        .lock()
                        .expect("class table poisoned")
                        .insert(class.id, class);
                }
            }
            other => warn!("kind {other:?} is not served by workers"),
        }
        request.retire();
    }

    fn submit(&self, request: &mut Request) {
        let Some(task) = request.body.task.take() else {
            warn!("malformed submit request");
            return;
        };
        let Some(master) = self.state.master.get() else {
            warn!("submit before master registration");
            return;
        };

        let config = ChildConfig {
            master_addr: SocketAddr::new(master.ip, master.port),
            worker_id: master.worker_id,
            net: self.net.as_ref().clone(),
            bus_port: self.bus_port,
            classes: self.state.classes.lock().expect("class table poisoned").clone(),
        };

        let id = task.id;
        let executor = match TaskExecutor::spawn(task, config) {
            Ok(executor) => executor,
            Err(e) => {
                warn!("could not start task #{id}: {e}");
                TaskExecutor::failed(format!("could not start task process: {e}"))
            }
        };
        self.state
            .tasks
            .lock()
            .expect("task table poisoned")
            .insert(id, executor);
        request.respond(&Reply::TaskStarted);
    }

    fn terminate(&self, request: &Request) {
        let Some(id) = request.body.id else { return };
        match self.state.tasks.lock().expect("task table poisoned").get(&id) {
            Some(task) => task.terminate(),
            None => warn!("terminate of unknown task #{id}"),
        }
    }

    fn with_task(&self, request: &mut Request, read: impl Fn(&TaskExecutor) -> Reply) {
        let Some(id) = request.body.id else { return };
        let tasks = self.state.tasks.lock().expect("task table poisoned");
        match tasks.get(&id) {
            Some(task) => {
                let reply = read(task);
                drop(tasks);
                request.respond(&reply);
            }
            None => warn!("query for unknown task #{id}"),
        }
    }

    fn grant(&self, request: &Request, kind: TokenKind) {
        if let Some(id) = request.body.id
            && let Err(e) = self.mirrors.grant_token(kind, id)
        {
            warn!("grant for unknown {}: {e}", kind.label());
        }
    }
}

/// Convenience wrapper for deployments: bind, install ctrl-c handling,
/// and serve with `registry` available to task children.
///
/// `main` must have called [`crate::runner::run_if_task_child`] with the
/// same registry first.
pub fn serve(config: WorkerConfig, _registry: &TaskRegistry) -> Result<(), Error> {
    let server = WorkerServer::bind(config)?;
    let local = server.local_addr()?;

    let keep_running = Arc::new(AtomicBool::new(true));
    let flag = keep_running.clone();
    ctrlc::set_handler(move || {
        flag.store(false, Release);
        wake_listener(SocketAddr::from(([127, 0, 0, 1], local.port())));
    })
    .map_err(|e| Error::IoError(std::io::Error::other(e)))?;

    server.run(keep_running)
}

#[cfg(test)]
mod test {
    use crossbeam_channel::bounded;
    use serde_json::json;

    use workgrid_protocol::{Body, Value};

    use super::*;

    fn handler() -> HandlerLoop {
        HandlerLoop {
            state: Arc::new(WorkerState {
                tasks: Mutex::new(HashMap::new()),
                classes: Mutex::new(HashMap::new()),
                master: OnceLock::new(),
            }),
            mirrors: Arc::new(MirrorTable::default()),
            net: Arc::new(NetConfig::plaintext()),
            bus_port: 1,
        }
    }

    fn local(kind: Kind, body: Body) -> (Request, crossbeam_channel::Receiver<Reply>) {
        let (reply_tx, reply_rx) = bounded(1);
        (Request::local(kind, body, Origin::Master, reply_tx), reply_rx)
    }

    #[test]
    fn event_register_and_set() {
        let handler = handler();
        handler.handle(Request::internal(Kind::RegisterEvent, Body::with_id(1)));
        handler.handle(Request::internal(Kind::SetEvent, Body::with_id(1)));
        handler.mirrors.wait_event(1).unwrap();
    }

    #[test]
    fn queue_register_and_delivery() {
        let handler = handler();
        handler.handle(Request::internal(Kind::RegisterQueue, Body::with_queue(2)));
        handler.handle(Request::internal(
            Kind::PutOnQueue,
            Body::with_queue(2).and_data(json!("x")),
        ));
        assert_eq!(handler.mirrors.pop_queue(2).unwrap(), json!("x"));
    }

    #[test]
    fn lock_register_and_grant() {
        let handler = handler();
        handler.handle(Request::internal(Kind::RegisterLock, Body::with_id(3)));
        handler.handle(Request::internal(Kind::ReleaseLock, Body::with_id(3)));
        handler.mirrors.acquire_token(TokenKind::Lock, 3).unwrap();
    }

    #[test]
    fn semaphore_register_and_grant() {
        let handler = handler();
        handler.handle(Request::internal(
            Kind::RegisterSemaphore,
            Body::with_id(4).and_value(json!(2)),
        ));
        handler.handle(Request::internal(Kind::ReleaseSemaphore, Body::with_id(4)));
        handler
            .mirrors
            .acquire_token(TokenKind::Semaphore, 4)
            .unwrap();
    }

    #[test]
    fn net_class_table_updates() {
        let handler = handler();
        let class = NetClassSpec {
            id: 7,
            name: "Thing".into(),
            methods: Default::default(),
            statics: Default::default(),
        };
        let body = Body {
            class: Some(class.clone()),
            ..Body::default()
        };
        handler.handle(Request::internal(Kind::RegisterNetClass, body));

        let classes = handler.state.classes.lock().unwrap();
        assert_eq!(classes.get(&7).unwrap().name, "Thing");
    }

    #[test]
    fn task_queries_for_unknown_ids_default() {
        let handler = handler();
        let (request, reply_rx) = local(Kind::GetResult, Body::with_id(42));
        handler.handle(request);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Default);
    }

    #[test]
    fn task_status_reads_go_through_the_table() {
        let handler = handler();
        handler
            .state
            .tasks
            .lock()
            .unwrap()
            .insert(9, TaskExecutor::failed("bang".to_string()));

        let (request, reply_rx) = local(Kind::ExceptionRaised, Body::with_id(9));
        handler.handle(request);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Bool(true));

        let (request, reply_rx) = local(Kind::GetException, Body::with_id(9));
        handler.handle(request);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Value(json!("bang")));

        let (request, reply_rx) = local(Kind::GetResult, Body::with_id(9));
        handler.handle(request);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Value(Value::Null));

        let (request, reply_rx) = local(Kind::TaskRunning, Body::with_id(9));
        handler.handle(request);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Bool(false));
    }

    #[test]
    fn master_only_kinds_are_refused() {
        let handler = handler();
        let (request, reply_rx) = local(Kind::MapGet, Body::with_id(1).and_item("k"));
        handler.handle(request);
        // Refused kinds still retire with the default reply.
        assert_eq!(reply_rx.recv().unwrap(), Reply::Default);
    }
}
