//! The workgroup: the runtime object owning the worker pool, the
//! listener, and the dispatcher.

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{info, warn};

use workgrid_net::{NetConfig, SecureListener};
use workgrid_primitives::request::Request;
use workgrid_primitives::{
    Courier, Event, Lock, MirrorTable, NetInstance, Queue, Semaphore, SharedMap, TokenKind, context,
};
use workgrid_protocol::{Body, Kind, NetClassSpec, Origin, Reply, TaskSpec, Value};

use crate::DEFAULT_MASTER_PORT;
use crate::courier::MasterCourier;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::listener;
use crate::session::{WorkerEntry, WorkerSession, WorkerTable};
use crate::task::TaskHandle;

/// Workgroup-wide counters. Ids are dense, start at 1, and are never
/// recycled.
pub(crate) struct Counters {
    tasks: AtomicU64,
    events: AtomicU64,
    locks: AtomicU64,
    semaphores: AtomicU64,
    queues: AtomicU64,
    maps: AtomicU64,
    classes: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Counters {
            tasks: AtomicU64::new(0),
            events: AtomicU64::new(0),
            locks: AtomicU64::new(0),
            semaphores: AtomicU64::new(0),
            queues: AtomicU64::new(0),
            maps: AtomicU64::new(0),
            classes: AtomicU64::new(0),
        }
    }

    fn next(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Relaxed) + 1
    }
}

/// State shared between the workgroup's user-facing half and its
/// listener and dispatcher threads.
pub(crate) struct Shared {
    pub workers: WorkerTable,
    pub mirrors: MirrorTable,
    pub serving: AtomicBool,
    pub fatal: AtomicBool,
    pub counters: Counters,
}

impl Shared {
    pub fn with_workers(entries: Vec<Arc<WorkerEntry>>) -> Self {
        Shared {
            workers: WorkerTable::new(entries),
            mirrors: MirrorTable::default(),
            serving: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            counters: Counters::new(),
        }
    }
}

/// Workgroup construction parameters.
#[derive(Debug, Clone)]
pub struct WorkgroupConfig {
    pub net: NetConfig,
    /// Port the master listens on for worker-originated requests.
    pub listen_port: u16,
    /// Skip workers that fail the construction handshake instead of
    /// failing construction.
    pub skip_bad_workers: bool,
    /// Resubmit tasks stranded on a dead worker to the remaining pool.
    pub salvage_dead_workers: bool,
}

impl Default for WorkgroupConfig {
    fn default() -> Self {
        WorkgroupConfig {
            net: NetConfig::plaintext(),
            listen_port: DEFAULT_MASTER_PORT,
            skip_bad_workers: false,
            salvage_dead_workers: false,
        }
    }
}

/// A registered net class: a method table workers resolve by class id.
pub struct NetClass {
    spec: NetClassSpec,
}

impl NetClass {
    pub fn id(&self) -> u64 {
        self.spec.id
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Build a fresh instance with an empty attribute map.
    pub fn instance(&self) -> NetInstance {
        NetInstance::new(self.spec.id)
    }
}

/// The master coordinator. Construct with [`Workgroup::connect`], call
/// [`Workgroup::start_serving`], submit tasks and register primitives,
/// then [`Workgroup::stop_serving`] (also performed on drop).
///
/// One workgroup serves per process at a time: starting to serve installs
/// the process courier that every primitive handle uses.
pub struct Workgroup {
    shared: Arc<Shared>,
    net: Arc<NetConfig>,
    config: WorkgroupConfig,
    queue_tx: Sender<Request>,
    queue_rx: Option<Receiver<Request>>,
    courier: Arc<MasterCourier>,
    dispatcher: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    pending_listener: Option<SecureListener>,
    listen_addr: Option<SocketAddr>,
    cursor: AtomicUsize,
    running: bool,
}

impl Workgroup {
    /// Handshake every configured worker and build the workgroup. Worker
    /// ids are assigned densely in the order the handshakes succeed.
    ///
    /// The listener is bound here, before the handshakes, so every
    /// worker learns the real return port even when an ephemeral one was
    /// requested.
    pub fn connect(addrs: &[SocketAddr], config: WorkgroupConfig) -> Result<Self, Error> {
        let net = Arc::new(config.net.clone());

        let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
        let pending_listener = SecureListener::bind(bind_addr, net.clone())?;
        let listen_addr = pending_listener.local_addr()?;

        let mut entries: Vec<Arc<WorkerEntry>> = Vec::with_capacity(addrs.len());
        for &addr in addrs {
            let id = entries.len() as u32;
            let entry = Arc::new(WorkerEntry::new(id, addr));
            match WorkerSession::new(&entry, net.clone()).handshake(listen_addr.port()) {
                Ok(()) => {
                    info!("worker #{id} at {addr} is alive");
                    entries.push(entry);
                }
                Err(e) if config.skip_bad_workers => {
                    warn!("skipping unavailable worker at {addr}: {e}");
                }
                Err(e) => return Err(Error::WorkerUnavailable(addr, e)),
            }
        }
        if entries.is_empty() {
            return Err(Error::NoWorkers);
        }

        let shared = Arc::new(Shared::with_workers(entries));
        let (queue_tx, queue_rx) = unbounded();
        let courier = Arc::new(MasterCourier::new(queue_tx.clone(), shared.clone()));

        Ok(Workgroup {
            shared,
            net,
            config,
            queue_tx,
            queue_rx: Some(queue_rx),
            courier,
            dispatcher: None,
            listener: None,
            pending_listener: Some(pending_listener),
            listen_addr: Some(listen_addr),
            cursor: AtomicUsize::new(0),
            running: false,
        })
    }

    /// Start the listener and dispatcher threads and install the process
    /// courier. A workgroup serves once; after `stop_serving` it cannot
    /// be restarted.
    pub fn start_serving(&mut self) -> Result<(), Error> {
        if self.running {
            return Ok(());
        }
        let queue_rx = self.queue_rx.take().ok_or(Error::Halted)?;
        let listener = self.pending_listener.take().ok_or(Error::Halted)?;
        self.shared.serving.store(true, Release);

        let dispatcher = Dispatcher::new(
            self.shared.clone(),
            self.net.clone(),
            self.queue_tx.clone(),
            self.config.salvage_dead_workers,
        );
        self.dispatcher = Some(
            thread::Builder::new()
                .name("dispatcher".to_string())
                .spawn(move || dispatcher.run(queue_rx))?,
        );

        let listener_tx = self.queue_tx.clone();
        let listener_shared = self.shared.clone();
        self.listener = Some(
            thread::Builder::new()
                .name("listener".to_string())
                .spawn(move || listener::run(listener, listener_tx, listener_shared))?,
        );

        context::install(self.courier.clone());
        self.running = true;
        info!(
            "workgroup serving on {} with {} workers",
            self.listen_addr.expect("set above"),
            self.shared.workers.len()
        );
        Ok(())
    }

    /// Halt the dispatcher, wake and join the listener, and uninstall the
    /// courier.
    pub fn stop_serving(&mut self) -> Result<(), Error> {
        if !self.running {
            return Ok(());
        }

        let _ = self.queue_tx.send(Request::internal(Kind::Halt, Body::empty()));
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }

        self.shared.serving.store(false, Release);
        if let Some(addr) = self.listen_addr {
            // The accept loop is parked in accept(); poke it awake.
            let wake = SocketAddr::from(([127, 0, 0, 1], addr.port()));
            let _ = TcpStream::connect_timeout(&wake, Duration::from_millis(500));
        }
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }

        context::clear();
        self.running = false;
        info!("workgroup stopped");
        Ok(())
    }

    /// The address the listener is bound to.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    pub fn worker_count(&self) -> usize {
        self.shared.workers.len()
    }

    pub fn live_worker_count(&self) -> usize {
        self.shared.workers.live_count()
    }

    // ---- task lifecycle ------------------------------------------------

    /// Submit a task to the next live worker, round-robin. The returned
    /// handle resolves results, exceptions, and termination through the
    /// master.
    pub fn submit(
        &self,
        target: &str,
        args: Vec<Value>,
        kwargs: BTreeMap<String, Value>,
    ) -> Result<TaskHandle, Error> {
        self.ensure_usable()?;

        let worker = self.next_live_worker()?;
        let id = Counters::next(&self.shared.counters.tasks);
        let task = TaskSpec {
            id,
            target: target.to_string(),
            args,
            kwargs,
        };
        let body = Body {
            worker: Some(Origin::Worker(worker)),
            task: Some(task),
            ..Body::default()
        };

        match self.courier.call(Kind::SubmitTask, body)? {
            Reply::TaskStarted => Ok(TaskHandle::new(id, worker)),
            Reply::DeadWorker(dead) => Err(Error::DeadWorker(dead)),
            other => Err(Error::UnexpectedReply(format!("{other:?}"))),
        }
    }

    // ---- primitive registration ---------------------------------------

    /// Create an event, registered on every live worker before this
    /// returns.
    pub fn register_event(&self) -> Result<Event, Error> {
        self.ensure_usable()?;
        let id = Counters::next(&self.shared.counters.events);
        self.shared.mirrors.register_event(id);
        self.expect_ok(Kind::RegisterEvent, Body::with_id(id))?;
        Ok(Event::new(id))
    }

    /// Create a lock, registered on every live worker before this
    /// returns.
    pub fn register_lock(&self) -> Result<Lock, Error> {
        self.ensure_usable()?;
        let id = Counters::next(&self.shared.counters.locks);
        self.shared.mirrors.register_token(TokenKind::Lock, id);
        self.expect_ok(Kind::RegisterLock, Body::with_id(id))?;
        Ok(Lock::new(id))
    }

    /// Create a counting semaphore holding `value` permits.
    pub fn register_semaphore(&self, value: u64) -> Result<Semaphore, Error> {
        self.ensure_usable()?;
        let id = Counters::next(&self.shared.counters.semaphores);
        self.shared.mirrors.register_token(TokenKind::Semaphore, id);
        self.expect_ok(
            Kind::RegisterSemaphore,
            Body::with_id(id).and_value(Value::from(value)),
        )?;
        Ok(Semaphore::new(id))
    }

    /// Create a FIFO queue, registered on every live worker before this
    /// returns.
    pub fn register_queue(&self) -> Result<Queue, Error> {
        self.ensure_usable()?;
        let id = Counters::next(&self.shared.counters.queues);
        self.shared.mirrors.register_queue(id);
        self.expect_ok(Kind::RegisterQueue, Body::with_queue(id))?;
        Ok(Queue::new(id))
    }

    /// Create a shared map. Maps live wholly on the master, so only an id
    /// is allocated; no worker registration happens.
    pub fn register_map(&self) -> Result<SharedMap, Error> {
        self.ensure_usable()?;
        let id = Counters::next(&self.shared.counters.maps);
        Ok(SharedMap::new(id))
    }

    /// Register a net class: a table mapping method names to registered
    /// worker function ids. The class is broadcast to every live worker
    /// before this returns, so instances can be shipped in task
    /// arguments immediately.
    pub fn register_net_class(
        &self,
        name: &str,
        methods: BTreeMap<String, String>,
        statics: BTreeMap<String, String>,
    ) -> Result<NetClass, Error> {
        self.ensure_usable()?;
        let id = Counters::next(&self.shared.counters.classes);
        let spec = NetClassSpec {
            id,
            name: name.to_string(),
            methods,
            statics,
        };
        let body = Body {
            class: Some(spec.clone()),
            ..Body::default()
        };
        self.expect_ok(Kind::RegisterNetClass, body)?;
        Ok(NetClass { spec })
    }

    // ---- internals -----------------------------------------------------

    fn expect_ok(&self, kind: Kind, body: Body) -> Result<(), Error> {
        match self.courier.call(kind, body)? {
            Reply::Ok => Ok(()),
            other => Err(Error::UnexpectedReply(format!("{other:?}"))),
        }
    }

    fn ensure_usable(&self) -> Result<(), Error> {
        if !self.running {
            return Err(Error::NotServing);
        }
        if self.shared.fatal.load(Acquire) {
            return Err(Error::NoWorkers);
        }
        Ok(())
    }

    /// Advance the round-robin cursor to the next live worker. The alive
    /// flags may go stale under the cursor; the cost is one extra skip.
    fn next_live_worker(&self) -> Result<u32, Error> {
        let entries = self.shared.workers.entries();
        if entries.is_empty() {
            return Err(Error::NoWorkers);
        }
        for _ in 0..entries.len() {
            let idx = self.cursor.fetch_add(1, Relaxed) % entries.len();
            if entries[idx].is_alive() {
                return Ok(entries[idx].id);
            }
        }
        Err(Error::NoWorkers)
    }
}

impl Drop for Workgroup {
    fn drop(&mut self) {
        let _ = self.stop_serving();
    }
}
