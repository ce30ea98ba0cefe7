//! The master's event loop: one thread draining one queue, the sole
//! mutator of master-side coordination state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering::Release;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, warn};

use workgrid_net::NetConfig;
use workgrid_primitives::TokenKind;
use workgrid_primitives::request::Request;
use workgrid_protocol::{Body, Kind, NetClassSpec, Origin, Reply, TaskSpec, Value};

use crate::authority::{LockAuthority, QueueAuthority, SemaphoreAuthority};
use crate::error::Error;
use crate::session::WorkerSession;
use crate::workgroup::Shared;

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    net: Arc<NetConfig>,
    queue_tx: Sender<Request>,
    salvage: bool,
    locks: HashMap<u64, LockAuthority>,
    semaphores: HashMap<u64, SemaphoreAuthority>,
    queues: HashMap<u64, QueueAuthority>,
    maps: HashMap<u64, BTreeMap<String, Value>>,
    classes: HashMap<u64, NetClassSpec>,
    placements: HashMap<u64, u32>,
    task_specs: HashMap<u64, TaskSpec>,
    dead_seen: HashSet<u32>,
    stop: bool,
}

impl Dispatcher {
    pub fn new(
        shared: Arc<Shared>,
        net: Arc<NetConfig>,
        queue_tx: Sender<Request>,
        salvage: bool,
    ) -> Self {
        Dispatcher {
            shared,
            net,
            queue_tx,
            salvage,
            locks: HashMap::new(),
            semaphores: HashMap::new(),
            queues: HashMap::new(),
            maps: HashMap::new(),
            classes: HashMap::new(),
            placements: HashMap::new(),
            task_specs: HashMap::new(),
            dead_seen: HashSet::new(),
            stop: false,
        }
    }

    /// Drain the queue until the halt sentinel or a fatal condition.
    pub fn run(mut self, queue_rx: Receiver<Request>) {
        debug!("dispatcher running");
        while let Ok(request) = queue_rx.recv() {
            if request.kind == Kind::Halt {
                request.retire();
                break;
            }
            self.handle(request);
            if self.should_stop() {
                break;
            }
        }
        debug!("dispatcher stopped");
    }

    pub(crate) fn handle(&mut self, mut request: Request) {
        match request.kind {
            Kind::CheckAlive => request.respond(&Reply::Alive),
            Kind::SubmitTask => self.submit_task(&mut request),
            Kind::TerminateTask => self.terminate_task(&request),
            Kind::GetResult | Kind::TaskRunning | Kind::GetException | Kind::ExceptionRaised => {
                self.task_query(&mut request)
            }
            Kind::SetEvent => self.set_event(&mut request),
            Kind::RegisterEvent => self.register_event(&mut request),
            Kind::RegisterQueue => self.register_queue(&mut request),
            Kind::PutOnQueue => self.put_on_queue(&mut request),
            Kind::GetFromQueue => self.get_from_queue(&request),
            Kind::RegisterLock => self.register_lock(&mut request),
            Kind::AcquireLock => self.acquire_lock(&request),
            Kind::ReleaseLock => self.release_lock(&request),
            Kind::RegisterSemaphore => self.register_semaphore(&mut request),
            Kind::AcquireSemaphore => self.acquire_semaphore(&request),
            Kind::ReleaseSemaphore => self.release_semaphore(&request),
            Kind::MapSet => self.map_set(&mut request),
            Kind::MapGet => self.map_get(&mut request),
            Kind::MapContains => self.map_contains(&mut request),
            Kind::MapLength => self.map_length(&mut request),
            Kind::MapKeys => self.map_keys(&mut request),
            Kind::NetPrint => self.net_print(&mut request),
            Kind::RegisterNetClass => self.register_net_class(&mut request),
            Kind::WorkerDied => self.worker_died(&request),
            Kind::Halt => {}
        }
        request.retire();
    }

    // ---- task lifecycle ------------------------------------------------

    fn submit_task(&mut self, request: &mut Request) {
        let (Some(Origin::Worker(first)), Some(task)) =
            (request.body.worker, request.body.task.take())
        else {
            warn!("malformed submit request");
            return;
        };

        // Placement is recorded before the dispatch so queries issued the
        // moment the submit reply lands can already resolve the executor.
        let mut target = first;
        self.placements.insert(task.id, target);
        if self.salvage {
            self.task_specs.insert(task.id, task.clone());
        }

        loop {
            let body = Body {
                task: Some(task.clone()),
                ..Body::default()
            };
            match self.send_to_worker(target, Kind::SubmitTask, body) {
                Ok(_) => {
                    request.respond(&Reply::TaskStarted);
                    return;
                }
                Err(Error::DeadWorker(dead)) => {
                    self.report_dead(dead);
                    let next = self.salvage.then(|| self.next_live_after(target)).flatten();
                    match next {
                        Some(next) => {
                            target = next;
                            self.placements.insert(task.id, target);
                        }
                        None => {
                            request.respond(&Reply::DeadWorker(dead));
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!("submit of task #{} failed: {e}", task.id);
                    request.respond(&Reply::DeadWorker(target));
                    return;
                }
            }
        }
    }

    fn task_query(&mut self, request: &mut Request) {
        let Some(id) = request.body.id else {
            warn!("task query without an id");
            return;
        };
        let Some(&worker) = self.placements.get(&id) else {
            warn!("query for unknown task #{id}");
            return;
        };

        match self.send_to_worker(worker, request.kind, Body::with_id(id)) {
            Ok(reply) => request.respond(&reply),
            Err(Error::DeadWorker(dead)) => {
                self.report_dead(dead);
                request.respond(&Reply::DeadWorker(dead));
            }
            Err(e) => warn!("task query failed: {e}"),
        }
    }

    fn terminate_task(&mut self, request: &Request) {
        let Some(id) = request.body.id else { return };
        let Some(&worker) = self.placements.get(&id) else {
            warn!("terminate for unknown task #{id}");
            return;
        };

        if let Err(Error::DeadWorker(dead)) =
            self.send_to_worker(worker, Kind::TerminateTask, Body::with_id(id))
        {
            self.report_dead(dead);
        }
    }

    // ---- events --------------------------------------------------------

    fn register_event(&mut self, request: &mut Request) {
        let Some(id) = request.body.id else { return };
        self.broadcast(Kind::RegisterEvent, &Body::with_id(id));
        request.respond(&Reply::Ok);
    }

    fn set_event(&mut self, request: &mut Request) {
        let Some(id) = request.body.id else { return };

        // Fan out first, then flip the master mirror; workers that fail
        // mid-fan-out go dead without blocking the set.
        self.broadcast(Kind::SetEvent, &Body::with_id(id));
        if let Err(e) = self.shared.mirrors.set_event(id) {
            warn!("set of unknown event: {e}");
        }
        request.respond(&Reply::Ok);
    }

    // ---- locks ---------------------------------------------------------

    fn register_lock(&mut self, request: &mut Request) {
        let Some(id) = request.body.id else { return };
        self.locks.entry(id).or_default();
        self.broadcast(Kind::RegisterLock, &Body::with_id(id));
        request.respond(&Reply::Ok);
    }

    fn acquire_lock(&mut self, request: &Request) {
        let Some(id) = request.body.id else { return };
        let Some(lock) = self.locks.get_mut(&id) else {
            warn!("acquire of unknown lock #{id}");
            return;
        };
        if let Some(grantee) = lock.acquire(request.origin) {
            self.grant(grantee, TokenKind::Lock, Kind::ReleaseLock, id);
        }
    }

    fn release_lock(&mut self, request: &Request) {
        let Some(id) = request.body.id else { return };
        let Some(lock) = self.locks.get_mut(&id) else {
            warn!("release of unknown lock #{id}");
            return;
        };
        if let Some(grantee) = lock.release() {
            self.grant(grantee, TokenKind::Lock, Kind::ReleaseLock, id);
        }
    }

    // ---- semaphores ----------------------------------------------------

    fn register_semaphore(&mut self, request: &mut Request) {
        let Some(id) = request.body.id else { return };
        let value = request
            .body
            .value
            .as_ref()
            .and_then(Value::as_u64)
            .unwrap_or(0);

        self.semaphores.insert(id, SemaphoreAuthority::new(value));
        let body = Body::with_id(id).and_value(Value::from(value));
        self.broadcast(Kind::RegisterSemaphore, &body);
        request.respond(&Reply::Ok);
    }

    fn acquire_semaphore(&mut self, request: &Request) {
        let Some(id) = request.body.id else { return };
        let Some(semaphore) = self.semaphores.get_mut(&id) else {
            warn!("acquire of unknown semaphore #{id}");
            return;
        };
        if let Some(grantee) = semaphore.acquire(request.origin) {
            self.grant(grantee, TokenKind::Semaphore, Kind::ReleaseSemaphore, id);
        }
    }

    fn release_semaphore(&mut self, request: &Request) {
        let Some(id) = request.body.id else { return };
        let Some(semaphore) = self.semaphores.get_mut(&id) else {
            warn!("release of unknown semaphore #{id}");
            return;
        };
        if let Some(grantee) = semaphore.release() {
            self.grant(grantee, TokenKind::Semaphore, Kind::ReleaseSemaphore, id);
        }
    }

    // ---- queues --------------------------------------------------------

    fn register_queue(&mut self, request: &mut Request) {
        let Some(id) = request.body.queue else { return };
        self.queues.entry(id).or_default();
        self.broadcast(Kind::RegisterQueue, &Body::with_queue(id));
        request.respond(&Reply::Ok);
    }

    fn put_on_queue(&mut self, request: &mut Request) {
        let (Some(id), Some(item)) = (request.body.queue, request.body.data.take()) else {
            warn!("malformed queue put");
            return;
        };
        let Some(queue) = self.queues.get_mut(&id) else {
            warn!("put on unknown queue #{id}");
            return;
        };
        queue.push_item(item);
        self.distribute(id);
    }

    fn get_from_queue(&mut self, request: &Request) {
        let Some(id) = request.body.queue else { return };
        let Some(queue) = self.queues.get_mut(&id) else {
            warn!("get from unknown queue #{id}");
            return;
        };
        queue.push_waiter(request.origin);
        self.distribute(id);
    }

    /// Pair waiting getters with pending items until one side runs dry.
    fn distribute(&mut self, id: u64) {
        loop {
            let Some((waiter, item)) = self.queues.get_mut(&id).and_then(QueueAuthority::pop_delivery)
            else {
                return;
            };

            match waiter {
                Origin::Master => {
                    if let Err(e) = self.shared.mirrors.push_queue(id, item) {
                        warn!("queue delivery to master mirror failed: {e}");
                    }
                }
                Origin::Worker(worker) => {
                    let body = Body::with_queue(id).and_data(item.clone());
                    if let Err(Error::DeadWorker(dead)) =
                        self.send_to_worker(worker, Kind::PutOnQueue, body)
                    {
                        self.report_dead(dead);
                        // The dead waiter is gone; the item is not.
                        if let Some(queue) = self.queues.get_mut(&id) {
                            queue.requeue_item(item);
                        }
                    }
                }
            }
        }
    }

    // ---- shared maps ---------------------------------------------------

    fn map_set(&mut self, request: &mut Request) {
        let (Some(id), Some(key), Some(value)) = (
            request.body.id,
            request.body.item.take(),
            request.body.value.take(),
        ) else {
            warn!("malformed map set");
            return;
        };
        self.maps.entry(id).or_default().insert(key, value);
    }

    fn map_get(&mut self, request: &mut Request) {
        let (Some(id), Some(key)) = (request.body.id, request.body.item.take()) else {
            warn!("malformed map get");
            return;
        };
        let reply = match self.maps.get(&id).and_then(|map| map.get(&key)) {
            Some(value) => Reply::Value(value.clone()),
            None => Reply::KeyError,
        };
        request.respond(&reply);
    }

    fn map_contains(&mut self, request: &mut Request) {
        let (Some(id), Some(key)) = (request.body.id, request.body.item.take()) else {
            return;
        };
        let present = self
            .maps
            .get(&id)
            .is_some_and(|map| map.contains_key(&key));
        request.respond(&Reply::Bool(present));
    }

    fn map_length(&mut self, request: &mut Request) {
        let Some(id) = request.body.id else { return };
        let len = self.maps.get(&id).map_or(0, BTreeMap::len) as u64;
        request.respond(&Reply::Length(len));
    }

    fn map_keys(&mut self, request: &mut Request) {
        let Some(id) = request.body.id else { return };
        let keys = self
            .maps
            .get(&id)
            .map_or_else(Vec::new, |map| map.keys().cloned().collect());
        request.respond(&Reply::Keys(keys));
    }

    // ---- net print and net classes ------------------------------------

    fn net_print(&mut self, request: &mut Request) {
        let args = request.body.args.take().unwrap_or_default();
        let line = args
            .iter()
            .map(format_value)
            .collect::<Vec<_>>()
            .join(" ");
        println!("{line}");
        request.respond(&Reply::Ok);
    }

    fn register_net_class(&mut self, request: &mut Request) {
        let Some(class) = request.body.class.take() else {
            warn!("malformed net class registration");
            return;
        };
        let body = Body {
            class: Some(class.clone()),
            ..Body::default()
        };
        self.classes.insert(class.id, class);
        self.broadcast(Kind::RegisterNetClass, &body);
        request.respond(&Reply::Ok);
    }

    // ---- worker death --------------------------------------------------

    fn worker_died(&mut self, request: &Request) {
        let Some(Origin::Worker(worker)) = request.body.worker else {
            return;
        };
        if !self.dead_seen.insert(worker) {
            return;
        }

        if let Some(entry) = self.shared.workers.get(worker) {
            entry.mark_dead();
        }
        let live = self.shared.workers.len() - self.dead_seen.len();
        warn!("worker #{worker} died, {live} workers left");

        if live == 0 {
            error!("lost connection to all workers, stopping the workgroup");
            self.shared.fatal.store(true, Release);
            self.stop = true;
            return;
        }

        if self.salvage {
            self.salvage_tasks(worker);
        }
    }

    /// Resubmit every task placed on `dead` to the remaining workers.
    fn salvage_tasks(&mut self, dead: u32) {
        let stranded: Vec<u64> = self
            .placements
            .iter()
            .filter(|&(_, &worker)| worker == dead)
            .map(|(&task, _)| task)
            .collect();

        for task_id in stranded {
            let Some(task) = self.task_specs.get(&task_id).cloned() else {
                continue;
            };
            let Some(target) = self.next_live_after(dead) else {
                return;
            };

            debug!("salvaging task #{task_id} onto worker #{target}");
            self.placements.insert(task_id, target);
            let body = Body {
                task: Some(task),
                ..Body::default()
            };
            if let Err(Error::DeadWorker(also_dead)) =
                self.send_to_worker(target, Kind::SubmitTask, body)
            {
                self.report_dead(also_dead);
            }
        }
    }

    // ---- plumbing ------------------------------------------------------

    /// Deliver a grant: a token for the master's own mirror, or a wake
    /// message to the worker hosting the grantee.
    fn grant(&mut self, grantee: Origin, token: TokenKind, wake: Kind, id: u64) {
        match grantee {
            Origin::Master => {
                if let Err(e) = self.shared.mirrors.grant_token(token, id) {
                    warn!("grant to master mirror failed: {e}");
                }
            }
            Origin::Worker(worker) => {
                if let Err(Error::DeadWorker(dead)) =
                    self.send_to_worker(worker, wake, Body::with_id(id))
                {
                    self.report_dead(dead);
                }
            }
        }
    }

    /// Forward to every live worker; fan-out failures mark workers dead
    /// but never abort the loop.
    fn broadcast(&mut self, kind: Kind, body: &Body) {
        for id in 0..self.shared.workers.len() as u32 {
            let alive = self.shared.workers.get(id).is_some_and(|e| e.is_alive());
            if !alive {
                continue;
            }
            if let Err(Error::DeadWorker(dead)) = self.send_to_worker(id, kind, body.clone()) {
                self.report_dead(dead);
            }
        }
    }

    fn send_to_worker(&self, worker: u32, kind: Kind, body: Body) -> Result<Reply, Error> {
        let Some(entry) = self.shared.workers.get(worker) else {
            return Err(Error::DeadWorker(worker));
        };
        WorkerSession::new(entry, self.net.clone()).call(kind, body)
    }

    /// Translate a dead-worker condition into a follow-up request so the
    /// current handler finishes normally.
    fn report_dead(&self, worker: u32) {
        let body = Body::empty().and_worker(Origin::Worker(worker));
        let _ = self.queue_tx.send(Request::internal(Kind::WorkerDied, body));
    }

    fn next_live_after(&self, worker: u32) -> Option<u32> {
        let count = self.shared.workers.len() as u32;
        (1..=count)
            .map(|step| (worker + step) % count)
            .find(|&id| self.shared.workers.get(id).is_some_and(|e| e.is_alive()))
    }

    pub(crate) fn should_stop(&self) -> bool {
        self.stop
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod test {
    use crossbeam_channel::{Receiver, bounded, unbounded};
    use serde_json::json;

    use super::*;
    use crate::workgroup::Shared;

    fn empty_dispatcher() -> (Dispatcher, Receiver<Request>) {
        let shared = Arc::new(Shared::with_workers(Vec::new()));
        let (queue_tx, queue_rx) = unbounded();
        let dispatcher = Dispatcher::new(
            shared,
            Arc::new(NetConfig::plaintext()),
            queue_tx,
            false,
        );
        (dispatcher, queue_rx)
    }

    fn local(kind: Kind, body: Body) -> (Request, Receiver<Reply>) {
        let (reply_tx, reply_rx) = bounded(1);
        (Request::local(kind, body, Origin::Master, reply_tx), reply_rx)
    }

    #[test]
    fn map_set_then_get() {
        let (mut dispatcher, _rx) = empty_dispatcher();

        let set = Request::internal(
            Kind::MapSet,
            Body::with_id(1).and_item("n").and_value(json!(10)),
        );
        dispatcher.handle(set);

        let (get, reply_rx) = local(Kind::MapGet, Body::with_id(1).and_item("n"));
        dispatcher.handle(get);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Value(json!(10)));

        // Overwrite wins.
        dispatcher.handle(Request::internal(
            Kind::MapSet,
            Body::with_id(1).and_item("n").and_value(json!(11)),
        ));
        let (get, reply_rx) = local(Kind::MapGet, Body::with_id(1).and_item("n"));
        dispatcher.handle(get);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Value(json!(11)));
    }

    #[test]
    fn map_get_absent_is_kerr() {
        let (mut dispatcher, _rx) = empty_dispatcher();
        let (get, reply_rx) = local(Kind::MapGet, Body::with_id(1).and_item("never-set"));
        dispatcher.handle(get);
        assert_eq!(reply_rx.recv().unwrap(), Reply::KeyError);
    }

    #[test]
    fn map_metadata() {
        let (mut dispatcher, _rx) = empty_dispatcher();
        for key in ["b", "a"] {
            dispatcher.handle(Request::internal(
                Kind::MapSet,
                Body::with_id(3).and_item(key).and_value(json!(0)),
            ));
        }

        let (req, reply_rx) = local(Kind::MapLength, Body::with_id(3));
        dispatcher.handle(req);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Length(2));

        let (req, reply_rx) = local(Kind::MapKeys, Body::with_id(3));
        dispatcher.handle(req);
        assert_eq!(
            reply_rx.recv().unwrap(),
            Reply::Keys(vec!["a".into(), "b".into()])
        );

        let (req, reply_rx) = local(Kind::MapContains, Body::with_id(3).and_item("a"));
        dispatcher.handle(req);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Bool(true));

        let (req, reply_rx) = local(Kind::MapContains, Body::with_id(3).and_item("z"));
        dispatcher.handle(req);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Bool(false));
    }

    #[test]
    fn lock_grants_master_through_mirror() {
        let (mut dispatcher, _rx) = empty_dispatcher();
        dispatcher.shared.mirrors.register_token(TokenKind::Lock, 1);

        let (register, reply_rx) = local(Kind::RegisterLock, Body::with_id(1));
        dispatcher.handle(register);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Ok);

        dispatcher.handle(Request::internal(Kind::AcquireLock, Body::with_id(1)));
        // The grant is a token on the master mirror; taking it must not
        // block.
        dispatcher
            .shared
            .mirrors
            .acquire_token(TokenKind::Lock, 1)
            .unwrap();
    }

    #[test]
    fn queue_put_then_get_reaches_master_mirror() {
        let (mut dispatcher, _rx) = empty_dispatcher();
        dispatcher.shared.mirrors.register_queue(2);

        let (register, reply_rx) = local(Kind::RegisterQueue, Body::with_queue(2));
        dispatcher.handle(register);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Ok);

        dispatcher.handle(Request::internal(
            Kind::PutOnQueue,
            Body::with_queue(2).and_data(json!("x")),
        ));
        dispatcher.handle(Request::internal(Kind::GetFromQueue, Body::with_queue(2)));

        assert_eq!(dispatcher.shared.mirrors.pop_queue(2).unwrap(), json!("x"));
    }

    #[test]
    fn get_before_put_is_also_delivered() {
        let (mut dispatcher, _rx) = empty_dispatcher();
        dispatcher.shared.mirrors.register_queue(2);
        dispatcher.handle(Request::internal(Kind::RegisterQueue, Body::with_queue(2)));

        dispatcher.handle(Request::internal(Kind::GetFromQueue, Body::with_queue(2)));
        dispatcher.handle(Request::internal(
            Kind::PutOnQueue,
            Body::with_queue(2).and_data(json!(7)),
        ));

        assert_eq!(dispatcher.shared.mirrors.pop_queue(2).unwrap(), json!(7));
    }

    #[test]
    fn set_event_flips_master_mirror() {
        let (mut dispatcher, _rx) = empty_dispatcher();
        dispatcher.shared.mirrors.register_event(4);

        let (set, reply_rx) = local(Kind::SetEvent, Body::with_id(4));
        dispatcher.handle(set);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Ok);

        dispatcher.shared.mirrors.wait_event(4).unwrap();
    }

    #[test]
    fn unanswered_requests_get_default_reply() {
        let (mut dispatcher, _rx) = empty_dispatcher();
        // Terminate of an unknown task never responds explicitly.
        let (terminate, reply_rx) = local(Kind::TerminateTask, Body::with_id(99));
        dispatcher.handle(terminate);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Default);
    }

    #[test]
    fn net_print_replies_ok() {
        let (mut dispatcher, _rx) = empty_dispatcher();
        let body = Body {
            args: Some(vec![json!("status:"), json!(3)]),
            ..Body::default()
        };
        let (print, reply_rx) = local(Kind::NetPrint, body);
        dispatcher.handle(print);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Ok);
    }

    #[test]
    fn check_alive_answers_imalive() {
        let (mut dispatcher, _rx) = empty_dispatcher();
        let (probe, reply_rx) = local(Kind::CheckAlive, Body::empty());
        dispatcher.handle(probe);
        assert_eq!(reply_rx.recv().unwrap(), Reply::Alive);
    }

    #[test]
    fn semaphore_grants_up_to_value() {
        let (mut dispatcher, _rx) = empty_dispatcher();
        dispatcher.shared.mirrors.register_token(TokenKind::Semaphore, 1);
        dispatcher.handle(Request::internal(
            Kind::RegisterSemaphore,
            Body::with_id(1).and_value(json!(2)),
        ));

        for _ in 0..3 {
            dispatcher.handle(Request::internal(Kind::AcquireSemaphore, Body::with_id(1)));
        }
        // Two immediate grants; the third waits for a release.
        dispatcher.shared.mirrors.acquire_token(TokenKind::Semaphore, 1).unwrap();
        dispatcher.shared.mirrors.acquire_token(TokenKind::Semaphore, 1).unwrap();

        dispatcher.handle(Request::internal(Kind::ReleaseSemaphore, Body::with_id(1)));
        dispatcher.shared.mirrors.acquire_token(TokenKind::Semaphore, 1).unwrap();
    }

    #[test]
    fn worker_died_with_no_workers_is_fatal() {
        use std::sync::atomic::Ordering::Acquire;

        use crate::session::WorkerEntry;

        let shared = Arc::new(Shared::with_workers(vec![Arc::new(WorkerEntry::new(
            0,
            "127.0.0.1:1".parse().unwrap(),
        ))]));
        let (queue_tx, _queue_rx) = unbounded();
        let mut dispatcher = Dispatcher::new(
            shared.clone(),
            Arc::new(NetConfig::plaintext()),
            queue_tx,
            false,
        );

        let died = Request::internal(
            Kind::WorkerDied,
            Body::empty().and_worker(Origin::Worker(0)),
        );
        dispatcher.handle(died);

        assert!(dispatcher.should_stop());
        assert!(shared.fatal.load(Acquire));
        assert!(!shared.workers.get(0).unwrap().is_alive());

        // Idempotent: a second report changes nothing.
        let again = Request::internal(
            Kind::WorkerDied,
            Body::empty().and_worker(Origin::Worker(0)),
        );
        dispatcher.handle(again);
        assert!(dispatcher.should_stop());
    }
}
