//! Local wake mirrors.
//!
//! The master's authority owns every primitive's real state; a mirror
//! only parks and wakes the local callers of one process. Event mirrors
//! hold a level-triggered flag, token mirrors hold grants delivered by
//! the master (one per `LCU`/`SEU`), and queue mirrors hold items
//! delivered by `QUP`. Mirrors start empty; the authority's grants are
//! the only token source.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use workgrid_protocol::Value;

use crate::context::TokenKind;
use crate::error::Error;

#[derive(Default)]
pub struct EventMirror {
    set: Mutex<bool>,
    cond: Condvar,
}

impl EventMirror {
    pub fn set(&self) {
        let mut set = self.set.lock().expect("event mirror poisoned");
        *set = true;
        self.cond.notify_all();
    }

    pub fn wait(&self) {
        let mut set = self.set.lock().expect("event mirror poisoned");
        while !*set {
            set = self.cond.wait(set).expect("event mirror poisoned");
        }
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock().expect("event mirror poisoned")
    }
}

#[derive(Default)]
pub struct TokenMirror {
    tokens: Mutex<u64>,
    cond: Condvar,
}

impl TokenMirror {
    pub fn grant(&self) {
        let mut tokens = self.tokens.lock().expect("token mirror poisoned");
        *tokens += 1;
        self.cond.notify_one();
    }

    pub fn acquire(&self) {
        let mut tokens = self.tokens.lock().expect("token mirror poisoned");
        while *tokens == 0 {
            tokens = self.cond.wait(tokens).expect("token mirror poisoned");
        }
        *tokens -= 1;
    }
}

#[derive(Default)]
pub struct QueueMirror {
    items: Mutex<VecDeque<Value>>,
    cond: Condvar,
}

impl QueueMirror {
    pub fn push(&self, value: Value) {
        let mut items = self.items.lock().expect("queue mirror poisoned");
        items.push_back(value);
        self.cond.notify_one();
    }

    pub fn pop(&self) -> Value {
        let mut items = self.items.lock().expect("queue mirror poisoned");
        loop {
            match items.pop_front() {
                Some(value) => return value,
                None => items = self.cond.wait(items).expect("queue mirror poisoned"),
            }
        }
    }
}

/// All mirrors of one process, keyed by primitive id. Registration is
/// idempotent; ids are never recycled so re-registration keeps the
/// existing mirror.
#[derive(Default)]
pub struct MirrorTable {
    events: Mutex<HashMap<u64, Arc<EventMirror>>>,
    locks: Mutex<HashMap<u64, Arc<TokenMirror>>>,
    semaphores: Mutex<HashMap<u64, Arc<TokenMirror>>>,
    queues: Mutex<HashMap<u64, Arc<QueueMirror>>>,
}

impl MirrorTable {
    pub fn register_event(&self, id: u64) {
        self.events
            .lock()
            .expect("mirror table poisoned")
            .entry(id)
            .or_default();
    }

    pub fn register_token(&self, kind: TokenKind, id: u64) {
        self.token_map(kind)
            .lock()
            .expect("mirror table poisoned")
            .entry(id)
            .or_default();
    }

    pub fn register_queue(&self, id: u64) {
        self.queues
            .lock()
            .expect("mirror table poisoned")
            .entry(id)
            .or_default();
    }

    pub fn set_event(&self, id: u64) -> Result<(), Error> {
        self.event(id)?.set();
        Ok(())
    }

    pub fn wait_event(&self, id: u64) -> Result<(), Error> {
        self.event(id)?.wait();
        Ok(())
    }

    pub fn grant_token(&self, kind: TokenKind, id: u64) -> Result<(), Error> {
        self.token(kind, id)?.grant();
        Ok(())
    }

    pub fn acquire_token(&self, kind: TokenKind, id: u64) -> Result<(), Error> {
        self.token(kind, id)?.acquire();
        Ok(())
    }

    pub fn push_queue(&self, id: u64, value: Value) -> Result<(), Error> {
        self.queue(id)?.push(value);
        Ok(())
    }

    pub fn pop_queue(&self, id: u64) -> Result<Value, Error> {
        Ok(self.queue(id)?.pop())
    }

    fn event(&self, id: u64) -> Result<Arc<EventMirror>, Error> {
        self.events
            .lock()
            .expect("mirror table poisoned")
            .get(&id)
            .cloned()
            .ok_or(Error::Unregistered("event", id))
    }

    fn token(&self, kind: TokenKind, id: u64) -> Result<Arc<TokenMirror>, Error> {
        self.token_map(kind)
            .lock()
            .expect("mirror table poisoned")
            .get(&id)
            .cloned()
            .ok_or(Error::Unregistered(kind.label(), id))
    }

    fn queue(&self, id: u64) -> Result<Arc<QueueMirror>, Error> {
        self.queues
            .lock()
            .expect("mirror table poisoned")
            .get(&id)
            .cloned()
            .ok_or(Error::Unregistered("queue", id))
    }

    fn token_map(&self, kind: TokenKind) -> &Mutex<HashMap<u64, Arc<TokenMirror>>> {
        match kind {
            TokenKind::Lock => &self.locks,
            TokenKind::Semaphore => &self.semaphores,
        }
    }
}
