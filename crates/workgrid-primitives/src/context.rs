//! The process-wide request courier.
//!
//! Whether a primitive call site runs on the master or inside a task on a
//! worker is decided once per process: the master installs its loopback
//! courier when it starts serving, and the task runner installs the
//! remote-to-master courier before invoking the task. Handles themselves
//! are location-agnostic.

use std::sync::{Arc, RwLock};

use tracing::debug;
use workgrid_protocol::{Body, Kind, Reply, Value};

use crate::error::Error;

/// The two token-mirror families a courier can park on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Lock,
    Semaphore,
}

impl TokenKind {
    pub const fn label(&self) -> &'static str {
        match self {
            TokenKind::Lock => "lock",
            TokenKind::Semaphore => "semaphore",
        }
    }
}

/// Delivers primitive requests to the master and parks callers on local
/// mirrors until the master grants.
pub trait Courier: Send + Sync {
    /// Send a request; the reply (if any) is discarded.
    fn send(&self, kind: Kind, body: Body) -> Result<(), Error>;

    /// Send a request and return the master's reply.
    fn call(&self, kind: Kind, body: Body) -> Result<Reply, Error>;

    /// Park until the local event mirror for `id` is set.
    fn wait_event(&self, id: u64) -> Result<(), Error>;

    /// Park until the local token mirror for `id` holds a token, then
    /// take it.
    fn acquire_token(&self, kind: TokenKind, id: u64) -> Result<(), Error>;

    /// Park until the local queue mirror for `id` holds an item, then
    /// take it.
    fn pop_queue(&self, id: u64) -> Result<Value, Error>;
}

static COURIER: RwLock<Option<Arc<dyn Courier>>> = RwLock::new(None);

/// Install the process courier, replacing any previous one. Called by the
/// master when it starts serving and by the task runner at startup.
pub fn install(courier: Arc<dyn Courier>) {
    debug!("installing process courier");
    *COURIER.write().expect("courier lock poisoned") = Some(courier);
}

/// Remove the process courier. Subsequent primitive calls fail with
/// [`Error::NoCourier`].
pub fn clear() {
    *COURIER.write().expect("courier lock poisoned") = None;
}

/// The installed courier.
pub fn current() -> Result<Arc<dyn Courier>, Error> {
    COURIER
        .read()
        .expect("courier lock poisoned")
        .clone()
        .ok_or(Error::NoCourier)
}
