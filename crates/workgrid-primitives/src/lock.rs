use serde::{Deserialize, Serialize};

use workgrid_protocol::{Body, Kind};

use crate::context::{self, TokenKind};
use crate::error::Error;

/// A distributed mutual-exclusion lock with FIFO granting.
///
/// `release` does not verify that the caller holds the lock, so a lock
/// token can deliberately be passed between tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    #[serde(rename = "ID")]
    id: u64,
}

impl Lock {
    /// Normally obtained from `Workgroup::register_lock`.
    pub fn new(id: u64) -> Self {
        Lock { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the master grants the lock to this caller.
    pub fn acquire(&self) -> Result<(), Error> {
        let courier = context::current()?;
        courier.send(Kind::AcquireLock, Body::with_id(self.id))?;
        courier.acquire_token(TokenKind::Lock, self.id)
    }

    /// Release the lock; the master grants it to the next waiter in FIFO
    /// order.
    pub fn release(&self) -> Result<(), Error> {
        context::current()?.send(Kind::ReleaseLock, Body::with_id(self.id))
    }
}
