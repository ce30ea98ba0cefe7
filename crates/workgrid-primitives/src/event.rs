use serde::{Deserialize, Serialize};

use workgrid_protocol::{Body, Kind};

use crate::context;
use crate::error::Error;

/// A distributed, level-triggered event. Once set it stays set; there is
/// no reset and no timeout.
///
/// Handles serialize as their bare id, so they can travel inside task
/// arguments; the receiving process resolves the id against its own
/// mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "ID")]
    id: u64,
}

impl Event {
    /// Normally obtained from `Workgroup::register_event`.
    pub fn new(id: u64) -> Self {
        Event { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Set the event everywhere. Waiters on every live worker and on the
    /// master wake; late waiters return immediately.
    pub fn set(&self) -> Result<(), Error> {
        context::current()?.send(Kind::SetEvent, Body::with_id(self.id))
    }

    /// Block until the event is set.
    pub fn wait(&self) -> Result<(), Error> {
        context::current()?.wait_event(self.id)
    }
}
