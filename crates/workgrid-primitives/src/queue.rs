use serde::Serialize;
use serde::de::DeserializeOwned;

use workgrid_protocol::{Body, Kind};

use crate::context;
use crate::error::Error;

/// A distributed FIFO queue.
///
/// Delivery order equals the order the master's dispatcher processed the
/// puts; waiters are served in the order their gets arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Queue {
    #[serde(rename = "ID")]
    id: u64,
}

impl Queue {
    /// Normally obtained from `Workgroup::register_queue`.
    pub fn new(id: u64) -> Self {
        Queue { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Append an item.
    pub fn put<T: Serialize>(&self, item: &T) -> Result<(), Error> {
        let value = serde_json::to_value(item)?;
        context::current()?.send(Kind::PutOnQueue, Body::with_queue(self.id).and_data(value))
    }

    /// Block until an item is delivered to this caller.
    pub fn get<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let courier = context::current()?;
        courier.send(Kind::GetFromQueue, Body::with_queue(self.id))?;
        let value = courier.pop_queue(self.id)?;
        Ok(serde_json::from_value(value)?)
    }
}
