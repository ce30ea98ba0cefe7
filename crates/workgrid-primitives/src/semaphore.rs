use serde::{Deserialize, Serialize};

use workgrid_protocol::{Body, Kind};

use crate::context::{self, TokenKind};
use crate::error::Error;

/// A distributed counting semaphore.
///
/// The master's authority starts with the initial permit count and every
/// local mirror starts empty; each grant delivers exactly one permit, so
/// there is no creation-time priming traffic to race against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Semaphore {
    #[serde(rename = "ID")]
    id: u64,
}

impl Semaphore {
    /// Normally obtained from `Workgroup::register_semaphore`.
    pub fn new(id: u64) -> Self {
        Semaphore { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the master grants a permit to this caller.
    pub fn acquire(&self) -> Result<(), Error> {
        let courier = context::current()?;
        courier.send(Kind::AcquireSemaphore, Body::with_id(self.id))?;
        courier.acquire_token(TokenKind::Semaphore, self.id)
    }

    /// Return a permit; the master grants it to the head waiter or banks
    /// it.
    pub fn release(&self) -> Result<(), Error> {
        context::current()?.send(Kind::ReleaseSemaphore, Body::with_id(self.id))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::context::test_support::RecordingCourier;

    #[test]
    fn handle_serializes_as_id() {
        assert_eq!(
            serde_json::to_value(Semaphore::new(8)).unwrap(),
            json!({"ID": 8})
        );
    }

    #[test]
    fn acquire_sends_sea_then_parks() {
        let _guard = crate::context::test_support::serialize_courier_tests();
        let courier = Arc::new(RecordingCourier::default());
        courier.mirrors.register_token(TokenKind::Semaphore, 2);
        courier.mirrors.grant_token(TokenKind::Semaphore, 2).unwrap();
        context::install(courier.clone());

        Semaphore::new(2).acquire().unwrap();

        let sent = courier.sent.lock().unwrap();
        assert_eq!(sent[0].0, Kind::AcquireSemaphore);
        context::clear();
    }
}
