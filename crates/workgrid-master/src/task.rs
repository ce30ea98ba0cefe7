//! User-facing task handles. Every query goes through the dispatcher,
//! which resolves the executing worker from the placement map and
//! forwards.

use workgrid_primitives::context;
use workgrid_protocol::{Body, Kind, Reply, Value};

use crate::error::Error;

/// Handle to one submitted task.
#[derive(Debug, Clone, Copy)]
pub struct TaskHandle {
    id: u64,
    worker: u32,
}

impl TaskHandle {
    pub(crate) fn new(id: u64, worker: u32) -> Self {
        TaskHandle { id, worker }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The worker the task was first placed on. With salvage enabled the
    /// dispatcher may have moved it since.
    pub fn worker(&self) -> u32 {
        self.worker
    }

    /// The task's return value. Meaningful only once the task is done;
    /// before that the executor reports null. Poll [`TaskHandle::running`]
    /// or coordinate through a primitive.
    pub fn result(&self) -> Result<Value, Error> {
        match self.call(Kind::GetResult)? {
            Reply::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    /// The error the task raised, or null if it raised none (yet).
    pub fn exception(&self) -> Result<Value, Error> {
        match self.call(Kind::GetException)? {
            Reply::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    pub fn exception_raised(&self) -> Result<bool, Error> {
        match self.call(Kind::ExceptionRaised)? {
            Reply::Bool(raised) => Ok(raised),
            other => Err(unexpected(other)),
        }
    }

    pub fn running(&self) -> Result<bool, Error> {
        match self.call(Kind::TaskRunning)? {
            Reply::Bool(running) => Ok(running),
            other => Err(unexpected(other)),
        }
    }

    /// Hard-kill the task's OS process. Fire-and-forget; there is no
    /// cooperative cancellation.
    pub fn terminate(&self) -> Result<(), Error> {
        Ok(context::current()?.send(Kind::TerminateTask, Body::with_id(self.id))?)
    }

    fn call(&self, kind: Kind) -> Result<Reply, Error> {
        Ok(context::current()?.call(kind, Body::with_id(self.id))?)
    }
}

fn unexpected(reply: Reply) -> Error {
    match reply {
        Reply::DeadWorker(worker) => Error::DeadWorker(worker),
        other => Error::UnexpectedReply(format!("{other:?}")),
    }
}
