//! Coordination primitives that behave, to calling code, as if they lived
//! in one address space.
//!
//! Every handle carries only its dense id; all state lives in the
//! master's authority for that id. Operations flow through the
//! process-wide [`Courier`](context::Courier), which is the master's own
//! dispatcher queue on the master and a remote connection to the master
//! inside a task process. Blocking operations park on the local mirror
//! for the id and are woken when the master grants.

pub mod context;
pub mod error;
pub mod event;
pub mod lock;
pub mod map;
pub mod mirror;
pub mod netobject;
pub mod netprint;
pub mod queue;
pub mod request;
pub mod semaphore;

pub use context::{Courier, TokenKind};
pub use error::Error;
pub use event::Event;
pub use lock::Lock;
pub use map::SharedMap;
pub use mirror::MirrorTable;
pub use netobject::NetInstance;
pub use netprint::net_print;
pub use queue::Queue;
pub use request::{Request, Responder};
pub use semaphore::Semaphore;
