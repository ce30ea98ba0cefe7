//! The workgrid worker.
//!
//! A worker serves requests from exactly one master and runs every
//! submitted task in its own OS process. Task functions are compiled in:
//! deployments build their own worker binary, register functions in a
//! [`TaskRegistry`](registry::TaskRegistry), and hand control to
//! [`runner::run_if_task_child`] + [`server::WorkerServer`].

pub mod args;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod mirror_bus;
pub mod registry;
pub mod runner;
pub mod server;

pub use error::Error;
pub use registry::{TaskArgs, TaskFn, TaskRegistry};
pub use server::{WorkerConfig, WorkerServer};

/// Default TCP port of a worker's listener.
pub const DEFAULT_WORKER_PORT: u16 = workgrid_protocol::DEFAULT_PORT;
