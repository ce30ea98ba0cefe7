use std::net::SocketAddr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no live workers in the workgroup")]
    NoWorkers,

    #[error("the workgroup is not serving")]
    NotServing,

    #[error("the workgroup has stopped serving")]
    Halted,

    #[error("worker at {0} is unavailable: {1}")]
    WorkerUnavailable(SocketAddr, #[source] workgrid_primitives::Error),

    #[error("worker #{0} is dead")]
    DeadWorker(u32),

    #[error("shared map has no key {0:?}")]
    KeyAbsent(String),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error(transparent)]
    Primitive(#[from] workgrid_primitives::Error),

    #[error(transparent)]
    Net(#[from] workgrid_net::Error),

    #[error(transparent)]
    Protocol(#[from] workgrid_protocol::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
