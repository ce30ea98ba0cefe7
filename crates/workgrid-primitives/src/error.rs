use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no request courier installed in this process")]
    NoCourier,

    #[error("{0} id {1} is not registered locally")]
    Unregistered(&'static str, u64),

    #[error("shared map has no key {0:?}")]
    KeyAbsent(String),

    #[error("worker #{0} is dead")]
    DeadWorker(u32),

    #[error("the workgroup has stopped serving")]
    Halted,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error(transparent)]
    Net(#[from] workgrid_net::Error),

    #[error(transparent)]
    Protocol(#[from] workgrid_protocol::Error),

    #[error("value encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}
