use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no master registered yet")]
    NoMaster,

    #[error("TLS mode requires --tls-cert, --tls-key, and --tls-ca")]
    IncompleteTlsArgs,

    #[error("unexpected mirror bus reply: {0}")]
    BadBusReply(String),

    #[error(transparent)]
    Net(#[from] workgrid_net::Error),

    #[error(transparent)]
    Protocol(#[from] workgrid_protocol::Error),

    #[error(transparent)]
    Primitive(#[from] workgrid_primitives::Error),

    #[error("payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
