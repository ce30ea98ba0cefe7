use thiserror::Error;

use crate::config::SecurityMode;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown security mode: {0}")]
    UnknownSecurityMode(String),

    #[error("security mode {0} requires a {1} key which is not configured")]
    KeyMissing(SecurityMode, &'static str),

    #[error("AES key must be 16 or 32 bytes, got {0}")]
    BadAesKeyLength(usize),

    #[error("TLS mode requires certificate settings")]
    TlsSettingsMissing,

    #[error("encrypted private keys are not supported; decrypt {0} before use")]
    EncryptedKeyUnsupported(String),

    #[error("TLS configuration failed: {0}")]
    TlsConfig(String),

    #[error("message failed authentication")]
    Unauthenticated,

    #[error("message failed decryption or integrity check")]
    DecryptFailed,

    #[error("socket operation timed out")]
    Timeout,

    #[error("peer closed the connection mid-message")]
    IncompleteMessage,

    #[error(transparent)]
    Frame(#[from] workgrid_protocol::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Map an I/O error, folding timeout kinds into [`Error::Timeout`].
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::IoError(err),
        }
    }
}
