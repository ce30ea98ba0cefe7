use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("buffer too small: {0} bytes needed, {1} bytes available")]
    BufferTooSmall(usize, usize),

    #[error("invalid kind: {0:#08x}")]
    InvalidKind(u32),

    #[error("frame header has no length prefix")]
    MissingLength,

    #[error("invalid byte in length prefix: {0:#04x}")]
    BadLengthByte(u8),

    #[error("frame header exceeds {0} bytes without a delimiter")]
    HeaderTooLong(usize),

    #[error("frame length too large: {0}")]
    LengthTooLarge(u64),

    #[error("peer closed the connection mid-message")]
    IncompleteMessage,

    #[error("body encoding failed: {0}")]
    Body(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
