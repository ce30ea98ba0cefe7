// The protocol crate uses only safe Rust.
#![forbid(unsafe_code)]

pub mod body;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod kind;
pub mod reply;

// Re-export commonly used types
pub use body::{Body, NetClassSpec, Origin, TaskSpec};
pub use error::Error;
pub use kind::Kind;
pub use reply::Reply;

/// Values carried in bodies, task arguments, queue items, and map entries.
pub type Value = serde_json::Value;

/// Default TCP port of master and worker listeners.
pub const DEFAULT_PORT: u16 = 32151;

/// A decoded request payload: a 3-byte kind tag followed by the body map.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: Kind,
    pub body: Body,
}

impl Envelope {
    pub fn new(kind: Kind, body: Body) -> Self {
        Envelope { kind, body }
    }

    /// Serialize to the on-the-wire payload (before framing and any
    /// security transform).
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::from(self.kind.wire_value());
        serde_json::to_writer(&mut out, &self.body)?;
        Ok(out)
    }

    /// Decode a payload produced by [`Envelope::encode`].
    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        let kind = Kind::from_wire(payload)?;
        let body = serde_json::from_slice(&payload[kind::KIND_SIZE..])?;
        Ok(Envelope { kind, body })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope_roundtrip() {
        let env = Envelope::new(Kind::AcquireLock, Body::with_id(7));
        let bytes = env.encode().unwrap();
        assert_eq!(&bytes[..3], b"LCA");

        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn envelope_rejects_unknown_kind() {
        assert!(Envelope::decode(b"XXX{}").is_err());
    }

    #[test]
    fn envelope_rejects_truncated_payload() {
        assert!(Envelope::decode(b"LC").is_err());
    }
}
