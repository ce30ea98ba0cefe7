//! Framed TCP transport with selectable security variants.
//!
//! Every message on the wire is `<ascii decimal length>"MLEN"<payload>`.
//! The payload is transformed according to the process-wide
//! [`SecurityMode`]: plaintext, HMAC-SHA256 authentication, AES-CFB128
//! encryption, both, or mutual TLS. The variant is chosen once at startup
//! and applies to every socket the process opens afterwards.

pub mod config;
pub mod error;
mod seal;
mod stream;
mod tls;

pub use config::{NetConfig, Role, SecurityMode, TlsSettings};
pub use error::Error;
pub use stream::{SecureListener, SecureStream};
