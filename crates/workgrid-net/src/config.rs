use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default socket I/O timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// The security variant applied to every socket of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityMode {
    /// Plain TCP, no transformation.
    Tcp,
    /// HMAC-SHA256 appended to each payload.
    Hmac,
    /// AES-CFB128 with an appended SHA-256 integrity digest.
    Aes,
    /// AES confidentiality plus an HMAC over the ciphertext.
    AesHmac,
    /// Mutual TLS.
    Tls,
}

impl Display for SecurityMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecurityMode::Tcp => "TCP",
            SecurityMode::Hmac => "HMAC",
            SecurityMode::Aes => "AES",
            SecurityMode::AesHmac => "AES+HMAC",
            SecurityMode::Tls => "TLS",
        };
        f.write_str(name)
    }
}

impl FromStr for SecurityMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "TCP" => Ok(SecurityMode::Tcp),
            "HMAC" => Ok(SecurityMode::Hmac),
            "AES" => Ok(SecurityMode::Aes),
            "AES+HMAC" => Ok(SecurityMode::AesHmac),
            "TLS" => Ok(SecurityMode::Tls),
            other => Err(Error::UnknownSecurityMode(other.to_string())),
        }
    }
}

/// Certificate material for the TLS variant. Paths reference PEM files;
/// `ca` may be a file or a directory of `.pem` files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
    pub passphrase: Option<String>,
}

/// Whether this end of a connection dialed it or accepted it. The
/// acceptor's listener keys are the key set for both directions of the
/// connection; the initiator's peer keys must therefore match them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Acceptor,
}

/// Process-wide transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    pub mode: SecurityMode,
    /// Authenticates/decrypts inbound requests on our listener and
    /// signs/encrypts the replies we send on those connections.
    pub listener_hmac_key: Option<Vec<u8>>,
    pub listener_aes_key: Option<Vec<u8>>,
    /// Signs/encrypts requests we initiate and verifies their replies.
    pub peer_hmac_key: Option<Vec<u8>>,
    pub peer_aes_key: Option<Vec<u8>>,
    pub tls: Option<TlsSettings>,
    /// Socket I/O timeout in milliseconds; 0 disables timeouts.
    pub timeout_ms: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig::plaintext()
    }
}

impl NetConfig {
    /// Plain TCP with the default timeout.
    pub fn plaintext() -> Self {
        NetConfig {
            mode: SecurityMode::Tcp,
            listener_hmac_key: None,
            listener_aes_key: None,
            peer_hmac_key: None,
            peer_aes_key: None,
            tls: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Plain TCP with timeouts disabled. Used by the worker-local mirror
    /// bus, whose parked reads must block indefinitely.
    pub fn plaintext_blocking() -> Self {
        NetConfig {
            timeout_ms: 0,
            ..NetConfig::plaintext()
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub(crate) fn hmac_key(&self, role: Role) -> Result<&[u8], Error> {
        let key = match role {
            Role::Initiator => self.peer_hmac_key.as_deref(),
            Role::Acceptor => self.listener_hmac_key.as_deref(),
        };
        key.ok_or(Error::KeyMissing(self.mode, "HMAC"))
    }

    pub(crate) fn aes_key(&self, role: Role) -> Result<&[u8], Error> {
        let key = match role {
            Role::Initiator => self.peer_aes_key.as_deref(),
            Role::Acceptor => self.listener_aes_key.as_deref(),
        };
        key.ok_or(Error::KeyMissing(self.mode, "AES"))
    }

    pub(crate) fn tls_settings(&self) -> Result<&TlsSettings, Error> {
        self.tls.as_ref().ok_or(Error::TlsSettingsMissing)
    }

    /// A listener refuses to bind unless the keys its mode needs are
    /// configured.
    pub fn require_listener_keys(&self) -> Result<(), Error> {
        match self.mode {
            SecurityMode::Tcp => Ok(()),
            SecurityMode::Hmac => self.hmac_key(Role::Acceptor).map(|_| ()),
            SecurityMode::Aes => self.aes_key(Role::Acceptor).map(|_| ()),
            SecurityMode::AesHmac => {
                self.hmac_key(Role::Acceptor)?;
                self.aes_key(Role::Acceptor).map(|_| ())
            }
            SecurityMode::Tls => self.tls_settings().map(|_| ()),
        }
    }
}
