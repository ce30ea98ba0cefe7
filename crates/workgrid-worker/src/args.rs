//! Command-line surface of the worker program.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use workgrid_net::{NetConfig, SecurityMode, TlsSettings};

use crate::DEFAULT_WORKER_PORT;
use crate::error::Error;
use crate::server::WorkerConfig;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Workgrid worker server")]
pub struct Args {
    /// Type of security applied to TCP communication with the master;
    /// TCP means no security
    #[clap(
        value_enum,
        short = 's',
        long,
        value_name = "MODE",
        env = "WORKGRID_SECURITY",
        default_value_t = SecurityArg::Tcp
    )]
    pub security: SecurityArg,

    /// Key used to authenticate incoming messages with HMAC
    #[clap(long, value_name = "KEY", env = "WORKGRID_INCOMING_HMAC_KEY")]
    pub incoming_hmac_key: Option<String>,

    /// Key used to authenticate messages sent to the master with HMAC
    #[clap(long, value_name = "KEY", env = "WORKGRID_MASTER_HMAC_KEY")]
    pub master_hmac_key: Option<String>,

    /// Key used to decrypt incoming messages (16 or 32 bytes)
    #[clap(long, value_name = "KEY", env = "WORKGRID_INCOMING_AES_KEY")]
    pub incoming_aes_key: Option<String>,

    /// Key used to encrypt messages sent to the master (16 or 32 bytes)
    #[clap(long, value_name = "KEY", env = "WORKGRID_MASTER_AES_KEY")]
    pub master_aes_key: Option<String>,

    /// Path to this worker's PEM certificate for TLS mode
    #[clap(long, value_name = "PATH", env = "WORKGRID_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// Path to this worker's PEM private key for TLS mode
    #[clap(long, value_name = "PATH", env = "WORKGRID_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// CA file or directory of .pem files the master's certificate must
    /// chain to
    #[clap(long, value_name = "PATH", env = "WORKGRID_TLS_CA")]
    pub tls_ca: Option<PathBuf>,

    /// Passphrase of the private key (encrypted keys are rejected with a
    /// clear error)
    #[clap(long, value_name = "SECRET", env = "WORKGRID_TLS_PASSPHRASE")]
    pub tls_passphrase: Option<String>,

    /// Port to listen on
    #[clap(
        short = 'p',
        long,
        env = "WORKGRID_PORT",
        default_value_t = DEFAULT_WORKER_PORT
    )]
    pub port: u16,

    /// Socket I/O timeout in seconds; 0 disables timeouts
    #[clap(long, value_name = "SECONDS", env = "WORKGRID_TIMEOUT", default_value_t = 5)]
    pub timeout: u64,

    /// Answer UDP multicast discovery beacons
    #[clap(long, default_value_t = false)]
    pub announce: bool,

    /// Keep quiet and only log errors
    #[clap(short, long, conflicts_with = "verbose", default_value_t = false)]
    pub quiet: bool,

    #[clap(
        short = 'v',
        long,
        conflicts_with = "quiet",
        action = clap::ArgAction::Count,
        help = "Output details about requests; specify multiple times for more detail"
    )]
    pub verbose: u8,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityArg {
    #[value(name = "TCP")]
    Tcp,
    #[value(name = "HMAC")]
    Hmac,
    #[value(name = "AES")]
    Aes,
    #[value(name = "AES+HMAC")]
    AesHmac,
    #[value(name = "TLS")]
    Tls,
}

impl Display for SecurityArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = self.to_possible_value().expect("no skipped variants");
        f.write_str(value.get_name())
    }
}

impl From<SecurityArg> for SecurityMode {
    fn from(arg: SecurityArg) -> Self {
        match arg {
            SecurityArg::Tcp => SecurityMode::Tcp,
            SecurityArg::Hmac => SecurityMode::Hmac,
            SecurityArg::Aes => SecurityMode::Aes,
            SecurityArg::AesHmac => SecurityMode::AesHmac,
            SecurityArg::Tls => SecurityMode::Tls,
        }
    }
}

impl Args {
    pub fn worker_config(&self) -> Result<WorkerConfig, Error> {
        Ok(WorkerConfig {
            net: self.net_config()?,
            port: self.port,
            announce: self.announce,
        })
    }

    pub fn net_config(&self) -> Result<NetConfig, Error> {
        let tls = match (&self.tls_cert, &self.tls_key, &self.tls_ca) {
            (Some(cert), Some(key), Some(ca)) => Some(TlsSettings {
                cert: cert.clone(),
                key: key.clone(),
                ca: ca.clone(),
                passphrase: self.tls_passphrase.clone(),
            }),
            (None, None, None) => None,
            _ => return Err(Error::IncompleteTlsArgs),
        };
        if self.security == SecurityArg::Tls && tls.is_none() {
            return Err(Error::IncompleteTlsArgs);
        }

        Ok(NetConfig {
            mode: SecurityMode::from(self.security),
            listener_hmac_key: self.incoming_hmac_key.as_ref().map(|k| k.as_bytes().to_vec()),
            listener_aes_key: self.incoming_aes_key.as_ref().map(|k| k.as_bytes().to_vec()),
            peer_hmac_key: self.master_hmac_key.as_ref().map(|k| k.as_bytes().to_vec()),
            peer_aes_key: self.master_aes_key.as_ref().map(|k| k.as_bytes().to_vec()),
            tls,
            timeout_ms: self.timeout * 1_000,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_plain_tcp() {
        let args = Args::parse_from(["workgrid-worker"]);
        let config = args.worker_config().unwrap();

        assert_eq!(config.net.mode, SecurityMode::Tcp);
        assert_eq!(config.port, DEFAULT_WORKER_PORT);
        assert!(!config.announce);
        assert_eq!(config.net.timeout_ms, 5_000);
    }

    #[test]
    fn hmac_keys_flow_into_the_net_config() {
        let args = Args::parse_from([
            "workgrid-worker",
            "-s",
            "HMAC",
            "--incoming-hmac-key",
            "listener secret",
            "--master-hmac-key",
            "master secret",
        ]);
        let net = args.net_config().unwrap();

        assert_eq!(net.mode, SecurityMode::Hmac);
        assert_eq!(net.listener_hmac_key.as_deref(), Some(&b"listener secret"[..]));
        assert_eq!(net.peer_hmac_key.as_deref(), Some(&b"master secret"[..]));
    }

    #[test]
    fn aes_hmac_mode_parses() {
        let args = Args::parse_from(["workgrid-worker", "-s", "AES+HMAC"]);
        assert_eq!(args.net_config().unwrap().mode, SecurityMode::AesHmac);
    }

    #[test]
    fn tls_requires_all_three_paths() {
        let args = Args::parse_from(["workgrid-worker", "-s", "TLS"]);
        assert!(matches!(args.net_config(), Err(Error::IncompleteTlsArgs)));

        let args = Args::parse_from([
            "workgrid-worker",
            "-s",
            "TLS",
            "--tls-cert",
            "/etc/workgrid/worker.pem",
            "--tls-key",
            "/etc/workgrid/worker.key",
        ]);
        assert!(matches!(args.net_config(), Err(Error::IncompleteTlsArgs)));

        let args = Args::parse_from([
            "workgrid-worker",
            "-s",
            "TLS",
            "--tls-cert",
            "/etc/workgrid/worker.pem",
            "--tls-key",
            "/etc/workgrid/worker.key",
            "--tls-ca",
            "/etc/workgrid/ca.pem",
        ]);
        let net = args.net_config().unwrap();
        assert_eq!(net.mode, SecurityMode::Tls);
        assert!(net.tls.is_some());
    }

    #[test]
    fn zero_timeout_disables() {
        let args = Args::parse_from(["workgrid-worker", "--timeout", "0"]);
        assert!(args.net_config().unwrap().timeout().is_none());
    }
}
