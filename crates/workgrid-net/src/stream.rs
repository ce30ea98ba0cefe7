use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, ServerConfig, ServerConnection, StreamOwned};
use socket2::{Domain, Socket, Type};
use tracing::debug;

use workgrid_protocol::frame::{self, scan_header};

use crate::config::{NetConfig, Role, SecurityMode};
use crate::error::Error;
use crate::{seal, tls};

const READ_CHUNK: usize = 4096;

enum Transport {
    Plain(TcpStream),
    TlsClient(Box<StreamOwned<ClientConnection, TcpStream>>),
    TlsServer(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.read(buf),
            Transport::TlsClient(stream) => stream.read(buf),
            Transport::TlsServer(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Transport::Plain(stream) => stream.write(buf),
            Transport::TlsClient(stream) => stream.write(buf),
            Transport::TlsServer(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Transport::Plain(stream) => stream.flush(),
            Transport::TlsClient(stream) => stream.flush(),
            Transport::TlsServer(stream) => stream.flush(),
        }
    }
}

/// One framed connection. Payloads passed to [`SecureStream::send`] are
/// sealed per the configured variant and framed; [`SecureStream::recv`]
/// reverses both.
pub struct SecureStream {
    transport: Transport,
    config: Arc<NetConfig>,
    role: Role,
    peer: SocketAddr,
    rx_buf: Vec<u8>,
}

impl SecureStream {
    /// Dial `addr` and complete any variant-specific setup.
    pub fn connect(addr: SocketAddr, config: Arc<NetConfig>) -> Result<Self, Error> {
        let tcp = match config.timeout() {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout).map_err(Error::from_io)?,
            None => TcpStream::connect(addr).map_err(Error::from_io)?,
        };
        Self::setup(&tcp, &config)?;

        let transport = match config.mode {
            SecurityMode::Tls => {
                let tls_config = tls::client_config(config.tls_settings()?)?;
                let name = ServerName::try_from(addr.ip().to_string())
                    .map_err(|e| Error::TlsConfig(e.to_string()))?;
                let conn = ClientConnection::new(tls_config, name)
                    .map_err(|e| Error::TlsConfig(e.to_string()))?;
                Transport::TlsClient(Box::new(StreamOwned::new(conn, tcp)))
            }
            _ => Transport::Plain(tcp),
        };

        Ok(SecureStream {
            transport,
            config,
            role: Role::Initiator,
            peer: addr,
            rx_buf: Vec::new(),
        })
    }

    fn accepted(
        tcp: TcpStream,
        peer: SocketAddr,
        config: Arc<NetConfig>,
        tls_server: Option<Arc<ServerConfig>>,
    ) -> Result<Self, Error> {
        Self::setup(&tcp, &config)?;

        let transport = match config.mode {
            SecurityMode::Tls => {
                let tls_config = tls_server.ok_or(Error::TlsSettingsMissing)?;
                let conn = ServerConnection::new(tls_config)
                    .map_err(|e| Error::TlsConfig(e.to_string()))?;
                Transport::TlsServer(Box::new(StreamOwned::new(conn, tcp)))
            }
            _ => Transport::Plain(tcp),
        };

        Ok(SecureStream {
            transport,
            config,
            role: Role::Acceptor,
            peer,
            rx_buf: Vec::new(),
        })
    }

    fn setup(tcp: &TcpStream, config: &NetConfig) -> Result<(), Error> {
        tcp.set_read_timeout(config.timeout()).map_err(Error::from_io)?;
        tcp.set_write_timeout(config.timeout()).map_err(Error::from_io)?;
        tcp.set_nodelay(true).map_err(Error::from_io)?;
        Ok(())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Seal, frame, and send one message.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), Error> {
        let sealed = seal::apply(&self.config, self.role, payload)?;
        let framed = frame::encode_frame(&sealed);
        self.transport.write_all(&framed).map_err(Error::from_io)?;
        self.transport.flush().map_err(Error::from_io)?;
        Ok(())
    }

    /// Receive one framed message and reverse the security transform.
    pub fn recv(&mut self) -> Result<Vec<u8>, Error> {
        let header = loop {
            match scan_header(&self.rx_buf)? {
                Some(header) => break header,
                None => self.fill()?,
            }
        };

        let total = header.header_len + header.payload_len;
        while self.rx_buf.len() < total {
            self.fill()?;
        }

        let sealed = &self.rx_buf[header.header_len..total];
        let payload = seal::open(&self.config, self.role, sealed)?;
        self.rx_buf.drain(..total);
        Ok(payload)
    }

    fn fill(&mut self) -> Result<(), Error> {
        let mut chunk = [0u8; READ_CHUNK];
        let nbytes = self.transport.read(&mut chunk).map_err(Error::from_io)?;
        if nbytes == 0 {
            return Err(Error::IncompleteMessage);
        }
        self.rx_buf.extend_from_slice(&chunk[..nbytes]);
        Ok(())
    }
}

/// A bound listening socket applying the process security variant to
/// every accepted connection.
pub struct SecureListener {
    listener: TcpListener,
    config: Arc<NetConfig>,
    tls_server: Option<Arc<ServerConfig>>,
}

impl SecureListener {
    /// Bind `addr`. Refuses to bind when the configured mode's listener
    /// keys are absent.
    pub fn bind(addr: SocketAddr, config: Arc<NetConfig>) -> Result<Self, Error> {
        config.require_listener_keys()?;

        let domain = match addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(128)?;
        let listener: TcpListener = socket.into();

        let tls_server = match config.mode {
            SecurityMode::Tls => Some(tls::server_config(config.tls_settings()?)?),
            _ => None,
        };

        debug!("listening on {} ({})", listener.local_addr()?, config.mode);
        Ok(SecureListener {
            listener,
            config,
            tls_server,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Block until a peer connects.
    pub fn accept(&self) -> Result<SecureStream, Error> {
        let (tcp, peer) = self.listener.accept().map_err(Error::from_io)?;
        SecureStream::accepted(tcp, peer, self.config.clone(), self.tls_server.clone())
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use rcgen::{
        BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
        KeyUsagePurpose,
    };
    use tempfile::TempDir;

    use super::*;
    use crate::config::TlsSettings;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn hmac_config() -> NetConfig {
        NetConfig {
            mode: SecurityMode::Hmac,
            listener_hmac_key: Some(b"shared secret".to_vec()),
            peer_hmac_key: Some(b"shared secret".to_vec()),
            ..NetConfig::plaintext()
        }
    }

    /// A self-signed CA plus one CA-issued certificate for 127.0.0.1.
    /// Both ends of the mutual handshake present the peer certificate and
    /// trust the CA.
    struct TlsFixture {
        dir: TempDir,
    }

    impl TlsFixture {
        fn generate() -> Self {
            let ca_key = KeyPair::generate().unwrap();
            let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
            ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            ca_params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
            ca_params
                .distinguished_name
                .push(DnType::CommonName, "workgrid test ca");
            let ca_cert = ca_params.self_signed(&ca_key).unwrap();

            let peer_key = KeyPair::generate().unwrap();
            let mut peer_params = CertificateParams::new(vec!["127.0.0.1".to_string()]).unwrap();
            peer_params
                .distinguished_name
                .push(DnType::CommonName, "workgrid test peer");
            peer_params.extended_key_usages = vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ];
            let peer_cert = peer_params.signed_by(&peer_key, &ca_cert, &ca_key).unwrap();

            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("ca.pem"), ca_cert.pem()).unwrap();
            std::fs::write(dir.path().join("peer.pem"), peer_cert.pem()).unwrap();
            std::fs::write(dir.path().join("peer.key"), peer_key.serialize_pem()).unwrap();
            TlsFixture { dir }
        }

        fn settings(&self) -> TlsSettings {
            TlsSettings {
                cert: self.dir.path().join("peer.pem"),
                key: self.dir.path().join("peer.key"),
                ca: self.dir.path().join("ca.pem"),
                passphrase: None,
            }
        }

        fn config(&self) -> NetConfig {
            NetConfig {
                mode: SecurityMode::Tls,
                tls: Some(self.settings()),
                ..NetConfig::plaintext()
            }
        }
    }

    fn echo_once(listener: SecureListener) -> thread::JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let mut stream = listener.accept().unwrap();
            let request = stream.recv().unwrap();
            stream.send(&request).unwrap();
            request
        })
    }

    #[test]
    fn plaintext_echo_over_loopback() {
        let config = Arc::new(NetConfig::plaintext());
        let listener = SecureListener::bind(loopback(), config.clone()).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = echo_once(listener);

        let mut stream = SecureStream::connect(addr, config).unwrap();
        stream.send(b"ping").unwrap();
        assert_eq!(stream.recv().unwrap(), b"ping");
        assert_eq!(server.join().unwrap(), b"ping");
    }

    #[test]
    fn hmac_echo_over_loopback() {
        let config = Arc::new(hmac_config());
        let listener = SecureListener::bind(loopback(), config.clone()).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = echo_once(listener);

        let mut stream = SecureStream::connect(addr, config).unwrap();
        stream.send(b"authenticated ping").unwrap();
        assert_eq!(stream.recv().unwrap(), b"authenticated ping");
        server.join().unwrap();
    }

    #[test]
    fn hmac_receiver_rejects_wrong_key() {
        let listener_config = Arc::new(hmac_config());
        let listener = SecureListener::bind(loopback(), listener_config).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let mut stream = listener.accept().unwrap();
            stream.recv()
        });

        let mut sender_config = hmac_config();
        sender_config.peer_hmac_key = Some(b"wrong secret".to_vec());
        let mut stream = SecureStream::connect(addr, Arc::new(sender_config)).unwrap();
        stream.send(b"ping").unwrap();

        assert!(matches!(server.join().unwrap(), Err(Error::Unauthenticated)));
    }

    #[test]
    fn tls_echo_over_loopback() {
        let fixture = TlsFixture::generate();
        let config = Arc::new(fixture.config());
        let listener = SecureListener::bind(loopback(), config.clone()).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = echo_once(listener);

        // Both certificates chain to the fixture CA; the handshake runs
        // on first use of the stream.
        let mut stream = SecureStream::connect(addr, config).unwrap();
        stream.send(b"mutual tls ping").unwrap();
        assert_eq!(stream.recv().unwrap(), b"mutual tls ping");
        server.join().unwrap();
    }

    #[test]
    fn tls_ca_may_be_a_directory() {
        let fixture = TlsFixture::generate();
        let ca_dir = fixture.dir.path().join("trust");
        std::fs::create_dir(&ca_dir).unwrap();
        std::fs::copy(fixture.dir.path().join("ca.pem"), ca_dir.join("ca.pem")).unwrap();

        let mut settings = fixture.settings();
        settings.ca = ca_dir;
        let config = Arc::new(NetConfig {
            mode: SecurityMode::Tls,
            tls: Some(settings),
            ..NetConfig::plaintext()
        });

        let listener = SecureListener::bind(loopback(), config.clone()).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = echo_once(listener);

        let mut stream = SecureStream::connect(addr, config).unwrap();
        stream.send(b"directory ca ping").unwrap();
        assert_eq!(stream.recv().unwrap(), b"directory ca ping");
        server.join().unwrap();
    }

    #[test]
    fn tls_rejects_untrusted_peer() {
        let server_fixture = TlsFixture::generate();
        let client_fixture = TlsFixture::generate();

        let listener = SecureListener::bind(loopback(), Arc::new(server_fixture.config())).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let mut stream = listener.accept().unwrap();
            stream.recv()
        });

        // The client trusts a different CA, so verification fails on
        // first use, on both sides.
        let mut stream = SecureStream::connect(addr, Arc::new(client_fixture.config())).unwrap();
        let exchanged = stream.send(b"ping").and_then(|()| stream.recv());
        assert!(exchanged.is_err());
        assert!(server.join().unwrap().is_err());
    }

    #[test]
    fn tls_listener_requires_settings() {
        let config = NetConfig {
            mode: SecurityMode::Tls,
            ..NetConfig::plaintext()
        };
        assert!(matches!(
            SecureListener::bind(loopback(), Arc::new(config)),
            Err(Error::TlsSettingsMissing)
        ));
    }

    #[test]
    fn hmac_listener_requires_key() {
        let mut config = hmac_config();
        config.listener_hmac_key = None;
        assert!(matches!(
            SecureListener::bind(loopback(), Arc::new(config)),
            Err(Error::KeyMissing(SecurityMode::Hmac, "HMAC"))
        ));
    }

    #[test]
    fn large_message_spans_reads() {
        let config = Arc::new(NetConfig::plaintext());
        let listener = SecureListener::bind(loopback(), config.clone()).unwrap();
        let addr = listener.local_addr().unwrap();
        let server = echo_once(listener);

        let payload = vec![0xE7u8; 256 * 1024];
        let mut stream = SecureStream::connect(addr, config).unwrap();
        stream.send(&payload).unwrap();
        assert_eq!(stream.recv().unwrap(), payload);
        server.join().unwrap();
    }

    #[test]
    fn peer_close_mid_message_is_incomplete() {
        let config = Arc::new(NetConfig::plaintext());
        let listener = SecureListener::bind(loopback(), config.clone()).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let mut stream = listener.accept().unwrap();
            stream.recv()
        });

        // Announce 100 bytes, deliver 4, then hang up.
        let mut tcp = TcpStream::connect(addr).unwrap();
        tcp.write_all(b"100MLENoops").unwrap();
        drop(tcp);

        assert!(matches!(
            server.join().unwrap(),
            Err(Error::IncompleteMessage)
        ));
    }

    #[test]
    fn malicious_length_prefix_is_rejected() {
        let config = Arc::new(NetConfig::plaintext());
        let listener = SecureListener::bind(loopback(), config.clone()).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let mut stream = listener.accept().unwrap();
            stream.recv()
        });

        // An endless digit stream never forms a valid header.
        let mut tcp = TcpStream::connect(addr).unwrap();
        tcp.write_all(&[b'9'; 64]).unwrap();

        let result = server.join().unwrap();
        assert!(matches!(
            result,
            Err(Error::Frame(workgrid_protocol::Error::HeaderTooLong(_)))
        ));
    }
}
