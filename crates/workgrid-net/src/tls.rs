//! Mutual-TLS configuration for the `TLS` security variant.
//!
//! Both peers present certificates. The peer certificate chain is
//! validated against the configured CA, which may be a single PEM file or
//! a directory of `.pem` files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::config::TlsSettings;
use crate::error::Error;

pub fn client_config(settings: &TlsSettings) -> Result<Arc<ClientConfig>, Error> {
    let roots = root_store(&settings.ca)?;
    let certs = load_certs(&settings.cert)?;
    let key = load_key(settings)?;

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| Error::TlsConfig(e.to_string()))?;

    Ok(Arc::new(config))
}

pub fn server_config(settings: &TlsSettings) -> Result<Arc<ServerConfig>, Error> {
    let roots = root_store(&settings.ca)?;
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| Error::TlsConfig(e.to_string()))?;

    let certs = load_certs(&settings.cert)?;
    let key = load_key(settings)?;

    let config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| Error::TlsConfig(e.to_string()))?;

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(Error::TlsConfig(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(settings: &TlsSettings) -> Result<PrivateKeyDer<'static>, Error> {
    if settings.passphrase.is_some() {
        return Err(Error::EncryptedKeyUnsupported(
            settings.key.display().to_string(),
        ));
    }

    let mut reader = BufReader::new(File::open(&settings.key)?);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
        Error::TlsConfig(format!("no private key found in {}", settings.key.display()))
    })
}

fn root_store(ca: &Path) -> Result<RootCertStore, Error> {
    let mut roots = RootCertStore::empty();

    if ca.is_dir() {
        for entry in std::fs::read_dir(ca)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "pem") {
                add_roots(&mut roots, &path)?;
            }
        }
    } else {
        add_roots(&mut roots, ca)?;
    }

    if roots.is_empty() {
        return Err(Error::TlsConfig(format!(
            "no CA certificates found at {}",
            ca.display()
        )));
    }
    Ok(roots)
}

fn add_roots(roots: &mut RootCertStore, path: &Path) -> Result<(), Error> {
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| Error::TlsConfig(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn passphrases_are_rejected() {
        let settings = TlsSettings {
            cert: "/tmp/cert.pem".into(),
            key: "/tmp/key.pem".into(),
            ca: "/tmp/ca.pem".into(),
            passphrase: Some("hunter2".into()),
        };
        assert!(matches!(
            load_key(&settings),
            Err(Error::EncryptedKeyUnsupported(_))
        ));
    }

    #[test]
    fn missing_files_error() {
        let settings = TlsSettings {
            cert: "/definitely/not/here.pem".into(),
            key: "/definitely/not/here.pem".into(),
            ca: "/definitely/not/here.pem".into(),
            passphrase: None,
        };
        assert!(client_config(&settings).is_err());
        assert!(server_config(&settings).is_err());
    }
}
