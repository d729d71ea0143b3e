//! TLS termination for the listener.
//!
//! This module loads certificates and a private key into a
//! `rustls::ServerConfig` and wraps it in an acceptor for incoming
//! connections.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;
use crate::error::{ProxyError, Result};

/// Loads a TLS `ServerConfig` from the given certificate and key paths.
pub fn load_tls_config<P: AsRef<Path>>(cert_path: P, key_path: P) -> Result<Arc<ServerConfig>> {
    let cert_file = File::open(cert_path)?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_reader).collect::<std::result::Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ProxyError::Config("certificate file holds no certificates".into()));
    }

    let key_file = File::open(key_path)?;
    let mut key_reader = BufReader::new(key_file);
    let key = rustls_pemfile::pkcs8_private_keys(&mut key_reader)
        .next()
        .transpose()?
        .map(PrivateKeyDer::Pkcs8)
        .ok_or_else(|| ProxyError::Config("key file holds no PKCS#8 private key".into()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    // Connections are served with hyper's HTTP/1 builder only.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Build an acceptor from the `tls` section of the configuration.
pub fn acceptor(config: &TlsConfig) -> Result<TlsAcceptor> {
    load_tls_config(&config.cert_path, &config.key_path).map(TlsAcceptor::from)
}
