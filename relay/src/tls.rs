//! TLS termination for the public-facing proxy listener (spec.md §6 "tls").
//!
//! Replaces the teacher's SNI-sniffing passthrough/terminate split
//! (`extract_sni`, `TlsMode`) — this relay always terminates TLS itself and
//! only ever forwards plaintext HTTP to tenants, so there's nothing to sniff
//! or pass through. Loading a single cert/key pair into a `rustls::ServerConfig`
//! follows `other_examples/.../roost__src-serve-proxy.rs`'s `build_cert_resolver`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::pki_types::CertificateDer;
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Load a PEM certificate chain and private key into a ready-to-use acceptor.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_pem = std::fs::read(cert_path)
        .with_context(|| format!("reading TLS certificate at {}", cert_path.display()))?;
    let key_pem = std::fs::read(key_path)
        .with_context(|| format!("reading TLS private key at {}", key_path.display()))?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .context("parsing TLS certificate PEM")?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .context("parsing TLS private key PEM")?
        .context("no private key found in key file")?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building TLS server config")?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}
