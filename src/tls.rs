// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Server TLS
//!
//! The listener terminates mutual TLS itself. Client certificates are
//! verified against the configured peer CA bundle and the subject of a
//! verified certificate is attached to every request on the connection as a
//! [`ConnectionPeer`] extension.
//!
//! Client certificates stay optional at the handshake: operators, Sunrise
//! contacts and health checks connect without one. Routes that need a peer
//! refuse requests whose connection carries none.

use std::future::Future;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use axum::{middleware::AddExtension, Extension};
use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ServerConnection, WebPkiClientVerifier};
use rustls::{RootCertStore, ServerConfig};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tower::Layer;
use tracing::{debug, warn};
use x509_parser::extensions::GeneralName;

use crate::config::TlsFiles;
use crate::resolver::PeerCertificate;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key in {0}")]
    NoPrivateKey(PathBuf),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    #[error("client verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

pub type TlsResult<T> = Result<T, TlsError>;

/// Verified client certificate of the connection a request arrived on.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPeer(pub Option<PeerCertificate>);

fn read(path: &Path) -> TlsResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_certs(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let pem = read(path)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

pub fn load_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let pem = read(path)?;
    rustls_pemfile::private_key(&mut BufReader::new(pem.as_slice()))
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Server configuration for the listener. Without a client CA bundle no
/// client certificates are requested.
pub fn server_config(files: &TlsFiles) -> TlsResult<ServerConfig> {
    let provider: Arc<CryptoProvider> = Arc::new(ring::default_provider());
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let builder = match &files.client_ca {
        Some(ca) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca)? {
                roots.add(cert)?;
            }
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .allow_unauthenticated()
                .build()?;
            builder.with_client_cert_verifier(verifier)
        }
        None => {
            warn!("No client CA configured, peer certificates will not be requested");
            builder.with_no_client_auth()
        }
    };

    let mut config = builder.with_single_cert(load_certs(&files.cert)?, load_key(&files.key)?)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// Subject names of a DER certificate, or `None` when it names nothing.
pub fn peer_certificate(der: &[u8]) -> Option<PeerCertificate> {
    let (_, cert) = match x509_parser::parse_x509_certificate(der) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "Could not parse client certificate");
            return None;
        }
    };

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();
    let dns_names = match cert.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let peer = PeerCertificate {
        common_name,
        dns_names,
    };
    (!peer.is_empty()).then_some(peer)
}

/// Peer of an established connection. rustls only exposes certificates
/// that passed the client verifier.
pub fn connection_peer(conn: &ServerConnection) -> ConnectionPeer {
    let peer = conn
        .peer_certificates()
        .and_then(|chain| chain.first())
        .and_then(|leaf| peer_certificate(leaf.as_ref()));
    ConnectionPeer(peer)
}

// =============================================================================
// Acceptor
// =============================================================================

/// rustls acceptor that tags each connection's service with its peer.
#[derive(Clone)]
pub struct PeerCertAcceptor {
    inner: RustlsAcceptor,
}

impl PeerCertAcceptor {
    pub fn new(config: ServerConfig) -> Self {
        let config = RustlsConfig::from_config(Arc::new(config));
        Self {
            inner: RustlsAcceptor::new(config),
        }
    }
}

impl<I, S> Accept<I, S> for PeerCertAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = TlsStream<I>;
    type Service = AddExtension<S, ConnectionPeer>;
    type Future = Pin<Box<dyn Future<Output = io::Result<(Self::Stream, Self::Service)>> + Send>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let acceptor = self.inner.clone();
        Box::pin(async move {
            let (stream, service) = acceptor.accept(stream, service).await?;
            let peer = connection_peer(stream.get_ref().1);
            if let Some(cert) = &peer.0 {
                debug!(common_name = %cert.common_name, "Peer certificate verified");
            }
            Ok((stream, Extension(peer).layer(service)))
        })
    }
}
