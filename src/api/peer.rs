// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Extractor for the counterparty node behind a TRISA or TRP request.
//!
//! The identity comes from the client certificate verified on the
//! connection. Identity headers are read only when the node is configured to
//! sit behind a trusted mutual TLS proxy.

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::debug;

use super::header_value;
use crate::{
    error::ApiError,
    peers::http::{
        CLIENT_CERT_CN_HEADER, CLIENT_CERT_SAN_HEADER, PEER_COMMON_NAME_HEADER, PEER_ENDPOINT_HEADER,
    },
    peers::PeerInfo,
    resolver::PeerCertificate,
    state::AppState,
    tls::ConnectionPeer,
};

/// An authenticated counterparty node.
#[derive(Debug, Clone)]
pub struct AuthenticatedPeer {
    pub certificate: PeerCertificate,
    /// Dial back endpoint announced by a trusted proxy.
    pub endpoint: Option<String>,
}

impl AuthenticatedPeer {
    /// Peer details for the transport. The endpoint defaults to port 443 of
    /// the common name.
    pub fn info(&self) -> PeerInfo {
        let common_name = self.certificate.common_name.as_str();
        let endpoint = self
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("{common_name}:443"));
        PeerInfo::new(common_name, endpoint)
    }
}

fn from_proxy_headers(parts: &Parts) -> Option<AuthenticatedPeer> {
    let headers = &parts.headers;
    let common_name = header_value(headers, PEER_COMMON_NAME_HEADER)
        .or_else(|| header_value(headers, CLIENT_CERT_CN_HEADER))
        .unwrap_or_default()
        .to_string();
    let dns_names = header_value(headers, CLIENT_CERT_SAN_HEADER)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let certificate = PeerCertificate {
        common_name,
        dns_names,
    };
    if certificate.is_empty() {
        return None;
    }
    Some(AuthenticatedPeer {
        certificate,
        endpoint: header_value(headers, PEER_ENDPOINT_HEADER).map(str::to_string),
    })
}

impl FromRequestParts<AppState> for AuthenticatedPeer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(ConnectionPeer(Some(certificate))) = parts.extensions.get::<ConnectionPeer>() {
            return Ok(AuthenticatedPeer {
                certificate: certificate.clone(),
                endpoint: None,
            });
        }

        if state.trusted_proxy {
            if let Some(peer) = from_proxy_headers(parts) {
                return Ok(peer);
            }
        } else if header_value(&parts.headers, PEER_COMMON_NAME_HEADER).is_some()
            || header_value(&parts.headers, CLIENT_CERT_CN_HEADER).is_some()
        {
            debug!("Ignoring peer identity headers without a trusted proxy");
        }

        Err(ApiError::unauthorized("peer certificate required"))
    }
}
