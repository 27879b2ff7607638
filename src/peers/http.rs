// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTPS JSON transport between nodes.
//!
//! Routes on the remote node:
//! - `POST {endpoint}/trisa/transfer` secure envelope in, secure envelope out
//! - `POST {endpoint}/trisa/keyexchange` signing key in, signing key out
//! - `POST {trp endpoint}` TRP inquiry with the TRP headers
//!
//! Incoming peers are identified by their verified client certificate. The
//! headers below carry the identity only when a trusted proxy terminates
//! mutual TLS in front of the node.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Identity, Response};
use serde::de::DeserializeOwned;
use url::Url;

use super::{Connector, PeerClient, PeerError, PeerInfo, PeerResult, SigningKey};
use crate::envelope::SecureEnvelope;
use crate::trp::{
    Info, Inquiry, Resolution, API_EXTENSIONS_HEADER, API_VERSION_HEADER, REQUEST_IDENTIFIER_HEADER,
};

/// Common name of the authenticated TRISA peer.
pub const PEER_COMMON_NAME_HEADER: &str = "x-peer-common-name";

/// Endpoint the TRISA peer can be dialed back on.
pub const PEER_ENDPOINT_HEADER: &str = "x-peer-endpoint";

/// Subject common name of a TRP client certificate.
pub const CLIENT_CERT_CN_HEADER: &str = "x-client-cert-cn";

/// Comma separated DNS names of a TRP client certificate.
pub const CLIENT_CERT_SAN_HEADER: &str = "x-client-cert-san";

const USER_AGENT: &str = concat!("envoy-node/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// Connector
// =============================================================================

/// Dials peers over HTTPS with an optional client certificate.
#[derive(Clone)]
pub struct HttpConnector {
    client: Client,
}

impl HttpConnector {
    /// `identity_pem` holds the client certificate chain and its private key.
    pub fn new(timeout: Duration, identity_pem: Option<&[u8]>) -> PeerResult<Self> {
        let mut builder = Client::builder().timeout(timeout).user_agent(USER_AGENT);
        if let Some(pem) = identity_pem {
            let identity = Identity::from_pem(pem)
                .map_err(|e| PeerError::Transport(format!("invalid client identity: {e}")))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| PeerError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect(&self, info: &PeerInfo) -> PeerResult<Arc<dyn PeerClient>> {
        let base = base_url(&info.endpoint)?;
        Ok(Arc::new(HttpPeer {
            client: self.client.clone(),
            base,
        }))
    }
}

/// Base URL for an endpoint given as `host:port` or as a full `https` URL.
pub fn base_url(endpoint: &str) -> PeerResult<Url> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(PeerError::NoEndpoint);
    }

    let raw = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("https://{endpoint}")
    };
    let mut url = Url::parse(&raw)
        .map_err(|e| PeerError::Transport(format!("invalid peer endpoint {endpoint:?}: {e}")))?;

    match url.scheme() {
        "https" => {}
        other => {
            return Err(PeerError::Transport(format!(
                "unsupported peer endpoint scheme {other:?}"
            )))
        }
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

// =============================================================================
// Client
// =============================================================================

struct HttpPeer {
    client: Client,
    base: Url,
}

impl HttpPeer {
    fn route(&self, path: &str) -> PeerResult<Url> {
        self.base
            .join(path)
            .map_err(|e| PeerError::Transport(format!("invalid peer route {path:?}: {e}")))
    }
}

fn transport(e: reqwest::Error) -> PeerError {
    if e.is_timeout() {
        PeerError::Timeout("request")
    } else {
        PeerError::Transport(e.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> PeerResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PeerError::Status {
            status: status.as_u16(),
            message: body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| PeerError::Transport(format!("failed to parse peer response: {e}")))
}

#[async_trait]
impl PeerClient for HttpPeer {
    async fn transfer(&self, envelope: SecureEnvelope) -> PeerResult<SecureEnvelope> {
        let response = self
            .client
            .post(self.route("trisa/transfer")?)
            .json(&envelope)
            .send()
            .await
            .map_err(transport)?;
        read_json(response).await
    }

    async fn key_exchange(&self, key: SigningKey) -> PeerResult<SigningKey> {
        let response = self
            .client
            .post(self.route("trisa/keyexchange")?)
            .json(&key)
            .send()
            .await
            .map_err(transport)?;
        read_json(response).await
    }

    async fn trp_inquiry(&self, inquiry: &Inquiry) -> PeerResult<Resolution> {
        let response = self
            .client
            .post(self.base.clone())
            .header(API_VERSION_HEADER, &inquiry.info.api_version)
            .header(REQUEST_IDENTIFIER_HEADER, &inquiry.info.request_identifier)
            .header(API_EXTENSIONS_HEADER, inquiry.info.extensions_header())
            .json(inquiry)
            .send()
            .await
            .map_err(transport)?;

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let info = Info::from_headers(
            header(API_VERSION_HEADER).as_deref(),
            header(REQUEST_IDENTIFIER_HEADER).as_deref(),
            header(API_EXTENSIONS_HEADER).as_deref(),
        );

        let mut resolution: Resolution = read_json(response).await?;
        resolution.info = info;
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_become_https_base_urls() {
        let url = base_url("beneficiary.example.com:443").unwrap();
        assert_eq!(url.as_str(), "https://beneficiary.example.com/");

        let url = base_url("https://trp.example.com:8443/trp").unwrap();
        assert_eq!(url.as_str(), "https://trp.example.com:8443/trp/");
        assert_eq!(
            url.join("trisa/transfer").unwrap().as_str(),
            "https://trp.example.com:8443/trp/trisa/transfer"
        );

        assert!(matches!(base_url("  "), Err(PeerError::NoEndpoint)));
        assert!(base_url("ftp://example.com").is_err());
    }

    #[test]
    fn plain_http_endpoints_are_refused() {
        assert!(matches!(
            base_url("http://localhost:8100"),
            Err(PeerError::Transport(_))
        ));
        assert!(base_url("https://localhost:8100").is_ok());
    }

    #[test]
    fn connector_builds_without_identity() {
        HttpConnector::new(Duration::from_secs(5), None).unwrap();
        assert!(HttpConnector::new(Duration::from_secs(5), Some(b"not a pem")).is_err());
    }
}
