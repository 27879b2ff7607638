// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Peer Registry
//!
//! One logical [`Peer`] per remote common name. The transport client behind a
//! peer is created lazily on first use through a [`Connector`] and then shared
//! by every caller. Transfers and key exchanges run under explicit deadlines.
//!
//! ```text
//! Peers::lookup(cn, endpoint) ──► Peer ──(first call)──► Connector::connect
//!                                  │
//!                                  ├── transfer(envelope)   45s
//!                                  ├── key_exchange(key)    30s
//!                                  └── trp_inquiry(inquiry) 45s
//! ```

pub mod http;
pub mod info;
#[cfg(test)]
pub(crate) mod mock;

pub use info::PeerInfo;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::envelope::SecureEnvelope;
use crate::keychain::{KeyChain, KeyError};
use crate::keys::{Key, KeyMaterialError, PublicKey};
use crate::trp::{Inquiry, Resolution};

/// Deadline for a single envelope transfer.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(45);

/// Deadline for a key exchange.
pub const KEY_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Algorithm name carried on exchanged keys.
pub const KEY_ALGORITHM_RSA: &str = "RSA";

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer has no common name")]
    NoCommonName,

    #[error("peer has no endpoint")]
    NoEndpoint,

    #[error("unknown peer {0:?}, an endpoint is required to connect")]
    UnknownPeer(String),

    #[error("peer {0} timed out")]
    Timeout(&'static str),

    #[error("peer transport error: {0}")]
    Transport(String),

    #[error("peer responded with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("key chain error: {0}")]
    Key(#[from] KeyError),

    #[error("invalid exchanged key: {0}")]
    KeyMaterial(#[from] KeyMaterialError),

    #[error("could not close peers: {}", .0.join("; "))]
    Close(Vec<String>),
}

impl PeerError {
    /// Failures worth retrying against the same peer later.
    pub fn is_retryable(&self) -> bool {
        match self {
            PeerError::Timeout(_) | PeerError::Transport(_) => true,
            PeerError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type PeerResult<T> = Result<T, PeerError>;

// =============================================================================
// Exchanged Keys
// =============================================================================

/// A public key as sent during a key exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SigningKey {
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub algorithm: String,
    /// DER encoded public key, base64 on the wire.
    #[serde(with = "crate::envelope::wire::b64")]
    #[schema(value_type = String)]
    pub data: Vec<u8>,
}

impl From<&PublicKey> for SigningKey {
    fn from(key: &PublicKey) -> Self {
        Self {
            signature: key.public_key_signature().to_string(),
            algorithm: KEY_ALGORITHM_RSA.to_string(),
            data: key.der().to_vec(),
        }
    }
}

impl SigningKey {
    /// Parse the key. A signature, when sent, must match the key data.
    pub fn public_key(&self) -> PeerResult<PublicKey> {
        let key = PublicKey::from_der(&self.data)?;
        if !self.signature.is_empty() && self.signature != key.public_key_signature() {
            return Err(PeerError::Transport(
                "exchanged key signature does not match key data".into(),
            ));
        }
        Ok(key)
    }
}

// =============================================================================
// Transport Seams
// =============================================================================

/// An open connection to one remote node.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn transfer(&self, envelope: SecureEnvelope) -> PeerResult<SecureEnvelope>;

    async fn key_exchange(&self, key: SigningKey) -> PeerResult<SigningKey>;

    async fn trp_inquiry(&self, inquiry: &Inquiry) -> PeerResult<Resolution>;

    async fn close(&self) -> PeerResult<()> {
        Ok(())
    }
}

/// Dials remote nodes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, info: &PeerInfo) -> PeerResult<Arc<dyn PeerClient>>;
}

// =============================================================================
// Peer
// =============================================================================

pub struct Peer {
    info: PeerInfo,
    connector: Arc<dyn Connector>,
    client: OnceCell<Arc<dyn PeerClient>>,
    transfer_timeout: Duration,
    exchange_timeout: Duration,
}

impl Peer {
    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    pub fn common_name(&self) -> &str {
        &self.info.common_name
    }

    async fn client(&self) -> PeerResult<&Arc<dyn PeerClient>> {
        self.client
            .get_or_try_init(|| async {
                debug!(common_name = %self.info.common_name, endpoint = %self.info.endpoint, "Connecting to peer");
                self.connector.connect(&self.info).await
            })
            .await
    }

    async fn deadline<T>(
        &self,
        operation: &'static str,
        limit: Duration,
        call: impl Future<Output = PeerResult<T>>,
    ) -> PeerResult<T> {
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| PeerError::Timeout(operation))?
    }

    pub async fn transfer(&self, envelope: SecureEnvelope) -> PeerResult<SecureEnvelope> {
        let client = self.client().await?;
        self.deadline("transfer", self.transfer_timeout, client.transfer(envelope))
            .await
    }

    pub async fn key_exchange(&self, key: SigningKey) -> PeerResult<SigningKey> {
        let client = self.client().await?;
        self.deadline("key exchange", self.exchange_timeout, client.key_exchange(key))
            .await
    }

    pub async fn trp_inquiry(&self, inquiry: &Inquiry) -> PeerResult<Resolution> {
        let client = self.client().await?;
        self.deadline("trp inquiry", self.transfer_timeout, client.trp_inquiry(inquiry))
            .await
    }

    pub async fn close(&self) -> PeerResult<()> {
        match self.client.get() {
            Some(client) => client.close().await,
            None => Ok(()),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

pub struct Peers {
    peers: RwLock<HashMap<String, Arc<Peer>>>,
    connector: Arc<dyn Connector>,
    transfer_timeout: Duration,
    exchange_timeout: Duration,
}

impl Peers {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            connector,
            transfer_timeout: TRANSFER_TIMEOUT,
            exchange_timeout: KEY_EXCHANGE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, transfer: Duration, exchange: Duration) -> Self {
        self.transfer_timeout = transfer;
        self.exchange_timeout = exchange;
        self
    }

    fn build(&self, info: PeerInfo) -> Arc<Peer> {
        Arc::new(Peer {
            info,
            connector: Arc::clone(&self.connector),
            client: OnceCell::new(),
            transfer_timeout: self.transfer_timeout,
            exchange_timeout: self.exchange_timeout,
        })
    }

    /// The peer for a common name. Unknown peers are created when an endpoint
    /// is given; a different endpoint replaces the registered peer.
    pub fn lookup(&self, common_name: &str, endpoint: Option<&str>) -> PeerResult<Arc<Peer>> {
        if common_name.is_empty() {
            return Err(PeerError::NoCommonName);
        }
        let endpoint = endpoint.filter(|ep| !ep.is_empty());

        if let Some(peer) = self.peers.read().get(common_name) {
            if endpoint.is_none_or(|ep| ep == peer.info.endpoint) {
                return Ok(Arc::clone(peer));
            }
        }

        let Some(endpoint) = endpoint else {
            return Err(PeerError::UnknownPeer(common_name.to_string()));
        };
        self.add(PeerInfo::new(common_name, endpoint))
    }

    /// Register a peer from directory details.
    pub fn add(&self, info: PeerInfo) -> PeerResult<Arc<Peer>> {
        info.validate()?;

        // Creation happens under the write lock so racing callers share one peer.
        let mut peers = self.peers.write();
        if let Some(peer) = peers.get(&info.common_name) {
            if peer.info.endpoint == info.endpoint {
                return Ok(Arc::clone(peer));
            }
            info!(common_name = %info.common_name, endpoint = %info.endpoint, "Peer endpoint changed");
        }

        let peer = self.build(info);
        peers.insert(peer.info.common_name.clone(), Arc::clone(&peer));
        Ok(peer)
    }

    /// Register a peer that connected to this node. A peer we already know
    /// keeps the endpoint it was registered with.
    pub fn observe(&self, info: PeerInfo) -> PeerResult<Arc<Peer>> {
        info.validate()?;

        let mut peers = self.peers.write();
        if let Some(peer) = peers.get(&info.common_name) {
            if peer.info.endpoint != info.endpoint {
                debug!(
                    common_name = %info.common_name,
                    known = %peer.info.endpoint,
                    announced = %info.endpoint,
                    "Keeping known endpoint for incoming peer"
                );
            }
            return Ok(Arc::clone(peer));
        }

        let peer = self.build(info);
        peers.insert(peer.info.common_name.clone(), Arc::clone(&peer));
        Ok(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Close every peer, joining the errors.
    pub async fn close(&self) -> PeerResult<()> {
        let peers: Vec<Arc<Peer>> = self.peers.write().drain().map(|(_, peer)| peer).collect();

        let mut errors = Vec::new();
        for peer in peers {
            if let Err(e) = peer.close().await {
                warn!(common_name = %peer.common_name(), error = %e, "Could not close peer");
                errors.push(format!("{}: {e}", peer.common_name()));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PeerError::Close(errors))
        }
    }
}

// =============================================================================
// Key Exchange
// =============================================================================

/// Swap public keys with a peer and cache theirs. A zero TTL uses the key
/// chain's cache duration.
pub async fn exchange_keys(peer: &Peer, keychain: &KeyChain, ttl: Duration) -> PeerResult<PublicKey> {
    let local = keychain.exchange_key(peer.common_name())?;
    let reply = peer.key_exchange(SigningKey::from(&local)).await?;
    let remote = reply.public_key()?;

    keychain.cache(peer.common_name(), Key::Public(remote.clone()), ttl)?;
    info!(
        common_name = %peer.common_name(),
        signature = %remote.public_key_signature(),
        "Exchanged keys with peer"
    );
    Ok(remote)
}

/// The cached sealing key for a peer, exchanging keys on a miss.
pub async fn sealing_key(peer: &Peer, keychain: &KeyChain, ttl: Duration) -> PeerResult<PublicKey> {
    match keychain.sealing_key(peer.common_name(), "") {
        Ok(key) => Ok(key),
        Err(e) if e.needs_exchange() => {
            debug!(common_name = %peer.common_name(), reason = %e, "No cached sealing key");
            exchange_keys(peer, keychain, ttl).await
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::mock::{MockConnector, MockPeer};
    use super::*;
    use crate::keychain::StoreOptions;
    use crate::keys::fixtures;

    const REMOTE: &str = "beneficiary.example.com";

    fn registry() -> (Arc<MockConnector>, Arc<MockPeer>, Peers) {
        let connector = Arc::new(MockConnector::new());
        let remote = MockPeer::new();
        connector.register(REMOTE, Arc::clone(&remote));
        let peers = Peers::new(connector.clone());
        (connector, remote, peers)
    }

    fn keychain() -> KeyChain {
        let keychain = KeyChain::new();
        keychain
            .store(
                Key::Certificate(fixtures::local()),
                StoreOptions {
                    is_default: true,
                    ..Default::default()
                },
            )
            .unwrap();
        keychain
    }

    #[test]
    fn lookup_requires_endpoint_for_new_peers() {
        let (_, _, peers) = registry();
        assert!(matches!(peers.lookup("", None), Err(PeerError::NoCommonName)));
        assert!(matches!(peers.lookup(REMOTE, None), Err(PeerError::UnknownPeer(_))));

        let first = peers.lookup(REMOTE, Some("beneficiary.example.com:443")).unwrap();
        let again = peers.lookup(REMOTE, None).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(peers.len(), 1);

        let moved = peers.lookup(REMOTE, Some("beneficiary.example.com:8443")).unwrap();
        assert!(!Arc::ptr_eq(&first, &moved));
        assert_eq!(moved.info().endpoint, "beneficiary.example.com:8443");
    }

    #[test]
    fn incoming_peers_keep_known_endpoint() {
        let (_, _, peers) = registry();
        let known = peers.lookup(REMOTE, Some("beneficiary.example.com:443")).unwrap();

        let seen = peers
            .observe(PeerInfo::new(REMOTE, "attacker.example.net:443"))
            .unwrap();
        assert!(Arc::ptr_eq(&known, &seen));
        assert_eq!(seen.info().endpoint, "beneficiary.example.com:443");

        let fresh = peers
            .observe(PeerInfo::new("other.example.com", "other.example.com:443"))
            .unwrap();
        assert_eq!(fresh.info().endpoint, "other.example.com:443");
        assert_eq!(peers.len(), 2);
    }

    #[tokio::test]
    async fn client_is_connected_once() {
        let (connector, _, peers) = registry();
        let peer = peers.lookup(REMOTE, Some("beneficiary.example.com:443")).unwrap();

        let keychain = keychain();
        sealing_key(&peer, &keychain, Duration::ZERO).await.unwrap();
        peer.trp_inquiry(&Inquiry::default()).await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn key_exchange_caches_remote_key() {
        let (_, remote, peers) = registry();
        let peer = peers.lookup(REMOTE, Some("beneficiary.example.com:443")).unwrap();
        let keychain = keychain();

        assert_eq!(keychain.sealing_key(REMOTE, "").unwrap_err(), KeyError::KeyNotMatched);
        let key = sealing_key(&peer, &keychain, Duration::ZERO).await.unwrap();
        assert_eq!(key.public_key_signature(), fixtures::remote().public_key_signature());
        assert_eq!(remote.exchanges(), 1);

        // Cached now, no second exchange.
        sealing_key(&peer, &keychain, Duration::ZERO).await.unwrap();
        assert_eq!(remote.exchanges(), 1);
        assert_eq!(
            remote.learned_key().map(|k| k.public_key_signature().to_string()),
            Some(fixtures::local().public_key_signature().to_string())
        );
    }

    #[tokio::test]
    async fn slow_peers_time_out() {
        let (_, remote, peers) = registry();
        let peers = peers.with_timeouts(Duration::from_millis(20), Duration::from_millis(20));
        let peer = peers.lookup(REMOTE, Some("beneficiary.example.com:443")).unwrap();
        remote.set_delay(Duration::from_millis(200));

        let err = peer.key_exchange(SigningKey::from(fixtures::local().public_key())).await.unwrap_err();
        assert!(matches!(err, PeerError::Timeout("key exchange")));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_peer_fails_to_connect() {
        let (_, _, peers) = registry();
        let peer = peers.lookup("nowhere.example.com", Some("nowhere.example.com:443")).unwrap();
        let err = peer.transfer(SecureEnvelope::default()).await.unwrap_err();
        assert!(matches!(err, PeerError::Transport(_)));
    }

    #[tokio::test]
    async fn close_joins_errors() {
        let (connector, remote, peers) = registry();
        let other = MockPeer::new();
        connector.register("other.example.com", Arc::clone(&other));

        for (cn, ep) in [(REMOTE, "beneficiary.example.com:443"), ("other.example.com", "other.example.com:443")] {
            let peer = peers.lookup(cn, Some(ep)).unwrap();
            peer.trp_inquiry(&Inquiry::default()).await.unwrap();
        }
        remote.fail_close();
        other.fail_close();

        match peers.close().await {
            Err(PeerError::Close(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected joined close errors, got {other:?}"),
        }
        assert!(peers.is_empty());
    }

    #[test]
    fn signing_key_checks_signature() {
        let key = fixtures::remote();
        let mut exchanged = SigningKey::from(key.public_key());
        assert_eq!(exchanged.public_key().unwrap(), *key.public_key());

        exchanged.signature = fixtures::other().public_key_signature().to_string();
        assert!(exchanged.public_key().is_err());
    }
}
