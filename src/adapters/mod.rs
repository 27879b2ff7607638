// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Protocol Adapters
//!
//! Transport for packets. Each adapter moves the outgoing envelope to the
//! counterparty and binds what comes back, or answers a request received
//! from a counterparty:
//!
//! | Protocol | Send                         | Receive                        |
//! |----------|------------------------------|--------------------------------|
//! | TRISA    | seal, transfer, open reply   | open, reply `pending`, seal    |
//! | TRP      | post inquiry, bind resolution| resolve inquiry                |
//! | Sunrise  | email verification links     | verify token, accept / reject  |
//!
//! Adapters never commit on behalf of the send orchestrator; receive paths
//! own their prepared transaction and commit it themselves.

pub mod sunrise;
pub mod trisa;
pub mod trp;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::emails::{Backoff, EmailSender};
use crate::envelope::{Rejection, TransferState};
use crate::keychain::{KeyChain, KeyError, StoreOptions};
use crate::keys::{Key, KeyPair, PublicKey};
use crate::peers::{PeerError, PeerInfo, Peers};
use crate::postman::PostmanError;
use crate::resolver::{ResolveError, Resolver};
use crate::store::{Status, Store, StoreError};
use crate::sunrise::TokenError;
use crate::trp::TrpError;

/// Key chain name routing the storage key of Sunrise envelopes. Without a
/// key stored under it Sunrise envelopes use the default storage key.
pub const SUNRISE_KEY_NAME: &str = "sunrise";

/// Store a key pair reserved for Sunrise envelopes.
pub fn store_sunrise_key(keychain: &KeyChain, key: KeyPair) -> Result<(), KeyError> {
    keychain.store(
        Key::from(key),
        StoreOptions {
            counterparties: vec![SUNRISE_KEY_NAME.to_string()],
            ..Default::default()
        },
    )
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Postman(#[from] PostmanError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Trp(#[from] TrpError),

    #[error("invalid verification token: {0}")]
    Token(#[from] TokenError),

    #[error("received a rejection for unknown transfer {0}")]
    UnknownTransfer(uuid::Uuid),

    #[error("sunrise is not enabled on this node")]
    SunriseDisabled,

    #[error("verification token has expired")]
    Expired,

    #[error("transfer has already been reviewed (status {0})")]
    AlreadyReviewed(Status),

    #[error("transfer {0} is {1} and takes no further messages")]
    Concluded(uuid::Uuid, Status),

    /// The authenticated sender is not the counterparty of the transfer.
    #[error("sender is not the counterparty of this transfer: {0}")]
    PeerMismatch(String),
}

impl AdapterError {
    /// Failures on the way to the counterparty that may succeed later.
    pub fn is_transport(&self) -> bool {
        match self {
            AdapterError::Peer(e) => e.is_retryable(),
            AdapterError::Postman(PostmanError::Email(e)) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

// =============================================================================
// Node
// =============================================================================

/// Settings the adapters read; loaded once from the configuration.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Common name of this node on the TRISA network.
    pub common_name: String,
    /// Endpoint counterparties dial this node on.
    pub endpoint: String,
    pub organization: String,
    pub sunrise_enabled: bool,
    /// Base URL of the links in Sunrise emails.
    pub sunrise_url: String,
    /// Lifetime of sealing keys learned in a key exchange.
    pub key_ttl: Duration,
    pub email_backoff: Backoff,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            common_name: "localhost".to_string(),
            endpoint: "localhost:8080".to_string(),
            organization: "Envoy Node".to_string(),
            sunrise_enabled: true,
            sunrise_url: "http://localhost:8080".to_string(),
            key_ttl: crate::keychain::DEFAULT_CACHE_DURATION,
            email_backoff: Backoff::default(),
        }
    }
}

impl NodeSettings {
    /// URL counterparties post TRP resolutions to.
    pub fn trp_callback(&self) -> String {
        format!("https://{}/trp/resolve", self.endpoint.trim_end_matches('/'))
    }
}

/// Everything a transfer step needs besides the packet itself.
pub struct Node {
    pub store: Arc<Store>,
    pub keychain: Arc<KeyChain>,
    pub peers: Arc<Peers>,
    pub resolver: Arc<Resolver>,
    pub email: Arc<dyn EmailSender>,
    pub settings: NodeSettings,
    /// Fires on shutdown; long running sends stop between steps.
    pub shutdown: CancellationToken,
}

impl Node {
    /// Local key envelopes are resealed under at rest. An unknown signature
    /// falls back to the default key.
    pub fn storage_key(&self, signature: &str, common_name: &str) -> AdapterResult<PublicKey> {
        match self.keychain.storage_key(signature, common_name) {
            Ok(key) => Ok(key),
            Err(e) if !signature.is_empty() => {
                warn!(signature, common_name, error = %e, "Unknown storage key, using default key");
                Ok(self.keychain.storage_key("", common_name)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Peer details this node hands out.
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            name: self.settings.organization.clone(),
            ..PeerInfo::new(&self.settings.common_name, &self.settings.endpoint)
        }
    }
}

/// Transfer state of a reply carrying `rejection`: the counterparty may
/// repair and resend when the rejection allows a retry.
pub fn rejection_state(rejection: &Rejection) -> TransferState {
    if rejection.retry {
        TransferState::Repair
    } else {
        TransferState::Rejected
    }
}
