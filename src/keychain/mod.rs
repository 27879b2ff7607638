// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Chain
//!
//! Routes every key the pipeline needs:
//!
//! - **internal** store: local key pairs used to unseal incoming envelopes,
//!   to reseal envelopes for storage and to answer key exchanges.
//! - **external** store: public keys cached from counterparty key exchanges,
//!   used to seal outgoing envelopes.
//!
//! Common names are routed to public key signatures through a per-source
//! names map. A supplied signature always wins over a common name. External
//! keys always carry a TTL; internal keys expire only when a TTL is set and
//! they are not the default key.

pub mod error;
pub mod store;

pub use error::{KeyError, KeyResult};
pub use store::{KeyStore, MemKeyStore};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::keys::{Key, KeyPair, PublicKey};

/// Default lifetime of a cached counterparty key.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default interval of the expired key janitor.
pub const DEFAULT_JANITOR_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Which side of the chain a lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Unknown,
    Internal,
    External,
}

/// How a stored local key pair is used.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub is_default: bool,
    pub counterparties: Vec<String>,
    pub expires_on: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Routing {
    internal_names: HashMap<String, String>,
    external_names: HashMap<String, String>,
    default_key: Option<String>,
    ttl: HashMap<String, DateTime<Utc>>,
}

impl Routing {
    fn names(&self, source: Source) -> Option<&HashMap<String, String>> {
        match source {
            Source::Internal => Some(&self.internal_names),
            Source::External => Some(&self.external_names),
            Source::Unknown => None,
        }
    }

    fn lookup(&self, common_name: &str, source: Source) -> KeyResult<String> {
        let names = self.names(source).ok_or(KeyError::InvalidSource)?;

        if !common_name.is_empty() {
            if let Some(signature) = names.get(common_name).filter(|sig| !sig.is_empty()) {
                return Ok(signature.clone());
            }
        }

        match source {
            Source::Internal => self.default_key.clone().ok_or(KeyError::NoDefaultKeys),
            Source::External => Err(KeyError::KeyNotMatched),
            Source::Unknown => Err(KeyError::InvalidSource),
        }
    }

    /// Internal keys expire only with an explicit TTL and when not default.
    fn check_internal_ttl(&self, signature: &str, now: DateTime<Utc>) -> KeyResult<()> {
        if self.default_key.as_deref() == Some(signature) {
            return Ok(());
        }
        match self.ttl.get(signature) {
            Some(expires) if now > *expires => Err(KeyError::KeyExpired),
            _ => Ok(()),
        }
    }

    fn resolve_internal(&self, signature: &str, common_name: &str) -> KeyResult<String> {
        let signature = if signature.is_empty() {
            self.lookup(common_name, Source::Internal)?
        } else {
            signature.to_string()
        };
        if signature.is_empty() {
            return Err(KeyError::KeyNotFound);
        }
        self.check_internal_ttl(&signature, Utc::now())?;
        Ok(signature)
    }
}

fn expires_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The node's key chain.
pub struct KeyChain {
    routing: RwLock<Routing>,
    internal: Box<dyn KeyStore>,
    external: Box<dyn KeyStore>,
    cache_duration: Duration,
}

impl Default for KeyChain {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyChain {
    /// A key chain over in-memory stores.
    pub fn new() -> Self {
        Self::with_stores(Box::new(MemKeyStore::new()), Box::new(MemKeyStore::new()))
    }

    pub fn with_stores(internal: Box<dyn KeyStore>, external: Box<dyn KeyStore>) -> Self {
        Self {
            routing: RwLock::new(Routing::default()),
            internal,
            external,
            cache_duration: DEFAULT_CACHE_DURATION,
        }
    }

    pub fn with_cache_duration(mut self, duration: Duration) -> Self {
        if !duration.is_zero() {
            self.cache_duration = duration;
        }
        self
    }

    pub fn cache_duration(&self) -> Duration {
        self.cache_duration
    }

    // -------------------------------------------------------------------------
    // External (counterparty) keys
    // -------------------------------------------------------------------------

    /// Public key for sealing envelopes to a counterparty.
    pub fn sealing_key(&self, common_name: &str, signature: &str) -> KeyResult<PublicKey> {
        let routing = self.routing.read();

        let signature = if signature.is_empty() {
            routing.lookup(common_name, Source::External)?
        } else {
            signature.to_string()
        };

        // Expiry is reported as a miss so callers re-exchange keys.
        match routing.ttl.get(&signature) {
            Some(expires) if Utc::now() < *expires => {}
            _ => return Err(KeyError::KeyNotFound),
        }

        let (key, _) = self.external.get(&signature)?;
        Ok(key.sealing_key().clone())
    }

    /// Public key for verifying a counterparty signature.
    pub fn verification_key(&self, signature: &str) -> KeyResult<PublicKey> {
        self.sealing_key("", signature)
    }

    /// Cache a counterparty public key received from a key exchange. A zero
    /// TTL uses the configured cache duration.
    pub fn cache(&self, common_name: &str, key: Key, ttl: Duration) -> KeyResult<()> {
        if key.is_private() {
            return Err(KeyError::NoCachePrivateKeys);
        }

        let signature = key.public_key_signature().to_string();
        let ttl = if ttl.is_zero() { self.cache_duration } else { ttl };
        let expires = expires_after(Utc::now(), ttl);

        let mut routing = self.routing.write();
        self.external.put(key)?;
        routing.ttl.insert(signature.clone(), expires);
        let previous = routing
            .external_names
            .insert(common_name.to_string(), signature.clone());

        // A replaced key stays only while another name still routes to it.
        if let Some(previous) = previous.filter(|prev| *prev != signature) {
            if !routing.external_names.values().any(|sig| *sig == previous) {
                self.external.delete(&previous)?;
                routing.ttl.remove(&previous);
            }
        }

        tracing::debug!(common_name, %expires, "Cached counterparty sealing key");
        Ok(())
    }

    /// Drop every cached counterparty key.
    pub fn clear_cache(&self) -> KeyResult<()> {
        let mut routing = self.routing.write();
        for signature in routing.external_names.values() {
            self.external.delete(signature)?;
        }
        let external: Vec<String> = routing.external_names.values().cloned().collect();
        for signature in external {
            routing.ttl.remove(&signature);
        }
        Ok(())
    }

    /// Remove expired counterparty keys, returning how many were evicted.
    /// Names are kept so a later lookup still reports a cache miss.
    pub fn evict_expired(&self) -> KeyResult<usize> {
        let now = Utc::now();
        let mut routing = self.routing.write();

        let expired: Vec<String> = routing
            .external_names
            .values()
            .filter(|sig| routing.ttl.get(*sig).map_or(true, |expires| now >= *expires))
            .cloned()
            .collect();

        for signature in &expired {
            self.external.delete(signature)?;
            routing.ttl.remove(signature);
        }
        Ok(expired.len())
    }

    /// Periodically evict expired counterparty keys until shutdown.
    pub async fn run_janitor(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        tracing::info!(interval_secs = interval.as_secs(), "Key cache janitor starting");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {},
                _ = shutdown.cancelled() => {
                    tracing::info!("Key cache janitor shutting down");
                    return;
                }
            }

            match self.evict_expired() {
                Ok(0) => {}
                Ok(evicted) => tracing::debug!(evicted, "Evicted expired sealing keys"),
                Err(e) => tracing::warn!(error = %e, "Key cache eviction failed"),
            }
        }
    }

    // -------------------------------------------------------------------------
    // Internal (local) keys
    // -------------------------------------------------------------------------

    /// Private key for unsealing an envelope, by signature or common name,
    /// falling back to the default key.
    pub fn unsealing_key(&self, signature: &str, common_name: &str) -> KeyResult<KeyPair> {
        let routing = self.routing.read();
        let signature = routing.resolve_internal(signature, common_name)?;
        let (key, _) = self.internal.get(&signature)?;
        key.unsealing_key().cloned().ok_or(KeyError::KeyNotFound)
    }

    /// Local public key used to reseal envelopes at rest.
    pub fn storage_key(&self, signature: &str, common_name: &str) -> KeyResult<PublicKey> {
        let routing = self.routing.read();
        let signature = routing.resolve_internal(signature, common_name)?;
        let (key, _) = self.internal.get(&signature)?;
        Ok(key.sealing_key().clone())
    }

    /// Local public key handed to a counterparty during key exchange.
    pub fn exchange_key(&self, common_name: &str) -> KeyResult<PublicKey> {
        let routing = self.routing.read();
        let signature = routing.lookup(common_name, Source::Internal)?;
        if signature.is_empty() {
            return Err(KeyError::NoDefaultKeys);
        }
        routing.check_internal_ttl(&signature, Utc::now())?;
        let (key, _) = self.internal.get(&signature)?;
        Ok(key.sealing_key().clone())
    }

    /// The default local key pair.
    pub fn signing_key(&self) -> KeyResult<KeyPair> {
        self.unsealing_key("", "")
    }

    /// Store a local key pair.
    pub fn store(&self, key: Key, opts: StoreOptions) -> KeyResult<()> {
        if !key.is_private() {
            return Err(KeyError::NoStorePublicKeys);
        }

        let signature = key.public_key_signature().to_string();
        let mut routing = self.routing.write();
        self.internal.put(key)?;

        if opts.is_default {
            routing.default_key = Some(signature.clone());
        }
        for common_name in opts.counterparties {
            routing.internal_names.insert(common_name, signature.clone());
        }
        if let Some(expires) = opts.expires_on {
            routing.ttl.insert(signature.clone(), expires);
        }

        tracing::info!(signature = %signature, default = opts.is_default, "Stored local key pair");
        Ok(())
    }

    /// Signature routed for a common name.
    pub fn lookup(&self, common_name: &str, source: Source) -> KeyResult<String> {
        self.routing.read().lookup(common_name, source)
    }

    pub fn default_signature(&self) -> Option<String> {
        self.routing.read().default_key.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::fixtures;

    fn chain() -> KeyChain {
        let chain = KeyChain::new();
        chain
            .store(
                Key::from(fixtures::local()),
                StoreOptions {
                    is_default: true,
                    ..Default::default()
                },
            )
            .unwrap();
        chain
    }

    #[test]
    fn empty_chain_has_no_defaults() {
        let chain = KeyChain::new();
        assert_eq!(chain.signing_key().unwrap_err(), KeyError::NoDefaultKeys);
        assert_eq!(chain.exchange_key("alice").unwrap_err(), KeyError::NoDefaultKeys);
        assert_eq!(
            chain.sealing_key("alice", "").unwrap_err(),
            KeyError::KeyNotMatched
        );
        assert_eq!(
            chain.lookup("alice", Source::Unknown).unwrap_err(),
            KeyError::InvalidSource
        );
    }

    #[test]
    fn internal_lookup_falls_back_to_default() {
        let chain = chain();
        let local = fixtures::local();

        let unsealing = chain.unsealing_key("", "unknown.example").unwrap();
        assert_eq!(unsealing.public_key_signature(), local.public_key_signature());
        assert_eq!(
            chain.storage_key("", "").unwrap().public_key_signature(),
            local.public_key_signature()
        );
        assert_eq!(
            chain.exchange_key("bob").unwrap().public_key_signature(),
            local.public_key_signature()
        );
        assert_eq!(chain.unsealing_key("SHA256:missing", "").unwrap_err(), KeyError::KeyNotFound);
    }

    #[test]
    fn store_and_cache_refuse_wrong_key_kinds() {
        let chain = KeyChain::new();
        let pair = fixtures::local();
        assert_eq!(
            chain.cache("bob", Key::from(pair.clone()), Duration::ZERO),
            Err(KeyError::NoCachePrivateKeys)
        );
        assert_eq!(
            chain.store(Key::from(pair.public_key().clone()), StoreOptions::default()),
            Err(KeyError::NoStorePublicKeys)
        );
    }

    #[test]
    fn cached_key_expires_as_not_found() {
        let chain = chain();
        let remote = fixtures::remote();
        chain
            .cache("bob", Key::from(remote.public_key().clone()), Duration::from_millis(50))
            .unwrap();

        let key = chain.sealing_key("bob", "").unwrap();
        assert_eq!(key, *remote.public_key());
        assert_eq!(
            chain.verification_key(remote.public_key_signature()).unwrap(),
            *remote.public_key()
        );

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(chain.sealing_key("bob", "").unwrap_err(), KeyError::KeyNotFound);
        assert_eq!(chain.evict_expired().unwrap(), 1);
        assert_eq!(chain.sealing_key("bob", "").unwrap_err(), KeyError::KeyNotFound);
    }

    #[test]
    fn recaching_a_name_drops_the_replaced_key() {
        let chain = chain();
        let remote = fixtures::remote();
        let other = fixtures::other();
        chain
            .cache("bob", Key::from(remote.public_key().clone()), Duration::ZERO)
            .unwrap();
        chain
            .cache("bob", Key::from(other.public_key().clone()), Duration::ZERO)
            .unwrap();

        assert_eq!(chain.sealing_key("bob", "").unwrap(), *other.public_key());
        assert_eq!(
            chain.verification_key(remote.public_key_signature()).unwrap_err(),
            KeyError::KeyNotFound
        );
        assert!(!chain.routing.read().ttl.contains_key(remote.public_key_signature()));
        assert!(chain.external.get(remote.public_key_signature()).is_err());

        // A key still routed from another name is kept.
        chain
            .cache("carol", Key::from(other.public_key().clone()), Duration::ZERO)
            .unwrap();
        chain
            .cache("bob", Key::from(remote.public_key().clone()), Duration::ZERO)
            .unwrap();
        assert_eq!(chain.sealing_key("carol", "").unwrap(), *other.public_key());
        assert_eq!(chain.sealing_key("bob", "").unwrap(), *remote.public_key());
    }

    #[test]
    fn signature_wins_over_common_name() {
        let chain = chain();
        let remote = fixtures::remote();
        let other = fixtures::other();
        chain
            .cache("bob", Key::from(remote.public_key().clone()), Duration::ZERO)
            .unwrap();
        chain
            .cache("carol", Key::from(other.public_key().clone()), Duration::ZERO)
            .unwrap();

        let key = chain
            .sealing_key("bob", other.public_key_signature())
            .unwrap();
        assert_eq!(key, *other.public_key());

        // Unknown names are never consulted when a signature is given.
        let key = chain
            .sealing_key("nobody", remote.public_key_signature())
            .unwrap();
        assert_eq!(key, *remote.public_key());
    }

    #[test]
    fn internal_ttl_only_applies_to_non_default_keys() {
        let chain = chain();
        let expired = Utc::now() - TimeDelta::seconds(1);
        let other = fixtures::other();
        chain
            .store(
                Key::from(other.clone()),
                StoreOptions {
                    counterparties: vec!["carol".to_string()],
                    expires_on: Some(expired),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(chain.unsealing_key("", "carol").unwrap_err(), KeyError::KeyExpired);
        assert_eq!(chain.exchange_key("carol").unwrap_err(), KeyError::KeyExpired);

        // Promoting it to default ignores the TTL.
        chain
            .store(
                Key::from(other.clone()),
                StoreOptions {
                    is_default: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            chain.signing_key().unwrap().public_key_signature(),
            other.public_key_signature()
        );
    }

    #[test]
    fn clear_cache_forgets_counterparty_keys() {
        let chain = chain();
        let remote = fixtures::remote();
        chain
            .cache("bob", Key::from(remote.public_key().clone()), Duration::ZERO)
            .unwrap();
        chain.clear_cache().unwrap();
        assert_eq!(chain.sealing_key("bob", "").unwrap_err(), KeyError::KeyNotFound);
    }

    #[tokio::test]
    async fn janitor_stops_on_shutdown() {
        let chain = Arc::new(chain());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            chain
                .clone()
                .run_janitor(Duration::from_millis(10), shutdown.clone()),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.cancel();
        handle.await.unwrap();
    }
}
