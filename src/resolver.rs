// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Counterparty Resolver
//!
//! Turns a routing hint into exactly one counterparty. Hints are tried in
//! order: counterparty id, travel address (hostname, then `host:port`), and
//! for Sunrise a get-or-create by email and name. Incoming TRP inquiries are
//! matched by client certificate names or by their callback URL.
//!
//! Common name lookups are cached as name → id in a small LRU; the record
//! itself is always read fresh from the store.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use url::Url;
use utoipa::ToSchema;

use crate::store::counterparties::parse_email;
use crate::store::{Counterparty, Protocol, Store, StoreError};
use crate::traddr::{self, TravelAddressError};

/// Default number of cached common names.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Default lifetime of a cached common name.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

// =============================================================================
// Error Type
// =============================================================================

/// A single invalid routing field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid routing: {}", join(.0))]
    Validation(Vec<FieldError>),

    #[error("could not identify counterparty from {0}")]
    NotFound(String),

    #[error("counterparty supports {found} not {expected}")]
    ProtocolMismatch { expected: Protocol, found: Protocol },

    #[error("could not parse travel address: {0}")]
    TravelAddress(#[from] TravelAddressError),

    #[error("store error: {0}")]
    Store(StoreError),
}

fn join(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ResolveError {
    fn from_store(err: StoreError, what: impl Into<String>) -> Self {
        match err {
            StoreError::NotFound(_) => ResolveError::NotFound(what.into()),
            other => ResolveError::Store(other),
        }
    }
}

pub type ResolveResult<T> = Result<T, ResolveError>;

// =============================================================================
// Routing Hints
// =============================================================================

/// Where to send a transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Routing {
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub counterparty_id: Option<Ulid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travel_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    /// Counterparty name, used by Sunrise to find or create the organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Routing {
    /// Check every field and report all problems at once.
    pub fn validate(&self) -> ResolveResult<Protocol> {
        let mut errors = Vec::new();
        let mut fail = |field, message: &str| {
            errors.push(FieldError {
                field,
                message: message.to_string(),
            })
        };

        let protocol = if self.protocol.trim().is_empty() {
            fail("protocol", "protocol is required");
            None
        } else {
            match self.protocol.parse::<Protocol>() {
                Ok(protocol) => Some(protocol),
                Err(_) => {
                    fail("protocol", "protocol must be trisa, trp or sunrise");
                    None
                }
            }
        };

        let travel_address = present(&self.travel_address);
        let email = present(&self.email_address);

        if let Some(address) = travel_address {
            if traddr::decode(address).is_err() {
                fail("travel_address", "could not decode travel address");
            }
        }
        if let Some(email) = email {
            if parse_email(email).is_err() {
                fail("email_address", "could not parse email address");
            }
        }

        match protocol {
            Some(Protocol::Trisa | Protocol::Trp) => {
                if self.counterparty_id.is_none() && travel_address.is_none() {
                    fail("travel_address", "travel address or counterparty id is required");
                }
                if email.is_some() {
                    fail("email_address", "email address is only used by sunrise");
                }
            }
            Some(Protocol::Sunrise) => {
                if self.counterparty_id.is_none() && email.is_none() {
                    fail("email_address", "email address or counterparty id is required");
                }
                if travel_address.is_some() {
                    fail("travel_address", "travel address is not used by sunrise");
                }
            }
            None => {}
        }

        match protocol {
            Some(protocol) if errors.is_empty() => Ok(protocol),
            _ => Err(ResolveError::Validation(errors)),
        }
    }
}

/// Names presented by a verified client certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerCertificate {
    pub common_name: String,
    pub dns_names: Vec<String>,
}

impl PeerCertificate {
    /// Subject common name followed by the DNS subject alternative names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.common_name.as_str())
            .chain(self.dns_names.iter().map(String::as_str))
            .filter(|name| !name.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.names().next().is_none()
    }

    /// Whether the certificate was issued for `host`. A leading `*.` name
    /// covers exactly one extra label.
    pub fn covers(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.names().any(|name| {
            let name = name.trim_end_matches('.').to_ascii_lowercase();
            match name.strip_prefix("*.") {
                Some(suffix) => host
                    .split_once('.')
                    .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
                None => name == host,
            }
        })
    }
}

/// Fail unless the counterparty speaks `expected`.
pub fn expect_protocol(counterparty: Counterparty, expected: Protocol) -> ResolveResult<Counterparty> {
    if counterparty.protocol != expected {
        return Err(ResolveError::ProtocolMismatch {
            expected,
            found: counterparty.protocol,
        });
    }
    Ok(counterparty)
}

// =============================================================================
// Resolver
// =============================================================================

struct CachedId {
    id: Ulid,
    inserted_at: Instant,
}

pub struct Resolver {
    store: Arc<Store>,
    cache: Mutex<LruCache<String, CachedId>>,
    ttl: Duration,
}

impl Resolver {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_cache(store, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    pub fn with_cache(store: Arc<Store>, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Resolve a routing hint and check the counterparty speaks its protocol.
    pub fn resolve(&self, routing: &Routing) -> ResolveResult<Counterparty> {
        let protocol = routing.validate()?;

        let counterparty = if let Some(id) = routing.counterparty_id {
            self.store
                .retrieve_counterparty(id)
                .map_err(|e| ResolveError::from_store(e, format!("counterparty id {id}")))?
        } else {
            match protocol {
                Protocol::Trisa | Protocol::Trp => {
                    let address = present(&routing.travel_address).unwrap_or_default();
                    self.from_travel_address(address)?
                }
                Protocol::Sunrise => {
                    let email = present(&routing.email_address).unwrap_or_default();
                    let name = present(&routing.counterparty).unwrap_or_default();
                    self.store
                        .get_or_create_sunrise_counterparty(email, name)
                        .map_err(ResolveError::Store)?
                }
            }
        };

        expect_protocol(counterparty, protocol)
    }

    pub fn from_travel_address(&self, address: &str) -> ResolveResult<Counterparty> {
        let uri = traddr::decode(address)?;
        let url = traddr::parse(&uri)?;
        self.from_url(&url)
            .map_err(|e| match e {
                ResolveError::NotFound(_) => ResolveError::NotFound(format!("travel address {address}")),
                other => other,
            })
    }

    /// Look up by hostname, then by `host:port` for nodes told apart only by
    /// their port.
    fn from_url(&self, url: &Url) -> ResolveResult<Counterparty> {
        let hostname = url.host_str().unwrap_or_default();
        match self.by_common_name(hostname) {
            Err(ResolveError::NotFound(_)) => {
                let host = traddr::host_with_port(url);
                self.by_common_name(&host)
                    .map_err(|e| match e {
                        ResolveError::NotFound(_) => {
                            ResolveError::NotFound(format!("{hostname} or {host}"))
                        }
                        other => other,
                    })
            }
            result => result,
        }
    }

    /// Match an incoming TRP client by certificate common name, then by each
    /// DNS subject alternative name.
    pub fn resolve_certificate(&self, cert: &PeerCertificate) -> ResolveResult<Counterparty> {
        for name in cert.names() {
            match self.by_common_name(name) {
                Err(ResolveError::NotFound(_)) => continue,
                result => return result,
            }
        }
        Err(ResolveError::NotFound("client certificate".into()))
    }

    /// Match an incoming TRP inquiry by the host of its callback URL.
    pub fn resolve_callback(&self, callback: &str) -> ResolveResult<Counterparty> {
        let url = traddr::parse(callback)?;
        self.from_url(&url)
            .map_err(|e| match e {
                ResolveError::NotFound(_) => ResolveError::NotFound(format!("callback {callback}")),
                other => other,
            })
    }

    fn by_common_name(&self, name: &str) -> ResolveResult<Counterparty> {
        if name.is_empty() {
            return Err(ResolveError::NotFound("empty common name".into()));
        }

        let cached = {
            let mut cache = self.cache.lock();
            match cache.get(name) {
                Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.id),
                Some(_) => {
                    cache.pop(name);
                    None
                }
                None => None,
            }
        };

        if let Some(id) = cached {
            match self.store.retrieve_counterparty(id) {
                Ok(counterparty) if counterparty.common_name == name => return Ok(counterparty),
                Ok(_) | Err(StoreError::NotFound(_)) => self.invalidate(name),
                Err(e) => return Err(ResolveError::Store(e)),
            }
        }

        let counterparty = self
            .store
            .lookup_counterparty("common_name", name)
            .map_err(|e| ResolveError::from_store(e, format!("common name {name}")))?;
        if let Some(id) = counterparty.id {
            self.cache.lock().put(
                name.to_string(),
                CachedId {
                    id,
                    inserted_at: Instant::now(),
                },
            );
        }
        Ok(counterparty)
    }

    pub fn invalidate(&self, common_name: &str) {
        self.cache.lock().pop(common_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::temp_store;
    use crate::store::CounterpartySource;

    fn counterparty(common_name: &str, protocol: Protocol) -> Counterparty {
        Counterparty {
            source: CounterpartySource::User,
            protocol,
            common_name: common_name.to_string(),
            endpoint: format!("{common_name}:443"),
            name: common_name.to_string(),
            ..Default::default()
        }
    }

    fn trisa(address: &str) -> Routing {
        Routing {
            protocol: "trisa".to_string(),
            travel_address: Some(address.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn certificates_cover_their_names() {
        let cert = PeerCertificate {
            common_name: "trp.beneficiary.example.com".into(),
            dns_names: vec!["*.vasp.example.com".into()],
        };
        assert!(cert.covers("trp.beneficiary.example.com"));
        assert!(cert.covers("TRP.Beneficiary.example.com."));
        assert!(cert.covers("api.vasp.example.com"));
        assert!(!cert.covers("vasp.example.com"));
        assert!(!cert.covers("deep.api.vasp.example.com"));
        assert!(!cert.covers("originator.example.com"));
        assert!(PeerCertificate::default().is_empty());
    }

    #[test]
    fn validation_reports_every_field() {
        let routing = Routing {
            protocol: "trisa".to_string(),
            travel_address: Some("nonsense".to_string()),
            email_address: Some("barry".to_string()),
            ..Default::default()
        };
        match routing.validate() {
            Err(ResolveError::Validation(errors)) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
                assert_eq!(fields, ["travel_address", "email_address", "email_address"]);
            }
            other => panic!("expected validation errors, got {other:?}"),
        }

        assert!(matches!(Routing::default().validate(), Err(ResolveError::Validation(_))));
        let sunrise = Routing {
            protocol: "sunrise".to_string(),
            email_address: Some("barry@example.com".to_string()),
            ..Default::default()
        };
        assert_eq!(sunrise.validate().unwrap(), Protocol::Sunrise);
    }

    #[test]
    fn resolves_by_id_then_travel_address() {
        let (_dir, store) = temp_store();
        let created = store
            .create_counterparty(counterparty("beneficiary.example.com", Protocol::Trisa))
            .unwrap();
        let resolver = Resolver::new(store);

        let by_id = resolver
            .resolve(&Routing {
                protocol: "trisa".to_string(),
                counterparty_id: created.id,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_id.id, created.id);

        let address = traddr::encode("beneficiary.example.com:443/?t=i");
        let by_address = resolver.resolve(&trisa(&address)).unwrap();
        assert_eq!(by_address.id, created.id);

        let missing = traddr::encode("nobody.example.com/?t=i");
        assert!(matches!(resolver.resolve(&trisa(&missing)), Err(ResolveError::NotFound(_))));
    }

    #[test]
    fn falls_back_to_host_and_port() {
        let (_dir, store) = temp_store();
        let created = store
            .create_counterparty(counterparty("localhost:8100", Protocol::Trisa))
            .unwrap();
        let resolver = Resolver::new(store);

        let address = traddr::encode("localhost:8100/?t=i");
        assert_eq!(resolver.resolve(&trisa(&address)).unwrap().id, created.id);
    }

    #[test]
    fn protocol_must_match() {
        let (_dir, store) = temp_store();
        store
            .create_counterparty(counterparty("trp.example.com", Protocol::Trp))
            .unwrap();
        let resolver = Resolver::new(store);

        let address = traddr::encode("trp.example.com/?t=i");
        assert!(matches!(
            resolver.resolve(&trisa(&address)),
            Err(ResolveError::ProtocolMismatch {
                expected: Protocol::Trisa,
                found: Protocol::Trp
            })
        ));

        let trp = Routing {
            protocol: "trp".to_string(),
            ..trisa(&address)
        };
        assert_eq!(resolver.resolve(&trp).unwrap().protocol, Protocol::Trp);
    }

    #[test]
    fn sunrise_creates_counterparty() {
        let (_dir, store) = temp_store();
        let resolver = Resolver::new(Arc::clone(&store));

        let routing = Routing {
            protocol: "sunrise".to_string(),
            email_address: Some("barry@example.com".to_string()),
            counterparty: Some("SpudCoin Exchange".to_string()),
            ..Default::default()
        };
        let created = resolver.resolve(&routing).unwrap();
        assert_eq!(created.source, CounterpartySource::Sunrise);
        assert_eq!(created.protocol, Protocol::Sunrise);

        // The same email finds the same organization.
        assert_eq!(resolver.resolve(&routing).unwrap().id, created.id);
    }

    #[test]
    fn certificates_try_common_name_then_sans() {
        let (_dir, store) = temp_store();
        let created = store
            .create_counterparty(counterparty("trp.example.com", Protocol::Trp))
            .unwrap();
        let resolver = Resolver::new(store);

        let cert = PeerCertificate {
            common_name: "Example VASP Ltd".to_string(),
            dns_names: vec!["api.example.com".to_string(), "trp.example.com".to_string()],
        };
        assert_eq!(resolver.resolve_certificate(&cert).unwrap().id, created.id);
        assert!(resolver.resolve_certificate(&PeerCertificate::default()).is_err());

        let by_callback = resolver
            .resolve_callback("https://trp.example.com/transfers/callback?q=1")
            .unwrap();
        assert_eq!(by_callback.id, created.id);
    }

    #[test]
    fn stale_cache_entries_are_refreshed() {
        let (_dir, store) = temp_store();
        let created = store
            .create_counterparty(counterparty("beneficiary.example.com", Protocol::Trisa))
            .unwrap();
        let resolver = Resolver::with_cache(Arc::clone(&store), 4, Duration::from_secs(60));

        let address = traddr::encode("beneficiary.example.com/?t=i");
        resolver.resolve(&trisa(&address)).unwrap();
        assert!(resolver.cache.lock().contains("beneficiary.example.com"));

        let mut renamed = created.clone();
        renamed.name = "Beneficiary VASP".to_string();
        store.update_counterparty(&renamed).unwrap();
        assert_eq!(resolver.resolve(&trisa(&address)).unwrap().name, "Beneficiary VASP");
    }
}
