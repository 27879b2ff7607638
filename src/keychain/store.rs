// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key stores backing the key chain.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::error::{KeyError, KeyResult};
use crate::keys::Key;

/// Storage of keys by public key signature.
pub trait KeyStore: Send + Sync {
    /// The key and the time it was last stored.
    fn get(&self, signature: &str) -> KeyResult<(Key, DateTime<Utc>)>;

    /// Store a key. Re-storing identical key material refreshes its timestamp;
    /// different material under the same signature is refused.
    fn put(&self, key: Key) -> KeyResult<()>;

    fn delete(&self, signature: &str) -> KeyResult<()>;
}

struct CachedKey {
    key: Key,
    timestamp: DateTime<Utc>,
}

/// Volatile in-process key store.
#[derive(Default)]
pub struct MemKeyStore {
    cache: RwLock<HashMap<String, CachedKey>>,
}

impl MemKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

impl KeyStore for MemKeyStore {
    fn get(&self, signature: &str) -> KeyResult<(Key, DateTime<Utc>)> {
        self.cache
            .read()
            .get(signature)
            .map(|cached| (cached.key.clone(), cached.timestamp))
            .ok_or(KeyError::KeyNotFound)
    }

    fn put(&self, key: Key) -> KeyResult<()> {
        let signature = key.public_key_signature().to_string();
        let mut cache = self.cache.write();

        if let Some(cached) = cache.get_mut(&signature) {
            if cached.key.marshal() != key.marshal() {
                return Err(KeyError::KeyOverwrite);
            }
            cached.key = key;
            cached.timestamp = Utc::now();
            return Ok(());
        }

        cache.insert(
            signature,
            CachedKey {
                key,
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    fn delete(&self, signature: &str) -> KeyResult<()> {
        self.cache.write().remove(signature);
        Ok(())
    }
}
