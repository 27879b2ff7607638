// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key chain errors.
//!
//! Each kind is distinct so callers can choose between a key exchange, a
//! default key fallback or failing the request.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("key with specified signature not found")]
    KeyNotFound,

    #[error("key with specified signature has expired")]
    KeyExpired,

    #[error("key for specified common name not found")]
    KeyNotMatched,

    #[error("cannot overwrite key")]
    KeyOverwrite,

    #[error("key not found, no default key available")]
    NoDefaultKeys,

    #[error("cannot cache private keys in external store")]
    NoCachePrivateKeys,

    #[error("private key required for internal store")]
    NoStorePublicKeys,

    #[error("key chain is not correctly configured")]
    InvalidSource,
}

impl KeyError {
    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            KeyError::KeyNotFound => "key_not_found",
            KeyError::KeyExpired => "key_expired",
            KeyError::KeyNotMatched => "key_not_matched",
            KeyError::KeyOverwrite => "key_overwrite",
            KeyError::NoDefaultKeys => "no_default_keys",
            KeyError::NoCachePrivateKeys => "no_cache_private_keys",
            KeyError::NoStorePublicKeys => "no_store_public_keys",
            KeyError::InvalidSource => "invalid_source",
        }
    }

    /// Misses that a key exchange with the counterparty can resolve.
    pub fn needs_exchange(&self) -> bool {
        matches!(
            self,
            KeyError::KeyNotFound | KeyError::KeyNotMatched | KeyError::KeyExpired
        )
    }
}

pub type KeyResult<T> = Result<T, KeyError>;
