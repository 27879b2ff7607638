// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Secure Envelopes
//!
//! The envelope codec: wire records, payload types, symmetric cryptography and
//! the Clear → Encrypted → Sealed → Unsealed → Clear state machine.
//!
//! Codec operations that fail for protocol reasons (bad key, bad HMAC,
//! unparseable payload) return [`EnvelopeError::Rejected`] so callers can send
//! the rejection back to the counterparty instead of failing the request.

pub mod codec;
pub mod crypto;
pub mod ivms101;
pub mod payload;
pub mod rejection;
pub mod wire;

pub use codec::{Envelope, EnvelopeOptions, EnvelopeState, ResealedKeys};
pub use crypto::Crypto;
pub use payload::{Payload, TransactionPayload};
pub use rejection::{Rejection, RejectionCode};
pub use wire::{format_timestamp, SecureEnvelope, TransferState};

use crate::keys::KeyMaterialError;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// A protocol-level refusal that should travel back as an error envelope.
    #[error("rejected: {0}")]
    Rejected(Rejection),

    #[error("cannot {operation} envelope in {state} state")]
    InvalidState {
        operation: &'static str,
        state: EnvelopeState,
    },

    #[error("envelope is missing {0}")]
    MissingField(&'static str),

    #[error("invalid envelope id: {0}")]
    InvalidId(#[from] uuid::Error),

    #[error("invalid envelope timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    #[error("unhandled algorithm {0:?}")]
    UnhandledAlgorithm(String),

    #[error("symmetric cipher failure")]
    Cipher,

    #[error("invalid {0} length")]
    KeyLength(&'static str),

    #[error("secure random generator failure")]
    Random,

    #[error("key error: {0}")]
    Key(#[from] KeyMaterialError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EnvelopeError {
    pub(crate) fn reject(code: RejectionCode, message: impl Into<String>, retry: bool) -> Self {
        EnvelopeError::Rejected(Rejection::new(code, message, retry))
    }

    /// The rejection carried by this error, if it is one.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            EnvelopeError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// Split a codec failure into a rejection value or a hard error.
    pub fn into_rejection(self) -> Result<Rejection, EnvelopeError> {
        match self {
            EnvelopeError::Rejected(rejection) => Ok(rejection),
            other => Err(other),
        }
    }
}

pub type EnvelopeResult<T> = Result<T, EnvelopeError>;
