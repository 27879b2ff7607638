// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope state machine.
//!
//! ```text
//! Clear --encrypt--> Encrypted --seal--> Sealed --unseal--> Unsealed --decrypt--> Clear
//! ```
//!
//! Envelopes received from the wire start wherever [`Envelope::wrap`]
//! classifies them. Error envelopes carry only a rejection and never move.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::crypto::Crypto;
use super::ivms101::IdentityPayload;
use super::payload::Payload;
use super::rejection::{Rejection, RejectionCode};
use super::wire::{
    format_timestamp, SecureEnvelope, TransferState, ALGORITHM_AES_GCM, ALGORITHM_HMAC_SHA256,
};
use super::{EnvelopeError, EnvelopeResult};
use crate::keys::{KeyPair, PublicKey};

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    /// Plaintext payload, no ciphertext yet (or freshly decrypted).
    Clear,
    /// Payload encrypted, keys in the clear, not yet sealed.
    Encrypted,
    /// Keys wrapped with a recipient public key.
    Sealed,
    /// Keys unwrapped, payload still encrypted.
    Unsealed,
    /// Rejection only.
    Error,
    /// Inconsistent wire fields.
    Corrupted,
}

impl fmt::Display for EnvelopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvelopeState::Clear => "clear",
            EnvelopeState::Encrypted => "encrypted",
            EnvelopeState::Sealed => "sealed",
            EnvelopeState::Unsealed => "unsealed",
            EnvelopeState::Error => "error",
            EnvelopeState::Corrupted => "corrupted",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Options
// =============================================================================

/// Settings applied when building a new envelope.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeOptions {
    pub envelope_id: Option<Uuid>,
    pub transfer_state: TransferState,
    pub timestamp: Option<DateTime<Utc>>,
}

impl EnvelopeOptions {
    pub fn with_envelope_id(mut self, id: Uuid) -> Self {
        self.envelope_id = Some(id);
        self
    }

    pub fn with_transfer_state(mut self, state: TransferState) -> Self {
        self.transfer_state = state;
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    fn into_message(self) -> SecureEnvelope {
        SecureEnvelope {
            id: self.envelope_id.unwrap_or_else(Uuid::new_v4).to_string(),
            timestamp: format_timestamp(self.timestamp.unwrap_or_else(Utc::now)),
            transfer_state: self.transfer_state,
            ..Default::default()
        }
    }
}

/// Symmetric keys rewrapped under a local storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResealedKeys {
    pub encryption_key: Vec<u8>,
    pub hmac_secret: Vec<u8>,
    pub public_key_signature: String,
}

// =============================================================================
// Envelope
// =============================================================================

#[derive(Debug, Clone)]
pub struct Envelope {
    msg: SecureEnvelope,
    crypto: Option<Crypto>,
    payload: Option<Payload>,
    state: EnvelopeState,
}

impl Envelope {
    /// A clear envelope ready to be encrypted.
    pub fn new(payload: Payload, opts: EnvelopeOptions) -> Self {
        Self {
            msg: opts.into_message(),
            crypto: None,
            payload: Some(payload),
            state: EnvelopeState::Clear,
        }
    }

    /// An error envelope carrying a rejection.
    pub fn reject(rejection: Rejection, opts: EnvelopeOptions) -> Self {
        let mut msg = opts.into_message();
        msg.error = Some(rejection);
        Self {
            msg,
            crypto: None,
            payload: None,
            state: EnvelopeState::Error,
        }
    }

    /// Wrap a wire envelope, classifying its state from its fields.
    pub fn wrap(msg: SecureEnvelope) -> Self {
        let state = if msg.validate().is_err() {
            EnvelopeState::Corrupted
        } else if msg.is_error() {
            if msg.payload.is_empty() {
                EnvelopeState::Error
            } else {
                EnvelopeState::Corrupted
            }
        } else if msg.sealed {
            EnvelopeState::Sealed
        } else {
            EnvelopeState::Unsealed
        };

        let crypto = if state == EnvelopeState::Unsealed {
            match Crypto::from_parts(msg.encryption_key.clone(), msg.hmac_secret.clone()) {
                Ok(crypto) => Some(crypto),
                Err(_) => {
                    return Self {
                        msg,
                        crypto: None,
                        payload: None,
                        state: EnvelopeState::Corrupted,
                    }
                }
            }
        } else {
            None
        };

        Self {
            msg,
            crypto,
            payload: None,
            state,
        }
    }

    fn expect_state(&self, operation: &'static str, allowed: &[EnvelopeState]) -> EnvelopeResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EnvelopeError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Encrypt the payload with fresh symmetric keys and sign the ciphertext.
    pub fn encrypt(&mut self) -> EnvelopeResult<()> {
        self.expect_state("encrypt", &[EnvelopeState::Clear])?;

        let payload = self
            .payload
            .as_ref()
            .ok_or(EnvelopeError::MissingField("payload"))?;
        if payload.identity.is_empty() {
            return Err(EnvelopeError::reject(
                RejectionCode::UnparseableIdentity,
                "missing identity payload",
                true,
            ));
        }

        let plaintext = serde_json::to_vec(payload)?;
        let crypto = Crypto::generate()?;
        let ciphertext = crypto.encrypt(&plaintext)?;

        self.msg.hmac = crypto.sign(&ciphertext)?;
        self.msg.payload = ciphertext;
        self.msg.encryption_key = crypto.encryption_key().to_vec();
        self.msg.encryption_algorithm = ALGORITHM_AES_GCM.to_string();
        self.msg.hmac_secret = crypto.hmac_secret().to_vec();
        self.msg.hmac_algorithm = ALGORITHM_HMAC_SHA256.to_string();
        self.msg.sealed = false;
        self.msg.public_key_signature.clear();

        self.crypto = Some(crypto);
        self.state = EnvelopeState::Encrypted;
        Ok(())
    }

    /// Wrap the symmetric keys for the recipient.
    pub fn seal(&mut self, key: &PublicKey) -> EnvelopeResult<()> {
        self.expect_state("seal", &[EnvelopeState::Encrypted, EnvelopeState::Unsealed])?;
        let crypto = self
            .crypto
            .as_ref()
            .ok_or(EnvelopeError::MissingField("encryption_key"))?;

        self.msg.encryption_key = key.seal(crypto.encryption_key())?;
        self.msg.hmac_secret = key.seal(crypto.hmac_secret())?;
        self.msg.sealed = true;
        self.msg.public_key_signature = key.public_key_signature().to_string();
        self.state = EnvelopeState::Sealed;
        Ok(())
    }

    /// Unwrap the symmetric keys with a local private key.
    pub fn unseal(&mut self, key: &KeyPair) -> EnvelopeResult<()> {
        self.expect_state("unseal", &[EnvelopeState::Sealed])?;

        if !self.msg.encryption_algorithm.is_empty()
            && self.msg.encryption_algorithm != ALGORITHM_AES_GCM
        {
            return Err(EnvelopeError::reject(
                RejectionCode::UnhandledAlgorithm,
                format!("unsupported encryption algorithm {:?}", self.msg.encryption_algorithm),
                false,
            ));
        }
        if !self.msg.hmac_algorithm.is_empty() && self.msg.hmac_algorithm != ALGORITHM_HMAC_SHA256 {
            return Err(EnvelopeError::reject(
                RejectionCode::UnhandledAlgorithm,
                format!("unsupported hmac algorithm {:?}", self.msg.hmac_algorithm),
                false,
            ));
        }

        let invalid_key = |_| {
            EnvelopeError::reject(
                RejectionCode::InvalidKey,
                "could not unseal envelope with the indicated key",
                false,
            )
        };
        let encryption_key = key.unseal(&self.msg.encryption_key).map_err(invalid_key)?;
        let hmac_secret = key.unseal(&self.msg.hmac_secret).map_err(invalid_key)?;
        let crypto = Crypto::from_parts(encryption_key, hmac_secret).map_err(|_| {
            EnvelopeError::reject(RejectionCode::InvalidKey, "unsealed key has invalid length", false)
        })?;

        self.msg.encryption_key = crypto.encryption_key().to_vec();
        self.msg.hmac_secret = crypto.hmac_secret().to_vec();
        self.msg.sealed = false;
        self.crypto = Some(crypto);
        self.state = EnvelopeState::Unsealed;
        Ok(())
    }

    /// Verify the HMAC, decrypt and parse the payload.
    pub fn decrypt(&mut self) -> EnvelopeResult<()> {
        self.expect_state("decrypt", &[EnvelopeState::Unsealed, EnvelopeState::Encrypted])?;
        let crypto = self
            .crypto
            .as_ref()
            .ok_or(EnvelopeError::MissingField("encryption_key"))?;

        if !crypto.verify(&self.msg.payload, &self.msg.hmac)? {
            return Err(EnvelopeError::reject(
                RejectionCode::InvalidSignature,
                "hmac signature could not be verified",
                false,
            ));
        }

        let plaintext = crypto.decrypt(&self.msg.payload).map_err(|_| {
            EnvelopeError::reject(
                RejectionCode::EnvelopeDecodeFail,
                "could not decrypt payload",
                false,
            )
        })?;

        let value: serde_json::Value = serde_json::from_slice(&plaintext).map_err(|_| {
            EnvelopeError::reject(
                RejectionCode::PrivateInfoWrongFormat,
                "payload is not a json document",
                false,
            )
        })?;
        if let Some(identity) = value.get("identity") {
            serde_json::from_value::<IdentityPayload>(identity.clone()).map_err(|err| {
                EnvelopeError::reject(
                    RejectionCode::UnparseableIdentity,
                    format!("could not parse identity: {err}"),
                    false,
                )
            })?;
        }
        let payload: Payload = serde_json::from_value(value).map_err(|err| {
            EnvelopeError::reject(
                RejectionCode::UnparseableTransaction,
                format!("could not parse transaction: {err}"),
                false,
            )
        })?;

        self.payload = Some(payload);
        self.state = EnvelopeState::Clear;
        Ok(())
    }

    /// Whether the stored HMAC matches the ciphertext.
    pub fn validate_hmac(&self) -> EnvelopeResult<bool> {
        let crypto = self.crypto.as_ref().ok_or(EnvelopeError::InvalidState {
            operation: "validate hmac of",
            state: self.state,
        })?;
        crypto.verify(&self.msg.payload, &self.msg.hmac)
    }

    /// Rewrap the symmetric keys under a local storage key.
    pub fn reseal(&self, storage: &PublicKey) -> EnvelopeResult<ResealedKeys> {
        let crypto = self.crypto.as_ref().ok_or(EnvelopeError::InvalidState {
            operation: "reseal",
            state: self.state,
        })?;
        Ok(ResealedKeys {
            encryption_key: storage.seal(crypto.encryption_key())?,
            hmac_secret: storage.seal(crypto.hmac_secret())?,
            public_key_signature: storage.public_key_signature().to_string(),
        })
    }

    /// Unseal and decrypt in one step.
    pub fn open(&mut self, key: &KeyPair) -> EnvelopeResult<()> {
        self.unseal(key)?;
        self.decrypt()
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn id(&self) -> &str {
        &self.msg.id
    }

    pub fn uuid(&self) -> EnvelopeResult<Uuid> {
        self.msg.uuid()
    }

    pub fn timestamp(&self) -> EnvelopeResult<DateTime<Utc>> {
        self.msg.parsed_timestamp()
    }

    pub fn transfer_state(&self) -> TransferState {
        self.msg.transfer_state
    }

    pub fn set_transfer_state(&mut self, state: TransferState) {
        self.msg.transfer_state = state;
    }

    pub fn is_error(&self) -> bool {
        self.msg.is_error()
    }

    pub fn error(&self) -> Option<&Rejection> {
        self.msg.error.as_ref()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// The decrypted payload or an error naming the current state.
    pub fn find_payload(&self) -> EnvelopeResult<&Payload> {
        self.payload.as_ref().ok_or(EnvelopeError::InvalidState {
            operation: "read payload of",
            state: self.state,
        })
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    pub fn crypto(&self) -> Option<&Crypto> {
        self.crypto.as_ref()
    }

    pub fn public_key_signature(&self) -> &str {
        &self.msg.public_key_signature
    }

    pub fn is_sealed(&self) -> bool {
        self.msg.sealed
    }

    /// The wire record in its current form.
    pub fn proto(&self) -> &SecureEnvelope {
        &self.msg
    }

    pub fn into_proto(self) -> SecureEnvelope {
        self.msg
    }
}
