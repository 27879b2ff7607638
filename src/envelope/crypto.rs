// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-envelope symmetric cryptography: AES-256-GCM payload encryption and
//! HMAC-SHA256 signatures over the ciphertext.

use std::fmt;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::{EnvelopeError, EnvelopeResult};

const KEY_LENGTH: usize = 32;
const HMAC_SECRET_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

type HmacSha256 = Hmac<Sha256>;

/// Fill a fresh buffer with secure random bytes.
pub(crate) fn random_bytes(len: usize) -> EnvelopeResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| EnvelopeError::Random)?;
    Ok(buf)
}

/// Encryption key and HMAC secret for a single envelope.
#[derive(Clone)]
pub struct Crypto {
    key: Zeroizing<Vec<u8>>,
    hmac_secret: Zeroizing<Vec<u8>>,
}

impl Crypto {
    /// Generate a random key and HMAC secret.
    pub fn generate() -> EnvelopeResult<Self> {
        Ok(Self {
            key: Zeroizing::new(random_bytes(KEY_LENGTH)?),
            hmac_secret: Zeroizing::new(random_bytes(HMAC_SECRET_LENGTH)?),
        })
    }

    /// Rebuild from unsealed key material.
    pub fn from_parts(key: Vec<u8>, hmac_secret: Vec<u8>) -> EnvelopeResult<Self> {
        if key.len() != KEY_LENGTH {
            return Err(EnvelopeError::KeyLength("encryption key"));
        }
        if hmac_secret.is_empty() {
            return Err(EnvelopeError::KeyLength("hmac secret"));
        }
        Ok(Self {
            key: Zeroizing::new(key),
            hmac_secret: Zeroizing::new(hmac_secret),
        })
    }

    pub fn encryption_key(&self) -> &[u8] {
        &self.key
    }

    pub fn hmac_secret(&self) -> &[u8] {
        &self.hmac_secret
    }

    /// Encrypt, prefixing the random nonce to the ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> EnvelopeResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| EnvelopeError::Cipher)?;
        let nonce_bytes = random_bytes(NONCE_LENGTH)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| EnvelopeError::Cipher)?;

        let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8]) -> EnvelopeResult<Vec<u8>> {
        if data.len() <= NONCE_LENGTH {
            return Err(EnvelopeError::Cipher);
        }
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| EnvelopeError::Cipher)?;
        let (nonce, ciphertext) = data.split_at(NONCE_LENGTH);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| EnvelopeError::Cipher)
    }

    /// HMAC-SHA256 of the data under the HMAC secret.
    pub fn sign(&self, data: &[u8]) -> EnvelopeResult<Vec<u8>> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.hmac_secret)
            .map_err(|_| EnvelopeError::KeyLength("hmac secret"))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Constant-time HMAC check.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> EnvelopeResult<bool> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.hmac_secret)
            .map_err(|_| EnvelopeError::KeyLength("hmac secret"))?;
        mac.update(data);
        Ok(mac.verify_slice(signature).is_ok())
    }
}

impl fmt::Debug for Crypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crypto").finish_non_exhaustive()
    }
}
