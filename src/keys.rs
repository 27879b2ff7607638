// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Key Material
//!
//! RSA key pairs (the node's own certificates) and public keys (cached from
//! counterparties). Both are identified by a public key signature: the
//! SHA-256 digest of the PKIX DER public key, `SHA256:` + unpadded base64.
//!
//! Sealing uses RSA-OAEP with SHA-512.

use std::fmt;
use std::path::Path;

use base64ct::{Base64Unpadded, Encoding};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

/// Default modulus size for generated keys.
pub const DEFAULT_KEY_BITS: usize = 2048;

#[derive(Debug, thiserror::Error)]
pub enum KeyMaterialError {
    #[error("rsa error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("pkcs8 error: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),

    #[error("pkcs1 error: {0}")]
    Pkcs1(#[from] rsa::pkcs1::Error),

    #[error("public key encoding error: {0}")]
    Spki(#[from] rsa::pkcs8::spki::Error),

    #[error("pem error: {0}")]
    Pem(#[from] pem::PemError),

    #[error("no private key block found in PEM data")]
    NoPrivateKey,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type KeyMaterialResult<T> = Result<T, KeyMaterialError>;

fn signature_of(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    format!("SHA256:{}", Base64Unpadded::encode_string(&digest))
}

// =============================================================================
// Public Key
// =============================================================================

/// A public sealing key.
#[derive(Clone)]
pub struct PublicKey {
    inner: RsaPublicKey,
    der: Vec<u8>,
    signature: String,
}

impl PublicKey {
    pub fn from_rsa(inner: RsaPublicKey) -> KeyMaterialResult<Self> {
        let der = inner.to_public_key_der()?.as_bytes().to_vec();
        let signature = signature_of(&der);
        Ok(Self {
            inner,
            der,
            signature,
        })
    }

    pub fn from_der(der: &[u8]) -> KeyMaterialResult<Self> {
        Self::from_rsa(RsaPublicKey::from_public_key_der(der)?)
    }

    pub fn from_pem(pem: &str) -> KeyMaterialResult<Self> {
        Self::from_rsa(RsaPublicKey::from_public_key_pem(pem)?)
    }

    pub fn to_pem(&self) -> KeyMaterialResult<String> {
        Ok(self.inner.to_public_key_pem(LineEnding::LF)?)
    }

    pub fn public_key_signature(&self) -> &str {
        &self.signature
    }

    /// DER encoded SubjectPublicKeyInfo.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Wrap a secret for the holder of the matching private key.
    pub fn seal(&self, data: &[u8]) -> KeyMaterialResult<Vec<u8>> {
        let mut rng = rand::thread_rng();
        Ok(self.inner.encrypt(&mut rng, Oaep::new::<Sha512>(), data)?)
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("signature", &self.signature)
            .finish()
    }
}

// =============================================================================
// Key Pair
// =============================================================================

/// A local private key and its public half.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: PublicKey,
    der: Zeroizing<Vec<u8>>,
}

impl KeyPair {
    pub fn generate(bits: usize) -> KeyMaterialResult<Self> {
        let mut rng = rand::thread_rng();
        Self::from_rsa(RsaPrivateKey::new(&mut rng, bits)?)
    }

    pub fn from_rsa(private: RsaPrivateKey) -> KeyMaterialResult<Self> {
        let der = Zeroizing::new(private.to_pkcs8_der()?.as_bytes().to_vec());
        let public = PublicKey::from_rsa(private.to_public_key())?;
        Ok(Self {
            private,
            public,
            der,
        })
    }

    pub fn from_pkcs8_pem(pem: &str) -> KeyMaterialResult<Self> {
        Self::from_rsa(RsaPrivateKey::from_pkcs8_pem(pem)?)
    }

    /// Load the first private key block of a PEM bundle (PKCS#8 or PKCS#1).
    pub fn load(path: &Path) -> KeyMaterialResult<Self> {
        let data = std::fs::read(path)?;
        for block in pem::parse_many(&data)? {
            match block.tag() {
                "PRIVATE KEY" => {
                    return Self::from_rsa(RsaPrivateKey::from_pkcs8_der(block.contents())?)
                }
                "RSA PRIVATE KEY" => {
                    return Self::from_rsa(RsaPrivateKey::from_pkcs1_der(block.contents())?)
                }
                _ => continue,
            }
        }
        Err(KeyMaterialError::NoPrivateKey)
    }

    pub fn to_pkcs8_pem(&self) -> KeyMaterialResult<Zeroizing<String>> {
        Ok(self.private.to_pkcs8_pem(LineEnding::LF)?)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_key_signature(&self) -> &str {
        self.public.public_key_signature()
    }

    /// Unwrap a secret sealed with this pair's public key.
    pub fn unseal(&self, data: &[u8]) -> KeyMaterialResult<Vec<u8>> {
        Ok(self.private.decrypt(Oaep::new::<Sha512>(), data)?)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("signature", &self.public.signature)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Key
// =============================================================================

/// Either a private certificate pair or a public key.
#[derive(Debug, Clone)]
pub enum Key {
    Certificate(KeyPair),
    Public(PublicKey),
}

impl Key {
    pub fn public_key_signature(&self) -> &str {
        match self {
            Key::Certificate(pair) => pair.public_key_signature(),
            Key::Public(key) => key.public_key_signature(),
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Key::Certificate(_))
    }

    /// Canonical bytes used to compare stored keys.
    pub fn marshal(&self) -> &[u8] {
        match self {
            Key::Certificate(pair) => &pair.der,
            Key::Public(key) => key.der(),
        }
    }

    pub fn sealing_key(&self) -> &PublicKey {
        match self {
            Key::Certificate(pair) => pair.public_key(),
            Key::Public(key) => key,
        }
    }

    pub fn unsealing_key(&self) -> Option<&KeyPair> {
        match self {
            Key::Certificate(pair) => Some(pair),
            Key::Public(_) => None,
        }
    }
}

impl From<KeyPair> for Key {
    fn from(pair: KeyPair) -> Self {
        Key::Certificate(pair)
    }
}

impl From<PublicKey> for Key {
    fn from(key: PublicKey) -> Self {
        Key::Public(key)
    }
}

// =============================================================================
// Test fixtures
// =============================================================================
