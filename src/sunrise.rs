// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Sunrise Verification Tokens
//!
//! A contact invited over email receives a [`VerificationToken`]: the 16 byte
//! Sunrise record id followed by a 64 byte random secret, base64url encoded.
//! The server keeps only the [`SignedToken`]: the record id, a varint
//! expiration and a random nonce, plus an HMAC-SHA256 of those bytes keyed
//! by the secret. Presenting the verification token lets the server rebuild
//! the HMAC and compare it in constant time.
//!
//! ```text
//! token        = record_id(16) | varint(expiration nanos) | nonce(64)
//! signed token = token | hmac(32)
//! verification = record_id(16) | secret(64)
//! ```

use std::fmt;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use ulid::Ulid;
use zeroize::Zeroizing;

const ID_LENGTH: usize = 16;
const NONCE_LENGTH: usize = 64;
const SECRET_LENGTH: usize = 64;
const HMAC_LENGTH: usize = 32;
const MAX_VARINT_LENGTH: usize = 10;

pub const MIN_TOKEN_LENGTH: usize = ID_LENGTH + 1 + NONCE_LENGTH;
pub const MAX_TOKEN_LENGTH: usize = ID_LENGTH + MAX_VARINT_LENGTH + NONCE_LENGTH;
pub const MIN_SIGNED_TOKEN_LENGTH: usize = MIN_TOKEN_LENGTH + HMAC_LENGTH;
pub const MAX_SIGNED_TOKEN_LENGTH: usize = MAX_TOKEN_LENGTH + HMAC_LENGTH;
pub const VERIFICATION_TOKEN_LENGTH: usize = ID_LENGTH + SECRET_LENGTH;

/// Lifetime of an invitation in days when none is given.
pub const DEFAULT_TTL_DAYS: i64 = 14;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("sunrise: invalid size for token")]
    Size,

    #[error("sunrise: could not decode token")]
    Decode,

    #[error("invalid sunrise token: no sunrise record id")]
    InvalidSunriseId,

    #[error("invalid sunrise token: no expiration timestamp")]
    InvalidExpiration,

    #[error("invalid sunrise token: incorrect nonce")]
    InvalidNonce,

    #[error("invalid sunrise token: incorrect signature")]
    InvalidSignature,

    #[error("sunrise: verification token is not base64url")]
    Base64,

    #[error("no secure random generator available")]
    Random,
}

pub type TokenResult<T> = Result<T, TokenError>;

fn random_bytes(len: usize) -> TokenResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| TokenError::Random)?;
    Ok(buf)
}

// =============================================================================
// Varints (zigzag + LEB128)
// =============================================================================

fn put_varint(buf: &mut Vec<u8>, value: i64) {
    let mut ux = ((value << 1) ^ (value >> 63)) as u64;
    while ux >= 0x80 {
        buf.push((ux as u8) | 0x80);
        ux >>= 7;
    }
    buf.push(ux as u8);
}

/// Returns the value and the number of bytes read.
fn read_varint(data: &[u8]) -> TokenResult<(i64, usize)> {
    let mut ux: u64 = 0;
    let mut shift = 0u32;
    for (i, byte) in data.iter().take(MAX_VARINT_LENGTH).enumerate() {
        if *byte < 0x80 {
            if i == MAX_VARINT_LENGTH - 1 && *byte > 1 {
                return Err(TokenError::Decode);
            }
            ux |= u64::from(*byte) << shift;
            let value = ((ux >> 1) as i64) ^ -((ux & 1) as i64);
            return Ok((value, i + 1));
        }
        ux |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }
    Err(TokenError::Decode)
}

// =============================================================================
// Token
// =============================================================================

/// The server-side data of a Sunrise invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub sunrise_id: Ulid,
    pub expiration: DateTime<Utc>,
    nonce: Vec<u8>,
}

impl Token {
    /// New token for a Sunrise record, expiring after [`DEFAULT_TTL_DAYS`]
    /// if no expiration is given.
    pub fn new(sunrise_id: Ulid, expiration: Option<DateTime<Utc>>) -> TokenResult<Self> {
        Ok(Self {
            sunrise_id,
            expiration: expiration.unwrap_or_else(|| Utc::now() + TimeDelta::days(DEFAULT_TTL_DAYS)),
            nonce: random_bytes(NONCE_LENGTH)?,
        })
    }

    /// Produce the verification token to email and the signed token to store.
    pub fn sign(&self) -> TokenResult<(VerificationToken, SignedToken)> {
        let secret = Zeroizing::new(random_bytes(SECRET_LENGTH)?);
        let data = self.to_bytes()?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(&secret).map_err(|_| TokenError::InvalidSignature)?;
        mac.update(&data);
        let signature = mac.finalize().into_bytes().to_vec();

        let mut verification = Vec::with_capacity(VERIFICATION_TOKEN_LENGTH);
        verification.extend_from_slice(&self.sunrise_id.to_bytes());
        verification.extend_from_slice(&secret);

        Ok((
            VerificationToken(Zeroizing::new(verification)),
            SignedToken {
                token: self.clone(),
                signature,
            },
        ))
    }

    pub fn is_expired(&self) -> bool {
        self.expiration < Utc::now()
    }

    pub fn validate(&self) -> TokenResult<()> {
        if self.sunrise_id.is_nil() {
            return Err(TokenError::InvalidSunriseId);
        }
        if self.expiration.timestamp_nanos_opt().is_none_or(|nanos| nanos == 0) {
            return Err(TokenError::InvalidExpiration);
        }
        if self.nonce.len() != NONCE_LENGTH {
            return Err(TokenError::InvalidNonce);
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> TokenResult<Vec<u8>> {
        self.validate()?;
        let nanos = self
            .expiration
            .timestamp_nanos_opt()
            .ok_or(TokenError::InvalidExpiration)?;

        let mut data = Vec::with_capacity(MAX_TOKEN_LENGTH);
        data.extend_from_slice(&self.sunrise_id.to_bytes());
        put_varint(&mut data, nanos);
        data.extend_from_slice(&self.nonce);
        Ok(data)
    }

    pub fn from_bytes(data: &[u8]) -> TokenResult<Self> {
        let (token, read) = Self::read_from(data)?;
        if read != data.len() {
            return Err(TokenError::Size);
        }
        token.validate()?;
        Ok(token)
    }

    fn read_from(data: &[u8]) -> TokenResult<(Self, usize)> {
        if data.len() < MIN_TOKEN_LENGTH {
            return Err(TokenError::Size);
        }

        let mut id = [0u8; ID_LENGTH];
        id.copy_from_slice(&data[..ID_LENGTH]);

        let (nanos, n) = read_varint(&data[ID_LENGTH..])?;
        let start = ID_LENGTH + n;
        let end = start + NONCE_LENGTH;
        if data.len() < end {
            return Err(TokenError::InvalidNonce);
        }

        Ok((
            Self {
                sunrise_id: Ulid::from_bytes(id),
                expiration: DateTime::from_timestamp_nanos(nanos),
                nonce: data[start..end].to_vec(),
            },
            end,
        ))
    }
}

// =============================================================================
// Signed Token
// =============================================================================

/// A token with its HMAC signature, as persisted on the Sunrise record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken {
    pub token: Token,
    signature: Vec<u8>,
}

impl SignedToken {
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Whether the verification token holds the secret this token was signed
    /// with.
    pub fn verify(&self, verification: &VerificationToken) -> TokenResult<bool> {
        if verification.0.len() != VERIFICATION_TOKEN_LENGTH {
            return Err(TokenError::Size);
        }
        let data = self.token.to_bytes()?;

        let mut mac = <HmacSha256 as Mac>::new_from_slice(verification.secret())
            .map_err(|_| TokenError::InvalidSignature)?;
        mac.update(&data);
        let expected = mac.finalize().into_bytes();

        Ok(bool::from(expected.as_slice().ct_eq(&self.signature)))
    }

    pub fn validate(&self) -> TokenResult<()> {
        self.token.validate()?;
        if self.signature.len() != HMAC_LENGTH {
            return Err(TokenError::InvalidSignature);
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> TokenResult<Vec<u8>> {
        self.validate()?;
        let mut out = self.token.to_bytes()?;
        out.extend_from_slice(&self.signature);
        Ok(out)
    }

    pub fn from_bytes(data: &[u8]) -> TokenResult<Self> {
        if !(MIN_SIGNED_TOKEN_LENGTH..=MAX_SIGNED_TOKEN_LENGTH).contains(&data.len()) {
            return Err(TokenError::Size);
        }

        let (token, read) = Token::read_from(data)?;
        let signed = Self {
            token,
            signature: data[read..].to_vec(),
        };
        signed.validate()?;
        Ok(signed)
    }
}

// =============================================================================
// Verification Token
// =============================================================================

/// The bearer half of an invitation, sent to the contact.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationToken(Zeroizing<Vec<u8>>);

impl VerificationToken {
    pub fn parse(encoded: &str) -> TokenResult<Self> {
        let data = Base64UrlUnpadded::decode_vec(encoded.trim()).map_err(|_| TokenError::Base64)?;
        if data.len() != VERIFICATION_TOKEN_LENGTH {
            return Err(TokenError::Size);
        }
        Ok(Self(Zeroizing::new(data)))
    }

    pub fn sunrise_id(&self) -> Ulid {
        let mut id = [0u8; ID_LENGTH];
        id.copy_from_slice(&self.0[..ID_LENGTH]);
        Ulid::from_bytes(id)
    }

    pub fn secret(&self) -> &[u8] {
        &self.0[ID_LENGTH..]
    }

    pub fn encode(&self) -> String {
        Base64UrlUnpadded::encode_string(&self.0)
    }
}

impl fmt::Display for VerificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for VerificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationToken")
            .field("sunrise_id", &self.sunrise_id())
            .finish_non_exhaustive()
    }
}
