// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Secure envelope wire record.
//!
//! This is the exact shape exchanged with counterparties. Byte fields are
//! base64 encoded in JSON; `transfer_state` travels as its numeric code.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rejection::Rejection;
use super::{EnvelopeError, EnvelopeResult};

// =============================================================================
// Algorithms
// =============================================================================

/// Symmetric payload cipher identifier.
pub const ALGORITHM_AES_GCM: &str = "AES256-GCM";

/// Payload signature algorithm identifier.
pub const ALGORITHM_HMAC_SHA256: &str = "HMAC-SHA256";

/// Asymmetric key-sealing algorithm identifier.
pub const ALGORITHM_RSA_OAEP: &str = "RSA-OAEP-SHA512";

// =============================================================================
// Transfer State
// =============================================================================

/// Protocol-level state of a transfer as carried on each envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum TransferState {
    #[default]
    Unspecified,
    Started,
    Pending,
    Review,
    Repair,
    Accepted,
    Completed,
    Rejected,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Unspecified => "unspecified",
            TransferState::Started => "started",
            TransferState::Pending => "pending",
            TransferState::Review => "review",
            TransferState::Repair => "repair",
            TransferState::Accepted => "accepted",
            TransferState::Completed => "completed",
            TransferState::Rejected => "rejected",
        }
    }

    /// Accepted, completed and rejected end the conversation for new requests.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Accepted | TransferState::Completed | TransferState::Rejected
        )
    }
}

impl From<TransferState> for i32 {
    fn from(state: TransferState) -> Self {
        match state {
            TransferState::Unspecified => 0,
            TransferState::Started => 1,
            TransferState::Pending => 2,
            TransferState::Review => 3,
            TransferState::Repair => 4,
            TransferState::Accepted => 5,
            TransferState::Completed => 6,
            TransferState::Rejected => 7,
        }
    }
}

impl TryFrom<i32> for TransferState {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TransferState::Unspecified),
            1 => Ok(TransferState::Started),
            2 => Ok(TransferState::Pending),
            3 => Ok(TransferState::Review),
            4 => Ok(TransferState::Repair),
            5 => Ok(TransferState::Accepted),
            6 => Ok(TransferState::Completed),
            7 => Ok(TransferState::Rejected),
            other => Err(format!("unknown transfer state {other}")),
        }
    }
}

impl FromStr for TransferState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "unspecified" => Ok(TransferState::Unspecified),
            "started" => Ok(TransferState::Started),
            "pending" => Ok(TransferState::Pending),
            // A repaired resend asks the beneficiary to review again.
            "review" | "repaired" => Ok(TransferState::Review),
            "repair" => Ok(TransferState::Repair),
            "accepted" => Ok(TransferState::Accepted),
            "completed" => Ok(TransferState::Completed),
            "rejected" => Ok(TransferState::Rejected),
            other => Err(format!("unknown transfer state {other:?}")),
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Secure Envelope
// =============================================================================

/// The wire representation of one protocol step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureEnvelope {
    /// Envelope id (UUID) shared by every message of a transfer.
    pub id: String,

    #[serde(default, with = "b64")]
    pub payload: Vec<u8>,

    #[serde(default, with = "b64")]
    pub encryption_key: Vec<u8>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub encryption_algorithm: String,

    #[serde(default, with = "b64")]
    pub hmac: Vec<u8>,

    #[serde(default, with = "b64")]
    pub hmac_secret: Vec<u8>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hmac_algorithm: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Rejection>,

    /// RFC 3339 timestamp.
    #[serde(default)]
    pub timestamp: String,

    #[serde(default)]
    pub sealed: bool,

    #[serde(default)]
    pub public_key_signature: String,

    #[serde(default)]
    pub transfer_state: TransferState,
}

impl SecureEnvelope {
    /// Parse the envelope id.
    pub fn uuid(&self) -> EnvelopeResult<Uuid> {
        if self.id.is_empty() {
            return Err(EnvelopeError::MissingField("id"));
        }
        Ok(Uuid::parse_str(&self.id)?)
    }

    /// Parse the envelope timestamp.
    pub fn parsed_timestamp(&self) -> EnvelopeResult<DateTime<Utc>> {
        if self.timestamp.is_empty() {
            return Err(EnvelopeError::MissingField("timestamp"));
        }
        Ok(DateTime::parse_from_rfc3339(&self.timestamp)?.with_timezone(&Utc))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Field-level checks performed before an incoming envelope is handled.
    pub fn validate(&self) -> EnvelopeResult<()> {
        self.uuid()?;

        if self.error.is_some() {
            return Ok(());
        }

        if self.payload.is_empty() {
            return Err(EnvelopeError::MissingField("payload"));
        }
        if self.encryption_key.is_empty() {
            return Err(EnvelopeError::MissingField("encryption_key"));
        }
        if self.hmac.is_empty() {
            return Err(EnvelopeError::MissingField("hmac"));
        }
        if self.hmac_secret.is_empty() {
            return Err(EnvelopeError::MissingField("hmac_secret"));
        }
        if self.sealed && self.public_key_signature.is_empty() {
            return Err(EnvelopeError::MissingField("public_key_signature"));
        }
        Ok(())
    }
}

/// Format a timestamp the way envelopes carry it.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

// =============================================================================
// Base64 byte fields
// =============================================================================

pub(crate) mod b64 {
    use base64ct::{Base64, Encoding};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Base64::decode_vec(&encoded).map_err(D::Error::custom)
    }
}
