// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persisted records.
//!
//! All records are stored as JSON in redb. Identifiers are ULIDs except for
//! transactions, which share the UUID of their secure envelopes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::envelope::ivms101::LegalPerson;
use crate::envelope::{Envelope, EnvelopeResult, SecureEnvelope, TransferState};
use crate::keys::KeyPair;

/// Placeholder counterparty name on a freshly prepared transfer.
pub const COUNTERPARTY_UNKNOWN: &str = "unknown";

/// Placeholder asset on a freshly prepared transfer.
pub const VIRTUAL_ASSET_UNKNOWN: &str = "unknown";

// =============================================================================
// Enumerations
// =============================================================================

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} {other:?}", stringify!($name))),
                }
            }
        }
    };
}

/// Status of a transfer as shown to compliance officers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Unspecified,
    Draft,
    Pending,
    Review,
    Repair,
    Accepted,
    Completed,
    Rejected,
}

string_enum!(Status {
    Unspecified => "unspecified",
    Draft => "draft",
    Pending => "pending",
    Review => "review",
    Repair => "repair",
    Accepted => "accepted",
    Completed => "completed",
    Rejected => "rejected",
});

impl Status {
    /// Rejected and completed transfers take no further envelopes.
    pub fn is_concluded(self) -> bool {
        matches!(self, Status::Rejected | Status::Completed)
    }
}

/// Who started a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSource {
    #[default]
    Unknown,
    Local,
    Remote,
}

string_enum!(TransactionSource {
    Unknown => "unknown",
    Local => "local",
    Remote => "remote",
});

/// Where a counterparty record came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CounterpartySource {
    #[default]
    User,
    Gds,
    Sunrise,
}

string_enum!(CounterpartySource {
    User => "user",
    Gds => "gds",
    Sunrise => "sunrise",
});

impl CounterpartySource {
    /// Directory records are read-only for their authoritative fields.
    pub fn is_authoritative(&self) -> bool {
        matches!(self, CounterpartySource::Gds)
    }
}

/// Transport used to exchange envelopes with a counterparty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Trisa,
    Trp,
    Sunrise,
}

string_enum!(Protocol {
    Trisa => "trisa",
    Trp => "trp",
    Sunrise => "sunrise",
});

/// Direction of a stored envelope relative to this node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    #[serde(alias = "in")]
    Incoming,
    #[serde(alias = "out")]
    Outgoing,
}

string_enum!(Direction {
    Incoming => "incoming",
    Outgoing => "outgoing",
});

impl Direction {
    pub fn reverse(&self) -> Self {
        match self {
            Direction::Incoming => Direction::Outgoing,
            Direction::Outgoing => Direction::Incoming,
        }
    }
}

/// Lifecycle of a Sunrise invitation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SunriseStatus {
    #[default]
    Draft,
    Pending,
    Completed,
    Rejected,
    Expired,
    Revoked,
}

string_enum!(SunriseStatus {
    Draft => "draft",
    Pending => "pending",
    Completed => "completed",
    Rejected => "rejected",
    Expired => "expired",
    Revoked => "revoked",
});

// =============================================================================
// Transaction
// =============================================================================

/// Aggregate state of one envelope conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    pub id: Uuid,
    pub source: TransactionSource,
    pub status: Status,
    pub counterparty: String,
    #[schema(value_type = Option<String>)]
    pub counterparty_id: Option<Ulid>,
    pub originator: Option<String>,
    pub originator_address: Option<String>,
    pub beneficiary: Option<String>,
    pub beneficiary_address: Option<String>,
    pub virtual_asset: String,
    pub amount: f64,
    pub last_update: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub envelope_count: u64,
}

impl Transaction {
    /// Placeholder row inserted when a transfer is first prepared.
    pub fn stub(id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id,
            source: TransactionSource::Unknown,
            status: Status::Draft,
            counterparty: COUNTERPARTY_UNKNOWN.to_string(),
            virtual_asset: VIRTUAL_ASSET_UNKNOWN.to_string(),
            amount: 0.0,
            created: now,
            modified: now,
            ..Default::default()
        }
    }

    /// Copy every non-empty field of `other` onto this record. The id,
    /// created and modified timestamps are left alone.
    pub fn merge(&mut self, other: &Transaction) {
        if other.source != TransactionSource::Unknown {
            self.source = other.source;
        }
        if other.status != Status::Unspecified {
            self.status = other.status;
        }
        if !other.counterparty.is_empty() {
            self.counterparty = other.counterparty.clone();
        }
        if other.counterparty_id.is_some() {
            self.counterparty_id = other.counterparty_id;
        }
        if other.originator.is_some() {
            self.originator = other.originator.clone();
        }
        if other.originator_address.is_some() {
            self.originator_address = other.originator_address.clone();
        }
        if other.beneficiary.is_some() {
            self.beneficiary = other.beneficiary.clone();
        }
        if other.beneficiary_address.is_some() {
            self.beneficiary_address = other.beneficiary_address.clone();
        }
        if !other.virtual_asset.is_empty() {
            self.virtual_asset = other.virtual_asset.clone();
        }
        if other.amount != 0.0 {
            self.amount = other.amount;
        }
        if other.last_update.is_some() {
            self.last_update = other.last_update;
        }
    }
}

// =============================================================================
// Secure Envelope Record
// =============================================================================

/// A stored envelope. The encryption key and HMAC secret are resealed under
/// the local storage key and may differ from the ones on the wire copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EnvelopeRecord {
    #[schema(value_type = Option<String>)]
    pub id: Option<Ulid>,
    pub envelope_id: Uuid,
    pub direction: Direction,
    pub remote: Option<String>,
    #[schema(value_type = Option<String>)]
    pub reply_to: Option<Ulid>,
    pub is_error: bool,
    #[serde(with = "hex::serde")]
    #[schema(value_type = String)]
    pub encryption_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    #[schema(value_type = String)]
    pub hmac_secret: Vec<u8>,
    pub valid_hmac: Option<bool>,
    pub timestamp: DateTime<Utc>,
    pub public_key: Option<String>,
    #[schema(value_type = i32)]
    pub transfer_state: TransferState,
    #[schema(value_type = Object)]
    pub envelope: SecureEnvelope,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl EnvelopeRecord {
    /// Base record for an envelope, keys copied from the wire.
    pub fn from_envelope(env: &Envelope, direction: Direction) -> Self {
        Self::from_wire(env.proto(), direction)
    }

    /// Base record for a wire envelope as it was received or sent.
    pub fn from_wire(wire: &SecureEnvelope, direction: Direction) -> Self {
        let msg = wire.clone();
        Self {
            envelope_id: msg.uuid().unwrap_or_default(),
            direction,
            is_error: msg.is_error(),
            encryption_key: msg.encryption_key.clone(),
            hmac_secret: msg.hmac_secret.clone(),
            timestamp: msg.parsed_timestamp().unwrap_or_else(|_| Utc::now()),
            public_key: Some(msg.public_key_signature.clone()).filter(|pks| !pks.is_empty()),
            transfer_state: msg.transfer_state,
            envelope: msg,
            ..Default::default()
        }
    }

    /// Reopen the stored envelope with the local key that resealed it.
    pub fn open(&self, storage: &KeyPair) -> EnvelopeResult<Envelope> {
        let mut msg = self.envelope.clone();
        msg.encryption_key = self.encryption_key.clone();
        msg.hmac_secret = self.hmac_secret.clone();
        msg.public_key_signature = self.public_key.clone().unwrap_or_default();
        msg.sealed = true;

        let mut env = Envelope::wrap(msg);
        if !self.is_error {
            env.open(storage)?;
        }
        Ok(env)
    }
}

// =============================================================================
// Counterparty & Contacts
// =============================================================================

/// A known VASP or Sunrise contact organization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Counterparty {
    #[schema(value_type = Option<String>)]
    pub id: Option<Ulid>,
    pub source: CounterpartySource,
    pub directory_id: Option<String>,
    pub registered_directory: Option<String>,
    pub protocol: Protocol,
    pub common_name: String,
    pub endpoint: String,
    pub name: String,
    pub website: Option<String>,
    pub country: Option<String>,
    pub verified_on: Option<DateTime<Utc>>,
    #[schema(value_type = Option<Object>)]
    pub ivms_record: Option<LegalPerson>,
    pub lei: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Vec<Contact>>,
}

impl Counterparty {
    /// Fill in the common name from the endpoint host when missing.
    pub fn normalize(&mut self) {
        if self.common_name.is_empty() {
            if let Ok(url) = crate::traddr::parse(&self.endpoint) {
                if let Some(host) = url.host_str() {
                    self.common_name = host.to_string();
                }
            }
        }
    }

    pub fn has_contact(&self, email: &str) -> bool {
        self.contacts
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(|contact| contact.email.eq_ignore_ascii_case(email))
    }

    pub fn has_directory_pair(&self) -> bool {
        self.registered_directory.as_deref().is_some_and(|s| !s.is_empty())
            && self.directory_id.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// A person to email at a counterparty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct Contact {
    #[schema(value_type = Option<String>)]
    pub id: Option<Ulid>,
    pub name: String,
    pub email: String,
    pub role: String,
    #[schema(value_type = Option<String>)]
    pub counterparty_id: Option<Ulid>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

// =============================================================================
// Sunrise
// =============================================================================

/// One Sunrise invitation sent to a contact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SunriseRecord {
    #[schema(value_type = Option<String>)]
    pub id: Option<Ulid>,
    pub envelope_id: Uuid,
    pub email: String,
    pub expiration: DateTime<Utc>,
    /// Signed token bytes, hex encoded.
    #[serde(default, with = "hex::serde")]
    #[schema(value_type = String)]
    pub signature: Vec<u8>,
    pub status: SunriseStatus,
    pub sent_on: Option<DateTime<Utc>>,
    pub verified_on: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl SunriseRecord {
    /// Past its expiration and not in a final state.
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expiration
            && !matches!(self.status, SunriseStatus::Completed | SunriseStatus::Rejected)
    }
}
