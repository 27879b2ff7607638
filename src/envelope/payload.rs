// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Decrypted envelope payloads: an IVMS101 identity plus a transaction record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ivms101::IdentityPayload;

/// The plaintext carried inside a secure envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub identity: IdentityPayload,
    #[serde(default)]
    pub transaction: TransactionPayload,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sent_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub received_at: String,
}

/// The typed transaction half of a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "snake_case")]
pub enum TransactionPayload {
    Transaction(Transaction),
    Pending(Pending),
    Sunrise(Sunrise),
    Trp(TrpTransaction),
}

impl Default for TransactionPayload {
    fn default() -> Self {
        TransactionPayload::Transaction(Transaction::default())
    }
}

impl TransactionPayload {
    /// The generic transaction record, wherever it is nested.
    pub fn transaction(&self) -> Option<&Transaction> {
        match self {
            TransactionPayload::Transaction(txn) => Some(txn),
            TransactionPayload::Pending(pending) => pending.transaction.as_ref(),
            TransactionPayload::Sunrise(sunrise) => sunrise.transaction.as_ref(),
            TransactionPayload::Trp(trp) => trp.transaction.as_ref(),
        }
    }
}

/// Generic on-chain transaction details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub txid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub originator: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub beneficiary: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extra_json: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub asset_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
}

/// Reply sent while a transfer awaits review or repair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pending {
    #[serde(default)]
    pub envelope_id: String,
    #[serde(default)]
    pub received_by: String,
    #[serde(default)]
    pub received_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub reply_not_after: String,
    #[serde(default)]
    pub reply_not_before: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extra_json: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
}

/// Record of the Sunrise invitations sent for a transfer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sunrise {
    #[serde(default)]
    pub envelope_id: String,
    #[serde(default)]
    pub counterparty: String,
    #[serde(default)]
    pub messages: Vec<SunriseMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SunriseMessage {
    pub recipient: String,
    pub email: String,
    pub channel: String,
    pub sent_at: String,
    pub reply_not_before: String,
}

/// A TRP exchange captured as an envelope payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrpTransaction {
    #[serde(default)]
    pub envelope_id: String,
    #[serde(default)]
    pub headers: TrpHeaders,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inquiry: Option<TrpInquiryRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extensions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrpHeaders {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub request_identifier: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrpInquiryRecord {
    #[serde(default)]
    pub asset: BTreeMap<String, String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub callback: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_payload_is_tagged() {
        let payload = Payload {
            transaction: TransactionPayload::Pending(Pending {
                envelope_id: "abc".to_string(),
                transaction: Some(Transaction {
                    network: "BTC".to_string(),
                    amount: 0.5,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["transaction"]["@type"], "pending");

        let parsed: Payload = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.transaction.transaction().unwrap().network, "BTC");
    }
}
