// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Travel Rule Protocol Messages
//!
//! JSON bodies and headers of the TRP v3 Inquiry / Resolution / Confirmation
//! exchange, plus the discoverability documents. Protocol headers travel
//! outside the body and are carried on [`Info`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::envelope::format_timestamp;
use crate::envelope::ivms101::IdentityPayload;
use crate::envelope::payload::{Payload, Transaction, TransactionPayload, TrpHeaders, TrpInquiryRecord, TrpTransaction};

// =============================================================================
// Constants
// =============================================================================

pub const API_VERSION_HEADER: &str = "api-version";
pub const REQUEST_IDENTIFIER_HEADER: &str = "request-identifier";
pub const API_EXTENSIONS_HEADER: &str = "api-extensions";

/// Version sent on every outgoing message.
pub const API_VERSION: &str = "3.2.0";

pub const SUPPORTED_VERSIONS: &[&str] = &["3.1.0", "3.2.0"];

pub const VENDOR: &str = "Envoy Node";

pub const EXT_EXTENDED_IVMS: &str = "extended-ivms101";
pub const EXT_MESSAGE_SIGNING: &str = "message-signing";
pub const EXT_SEALED_ENVELOPE: &str = "sealed-trisa-envelope";
pub const EXT_UNSEALED_ENVELOPE: &str = "unsealed-trisa-envelope";

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TrpError {
    #[error("missing trp api version header")]
    MissingVersion,

    #[error("unsupported trp api version {0:?}")]
    UnsupportedVersion(String),

    #[error("missing request identifier header")]
    MissingRequestIdentifier,

    #[error("request identifier must be a uuid: {0}")]
    InvalidRequestIdentifier(#[from] uuid::Error),

    #[error("could not parse callback url: {0}")]
    InvalidCallback(#[from] url::ParseError),

    #[error("inquiry requires a callback url")]
    MissingCallback,

    #[error("inquiry requires an asset (dti or slip044)")]
    MissingAsset,

    #[error("inquiry requires an ivms101 identity payload")]
    MissingIdentity,
}

pub type TrpResult<T> = Result<T, TrpError>;

// =============================================================================
// Headers
// =============================================================================

/// Protocol metadata carried in request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    pub api_version: String,
    pub request_identifier: String,
    pub api_extensions: Vec<String>,
}

impl Info {
    /// Headers for a new outgoing message of a transfer.
    pub fn outgoing(envelope_id: Uuid) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            request_identifier: envelope_id.to_string(),
            api_extensions: Vec::new(),
        }
    }

    /// Build from raw header values. Extensions are comma separated.
    pub fn from_headers(version: Option<&str>, identifier: Option<&str>, extensions: Option<&str>) -> Self {
        Self {
            api_version: version.unwrap_or_default().trim().to_string(),
            request_identifier: identifier.unwrap_or_default().trim().to_string(),
            api_extensions: extensions
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|ext| !ext.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> TrpResult<()> {
        if self.api_version.is_empty() {
            return Err(TrpError::MissingVersion);
        }
        if !SUPPORTED_VERSIONS.contains(&self.api_version.as_str()) {
            return Err(TrpError::UnsupportedVersion(self.api_version.clone()));
        }
        self.envelope_id().map(|_| ())
    }

    /// The request identifier parsed as an envelope id.
    pub fn envelope_id(&self) -> TrpResult<Uuid> {
        if self.request_identifier.is_empty() {
            return Err(TrpError::MissingRequestIdentifier);
        }
        Ok(Uuid::parse_str(&self.request_identifier)?)
    }

    pub fn extensions_header(&self) -> String {
        self.api_extensions.join(",")
    }
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Asset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slip0044: Option<u32>,
}

impl Asset {
    pub fn is_empty(&self) -> bool {
        self.dti.as_deref().is_none_or(str::is_empty) && self.slip0044.is_none()
    }

    /// Network label, preferring the SLIP-0044 symbol over the DTI.
    pub fn network(&self) -> String {
        if let Some(symbol) = self.slip0044.and_then(slip0044_symbol) {
            return symbol.to_string();
        }
        if let Some(coin) = self.slip0044 {
            return coin.to_string();
        }
        self.dti.clone().unwrap_or_default()
    }

    /// Reverse of [`Asset::network`] for well known symbols.
    pub fn from_network(network: &str) -> Self {
        match slip0044_coin(network) {
            Some(coin) => Self {
                dti: None,
                slip0044: Some(coin),
            },
            None => Self {
                dti: Some(network.to_string()).filter(|dti| !dti.is_empty()),
                slip0044: None,
            },
        }
    }
}

const SLIP0044: &[(u32, &str)] = &[
    (0, "BTC"),
    (1, "TBTC"),
    (2, "LTC"),
    (3, "DOGE"),
    (60, "ETH"),
    (144, "XRP"),
    (145, "BCH"),
    (195, "TRX"),
    (501, "SOL"),
    (714, "BNB"),
    (966, "MATIC"),
    (1815, "ADA"),
];

fn slip0044_symbol(coin: u32) -> Option<&'static str> {
    SLIP0044.iter().find(|(c, _)| *c == coin).map(|(_, s)| *s)
}

fn slip0044_coin(symbol: &str) -> Option<u32> {
    SLIP0044
        .iter()
        .find(|(_, s)| s.eq_ignore_ascii_case(symbol))
        .map(|(c, _)| *c)
}

/// First message of a TRP exchange, sent by the originating VASP.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Inquiry {
    #[serde(skip)]
    pub info: Info,
    #[serde(default)]
    pub asset: Asset,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub callback: String,
    #[serde(rename = "IVMS101", default)]
    #[schema(value_type = Object)]
    pub ivms101: IdentityPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub extensions: Option<serde_json::Value>,
}

impl Inquiry {
    pub fn validate(&self) -> TrpResult<()> {
        self.info.validate()?;
        if self.asset.is_empty() {
            return Err(TrpError::MissingAsset);
        }
        if self.callback.trim().is_empty() {
            return Err(TrpError::MissingCallback);
        }
        Url::parse(&self.callback)?;
        if self.ivms101.is_empty() {
            return Err(TrpError::MissingIdentity);
        }
        Ok(())
    }

    /// Host of the callback URL.
    pub fn callback_host(&self) -> TrpResult<String> {
        let url = Url::parse(&self.callback)?;
        Ok(url.host_str().unwrap_or_default().to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Approval {
    pub address: String,
    pub callback: String,
}

/// Beneficiary answer to an inquiry. Neither approved nor rejected means
/// the inquiry is still under review.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Resolution {
    #[serde(skip)]
    pub info: Info,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<Approval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
}

impl Resolution {
    pub fn pending() -> Self {
        Self {
            version: Some(API_VERSION.to_string()),
            ..Default::default()
        }
    }
}

/// Originator notice after the on-chain transfer, or a cancellation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Confirmation {
    #[serde(skip)]
    pub info: Info,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canceled: Option<String>,
}

// =============================================================================
// Discoverability
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VersionInfo {
    pub version: String,
    pub vendor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Extensions {
    pub required: Vec<String>,
    pub supported: Vec<String>,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: API_VERSION.to_string(),
        vendor: VENDOR.to_string(),
    }
}

pub fn extensions() -> Extensions {
    Extensions {
        required: Vec::new(),
        supported: vec![
            EXT_EXTENDED_IVMS.to_string(),
            EXT_MESSAGE_SIGNING.to_string(),
            EXT_SEALED_ENVELOPE.to_string(),
            EXT_UNSEALED_ENVELOPE.to_string(),
        ],
    }
}

// =============================================================================
// Payload Conversion
// =============================================================================

/// Envelope payload recording a received inquiry. The inquiry opens the
/// exchange, so it is sent now.
pub fn payload_from_inquiry(inquiry: &Inquiry) -> Payload {
    let mut asset = BTreeMap::new();
    if let Some(dti) = inquiry.asset.dti.as_ref().filter(|dti| !dti.is_empty()) {
        asset.insert("dti".to_string(), dti.clone());
    }
    if inquiry.asset.slip0044.is_some() {
        asset.insert("slip044".to_string(), inquiry.asset.network());
    }

    let first_account = |accounts: Option<&Vec<String>>| {
        accounts
            .and_then(|accounts| accounts.iter().find(|account| !account.is_empty()))
            .cloned()
            .unwrap_or_default()
    };

    let identity = &inquiry.ivms101;
    let transaction = Transaction {
        originator: first_account(identity.originator.as_ref().map(|o| &o.account_numbers)),
        beneficiary: first_account(identity.beneficiary.as_ref().map(|b| &b.account_numbers)),
        amount: inquiry.amount,
        network: inquiry.asset.network(),
        ..Default::default()
    };

    let extensions = inquiry
        .extensions
        .as_ref()
        .filter(|ext| !ext.is_null())
        .and_then(|ext| serde_json::to_string(ext).ok())
        .unwrap_or_default();

    Payload {
        identity: identity.clone(),
        transaction: TransactionPayload::Trp(TrpTransaction {
            envelope_id: inquiry.info.request_identifier.clone(),
            headers: TrpHeaders {
                version: inquiry.info.api_version.clone(),
                request_identifier: inquiry.info.request_identifier.clone(),
                extensions: inquiry.info.api_extensions.clone(),
            },
            inquiry: Some(TrpInquiryRecord {
                asset,
                amount: inquiry.amount,
                callback: inquiry.callback.clone(),
            }),
            transaction: Some(transaction),
            extensions,
        }),
        sent_at: format_timestamp(chrono::Utc::now()),
        received_at: String::new(),
    }
}

/// Build an outgoing inquiry from a transfer payload.
pub fn inquiry_from_payload(envelope_id: Uuid, payload: &Payload, callback: &str) -> Inquiry {
    let txn = payload.transaction.transaction().cloned().unwrap_or_default();
    Inquiry {
        info: Info::outgoing(envelope_id),
        asset: Asset::from_network(&txn.network),
        amount: txn.amount,
        callback: callback.to_string(),
        ivms101: payload.identity.clone(),
        extensions: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ivms101::{Beneficiary, Originator};

    fn inquiry() -> Inquiry {
        Inquiry {
            info: Info::from_headers(
                Some("3.1.0"),
                Some("a7a9e2d6-5e4c-4a0b-8a8b-5d1c2f1e0b11"),
                Some("extended-ivms101, message-signing"),
            ),
            asset: Asset {
                dti: None,
                slip0044: Some(0),
            },
            amount: 0.00099128,
            callback: "https://beneficiary.example.com/trp/callback?q=1".to_string(),
            ivms101: IdentityPayload {
                originator: Some(Originator {
                    originator_persons: vec![],
                    account_numbers: vec!["".into(), "mrfAEzGzK23kU23FxrToDRPmV1ReNfX43G".into()],
                }),
                beneficiary: Some(Beneficiary {
                    beneficiary_persons: vec![],
                    account_numbers: vec!["n3Vgn8wF6ZkpKSe186NnytLPXdZ6j1JbHg".into()],
                }),
                ..Default::default()
            },
            extensions: Some(serde_json::json!({"message-signing": true})),
        }
    }

    #[test]
    fn headers_parse_and_validate() {
        let info = inquiry().info;
        assert_eq!(info.api_extensions, vec!["extended-ivms101", "message-signing"]);
        info.validate().unwrap();

        let missing = Info::from_headers(Some("3.2.0"), None, None);
        assert!(matches!(missing.validate(), Err(TrpError::MissingRequestIdentifier)));

        let not_uuid = Info::from_headers(Some("3.2.0"), Some("abc"), None);
        assert!(matches!(not_uuid.validate(), Err(TrpError::InvalidRequestIdentifier(_))));

        let old = Info::from_headers(Some("2.0.0"), Some(&Uuid::new_v4().to_string()), None);
        assert!(matches!(old.validate(), Err(TrpError::UnsupportedVersion(_))));
    }

    #[test]
    fn inquiry_validation() {
        let mut inq = inquiry();
        inq.validate().unwrap();
        assert_eq!(inq.callback_host().unwrap(), "beneficiary.example.com");

        inq.callback = "not a url".to_string();
        assert!(matches!(inq.validate(), Err(TrpError::InvalidCallback(_))));

        let mut inq = inquiry();
        inq.asset = Asset::default();
        assert!(matches!(inq.validate(), Err(TrpError::MissingAsset)));
    }

    #[test]
    fn inquiry_body_uses_trp_names() {
        let value = serde_json::to_value(inquiry()).unwrap();
        assert!(value.get("IVMS101").is_some());
        assert_eq!(value["asset"]["slip0044"], 0);
        assert!(value.get("info").is_none());
    }

    #[test]
    fn payload_records_the_inquiry() {
        let payload = payload_from_inquiry(&inquiry());
        let TransactionPayload::Trp(trp) = &payload.transaction else {
            panic!("expected a trp payload");
        };
        assert_eq!(trp.headers.version, "3.1.0");
        assert_eq!(trp.inquiry.as_ref().unwrap().asset["slip044"], "BTC");

        let txn = payload.transaction.transaction().unwrap();
        assert_eq!(txn.originator, "mrfAEzGzK23kU23FxrToDRPmV1ReNfX43G");
        assert_eq!(txn.beneficiary, "n3Vgn8wF6ZkpKSe186NnytLPXdZ6j1JbHg");
        assert_eq!(txn.network, "BTC");
        assert!(trp.extensions.contains("message-signing"));
    }

    #[test]
    fn asset_network_round_trip() {
        assert_eq!(Asset::from_network("eth").slip0044, Some(60));
        let custom = Asset::from_network("4H95J0R2X");
        assert_eq!(custom.dti.as_deref(), Some("4H95J0R2X"));
        assert_eq!(custom.network(), "4H95J0R2X");
    }
}
