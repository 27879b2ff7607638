// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Protocol-level rejections.
//!
//! A rejection is a value, not a failure: it is carried on an error envelope
//! back to the counterparty and persisted like any other envelope.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Machine-readable rejection codes shared with counterparties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    Unhandled,
    Unavailable,
    Unimplemented,
    InternalError,
    Rejected,
    UnknownWalletAddress,
    UnknownIdentity,
    UnknownOriginator,
    UnknownBeneficiary,
    BeneficiaryNameUnmatched,
    UnsupportedCurrency,
    ExceededTradingVolume,
    ComplianceCheckFail,
    NoCompliance,
    HighRisk,
    OutOfNetwork,
    Forbidden,
    NoSigningKey,
    CertificateRevoked,
    Unverified,
    Untrusted,
    InvalidSignature,
    InvalidKey,
    EnvelopeDecodeFail,
    PrivateInfoDecodeFail,
    UnhandledAlgorithm,
    BadRequest,
    UnparseableIdentity,
    PrivateInfoWrongFormat,
    UnparseableTransaction,
    MissingFields,
    IncompleteIdentity,
    ValidationError,
    ComplianceProcessing,
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde name so logs match the wire.
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(name)) => f.write_str(&name),
            _ => write!(f, "{self:?}"),
        }
    }
}

/// A refusal with a code, a human message and whether the sender may retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: RejectionCode,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub retry: bool,
}

impl Rejection {
    pub fn new(code: RejectionCode, message: impl Into<String>, retry: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retry,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if self.retry {
            f.write_str(" (retry)")?;
        }
        Ok(())
    }
}

impl std::error::Error for Rejection {}
