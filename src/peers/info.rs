// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Directory details of a remote VASP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{PeerError, PeerResult};
use crate::store::{Counterparty, CounterpartySource, Protocol};

/// What is known about a peer, from the directory or its certificates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PeerInfo {
    #[serde(rename = "vasp_id", default)]
    pub id: String,
    #[serde(default)]
    pub registered_directory: String,
    pub common_name: String,
    pub endpoint: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_on: Option<DateTime<Utc>>,
}

impl PeerInfo {
    pub fn new(common_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// A peer needs a common name and an endpoint to be dialed.
    pub fn validate(&self) -> PeerResult<()> {
        if self.common_name.trim().is_empty() {
            return Err(PeerError::NoCommonName);
        }
        if self.endpoint.trim().is_empty() {
            return Err(PeerError::NoEndpoint);
        }
        Ok(())
    }

    /// Counterparty record for a peer first seen on an incoming transfer.
    pub fn model(&self) -> Counterparty {
        let non_empty = |value: &str| Some(value.to_string()).filter(|v| !v.is_empty());
        Counterparty {
            source: CounterpartySource::Gds,
            directory_id: non_empty(&self.id),
            registered_directory: non_empty(&self.registered_directory),
            protocol: Protocol::Trisa,
            common_name: self.common_name.clone(),
            endpoint: self.endpoint.clone(),
            name: if self.name.is_empty() {
                self.common_name.clone()
            } else {
                self.name.clone()
            },
            country: non_empty(&self.country),
            verified_on: self.verified_on,
            ..Default::default()
        }
    }

    /// Peer details for a stored counterparty.
    pub fn from_counterparty(counterparty: &Counterparty) -> Self {
        Self {
            id: counterparty.directory_id.clone().unwrap_or_default(),
            registered_directory: counterparty.registered_directory.clone().unwrap_or_default(),
            common_name: counterparty.common_name.clone(),
            endpoint: counterparty.endpoint.clone(),
            name: counterparty.name.clone(),
            country: counterparty.country.clone().unwrap_or_default(),
            verified_on: counterparty.verified_on,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_name_and_endpoint() {
        assert!(matches!(PeerInfo::default().validate(), Err(PeerError::NoCommonName)));
        assert!(matches!(
            PeerInfo::new("beneficiary.example.com", "").validate(),
            Err(PeerError::NoEndpoint)
        ));
        PeerInfo::new("beneficiary.example.com", "beneficiary.example.com:443")
            .validate()
            .unwrap();
    }

    #[test]
    fn model_is_a_directory_trisa_counterparty() {
        let info = PeerInfo {
            id: "9e069e01-8515-4d57-b9a5-e249f7ab4fca".to_string(),
            registered_directory: "trisatest.net".to_string(),
            country: "US".to_string(),
            ..PeerInfo::new("beneficiary.example.com", "beneficiary.example.com:443")
        };
        let model = info.model();
        assert_eq!(model.source, CounterpartySource::Gds);
        assert_eq!(model.protocol, Protocol::Trisa);
        assert!(model.has_directory_pair());
        assert_eq!(model.name, "beneficiary.example.com");
        assert_eq!(model.country.as_deref(), Some("US"));
        assert_eq!(PeerInfo::from_counterparty(&model), PeerInfo { name: model.name.clone(), ..info });
    }
}
