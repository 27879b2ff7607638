// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! IVMS101 identity records.
//!
//! Only the parts of the data model the pipeline reads are typed here; full
//! IVMS101 rule validation is left to dedicated tooling.

use serde::{Deserialize, Serialize};

// =============================================================================
// Identity Payload
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originator: Option<Originator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary: Option<Beneficiary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_vasp: Option<OriginatingVasp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary_vasp: Option<BeneficiaryVasp>,
}

impl IdentityPayload {
    pub fn is_empty(&self) -> bool {
        self.originator.is_none()
            && self.beneficiary.is_none()
            && self.originating_vasp.is_none()
            && self.beneficiary_vasp.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Originator {
    #[serde(default)]
    pub originator_persons: Vec<Person>,
    #[serde(default, rename = "accountNumber")]
    pub account_numbers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beneficiary {
    #[serde(default)]
    pub beneficiary_persons: Vec<Person>,
    #[serde(default, rename = "accountNumber")]
    pub account_numbers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginatingVasp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_vasp: Option<Person>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeneficiaryVasp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary_vasp: Option<Person>,
}

// =============================================================================
// Persons
// =============================================================================

/// Either a natural or a legal person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_person: Option<NaturalPerson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_person: Option<LegalPerson>,
}

impl Person {
    pub fn natural(person: NaturalPerson) -> Self {
        Self {
            natural_person: Some(person),
            legal_person: None,
        }
    }

    pub fn legal(person: LegalPerson) -> Self {
        Self {
            natural_person: None,
            legal_person: Some(person),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NaturalPerson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<NaturalPersonName>,
    #[serde(default, rename = "geographicAddress", skip_serializing_if = "Vec::is_empty")]
    pub geographic_addresses: Vec<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub national_identification: Option<NationalIdentification>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub customer_identification: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_and_place_of_birth: Option<DateAndPlaceOfBirth>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country_of_residence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NaturalPersonName {
    #[serde(default, rename = "nameIdentifier")]
    pub name_identifiers: Vec<NaturalPersonNameId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NaturalPersonNameId {
    #[serde(default)]
    pub primary_identifier: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secondary_identifier: String,
    #[serde(default)]
    pub name_identifier_type: NaturalPersonNameType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NaturalPersonNameType {
    #[default]
    #[serde(rename = "LEGL", alias = "NATURAL_PERSON_NAME_TYPE_CODE_LEGL")]
    Legal,
    #[serde(rename = "ALIA", alias = "NATURAL_PERSON_NAME_TYPE_CODE_ALIA")]
    Alias,
    #[serde(rename = "BIRT", alias = "NATURAL_PERSON_NAME_TYPE_CODE_BIRT")]
    Birth,
    #[serde(rename = "MAID", alias = "NATURAL_PERSON_NAME_TYPE_CODE_MAID")]
    Maiden,
    #[serde(rename = "MISC", alias = "NATURAL_PERSON_NAME_TYPE_CODE_MISC")]
    Misc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateAndPlaceOfBirth {
    #[serde(default)]
    pub date_of_birth: String,
    #[serde(default)]
    pub place_of_birth: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalPerson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<LegalPersonName>,
    #[serde(default, rename = "geographicAddress", skip_serializing_if = "Vec::is_empty")]
    pub geographic_addresses: Vec<Address>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub customer_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub national_identification: Option<NationalIdentification>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country_of_registration: String,
}

impl LegalPerson {
    /// Minimal structural checks: a legal name and a two letter country.
    pub fn validate(&self) -> Result<(), String> {
        let has_legal_name = self.name.as_ref().is_some_and(|name| {
            name.name_identifiers.iter().any(|id| {
                id.legal_person_name_identifier_type == LegalPersonNameType::Legal
                    && !id.legal_person_name.trim().is_empty()
            })
        });
        if !has_legal_name {
            return Err("legal person requires a LEGL name identifier".to_string());
        }

        let country = self.country_of_registration.trim();
        if !country.is_empty()
            && (country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(format!("invalid country of registration {country:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalPersonName {
    #[serde(default, rename = "nameIdentifier")]
    pub name_identifiers: Vec<LegalPersonNameId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalPersonNameId {
    #[serde(default)]
    pub legal_person_name: String,
    #[serde(default)]
    pub legal_person_name_identifier_type: LegalPersonNameType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegalPersonNameType {
    #[default]
    #[serde(rename = "LEGL", alias = "LEGAL_PERSON_NAME_TYPE_CODE_LEGL")]
    Legal,
    #[serde(rename = "SHRT", alias = "LEGAL_PERSON_NAME_TYPE_CODE_SHRT")]
    Short,
    #[serde(rename = "TRAD", alias = "LEGAL_PERSON_NAME_TYPE_CODE_TRAD")]
    Trading,
}

// =============================================================================
// Shared records
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default)]
    pub address_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_line: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub street_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub building_number: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub post_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub town_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country_sub_division: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NationalIdentification {
    #[serde(default)]
    pub national_identifier: String,
    #[serde(default)]
    pub national_identifier_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub country_of_issue: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registration_authority: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_protobuf_style_name_codes() {
        let json = r#"{
            "name": {"nameIdentifier": [
                {"legalPersonName": "SpudCoin Exchange", "legalPersonNameIdentifierType": "LEGAL_PERSON_NAME_TYPE_CODE_LEGL"}
            ]},
            "countryOfRegistration": "US"
        }"#;
        let person: LegalPerson = serde_json::from_str(json).unwrap();
        assert!(person.validate().is_ok());

        let value = serde_json::to_value(&person).unwrap();
        assert_eq!(
            value["name"]["nameIdentifier"][0]["legalPersonNameIdentifierType"],
            "LEGL"
        );
    }

    #[test]
    fn legal_person_requires_legal_name() {
        let person = LegalPerson {
            name: Some(LegalPersonName {
                name_identifiers: vec![LegalPersonNameId {
                    legal_person_name: "Spud".to_string(),
                    legal_person_name_identifier_type: LegalPersonNameType::Short,
                }],
            }),
            ..Default::default()
        };
        assert!(person.validate().is_err());
    }
}
