// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transfer summaries derived from decrypted payloads.

use crate::envelope::ivms101::{
    Beneficiary, LegalPersonNameType, NaturalPersonNameType, Originator, Person,
};
use crate::envelope::Payload;
use crate::store::Transaction;

/// Transfer fields shown in listings, read from a payload.
pub fn transaction_from_payload(payload: &Payload) -> Transaction {
    let mut txn = Transaction::default();

    if let Some(data) = payload.transaction.transaction() {
        txn.virtual_asset = match (data.network.is_empty(), data.asset_type.is_empty()) {
            (false, false) => format!("{} ({})", data.network, data.asset_type),
            (false, true) => data.network.clone(),
            (true, false) => data.asset_type.clone(),
            (true, true) => String::new(),
        };
        txn.amount = data.amount;
        txn.originator_address = non_empty(&data.originator);
        txn.beneficiary_address = non_empty(&data.beneficiary);
    }

    let identity = &payload.identity;
    if let Some(originator) = &identity.originator {
        txn.originator = non_empty(&find_name(&originator.originator_persons));
        if txn.originator_address.is_none() {
            txn.originator_address = non_empty(&originator_account(originator));
        }
    }
    if let Some(beneficiary) = &identity.beneficiary {
        txn.beneficiary = non_empty(&find_name(&beneficiary.beneficiary_persons));
        if txn.beneficiary_address.is_none() {
            txn.beneficiary_address = non_empty(&beneficiary_account(beneficiary));
        }
    }

    txn
}

fn non_empty(value: &str) -> Option<String> {
    Some(value.to_string()).filter(|v| !v.is_empty())
}

/// The first legal name among `persons`, or the last non-empty name seen.
/// Natural person names read "secondary primary".
pub fn find_name(persons: &[Person]) -> String {
    let mut name = String::new();

    for person in persons {
        if let Some(legal) = &person.legal_person {
            for id in legal.name.iter().flat_map(|n| &n.name_identifiers) {
                if id.legal_person_name.is_empty() {
                    continue;
                }
                name = id.legal_person_name.clone();
                if id.legal_person_name_identifier_type == LegalPersonNameType::Legal {
                    return name;
                }
            }
        }

        if let Some(natural) = &person.natural_person {
            for id in natural.name.iter().flat_map(|n| &n.name_identifiers) {
                if id.primary_identifier.is_empty() {
                    continue;
                }
                name = format!("{} {}", id.secondary_identifier, id.primary_identifier)
                    .trim()
                    .to_string();
                if id.name_identifier_type == NaturalPersonNameType::Legal {
                    return name;
                }
            }
        }
    }

    name
}

fn first_account(accounts: &[String]) -> String {
    accounts
        .iter()
        .find(|account| !account.is_empty())
        .cloned()
        .unwrap_or_default()
}

pub fn originator_account(originator: &Originator) -> String {
    first_account(&originator.account_numbers)
}

pub fn beneficiary_account(beneficiary: &Beneficiary) -> String {
    first_account(&beneficiary.account_numbers)
}
