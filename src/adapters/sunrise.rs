// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sunrise: counterparties without a node review transfers through emailed
//! verification links.

use chrono::Utc;
use tracing::{info, warn};
use ulid::Ulid;

use super::{AdapterError, AdapterResult, Node, SUNRISE_KEY_NAME};
use crate::emails::EmailError;
use crate::envelope::ivms101::LegalPerson;
use crate::envelope::{Payload, Rejection};
use crate::postman::{PostmanError, SunrisePacket};
use crate::store::{Status, SunriseRecord, SunriseStatus, Transaction};
use crate::sunrise::{SignedToken, TokenError, VerificationToken};

/// Email every contact at the counterparty and record the transfer as
/// pending. Contacts that cannot be reached are skipped. A shutdown part way
/// through still records the transfer for the contacts already invited.
pub async fn send(node: &Node, packet: &mut SunrisePacket) -> AdapterResult<()> {
    if !node.settings.sunrise_enabled {
        return Err(AdapterError::SunriseDisabled);
    }

    let span = packet.packet.span().clone();
    let contacts = packet.contacts()?;
    let total = contacts.len();
    for contact in contacts {
        let sent = packet
            .send_email(
                &contact,
                node.email.as_ref(),
                &node.settings.email_backoff,
                &node.shutdown,
                &node.settings.sunrise_url,
                &node.settings.organization,
            )
            .await;

        match sent {
            Ok(()) => {}
            Err(PostmanError::Email(EmailError::Cancelled)) if packet.messages.is_empty() => {
                return Err(PostmanError::Email(EmailError::Cancelled).into())
            }
            Err(PostmanError::Email(EmailError::Cancelled)) => {
                warn!(parent: &span, invited = packet.messages.len(), total, "Shutdown during sunrise invitations");
                break;
            }
            Err(e) => warn!(parent: &span, email = %contact.email, error = %e, "Could not send sunrise invitation"),
        }
    }

    let storage = node.storage_key("", SUNRISE_KEY_NAME)?;
    packet.create(&storage)?;
    info!(parent: &span, invited = packet.messages.len(), "Sunrise invitations sent");
    Ok(())
}

/// Check an emailed verification token against its stored signature and
/// mark the invitation verified.
pub fn verify(node: &Node, token: &str) -> AdapterResult<SunriseRecord> {
    let verification = VerificationToken::parse(token)?;
    let mut record = node.store.retrieve_sunrise(verification.sunrise_id())?;

    let signed = SignedToken::from_bytes(&record.signature)?;
    if !signed.verify(&verification)? {
        warn!(sunrise_id = %verification.sunrise_id(), "Sunrise token signature mismatch");
        return Err(TokenError::InvalidSignature.into());
    }

    if record.is_expired() {
        return Err(AdapterError::Expired);
    }

    if record.verified_on.is_none() {
        record.verified_on = Some(Utc::now());
        record = node.store.update_sunrise(&record)?;
    }
    info!(sunrise_id = %verification.sunrise_id(), envelope_id = %record.envelope_id, "Sunrise token verified");
    Ok(record)
}

/// The counterparty accepted the transfer with its own identity details.
pub async fn accept(node: &Node, sunrise_id: Ulid, payload: Payload) -> AdapterResult<Transaction> {
    let (record, txn) = reviewable(node, sunrise_id)?;
    let mut packet = SunrisePacket::receive_accept(record.envelope_id, payload.clone())?;
    review(node, &mut packet, record, txn, SunriseStatus::Completed, Some(&payload)).await
}

/// The counterparty rejected the transfer.
pub async fn reject(node: &Node, sunrise_id: Ulid, rejection: Rejection) -> AdapterResult<Transaction> {
    let (record, txn) = reviewable(node, sunrise_id)?;
    let mut packet = SunrisePacket::receive_reject(record.envelope_id, rejection)?;
    review(node, &mut packet, record, txn, SunriseStatus::Rejected, None).await
}

fn reviewable(node: &Node, sunrise_id: Ulid) -> AdapterResult<(SunriseRecord, Transaction)> {
    let record = node.store.retrieve_sunrise(sunrise_id)?;
    let txn = node.store.retrieve_transaction(record.envelope_id)?;

    let reviewed = matches!(txn.status, Status::Accepted | Status::Completed | Status::Rejected);
    if record.status != SunriseStatus::Pending || reviewed {
        return Err(AdapterError::AlreadyReviewed(txn.status));
    }
    if record.is_expired() {
        return Err(AdapterError::Expired);
    }
    Ok((record, txn))
}

async fn review(
    node: &Node,
    packet: &mut SunrisePacket,
    mut record: SunriseRecord,
    txn: Transaction,
    status: SunriseStatus,
    accepted: Option<&Payload>,
) -> AdapterResult<Transaction> {
    if let Some(id) = txn.counterparty_id {
        packet.packet.counterparty = Some(node.store.retrieve_counterparty(id)?);
    }
    let db = node.store.prepare_transaction(record.envelope_id).await?;
    packet.packet.attach(db)?;

    let result = record_review(node, packet, &mut record, status, accepted);
    if let Err(e) = result {
        packet.packet.rollback();
        return Err(e);
    }
    packet.packet.commit()?;
    info!(parent: packet.packet.span(), status = %packet.packet.transaction.status, "Sunrise review recorded");
    Ok(packet.packet.transaction.clone())
}

fn record_review(
    node: &Node,
    packet: &mut SunrisePacket,
    record: &mut SunriseRecord,
    status: SunriseStatus,
    accepted: Option<&Payload>,
) -> AdapterResult<()> {
    if let Some(vasp) = accepted.and_then(beneficiary_vasp) {
        if let Err(e) = packet.update_counterparty(vasp) {
            warn!(parent: packet.packet.span(), error = %e, "Could not update counterparty from sunrise reply");
        }
    }

    let storage = node.storage_key("", SUNRISE_KEY_NAME)?;
    packet.save(&storage)?;

    record.status = status;
    packet.packet.db()?.update_sunrise(record)?;
    Ok(())
}

fn beneficiary_vasp(payload: &Payload) -> Option<&LegalPerson> {
    payload
        .identity
        .beneficiary_vasp
        .as_ref()
        .and_then(|vasp| vasp.beneficiary_vasp.as_ref())
        .and_then(|person| person.legal_person.as_ref())
}
