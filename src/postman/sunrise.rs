// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sunrise steps: invitations by email instead of a peer transfer.
//!
//! An outgoing Sunrise packet stores what we sent and, as its incoming side,
//! a `pending` record of the invitations. Both are sealed under the local
//! storage key since no remote key exists.

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{Packet, PostmanError, PostmanResult};
use crate::emails::{send_with_backoff, Backoff, EmailError, EmailSender, Message};
use crate::envelope::ivms101::{LegalPerson, LegalPersonNameType};
use crate::envelope::payload::{Sunrise, SunriseMessage};
use crate::envelope::{
    format_timestamp, Envelope, EnvelopeOptions, Payload, Rejection, TransactionPayload,
    TransferState,
};
use crate::keys::PublicKey;
use crate::store::{
    Contact, Counterparty, Direction, Protocol, Status, StoreError, SunriseRecord, SunriseStatus,
    Transaction, TransactionSource,
};
use crate::sunrise::{Token, DEFAULT_TTL_DAYS};

/// Channel recorded for emailed invitations.
pub const CHANNEL_EMAIL: &str = "email";

pub struct SunrisePacket {
    pub packet: Packet,
    pub messages: Vec<SunriseMessage>,
    payload: Option<Payload>,
}

impl SunrisePacket {
    /// Invite the counterparty to review `payload`.
    pub fn send(envelope_id: Uuid, payload: Payload) -> Self {
        Self {
            packet: Packet::send(envelope_id, payload.clone(), TransferState::Started, Protocol::Sunrise),
            messages: Vec::new(),
            payload: Some(payload),
        }
    }

    /// The counterparty accepted through the Sunrise portal.
    pub fn receive_accept(envelope_id: Uuid, payload: Payload) -> PostmanResult<Self> {
        let opts = || {
            EnvelopeOptions::default()
                .with_envelope_id(envelope_id)
                .with_transfer_state(TransferState::Accepted)
        };
        let mut packet = Packet::receive_envelope(Envelope::new(payload.clone(), opts()), Protocol::Sunrise)?;
        packet.outgoing.bind(Envelope::new(payload, opts()));
        Ok(Self {
            packet,
            messages: Vec::new(),
            payload: None,
        })
    }

    /// The counterparty rejected through the Sunrise portal.
    pub fn receive_reject(envelope_id: Uuid, rejection: Rejection) -> PostmanResult<Self> {
        let state = if rejection.retry {
            TransferState::Pending
        } else {
            TransferState::Rejected
        };
        let incoming = Envelope::reject(
            rejection.clone(),
            EnvelopeOptions::default().with_envelope_id(envelope_id),
        );
        let mut packet = Packet::receive_envelope(incoming, Protocol::Sunrise)?;
        packet.reject(rejection, state);
        Ok(Self {
            packet,
            messages: Vec::new(),
            payload: None,
        })
    }

    pub fn envelope_id(&self) -> Uuid {
        self.packet.envelope_id()
    }

    /// People to invite at the counterparty.
    pub fn contacts(&self) -> PostmanResult<Vec<Contact>> {
        let counterparty = self
            .packet
            .counterparty
            .as_ref()
            .ok_or(PostmanError::NoCounterparty)?;
        let contacts = counterparty.contacts.clone().unwrap_or_default();
        if contacts.is_empty() {
            return Err(PostmanError::NoContacts);
        }
        Ok(contacts)
    }

    /// Email a verification link to one contact and record the invitation.
    /// The record is written before the email goes out and is kept if the
    /// step is rolled back, so a delivered link always verifies.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_email(
        &mut self,
        contact: &Contact,
        sender: &dyn EmailSender,
        backoff: &Backoff,
        cancel: &CancellationToken,
        base_url: &str,
        organization: &str,
    ) -> PostmanResult<()> {
        if cancel.is_cancelled() {
            return Err(EmailError::Cancelled.into());
        }
        let envelope_id = self.envelope_id();
        let db = self.packet.db()?;

        let mut record = db.write_sunrise(SunriseRecord {
            envelope_id,
            email: contact.email.clone(),
            expiration: Utc::now() + TimeDelta::days(DEFAULT_TTL_DAYS),
            status: SunriseStatus::Draft,
            ..Default::default()
        })?;
        let id = record
            .id
            .ok_or_else(|| StoreError::NotFound("sunrise record id".into()))?;

        let (verification, signed) = Token::new(id, Some(record.expiration))?.sign()?;
        record.signature = signed.to_bytes()?;
        let mut record = db.write_sunrise(record)?;

        let url = verify_url(base_url, &verification.encode());
        let message = Message::sunrise_invite(&contact.email, organization, &url);
        send_with_backoff(sender, &message, backoff, cancel).await?;

        let sent_on = Utc::now();
        record.sent_on = Some(sent_on);
        record.status = SunriseStatus::Pending;
        let record = self.packet.db()?.write_sunrise(record)?;

        self.messages.push(SunriseMessage {
            recipient: contact.name.clone(),
            email: contact.email.clone(),
            channel: CHANNEL_EMAIL.to_string(),
            sent_at: format_timestamp(sent_on),
            reply_not_before: format_timestamp(record.expiration),
        });
        tracing::info!(parent: self.packet.span(), email = %contact.email, "Sunrise verification token sent");
        Ok(())
    }

    /// Record the invitations as the pending incoming side.
    pub fn pending(&mut self) -> PostmanResult<()> {
        if self.messages.is_empty() {
            return Err(PostmanError::NoMessages);
        }
        let original = self.payload.clone().unwrap_or_default();

        let sunrise = Sunrise {
            envelope_id: self.envelope_id().to_string(),
            counterparty: self
                .packet
                .counterparty
                .as_ref()
                .map(|cp| cp.name.clone())
                .unwrap_or_default(),
            messages: self.messages.clone(),
            transaction: original.transaction.transaction().cloned(),
        };
        let payload = Payload {
            identity: original.identity,
            transaction: TransactionPayload::Sunrise(sunrise),
            sent_at: original.sent_at,
            received_at: original.received_at,
        };

        self.packet.incoming.bind_envelope(Envelope::new(
            payload,
            EnvelopeOptions::default()
                .with_envelope_id(self.envelope_id())
                .with_transfer_state(TransferState::Pending),
        ));
        Ok(())
    }

    /// Seal both sides under the storage key.
    pub fn seal(&mut self, storage: &PublicKey) -> PostmanResult<()> {
        let out = &mut self.packet.outgoing;
        out.sealing_key = Some(storage.clone());
        out.storage_key = Some(storage.clone());
        out.seal()?;

        if self.packet.incoming.is_bound() {
            self.packet.incoming.seal_for_storage(storage)?;
        }
        Ok(())
    }

    /// Persist a new Sunrise transfer after the invitations went out.
    pub fn create(&mut self, storage: &PublicKey) -> PostmanResult<()> {
        self.packet.add_counterparty()?;

        let mut update = self
            .packet
            .outgoing
            .payload()
            .map(super::transaction_from_payload)
            .unwrap_or_default();
        update.source = TransactionSource::Local;
        update.status = Status::Pending;
        update.last_update = Some(Utc::now());
        self.packet.db()?.update(&update)?;

        self.pending()?;
        self.seal(storage)?;
        self.packet.store_envelopes()?;
        self.packet.refresh()
    }

    /// Persist a reply received through the portal.
    pub fn save(&mut self, storage: &PublicKey) -> PostmanResult<()> {
        let status = match self.packet.request {
            Direction::Incoming => self
                .packet
                .outgoing
                .status(self.packet.reply, self.packet.incoming.transfer_state()),
            Direction::Outgoing => self.packet.incoming.status(),
        };
        let update = Transaction {
            status,
            last_update: Some(Utc::now()),
            ..Default::default()
        };
        self.packet.db()?.update(&update)?;
        self.packet.refresh()?;

        self.seal(storage)?;
        self.packet.store_envelopes()?;
        self.packet.refresh()
    }

    /// Update the counterparty from the beneficiary VASP it described.
    pub fn update_counterparty(&mut self, vasp: &LegalPerson) -> PostmanResult<()> {
        let mut counterparty = self
            .packet
            .counterparty
            .clone()
            .ok_or(PostmanError::NoCounterparty)?;
        if !apply_legal_person(&mut counterparty, vasp) {
            return Ok(());
        }

        let updated = self.packet.db()?.update_counterparty(&counterparty)?;
        self.packet.counterparty = Some(updated);
        self.packet.refresh()
    }
}

/// Link emailed to a contact.
pub fn verify_url(base_url: &str, token: &str) -> String {
    format!("{}/sunrise/verify?token={token}", base_url.trim_end_matches('/'))
}

/// Copy the IVMS101 record, legal name and country onto a counterparty.
/// Returns whether anything changed.
fn apply_legal_person(counterparty: &mut Counterparty, vasp: &LegalPerson) -> bool {
    let mut updated = false;

    if vasp.validate().is_ok() {
        counterparty.ivms_record = Some(vasp.clone());
        updated = true;
    }

    if let Some(name) = &vasp.name {
        let legal = name.name_identifiers.iter().find(|id| {
            id.legal_person_name_identifier_type == LegalPersonNameType::Legal
                && !id.legal_person_name.is_empty()
        });
        if let Some(legal) = legal {
            counterparty.name = legal.legal_person_name.clone();
            updated = true;
        } else if counterparty.name.is_empty() {
            if let Some(first) = name.name_identifiers.first() {
                counterparty.name = first.legal_person_name.clone();
                updated = true;
            }
        }
    }

    if !vasp.country_of_registration.is_empty() {
        counterparty.country = Some(vasp.country_of_registration.clone());
        updated = true;
    }

    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emails::MemorySender;
    use crate::envelope::ivms101::{LegalPersonName, LegalPersonNameId};
    use crate::envelope::RejectionCode;
    use crate::keys::fixtures as keys;
    use crate::postman::fixtures;
    use crate::store::testing::temp_store;
    use crate::sunrise::{SignedToken, VerificationToken};

    #[tokio::test]
    async fn invitations_are_recorded_and_sealed_locally() {
        let (_dir, store) = temp_store();
        let storage = keys::local();
        let counterparty = store
            .get_or_create_sunrise_counterparty("barry@example.com", "SpudCoin Exchange")
            .unwrap();

        let id = Uuid::new_v4();
        let mut packet = SunrisePacket::send(id, fixtures::btc_transfer());
        packet.packet.counterparty = Some(counterparty);
        packet
            .packet
            .attach(store.prepare_transaction(id).await.unwrap())
            .unwrap();
        assert!(matches!(packet.pending(), Err(PostmanError::NoMessages)));

        let sender = MemorySender::new();
        let contacts = packet.contacts().unwrap();
        assert_eq!(contacts.len(), 1);
        for contact in &contacts {
            packet
                .send_email(
                    contact,
                    &sender,
                    &Backoff::default(),
                    &CancellationToken::new(),
                    "https://envoy.example.com/",
                    "Envoy Node",
                )
                .await
                .unwrap();
        }

        packet.create(storage.public_key()).unwrap();
        packet.packet.commit().unwrap();

        let txn = store.retrieve_transaction(id).unwrap();
        assert_eq!(txn.status, Status::Pending);
        assert_eq!(txn.source, TransactionSource::Local);
        assert_eq!(txn.counterparty, "SpudCoin Exchange");
        assert_eq!(txn.envelope_count, 2);

        let records = store.list_sunrise(id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, SunriseStatus::Pending);
        assert!(records[0].sent_on.is_some());

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        let token = sent[0]
            .text
            .split("token=")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap();
        let verification = VerificationToken::parse(token).unwrap();
        assert_eq!(Some(verification.sunrise_id()), records[0].id);
        let signed = SignedToken::from_bytes(&records[0].signature).unwrap();
        assert!(signed.verify(&verification).unwrap());

        let envelopes = store
            .list_secure_envelopes(id, &Default::default())
            .unwrap()
            .items;
        for envelope in &envelopes {
            assert_eq!(envelope.public_key.as_deref(), Some(storage.public_key_signature()));
            envelope.open(&storage).unwrap();
        }
        let pending = envelopes
            .iter()
            .find(|env| env.direction == Direction::Incoming)
            .unwrap()
            .open(&storage)
            .unwrap();
        match &pending.payload().unwrap().transaction {
            TransactionPayload::Sunrise(sunrise) => {
                assert_eq!(sunrise.messages.len(), 1);
                assert_eq!(sunrise.messages[0].channel, CHANNEL_EMAIL);
                assert_eq!(sunrise.counterparty, "SpudCoin Exchange");
            }
            other => panic!("unexpected transaction payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn sent_invitations_survive_rollback() {
        let (_dir, store) = temp_store();
        let counterparty = store
            .create_counterparty(Counterparty {
                source: crate::store::CounterpartySource::Sunrise,
                protocol: Protocol::Sunrise,
                name: "SpudCoin Exchange".into(),
                contacts: Some(vec![
                    Contact {
                        name: "Barry".into(),
                        email: "barry@example.com".into(),
                        ..Default::default()
                    },
                    Contact {
                        name: "Jo".into(),
                        email: "jo@example.com".into(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            })
            .unwrap();

        let id = Uuid::new_v4();
        let mut packet = SunrisePacket::send(id, fixtures::btc_transfer());
        packet.packet.counterparty = Some(counterparty);
        packet
            .packet
            .attach(store.prepare_transaction(id).await.unwrap())
            .unwrap();

        let sender = MemorySender::new();
        let cancel = CancellationToken::new();
        let backoff = Backoff::default();
        let contacts = packet.contacts().unwrap();
        packet
            .send_email(&contacts[0], &sender, &backoff, &cancel, "https://envoy.example.com", "Envoy Node")
            .await
            .unwrap();
        cancel.cancel();
        let err = packet
            .send_email(&contacts[1], &sender, &backoff, &cancel, "https://envoy.example.com", "Envoy Node")
            .await
            .unwrap_err();
        assert!(matches!(err, PostmanError::Email(EmailError::Cancelled)));
        assert_eq!(store.list_sunrise(id).unwrap().len(), 1);
        packet.packet.rollback();

        assert!(!store.transaction_exists(id).unwrap());
        let records = store.list_sunrise(id).unwrap();
        let first = records
            .iter()
            .find(|rec| rec.email == "barry@example.com")
            .unwrap();
        assert_eq!(first.status, SunriseStatus::Pending);

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        let token = sent[0]
            .text
            .split("token=")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap();
        let verification = VerificationToken::parse(token).unwrap();
        let record = store.retrieve_sunrise(verification.sunrise_id()).unwrap();
        let signed = SignedToken::from_bytes(&record.signature).unwrap();
        assert!(signed.verify(&verification).unwrap());
    }

    #[test]
    fn reject_state_follows_retry() {
        let id = Uuid::new_v4();
        let packet = SunrisePacket::receive_reject(
            id,
            Rejection::new(RejectionCode::IncompleteIdentity, "missing address", true),
        )
        .unwrap();
        assert!(packet.packet.incoming.is_error());
        assert_eq!(packet.packet.outgoing.transfer_state(), TransferState::Pending);
        assert_eq!(packet.envelope_id(), id);

        let packet = SunrisePacket::receive_reject(
            id,
            Rejection::new(RejectionCode::HighRisk, "no", false),
        )
        .unwrap();
        assert_eq!(packet.packet.outgoing.transfer_state(), TransferState::Rejected);
    }

    #[test]
    fn legal_person_updates_counterparty() {
        let mut cp = Counterparty {
            name: "SpudCoin Exchange".into(),
            ..Default::default()
        };
        let vasp = LegalPerson {
            name: Some(LegalPersonName {
                name_identifiers: vec![LegalPersonNameId {
                    legal_person_name: "SpudCoin Exchange Ltd".into(),
                    legal_person_name_identifier_type: LegalPersonNameType::Legal,
                }],
            }),
            country_of_registration: "GB".into(),
            ..Default::default()
        };
        assert!(apply_legal_person(&mut cp, &vasp));
        assert_eq!(cp.name, "SpudCoin Exchange Ltd");
        assert_eq!(cp.country.as_deref(), Some("GB"));
        assert!(cp.ivms_record.is_some());

        assert!(!apply_legal_person(&mut cp, &LegalPerson::default()));
    }

    #[test]
    fn verify_links() {
        assert_eq!(
            verify_url("https://envoy.example.com/", "abc"),
            "https://envoy.example.com/sunrise/verify?token=abc"
        );
    }
}
