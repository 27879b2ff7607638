// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Postman
//!
//! A [`Packet`] carries one step of a transfer: the envelope we send, the
//! envelope we receive, and the prepared transaction both are stored in.
//!
//! ```text
//!   request = outgoing             request = incoming
//!   ------------------             ------------------
//!   Out  --seal-->  peer           peer  --wire-->  In
//!   In   <--wire--  peer           Out   --seal-->  peer
//!   store Out, then In             store In, then Out
//! ```
//!
//! Protocol specific steps live in [`sunrise`] and [`trp`]; transport lives
//! in the adapters.

pub mod incoming;
pub mod outgoing;
pub mod payload;
pub mod sunrise;
pub mod trp;

use thiserror::Error;
use tracing::Span;
use uuid::Uuid;

use crate::emails::EmailError;
use crate::envelope::{
    Envelope, EnvelopeError, EnvelopeOptions, Payload, Rejection, SecureEnvelope, TransferState,
};
use crate::keychain::KeyError;
use crate::keys::PublicKey;
use crate::peers::PeerInfo;
use crate::store::{
    Counterparty, Direction, EnvelopeRecord, PreparedTransaction, Protocol, StoreError,
    Transaction, TransactionSource,
};
use crate::sunrise::TokenError;
use crate::trp::TrpError;

pub use incoming::Incoming;
pub use outgoing::Outgoing;
pub use payload::{find_name, transaction_from_payload};
pub use sunrise::SunrisePacket;
pub use trp::TrpPacket;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum PostmanError {
    #[error("packet has no prepared transaction")]
    NoDatabase,

    #[error("packet has no counterparty")]
    NoCounterparty,

    #[error("no sealing key for outgoing envelope")]
    NoSealingKey,

    #[error("no storage key for envelope")]
    NoStorageKey,

    #[error("no unsealing key for incoming envelope")]
    NoUnsealingKey,

    #[error("packet has no envelope")]
    NoEnvelope,

    #[error("no sunrise messages were sent")]
    NoMessages,

    #[error("counterparty has no contacts")]
    NoContacts,

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Trp(#[from] TrpError),
}

pub type PostmanResult<T> = Result<T, PostmanError>;

// =============================================================================
// Packet
// =============================================================================

pub struct Packet {
    envelope_id: Uuid,
    pub protocol: Protocol,
    pub request: Direction,
    pub reply: Direction,
    pub incoming: Incoming,
    pub outgoing: Outgoing,
    pub db: Option<PreparedTransaction>,
    pub transaction: Transaction,
    pub counterparty: Option<Counterparty>,
    /// Remote node for TRISA exchanges.
    pub peer: Option<PeerInfo>,
    span: Span,
}

impl Packet {
    fn new(envelope_id: Uuid, protocol: Protocol, request: Direction) -> Self {
        let span = tracing::info_span!(
            "packet",
            envelope_id = %envelope_id,
            direction = %request,
            protocol = %protocol,
        );
        Self {
            envelope_id,
            protocol,
            request,
            reply: request.reverse(),
            incoming: Incoming::default(),
            outgoing: Outgoing::default(),
            db: None,
            transaction: Transaction::default(),
            counterparty: None,
            peer: None,
            span,
        }
    }

    /// Start an outgoing step with a clear envelope. The incoming side stays
    /// empty until the reply arrives.
    pub fn send(envelope_id: Uuid, payload: Payload, state: TransferState, protocol: Protocol) -> Self {
        let mut packet = Self::new(envelope_id, protocol, Direction::Outgoing);
        packet.outgoing.bind(Envelope::new(
            payload,
            EnvelopeOptions::default()
                .with_envelope_id(envelope_id)
                .with_transfer_state(state),
        ));
        packet
    }

    /// Start an incoming step from a wire envelope.
    pub fn receive(wire: SecureEnvelope, protocol: Protocol) -> PostmanResult<Self> {
        let envelope_id = wire.uuid()?;
        let mut packet = Self::new(envelope_id, protocol, Direction::Incoming);
        packet.incoming.bind(wire);
        Ok(packet)
    }

    /// Start an incoming step from an envelope built on this node.
    pub fn receive_envelope(envelope: Envelope, protocol: Protocol) -> PostmanResult<Self> {
        let envelope_id = envelope.uuid()?;
        let mut packet = Self::new(envelope_id, protocol, Direction::Incoming);
        packet.incoming.bind_envelope(envelope);
        Ok(packet)
    }

    /// Id of the request envelope, shared by every envelope of the transfer.
    pub fn envelope_id(&self) -> Uuid {
        self.envelope_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn remote(&self) -> Option<&str> {
        if let Some(peer) = &self.peer {
            return Some(peer.common_name.as_str());
        }
        self.counterparty
            .as_ref()
            .map(|cp| cp.common_name.as_str())
            .filter(|cn| !cn.is_empty())
    }

    // -------------------------------------------------------------------------
    // Replies
    // -------------------------------------------------------------------------

    /// Answer the request with a payload.
    pub fn reply(&mut self, payload: Payload, state: TransferState) {
        self.outgoing.bind(Envelope::new(
            payload,
            EnvelopeOptions::default()
                .with_envelope_id(self.envelope_id)
                .with_transfer_state(state),
        ));
    }

    /// Answer the request with a rejection.
    pub fn reject(&mut self, rejection: Rejection, state: TransferState) {
        tracing::info!(
            parent: &self.span,
            code = %rejection.code,
            retry = rejection.retry,
            "Rejecting envelope"
        );
        self.outgoing.bind(Envelope::reject(
            rejection,
            EnvelopeOptions::default()
                .with_envelope_id(self.envelope_id)
                .with_transfer_state(state),
        ));
    }

    // -------------------------------------------------------------------------
    // Database
    // -------------------------------------------------------------------------

    /// Attach the prepared transaction for this transfer.
    pub fn attach(&mut self, db: PreparedTransaction) -> PostmanResult<()> {
        self.transaction = db.fetch()?;
        self.db = Some(db);
        Ok(())
    }

    pub fn db(&mut self) -> PostmanResult<&mut PreparedTransaction> {
        self.db.as_mut().ok_or(PostmanError::NoDatabase)
    }

    pub fn created(&self) -> bool {
        self.db.as_ref().is_some_and(PreparedTransaction::created)
    }

    /// Re-read the transfer including staged changes.
    pub fn refresh(&mut self) -> PostmanResult<()> {
        let txn = self.db()?.fetch()?;
        self.transaction = txn;
        Ok(())
    }

    /// Associate the packet's counterparty with the transfer. A TRISA peer
    /// seen for the first time is recorded from its directory details.
    pub fn add_counterparty(&mut self) -> PostmanResult<()> {
        let db = self.db.as_mut().ok_or(PostmanError::NoDatabase)?;

        let resolved = match (&self.counterparty, &self.peer) {
            (Some(counterparty), _) => db.add_counterparty(counterparty.clone())?,
            (None, Some(peer)) => match db.lookup_counterparty("common_name", &peer.common_name) {
                Ok(found) => db.add_counterparty(found)?,
                Err(e) if e.is_not_found() => {
                    let model = peer.model();
                    if model.has_directory_pair() {
                        db.add_counterparty(model)?
                    } else {
                        db.create_counterparty(model)?
                    }
                }
                Err(e) => return Err(e.into()),
            },
            (None, None) => return Err(PostmanError::NoCounterparty),
        };

        self.counterparty = Some(resolved);
        Ok(())
    }

    /// Record what we sent. A transfer this node starts is first described
    /// from the outgoing payload.
    pub fn update_from_outgoing(&mut self) -> PostmanResult<()> {
        let mut update = Transaction::default();
        if self.created() && self.request == Direction::Outgoing {
            if let Some(payload) = self.outgoing.payload() {
                update = transaction_from_payload(payload);
            }
            self.add_counterparty()?;
            update.source = TransactionSource::Local;
        }

        update.status = self
            .outgoing
            .status(self.reply, self.incoming.transfer_state());
        update.last_update = self.outgoing.timestamp();
        self.db()?.update(&update)?;
        self.refresh()
    }

    /// Record what we received. A transfer the counterparty starts is first
    /// described from the incoming payload.
    pub fn update_from_incoming(&mut self) -> PostmanResult<()> {
        let mut update = Transaction::default();
        if self.created() && self.request == Direction::Incoming {
            if let Some(payload) = self.incoming.payload() {
                update = transaction_from_payload(payload);
            }
            self.add_counterparty()?;
            update.source = TransactionSource::Remote;
        }

        update.status = self.incoming.status();
        update.last_update = self
            .incoming
            .envelope()
            .and_then(|env| env.timestamp().ok());
        self.db()?.update(&update)?;
        self.refresh()
    }

    /// Set the storage key on both sides.
    pub fn set_storage_key(&mut self, storage: &PublicKey) {
        self.incoming.storage_key = Some(storage.clone());
        self.outgoing.storage_key = Some(storage.clone());
    }

    /// Stage both envelopes, request first, the reply pointing back at it.
    pub fn store_envelopes(&mut self) -> PostmanResult<Vec<EnvelopeRecord>> {
        let remote = self.remote().map(str::to_string);
        let remote = remote.as_deref();

        let (first, second) = match self.request {
            Direction::Outgoing => (
                self.outgoing_model(remote)?,
                self.incoming_model(remote)?,
            ),
            Direction::Incoming => (
                self.incoming_model(remote)?,
                self.outgoing_model(remote)?,
            ),
        };
        self.stage(first, second)
    }

    fn stage(
        &mut self,
        first: Option<EnvelopeRecord>,
        second: Option<EnvelopeRecord>,
    ) -> PostmanResult<Vec<EnvelopeRecord>> {
        let db = self.db()?;
        let mut stored = Vec::with_capacity(2);
        let mut previous = None;
        for mut record in [first, second].into_iter().flatten() {
            record.reply_to = previous;
            let record = db.add_envelope(record)?;
            previous = record.id;
            stored.push(record);
        }
        Ok(stored)
    }

    fn outgoing_model(&self, remote: Option<&str>) -> PostmanResult<Option<EnvelopeRecord>> {
        if !self.outgoing.is_bound() {
            return Ok(None);
        }
        self.outgoing.model(remote).map(Some)
    }

    fn incoming_model(&self, remote: Option<&str>) -> PostmanResult<Option<EnvelopeRecord>> {
        if !self.incoming.is_bound() {
            return Ok(None);
        }
        self.incoming.model(remote).map(Some)
    }

    pub fn commit(&mut self) -> PostmanResult<()> {
        self.db()?.commit()?;
        Ok(())
    }

    /// Discard staged changes; a packet without a database is left alone.
    pub fn rollback(&mut self) {
        if let Some(db) = self.db.as_mut() {
            db.rollback();
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::envelope::ivms101::{
        Beneficiary, IdentityPayload, NaturalPerson, NaturalPersonName, NaturalPersonNameId,
        NaturalPersonNameType, Originator, Person,
    };
    use crate::envelope::payload::{Transaction, TransactionPayload};
    use crate::envelope::Payload;

    fn person(primary: &str, secondary: &str) -> Person {
        Person::natural(NaturalPerson {
            name: Some(NaturalPersonName {
                name_identifiers: vec![NaturalPersonNameId {
                    primary_identifier: primary.to_string(),
                    secondary_identifier: secondary.to_string(),
                    name_identifier_type: NaturalPersonNameType::Legal,
                }],
            }),
            ..Default::default()
        })
    }

    /// Payload of the reference BTC transfer.
    pub fn btc_transfer() -> Payload {
        Payload {
            identity: IdentityPayload {
                originator: Some(Originator {
                    originator_persons: vec![person("Jones", "Mary")],
                    account_numbers: vec!["mrfAEzGzK23kU23FxrToDRPmV1ReNfX43G".into()],
                }),
                beneficiary: Some(Beneficiary {
                    beneficiary_persons: vec![person("Smith", "John")],
                    account_numbers: vec!["n3Vgn8wF6ZkpKSe186NnytLPXdZ6j1JbHg".into()],
                }),
                ..Default::default()
            },
            transaction: TransactionPayload::Transaction(Transaction {
                originator: "mrfAEzGzK23kU23FxrToDRPmV1ReNfX43G".into(),
                beneficiary: "n3Vgn8wF6ZkpKSe186NnytLPXdZ6j1JbHg".into(),
                amount: 0.00099128,
                network: "BTC".into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
