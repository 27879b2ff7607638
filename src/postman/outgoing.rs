// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The envelope this node sends to the counterparty.

use chrono::{DateTime, Utc};

use crate::envelope::{
    Envelope, EnvelopeOptions, EnvelopeResult, EnvelopeState, Payload, Rejection, SecureEnvelope,
    TransferState,
};
use crate::keys::PublicKey;
use crate::store::{Direction, EnvelopeRecord, Status};

use super::{PostmanError, PostmanResult};

#[derive(Debug, Default)]
pub struct Outgoing {
    envelope: Option<Envelope>,
    pub sealing_key: Option<PublicKey>,
    pub storage_key: Option<PublicKey>,
}

impl Outgoing {
    pub fn bind(&mut self, envelope: Envelope) {
        self.envelope = Some(envelope);
    }

    pub fn is_bound(&self) -> bool {
        self.envelope.is_some()
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    pub fn is_error(&self) -> bool {
        self.envelope.as_ref().is_some_and(Envelope::is_error)
    }

    pub fn error(&self) -> Option<&Rejection> {
        self.envelope.as_ref().and_then(Envelope::error)
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.envelope.as_ref().and_then(Envelope::payload)
    }

    pub fn transfer_state(&self) -> TransferState {
        self.envelope
            .as_ref()
            .map(Envelope::transfer_state)
            .unwrap_or_default()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.envelope.as_ref().and_then(|env| env.timestamp().ok())
    }

    /// The wire form to transmit.
    pub fn proto(&self) -> PostmanResult<&SecureEnvelope> {
        self.envelope
            .as_ref()
            .map(Envelope::proto)
            .ok_or(PostmanError::NoEnvelope)
    }

    /// Encrypt and seal with the sealing key. Error envelopes travel as they
    /// are. A rejection raised by the codec replaces the envelope with an
    /// error envelope carrying it.
    pub fn seal(&mut self) -> PostmanResult<()> {
        let envelope = self.envelope.as_mut().ok_or(PostmanError::NoEnvelope)?;
        if envelope.is_error() {
            return Ok(());
        }

        let result = match (envelope.state(), &self.sealing_key) {
            (EnvelopeState::Sealed, _) => Ok(()),
            (_, None) => return Err(PostmanError::NoSealingKey),
            (EnvelopeState::Clear, Some(key)) => encrypt_and_seal(envelope, key),
            (_, Some(key)) => envelope.seal(key),
        };

        if let Err(e) = result {
            let rejection = e.into_rejection()?;
            tracing::warn!(
                envelope_id = %envelope.id(),
                code = %rejection.code,
                "Could not seal outgoing envelope, sending rejection"
            );
            let state = if rejection.retry {
                TransferState::Pending
            } else {
                TransferState::Rejected
            };
            let mut opts = EnvelopeOptions::default().with_transfer_state(state);
            if let Ok(id) = envelope.uuid() {
                opts = opts.with_envelope_id(id);
            }
            *envelope = Envelope::reject(rejection, opts);
        }
        Ok(())
    }

    /// Transfer status implied by what we sent. `reply` is the direction of
    /// the reply in this exchange; `incoming` is the state we answered.
    pub fn status(&self, reply: Direction, incoming: TransferState) -> Status {
        let Some(envelope) = &self.envelope else {
            return Status::Unspecified;
        };
        let state = envelope.transfer_state();

        if reply == Direction::Outgoing {
            return match state {
                TransferState::Pending => match incoming {
                    TransferState::Unspecified | TransferState::Started | TransferState::Review => {
                        Status::Review
                    }
                    TransferState::Repair => Status::Repair,
                    _ => Status::Unspecified,
                },
                TransferState::Review | TransferState::Repair => Status::Pending,
                TransferState::Accepted => Status::Accepted,
                TransferState::Completed => Status::Completed,
                TransferState::Rejected => Status::Rejected,
                TransferState::Unspecified if envelope.is_error() => error_status(envelope),
                _ => Status::Unspecified,
            };
        }

        match state {
            TransferState::Started => Status::Draft,
            TransferState::Pending => Status::Review,
            TransferState::Review | TransferState::Repair => Status::Pending,
            TransferState::Accepted => Status::Accepted,
            TransferState::Completed => Status::Completed,
            TransferState::Rejected => Status::Rejected,
            TransferState::Unspecified if envelope.is_error() => error_status(envelope),
            TransferState::Unspecified => Status::Unspecified,
        }
    }

    /// Storage record for the sent envelope with its keys resealed under the
    /// storage key. Error envelopes carry no keys.
    pub fn model(&self, remote: Option<&str>) -> PostmanResult<EnvelopeRecord> {
        let envelope = self.envelope.as_ref().ok_or(PostmanError::NoEnvelope)?;
        let mut record = EnvelopeRecord::from_envelope(envelope, Direction::Outgoing);
        record.remote = remote.map(str::to_string);

        if envelope.is_error() {
            return Ok(record);
        }

        let storage = self.storage_key.as_ref().ok_or(PostmanError::NoStorageKey)?;
        let keys = envelope.reseal(storage)?;
        record.encryption_key = keys.encryption_key;
        record.hmac_secret = keys.hmac_secret;
        record.public_key = Some(keys.public_key_signature);
        record.valid_hmac = Some(envelope.validate_hmac()?);
        Ok(record)
    }
}

fn encrypt_and_seal(envelope: &mut Envelope, key: &PublicKey) -> EnvelopeResult<()> {
    envelope.encrypt()?;
    envelope.seal(key)
}

fn error_status(envelope: &Envelope) -> Status {
    match envelope.error() {
        Some(rejection) if rejection.retry => Status::Pending,
        _ => Status::Rejected,
    }
}
