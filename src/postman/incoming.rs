// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The envelope received from (or recorded on behalf of) the counterparty.

use crate::envelope::{
    Envelope, EnvelopeState, Payload, Rejection, SecureEnvelope, TransferState,
};
use crate::keys::{KeyPair, PublicKey};
use crate::store::{Direction, EnvelopeRecord, Status};

use super::{PostmanError, PostmanResult};

#[derive(Debug, Default)]
pub struct Incoming {
    envelope: Option<Envelope>,
    original: Option<SecureEnvelope>,
    pub unsealing_key: Option<KeyPair>,
    pub storage_key: Option<PublicKey>,
}

impl Incoming {
    /// Bind a wire envelope. The wire copy is kept since unsealing replaces
    /// the sealed keys on the working envelope.
    pub fn bind(&mut self, wire: SecureEnvelope) {
        self.original = Some(wire.clone());
        self.envelope = Some(Envelope::wrap(wire));
    }

    /// Bind an envelope built locally, such as a TRP inquiry or a Sunrise
    /// reply, which never crossed the wire as a secure envelope.
    pub fn bind_envelope(&mut self, envelope: Envelope) {
        self.original = Some(envelope.proto().clone());
        self.envelope = Some(envelope);
    }

    pub fn is_bound(&self) -> bool {
        self.envelope.is_some()
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    pub fn original(&self) -> Option<&SecureEnvelope> {
        self.original.as_ref()
    }

    /// Signature of the local key the counterparty sealed with.
    pub fn public_key_signature(&self) -> &str {
        self.original
            .as_ref()
            .map(|msg| msg.public_key_signature.as_str())
            .unwrap_or_default()
    }

    pub fn transfer_state(&self) -> TransferState {
        self.envelope
            .as_ref()
            .map(Envelope::transfer_state)
            .unwrap_or_default()
    }

    pub fn state(&self) -> Option<EnvelopeState> {
        self.envelope.as_ref().map(Envelope::state)
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

    /// Unseal with the unsealing key and decrypt. Codec rejections are
    /// returned as values for the caller to answer with.
    pub fn open(&mut self) -> PostmanResult<Option<Rejection>> {
        let envelope = self.envelope.as_mut().ok_or(PostmanError::NoEnvelope)?;
        if envelope.is_error() {
            return Ok(None);
        }

        let opened = match envelope.state() {
            EnvelopeState::Sealed => {
                let key = self
                    .unsealing_key
                    .as_ref()
                    .ok_or(PostmanError::NoUnsealingKey)?;
                envelope.open(key)
            }
            EnvelopeState::Unsealed | EnvelopeState::Encrypted => envelope.decrypt(),
            _ => Ok(()),
        };

        match opened {
            Ok(()) => Ok(None),
            Err(e) => Ok(Some(e.into_rejection()?)),
        }
    }

    /// Encrypt and seal a locally built envelope under the storage key.
    pub fn seal_for_storage(&mut self, storage: &PublicKey) -> PostmanResult<()> {
        let envelope = self.envelope.as_mut().ok_or(PostmanError::NoEnvelope)?;
        self.storage_key = Some(storage.clone());
        if envelope.is_error() {
            return Ok(());
        }

        if envelope.state() == EnvelopeState::Clear && envelope.crypto().is_none() {
            envelope.encrypt()?;
        }
        if matches!(envelope.state(), EnvelopeState::Encrypted | EnvelopeState::Unsealed) {
            envelope.seal(storage)?;
        }
        self.original = Some(envelope.proto().clone());
        Ok(())
    }

    /// Transfer status implied by the received transfer state.
    pub fn status(&self) -> Status {
        let Some(envelope) = &self.envelope else {
            return Status::Unspecified;
        };

        match envelope.transfer_state() {
            TransferState::Started | TransferState::Review => Status::Review,
            TransferState::Pending => Status::Pending,
            TransferState::Repair => Status::Repair,
            TransferState::Accepted => Status::Accepted,
            TransferState::Completed => Status::Completed,
            TransferState::Rejected => Status::Rejected,
            TransferState::Unspecified => match envelope.error() {
                Some(rejection) if rejection.retry => Status::Pending,
                Some(_) => Status::Rejected,
                None => Status::Unspecified,
            },
        }
    }

    /// Storage record for the received envelope. Keys are resealed under the
    /// storage key when the envelope was opened, otherwise the wire copy is
    /// kept as received.
    pub fn model(&self, remote: Option<&str>) -> PostmanResult<EnvelopeRecord> {
        let original = self.original.as_ref().ok_or(PostmanError::NoEnvelope)?;
        let envelope = self.envelope.as_ref().ok_or(PostmanError::NoEnvelope)?;

        let mut record = EnvelopeRecord::from_wire(original, Direction::Incoming);
        record.remote = remote.map(str::to_string);

        if envelope.is_error() || envelope.crypto().is_none() {
            return Ok(record);
        }

        if let Some(storage) = &self.storage_key {
            let keys = envelope.reseal(storage)?;
            record.encryption_key = keys.encryption_key;
            record.hmac_secret = keys.hmac_secret;
            record.public_key = Some(keys.public_key_signature);
        }
        record.valid_hmac = Some(envelope.validate_hmac()?);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ivms101::{IdentityPayload, Originator};
    use crate::envelope::{EnvelopeOptions, RejectionCode};
    use crate::keys::fixtures;

    fn payload() -> Payload {
        Payload {
            identity: IdentityPayload {
                originator: Some(Originator {
                    account_numbers: vec!["mrfAEzGzK23kU23FxrToDRPmV1ReNfX43G".into()],
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn sealed_for(key: &KeyPair, state: TransferState) -> SecureEnvelope {
        let mut env = Envelope::new(payload(), EnvelopeOptions::default().with_transfer_state(state));
        env.encrypt().unwrap();
        env.seal(key.public_key()).unwrap();
        env.into_proto()
    }

    #[test]
    fn opens_and_reseals_for_storage() {
        let local = fixtures::local();
        let wire = sealed_for(&local, TransferState::Accepted);

        let mut incoming = Incoming::default();
        incoming.bind(wire.clone());
        assert_eq!(incoming.public_key_signature(), local.public_key_signature());
        incoming.unsealing_key = Some(local.clone());
        assert!(incoming.open().unwrap().is_none());
        assert_eq!(incoming.payload(), Some(&payload()));
        assert_eq!(incoming.status(), Status::Accepted);

        incoming.storage_key = Some(local.public_key().clone());
        let record = incoming.model(Some("beneficiary.example.com")).unwrap();
        assert_eq!(record.valid_hmac, Some(true));
        assert_eq!(record.envelope, wire);
        assert_eq!(record.remote.as_deref(), Some("beneficiary.example.com"));

        let reopened = record.open(&local).unwrap();
        assert_eq!(reopened.payload(), Some(&payload()));
    }

    #[test]
    fn wrong_key_is_a_rejection() {
        let wire = sealed_for(&fixtures::remote(), TransferState::Started);
        let mut incoming = Incoming::default();
        incoming.bind(wire);
        incoming.unsealing_key = Some(fixtures::local());

        let rejection = incoming.open().unwrap().unwrap();
        assert_eq!(rejection.code, RejectionCode::InvalidKey);
        assert!(!rejection.retry);
    }

    #[test]
    fn sealed_without_key() {
        let mut incoming = Incoming::default();
        incoming.bind(sealed_for(&fixtures::local(), TransferState::Started));
        assert!(matches!(incoming.open(), Err(PostmanError::NoUnsealingKey)));
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (TransferState::Started, Status::Review),
            (TransferState::Pending, Status::Pending),
            (TransferState::Review, Status::Review),
            (TransferState::Repair, Status::Repair),
            (TransferState::Accepted, Status::Accepted),
            (TransferState::Completed, Status::Completed),
            (TransferState::Rejected, Status::Rejected),
        ];
        for (state, status) in cases {
            let mut incoming = Incoming::default();
            incoming.bind(sealed_for(&fixtures::local(), state));
            assert_eq!(incoming.status(), status, "{state:?}");
        }

        let retry = Envelope::reject(
            Rejection::new(RejectionCode::IncompleteIdentity, "missing dob", true),
            EnvelopeOptions::default(),
        );
        let mut incoming = Incoming::default();
        incoming.bind(retry.into_proto());
        assert_eq!(incoming.status(), Status::Pending);

        let fatal = Envelope::reject(
            Rejection::new(RejectionCode::HighRisk, "beneficiary not authorized", false),
            EnvelopeOptions::default(),
        );
        incoming.bind(fatal.into_proto());
        assert_eq!(incoming.status(), Status::Rejected);
        assert!(incoming.open().unwrap().is_none());

        let record = incoming.model(None).unwrap();
        assert!(record.is_error);
        assert_eq!(record.valid_hmac, None);
    }

    #[test]
    fn local_envelopes_are_sealed_under_storage() {
        let local = fixtures::local();
        let mut incoming = Incoming::default();
        incoming.bind_envelope(Envelope::new(
            payload(),
            EnvelopeOptions::default().with_transfer_state(TransferState::Pending),
        ));
        incoming.seal_for_storage(local.public_key()).unwrap();

        let record = incoming.model(None).unwrap();
        assert!(record.envelope.sealed);
        assert_eq!(record.public_key.as_deref(), Some(local.public_key_signature()));
        assert_eq!(record.open(&local).unwrap().payload(), Some(&payload()));
    }
}
