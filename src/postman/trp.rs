// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TRP steps: inquiries and resolutions recorded as envelopes.
//!
//! TRP messages are plain JSON over mutual TLS, so both sides of an exchange
//! are built locally and sealed under the storage key before they are stored.

use uuid::Uuid;

use super::{Packet, PostmanResult};
use crate::envelope::payload::{Transaction, TrpHeaders, TrpTransaction};
use crate::envelope::{Envelope, EnvelopeOptions, Payload, TransactionPayload, TransferState};
use crate::keys::PublicKey;
use crate::store::Protocol;
use crate::trp::{self, Confirmation, Info, Inquiry, Resolution};

pub struct TrpPacket {
    pub packet: Packet,
    pub inquiry: Inquiry,
    pub resolution: Option<Resolution>,
}

impl TrpPacket {
    /// An inquiry received from an originator.
    pub fn receive_inquiry(inquiry: Inquiry) -> PostmanResult<Self> {
        let envelope_id = inquiry.info.envelope_id()?;
        let envelope = Envelope::new(
            trp::payload_from_inquiry(&inquiry),
            EnvelopeOptions::default()
                .with_envelope_id(envelope_id)
                .with_transfer_state(TransferState::Started),
        );
        Ok(Self {
            packet: Packet::receive_envelope(envelope, Protocol::Trp)?,
            inquiry,
            resolution: None,
        })
    }

    /// An inquiry this node sends for `payload`.
    pub fn send_inquiry(envelope_id: Uuid, payload: Payload, callback: &str) -> Self {
        let inquiry = trp::inquiry_from_payload(envelope_id, &payload, callback);
        Self {
            packet: Packet::send(envelope_id, payload, TransferState::Started, Protocol::Trp),
            inquiry,
            resolution: None,
        }
    }

    pub fn envelope_id(&self) -> Uuid {
        self.packet.envelope_id()
    }

    pub fn common_name(&self) -> &str {
        self.packet.remote().unwrap_or_default()
    }

    /// Record the answer to a received inquiry as the outgoing side.
    pub fn resolve(&mut self, resolution: Resolution) {
        let payload = self.resolution_payload(&resolution);
        self.packet.reply(payload, resolution_state(&resolution));
        self.resolution = Some(resolution);
    }

    /// Record the answer to a sent inquiry as the incoming side.
    pub fn bind_resolution(&mut self, resolution: Resolution) {
        let payload = self.resolution_payload(&resolution);
        self.packet.incoming.bind_envelope(Envelope::new(
            payload,
            EnvelopeOptions::default()
                .with_envelope_id(self.envelope_id())
                .with_transfer_state(resolution_state(&resolution)),
        ));
        self.resolution = Some(resolution);
    }

    fn resolution_payload(&self, resolution: &Resolution) -> Payload {
        let request = trp::payload_from_inquiry(&self.inquiry);
        let extensions = serde_json::to_string(resolution).unwrap_or_default();
        Payload {
            identity: request.identity,
            transaction: TransactionPayload::Trp(TrpTransaction {
                envelope_id: self.envelope_id().to_string(),
                headers: TrpHeaders {
                    version: resolution
                        .version
                        .clone()
                        .unwrap_or_else(|| trp::API_VERSION.to_string()),
                    request_identifier: self.envelope_id().to_string(),
                    extensions: resolution.info.api_extensions.clone(),
                },
                inquiry: None,
                transaction: request.transaction.transaction().cloned(),
                extensions,
            }),
            sent_at: crate::envelope::format_timestamp(chrono::Utc::now()),
            received_at: String::new(),
        }
    }

    /// Seal both sides under the storage key.
    pub fn seal(&mut self, storage: &PublicKey) -> PostmanResult<()> {
        let out = &mut self.packet.outgoing;
        if out.is_bound() {
            out.sealing_key = Some(storage.clone());
            out.storage_key = Some(storage.clone());
            out.seal()?;
        }
        if self.packet.incoming.is_bound() {
            self.packet.incoming.seal_for_storage(storage)?;
        }
        Ok(())
    }
}

/// A resolution posted to our callback for an inquiry this node sent.
pub fn receive_resolution(resolution: &Resolution) -> PostmanResult<Packet> {
    let extensions = serde_json::to_string(resolution).unwrap_or_default();
    receive_update(&resolution.info, extensions, None, resolution_state(resolution))
}

/// The originator's confirmation or cancellation of a transfer we resolved.
pub fn receive_confirmation(confirmation: &Confirmation) -> PostmanResult<Packet> {
    let extensions = serde_json::to_string(confirmation).unwrap_or_default();
    let transaction = confirmation.txid.clone().map(|txid| Transaction {
        txid,
        ..Default::default()
    });
    receive_update(&confirmation.info, extensions, transaction, confirmation_state(confirmation))
}

fn receive_update(
    info: &Info,
    extensions: String,
    transaction: Option<Transaction>,
    state: TransferState,
) -> PostmanResult<Packet> {
    let envelope_id = info.envelope_id()?;
    let version = Some(info.api_version.clone())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| trp::API_VERSION.to_string());
    let payload = Payload {
        transaction: TransactionPayload::Trp(TrpTransaction {
            envelope_id: envelope_id.to_string(),
            headers: TrpHeaders {
                version,
                request_identifier: info.request_identifier.clone(),
                extensions: info.api_extensions.clone(),
            },
            inquiry: None,
            transaction,
            extensions,
        }),
        sent_at: crate::envelope::format_timestamp(chrono::Utc::now()),
        ..Default::default()
    };
    let envelope = Envelope::new(
        payload,
        EnvelopeOptions::default()
            .with_envelope_id(envelope_id)
            .with_transfer_state(state),
    );
    Packet::receive_envelope(envelope, Protocol::Trp)
}

/// Transfer state a confirmation stands for.
pub fn confirmation_state(confirmation: &Confirmation) -> TransferState {
    if confirmation.canceled.is_some() {
        TransferState::Rejected
    } else {
        TransferState::Completed
    }
}

/// Transfer state a resolution stands for.
pub fn resolution_state(resolution: &Resolution) -> TransferState {
    if resolution.approved.is_some() {
        TransferState::Accepted
    } else if resolution.rejected.is_some() {
        TransferState::Rejected
    } else {
        TransferState::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::fixtures;
    use crate::postman::fixtures::btc_transfer;
    use crate::trp::Approval;

    #[test]
    fn resolutions_map_to_states() {
        assert_eq!(resolution_state(&Resolution::pending()), TransferState::Pending);
        let approved = Resolution {
            approved: Some(Approval {
                address: "n3Vgn8wF6ZkpKSe186NnytLPXdZ6j1JbHg".into(),
                callback: "https://originator.example.com/trp/confirm".into(),
            }),
            ..Default::default()
        };
        assert_eq!(resolution_state(&approved), TransferState::Accepted);
        let rejected = Resolution {
            rejected: Some("unknown beneficiary".into()),
            ..Default::default()
        };
        assert_eq!(resolution_state(&rejected), TransferState::Rejected);
    }

    #[test]
    fn confirmation_is_recorded_as_incoming_envelope() {
        let id = Uuid::new_v4();
        let confirmation = Confirmation {
            info: Info::outgoing(id),
            txid: Some("4c1d1f0c".into()),
            canceled: None,
        };
        let packet = receive_confirmation(&confirmation).unwrap();
        assert_eq!(packet.envelope_id(), id);
        assert_eq!(packet.incoming.transfer_state(), TransferState::Completed);
        match &packet.incoming.payload().unwrap().transaction {
            TransactionPayload::Trp(trp) => {
                assert_eq!(trp.transaction.as_ref().unwrap().txid, "4c1d1f0c");
                assert!(trp.extensions.contains("4c1d1f0c"));
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let canceled = Confirmation {
            info: Info::outgoing(id),
            canceled: Some("customer withdrew".into()),
            ..Default::default()
        };
        assert_eq!(confirmation_state(&canceled), TransferState::Rejected);
    }

    #[test]
    fn outgoing_inquiry_records_resolution() {
        let id = Uuid::new_v4();
        let storage = fixtures::local();
        let mut packet =
            TrpPacket::send_inquiry(id, btc_transfer(), "https://originator.example.com/trp/callback");
        assert_eq!(packet.inquiry.info.request_identifier, id.to_string());

        packet.bind_resolution(Resolution::pending());
        packet.seal(storage.public_key()).unwrap();

        assert_eq!(packet.packet.incoming.transfer_state(), TransferState::Pending);
        let record = packet.packet.incoming.model(None).unwrap();
        let opened = record.open(&storage).unwrap();
        match &opened.payload().unwrap().transaction {
            TransactionPayload::Trp(trp) => {
                assert_eq!(trp.envelope_id, id.to_string());
                assert_eq!(trp.transaction.as_ref().unwrap().network, "BTC");
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
