// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TRP transfers: JSON inquiries posted to the beneficiary over mutual TLS.

use tracing::{info, warn, Instrument};

use super::{AdapterError, AdapterResult, Node};
use crate::postman::trp::{receive_confirmation, receive_resolution, resolution_state};
use crate::postman::{Packet, PostmanError, TrpPacket};
use crate::resolver::{expect_protocol, PeerCertificate, ResolveError};
use crate::store::{Counterparty, CounterpartySource, Protocol, Transaction};
use crate::trp::{Confirmation, Info, Inquiry, Resolution};

/// Post the inquiry to the counterparty and record its resolution. Both
/// sides are sealed under the storage key; nothing is committed.
pub async fn send(node: &Node, packet: &mut TrpPacket) -> AdapterResult<()> {
    let span = packet.packet.span().clone();
    let counterparty = packet
        .packet
        .counterparty
        .as_ref()
        .ok_or(PostmanError::NoCounterparty)?;
    let endpoint = Some(counterparty.endpoint.as_str()).filter(|ep| !ep.is_empty());
    let peer = node.peers.lookup(&counterparty.common_name, endpoint)?;

    let resolution = peer
        .trp_inquiry(&packet.inquiry)
        .instrument(span.clone())
        .await?;
    info!(parent: &span, state = %resolution_state(&resolution), "TRP inquiry resolved");
    packet.bind_resolution(resolution);

    let storage = node.storage_key("", peer.common_name())?;
    packet.seal(&storage)?;
    Ok(())
}

/// Answer an inquiry from an originator. New transfers are held for review,
/// so the resolution is always pending.
///
/// The originator is matched by its client certificate. An originator we
/// have not met must present a certificate covering the callback host and
/// is recorded from the callback.
pub async fn handle_inquiry(
    node: &Node,
    inquiry: Inquiry,
    client: &PeerCertificate,
) -> AdapterResult<Resolution> {
    inquiry.validate()?;
    let mut packet = TrpPacket::receive_inquiry(inquiry)?;
    let span = packet.packet.span().clone();

    let known = match node.resolver.resolve_certificate(client) {
        Err(ResolveError::NotFound(what)) => {
            let host = packet.inquiry.callback_host()?;
            if !client.covers(&host) {
                warn!(parent: &span, %what, %host, "TRP inquiry callback not covered by client certificate");
                return Err(AdapterError::PeerMismatch(host));
            }
            node.resolver.resolve_callback(&packet.inquiry.callback)
        }
        found => found,
    };
    let known = known.and_then(|cp| expect_protocol(cp, Protocol::Trp));
    if let Err(e) = &known {
        if !matches!(e, ResolveError::NotFound(_)) {
            warn!(parent: &span, error = %e, "TRP originator cannot send inquiries");
        }
    }

    let db = node
        .store
        .prepare_transaction(packet.envelope_id())
        .instrument(span.clone())
        .await?;
    packet.packet.attach(db)?;

    let result = record_inquiry(node, &mut packet, known);
    if let Err(e) = result {
        packet.packet.rollback();
        return Err(e);
    }
    packet.packet.commit()?;

    info!(parent: &span, status = %packet.packet.transaction.status, "TRP inquiry received");
    let mut resolution = packet.resolution.unwrap_or_else(Resolution::pending);
    resolution.info = Info::outgoing(packet.packet.envelope_id());
    Ok(resolution)
}

fn record_inquiry(
    node: &Node,
    packet: &mut TrpPacket,
    known: Result<Counterparty, ResolveError>,
) -> AdapterResult<()> {
    let status = packet.packet.transaction.status;
    if status.is_concluded() {
        return Err(AdapterError::Concluded(packet.envelope_id(), status));
    }

    let counterparty = match known {
        Ok(counterparty) => counterparty,
        Err(ResolveError::NotFound(what)) => {
            let host = packet.inquiry.callback_host()?;
            warn!(parent: packet.packet.span(), %what, %host, "Unknown TRP originator, recording from callback");
            packet.packet.db()?.create_counterparty(Counterparty {
                source: CounterpartySource::User,
                protocol: Protocol::Trp,
                common_name: host.clone(),
                endpoint: packet.inquiry.callback.clone(),
                name: host,
                ..Default::default()
            })?
        }
        Err(e) => return Err(e.into()),
    };
    packet.packet.counterparty = Some(counterparty);

    packet.packet.update_from_incoming()?;
    packet.resolve(Resolution::pending());
    let storage = node.storage_key("", packet.common_name())?;
    packet.seal(&storage)?;
    packet.packet.store_envelopes()?;
    packet.packet.update_from_outgoing()?;
    Ok(())
}

/// Record a resolution posted back to our callback for an inquiry we sent.
pub async fn handle_resolve(
    node: &Node,
    resolution: Resolution,
    client: &PeerCertificate,
) -> AdapterResult<Transaction> {
    let packet = receive_resolution(&resolution)?;
    record_update(node, packet, client).await
}

/// Record the originator's confirmation of the on-chain transfer, or its
/// cancellation.
pub async fn handle_confirmation(
    node: &Node,
    confirmation: Confirmation,
    client: &PeerCertificate,
) -> AdapterResult<Transaction> {
    let packet = receive_confirmation(&confirmation)?;
    record_update(node, packet, client).await
}

/// Store a resolution or confirmation as an incoming envelope of the
/// transfer it names. Only the transfer's own TRP counterparty may post it,
/// and concluded transfers are left as they are.
async fn record_update(
    node: &Node,
    mut packet: Packet,
    client: &PeerCertificate,
) -> AdapterResult<Transaction> {
    let span = packet.span().clone();
    let envelope_id = packet.envelope_id();
    let db = node
        .store
        .prepare_transaction(envelope_id)
        .instrument(span.clone())
        .await?;
    packet.attach(db)?;

    if let Err(e) = stage_update(node, &mut packet, client) {
        warn!(parent: &span, error = %e, "TRP update refused");
        packet.rollback();
        return Err(e);
    }
    packet.commit()?;

    info!(parent: &span, status = %packet.transaction.status, "TRP transfer updated");
    Ok(packet.transaction.clone())
}

fn stage_update(node: &Node, packet: &mut Packet, client: &PeerCertificate) -> AdapterResult<()> {
    let envelope_id = packet.envelope_id();
    if packet.created() {
        return Err(AdapterError::UnknownTransfer(envelope_id));
    }
    let status = packet.transaction.status;
    if status.is_concluded() {
        return Err(AdapterError::Concluded(envelope_id, status));
    }

    let sender = node
        .resolver
        .resolve_certificate(client)
        .and_then(|cp| expect_protocol(cp, Protocol::Trp))
        .map_err(|e| AdapterError::PeerMismatch(e.to_string()))?;
    if sender.id.is_none() || packet.transaction.counterparty_id != sender.id {
        return Err(AdapterError::PeerMismatch(sender.common_name));
    }

    let storage = node.storage_key("", &sender.common_name)?;
    packet.counterparty = Some(sender);
    packet.update_from_incoming()?;
    packet.incoming.seal_for_storage(&storage)?;
    packet.store_envelopes()?;
    packet.refresh()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{test_node, TestNode, REMOTE};
    use crate::postman::fixtures::btc_transfer;
    use crate::resolver::Routing;
    use crate::store::{Direction, Status};
    use crate::trp::{inquiry_from_payload, Approval, API_VERSION};
    use uuid::Uuid;

    const ORIGINATOR: &str = "originator.example.com";

    fn inquiry(id: Uuid) -> Inquiry {
        let mut inquiry =
            inquiry_from_payload(id, &btc_transfer(), "https://originator.example.com/trp/resolve");
        inquiry.info = Info::from_headers(Some(API_VERSION), Some(&id.to_string()), None);
        inquiry
    }

    fn cert(common_name: &str) -> PeerCertificate {
        PeerCertificate {
            common_name: common_name.to_string(),
            dns_names: Vec::new(),
        }
    }

    fn confirmation(id: Uuid) -> Confirmation {
        Confirmation {
            info: Info::outgoing(id),
            txid: Some("4c1d1f0c".into()),
            canceled: None,
        }
    }

    fn add_counterparty(t: &TestNode, common_name: &str, protocol: Protocol) -> Counterparty {
        t.node
            .store
            .create_counterparty(Counterparty {
                source: CounterpartySource::User,
                protocol,
                common_name: common_name.to_string(),
                endpoint: format!("{common_name}:443"),
                name: common_name.to_string(),
                ..Default::default()
            })
            .unwrap()
    }

    async fn received(t: &TestNode) -> Uuid {
        let id = Uuid::new_v4();
        handle_inquiry(&t.node, inquiry(id), &cert(ORIGINATOR)).await.unwrap();
        id
    }

    #[tokio::test]
    async fn unknown_originator_is_recorded_from_callback() {
        let t = test_node();
        let id = Uuid::new_v4();
        let resolution = handle_inquiry(&t.node, inquiry(id), &cert(ORIGINATOR))
            .await
            .unwrap();
        assert!(resolution.approved.is_none() && resolution.rejected.is_none());
        assert_eq!(resolution.info.request_identifier, id.to_string());

        let cp = t
            .node
            .store
            .lookup_counterparty("common_name", ORIGINATOR)
            .unwrap();
        assert_eq!(cp.protocol, Protocol::Trp);

        let txn = t.node.store.retrieve_transaction(id).unwrap();
        assert_eq!(txn.counterparty_id, cp.id);
        assert_eq!(txn.status, Status::Review);
        assert_eq!(txn.envelope_count, 2);
    }

    #[tokio::test]
    async fn callback_outside_certificate_is_refused() {
        let t = test_node();
        let id = Uuid::new_v4();
        for client in [PeerCertificate::default(), cert("mallory.example.com")] {
            let err = handle_inquiry(&t.node, inquiry(id), &client).await.unwrap_err();
            assert!(matches!(err, AdapterError::PeerMismatch(_)));
        }
        assert!(!t.node.store.transaction_exists(id).unwrap());
    }

    #[tokio::test]
    async fn trisa_counterparty_cannot_send_inquiries() {
        let t = test_node();
        add_counterparty(&t, ORIGINATOR, Protocol::Trisa);

        let id = Uuid::new_v4();
        let err = handle_inquiry(&t.node, inquiry(id), &cert(ORIGINATOR))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::Resolve(ResolveError::ProtocolMismatch {
                expected: Protocol::Trp,
                found: Protocol::Trisa,
            })
        ));
        assert!(!t.node.store.transaction_exists(id).unwrap());
    }

    #[tokio::test]
    async fn invalid_inquiry_is_not_stored() {
        let t = test_node();
        let id = Uuid::new_v4();
        let mut bad = inquiry(id);
        bad.callback.clear();
        let err = handle_inquiry(&t.node, bad, &cert(ORIGINATOR))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Trp(_)));
        assert!(!t.node.store.transaction_exists(id).unwrap());
    }

    #[tokio::test]
    async fn confirmation_completes_transfer() {
        let t = test_node();
        let id = received(&t).await;

        let txn = handle_confirmation(&t.node, confirmation(id), &cert(ORIGINATOR))
            .await
            .unwrap();
        assert_eq!(txn.status, Status::Completed);
        assert_eq!(txn.envelope_count, 3);

        let envelopes = t
            .node
            .store
            .list_secure_envelopes(id, &Default::default())
            .unwrap()
            .items;
        let last = envelopes
            .iter()
            .filter(|env| env.direction == Direction::Incoming)
            .last()
            .unwrap();
        let opened = last.open(&crate::keys::fixtures::local()).unwrap();
        match &opened.payload().unwrap().transaction {
            crate::envelope::TransactionPayload::Trp(trp) => {
                assert_eq!(trp.transaction.as_ref().unwrap().txid, "4c1d1f0c");
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let stray = Confirmation {
            info: Info::outgoing(Uuid::new_v4()),
            ..Default::default()
        };
        assert!(matches!(
            handle_confirmation(&t.node, stray, &cert(ORIGINATOR)).await,
            Err(AdapterError::UnknownTransfer(_))
        ));
    }

    #[tokio::test]
    async fn concluded_transfer_takes_no_confirmation() {
        let t = test_node();
        let id = received(&t).await;

        let canceled = Confirmation {
            info: Info::outgoing(id),
            canceled: Some("customer withdrew".into()),
            ..Default::default()
        };
        let txn = handle_confirmation(&t.node, canceled, &cert(ORIGINATOR))
            .await
            .unwrap();
        assert_eq!(txn.status, Status::Rejected);
        assert_eq!(txn.envelope_count, 3);

        let err = handle_confirmation(&t.node, confirmation(id), &cert(ORIGINATOR))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Concluded(_, Status::Rejected)));

        let txn = t.node.store.retrieve_transaction(id).unwrap();
        assert_eq!(txn.status, Status::Rejected);
        assert_eq!(txn.envelope_count, 3);
    }

    #[tokio::test]
    async fn confirmation_from_another_peer_is_refused() {
        let t = test_node();
        let id = received(&t).await;
        add_counterparty(&t, "mallory.example.com", Protocol::Trp);

        for client in [cert("mallory.example.com"), PeerCertificate::default()] {
            let err = handle_confirmation(&t.node, confirmation(id), &client)
                .await
                .unwrap_err();
            assert!(matches!(err, AdapterError::PeerMismatch(_)));
        }

        let txn = t.node.store.retrieve_transaction(id).unwrap();
        assert_eq!(txn.status, Status::Review);
        assert_eq!(txn.envelope_count, 2);
    }

    #[tokio::test]
    async fn resolution_updates_sent_inquiry() {
        let t = test_node();
        let cp = add_counterparty(&t, REMOTE, Protocol::Trp);
        t.remote.set_resolution(Resolution::pending());
        let routing = Routing {
            protocol: "trp".to_string(),
            counterparty_id: cp.id,
            ..Default::default()
        };
        let txn = crate::send::send(&t.node, &routing, btc_transfer()).await.unwrap();
        assert_eq!(txn.status, Status::Pending);

        let resolution = Resolution {
            info: Info::outgoing(txn.id),
            approved: Some(Approval {
                address: "n3Vgn8wF6ZkpKSe186NnytLPXdZ6j1JbHg".into(),
                callback: "https://beneficiary.example.com/trp/confirm".into(),
            }),
            ..Resolution::pending()
        };

        let err = handle_resolve(&t.node, resolution.clone(), &cert(ORIGINATOR))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::PeerMismatch(_)));

        let updated = handle_resolve(&t.node, resolution, &cert(REMOTE)).await.unwrap();
        assert_eq!(updated.status, Status::Accepted);
        assert_eq!(updated.envelope_count, txn.envelope_count + 1);
    }
}
