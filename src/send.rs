// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Send
//!
//! Entry point for transfers this node starts or continues. The counterparty
//! decides the protocol; the matching adapter carries the packet.
//!
//! Rejections from the counterparty are stored like any other reply and the
//! send succeeds with a rejected transfer. Transport failures roll the step
//! back so it can be retried with the same envelope id.

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::adapters::{self, AdapterError, Node};
use crate::envelope::{format_timestamp, Payload, TransferState};
use crate::postman::{Packet, PostmanError, SunrisePacket, TrpPacket};
use crate::resolver::{ResolveError, Routing};
use crate::store::{Counterparty, Protocol, Status, StoreError, Transaction};

#[derive(Debug, Error)]
pub enum SendError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Postman(#[from] PostmanError),

    #[error("transfer {0} is {1} and cannot be continued")]
    Concluded(Uuid, Status),

    #[error("transfer {0} has no counterparty")]
    NoCounterparty(Uuid),
}

impl SendError {
    /// Whether retrying the same step may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::Adapter(e) if e.is_transport())
    }
}

pub type SendResult<T> = Result<T, SendError>;

/// Start a new transfer to the counterparty the routing hint resolves to.
pub async fn send(node: &Node, routing: &Routing, payload: Payload) -> SendResult<Transaction> {
    let counterparty = node.resolver.resolve(routing)?;
    let envelope_id = Uuid::new_v4();
    info!(
        %envelope_id,
        counterparty = %counterparty.name,
        protocol = %counterparty.protocol,
        "Starting transfer"
    );
    transfer(node, envelope_id, counterparty, payload, TransferState::Started).await
}

/// Send the next envelope of an existing transfer, such as a repaired
/// request or the completion notice after the on-chain transaction.
pub async fn send_envelope(
    node: &Node,
    envelope_id: Uuid,
    payload: Payload,
    state: TransferState,
) -> SendResult<Transaction> {
    let txn = node.store.retrieve_transaction(envelope_id)?;
    let id = txn
        .counterparty_id
        .ok_or(SendError::NoCounterparty(envelope_id))?;
    let counterparty = node.store.retrieve_counterparty(id)?;
    transfer(node, envelope_id, counterparty, payload, state).await
}

async fn transfer(
    node: &Node,
    envelope_id: Uuid,
    counterparty: Counterparty,
    mut payload: Payload,
    state: TransferState,
) -> SendResult<Transaction> {
    if payload.sent_at.is_empty() {
        payload.sent_at = format_timestamp(Utc::now());
    }

    match counterparty.protocol {
        Protocol::Trisa => {
            let mut packet = Packet::send(envelope_id, payload, state, Protocol::Trisa);
            packet.counterparty = Some(counterparty);
            send_trisa(node, &mut packet).await
        }
        Protocol::Trp => {
            let callback = node.settings.trp_callback();
            let mut packet = TrpPacket::send_inquiry(envelope_id, payload, &callback);
            packet.packet.counterparty = Some(counterparty);
            send_trp(node, &mut packet).await
        }
        Protocol::Sunrise => {
            let mut packet = SunrisePacket::send(envelope_id, payload);
            packet.packet.counterparty = Some(counterparty);
            send_sunrise(node, &mut packet).await
        }
    }
}

/// Refuse to continue a concluded transfer. Called once the transfer lock is
/// held so a concurrent conclusion is seen.
fn ensure_open(packet: &mut Packet) -> SendResult<()> {
    let status = packet.transaction.status;
    if status.is_concluded() {
        packet.rollback();
        return Err(SendError::Concluded(packet.envelope_id(), status));
    }
    Ok(())
}

async fn send_trisa(node: &Node, packet: &mut Packet) -> SendResult<Transaction> {
    let span = packet.span().clone();
    let db = node
        .store
        .prepare_transaction(packet.envelope_id())
        .instrument(span.clone())
        .await?;
    packet.attach(db)?;
    ensure_open(packet)?;
    packet.update_from_outgoing()?;

    if let Err(e) = adapters::trisa::send(node, packet).await {
        warn!(parent: &span, error = %e, "TRISA transfer failed, rolling back");
        packet.rollback();
        return Err(e.into());
    }

    packet.update_from_incoming()?;
    packet.store_envelopes()?;
    packet.refresh()?;
    packet.commit()?;

    info!(parent: &span, status = %packet.transaction.status, "TRISA transfer sent");
    Ok(packet.transaction.clone())
}

async fn send_trp(node: &Node, packet: &mut TrpPacket) -> SendResult<Transaction> {
    let span = packet.packet.span().clone();
    let db = node
        .store
        .prepare_transaction(packet.envelope_id())
        .instrument(span.clone())
        .await?;
    packet.packet.attach(db)?;
    ensure_open(&mut packet.packet)?;
    packet.packet.update_from_outgoing()?;

    if let Err(e) = adapters::trp::send(node, packet).await {
        warn!(parent: &span, error = %e, "TRP inquiry failed, rolling back");
        packet.packet.rollback();
        return Err(e.into());
    }

    packet.packet.update_from_incoming()?;
    packet.packet.store_envelopes()?;
    packet.packet.refresh()?;
    packet.packet.commit()?;

    info!(parent: &span, status = %packet.packet.transaction.status, "TRP inquiry sent");
    Ok(packet.packet.transaction.clone())
}

async fn send_sunrise(node: &Node, packet: &mut SunrisePacket) -> SendResult<Transaction> {
    let span = packet.packet.span().clone();
    let db = node
        .store
        .prepare_transaction(packet.envelope_id())
        .instrument(span.clone())
        .await?;
    packet.packet.attach(db)?;
    ensure_open(&mut packet.packet)?;

    if let Err(e) = adapters::sunrise::send(node, packet).await {
        warn!(parent: &span, error = %e, "Sunrise invitation failed, rolling back");
        packet.packet.rollback();
        return Err(e.into());
    }
    packet.packet.commit()?;
    Ok(packet.packet.transaction.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{test_node, TestNode, REMOTE};
    use crate::envelope::{Rejection, RejectionCode, TransactionPayload};
    use crate::keychain::KeyError;
    use crate::keys::fixtures;
    use crate::peers::mock::MockReply;
    use crate::postman::fixtures::btc_transfer;
    use crate::store::{CounterpartySource, Direction, SunriseStatus};
    use crate::trp::{Approval, Resolution};

    const TXID: &str = "b657e22827039461a9493ede7bdf55b01579254c1630b0bfc9185ec564fc05ab";

    fn beneficiary(t: &TestNode, protocol: Protocol) -> Routing {
        let cp = t
            .node
            .store
            .create_counterparty(Counterparty {
                source: CounterpartySource::User,
                protocol,
                common_name: REMOTE.to_string(),
                endpoint: "beneficiary.example.com:443".to_string(),
                name: "Beneficiary VASP".to_string(),
                ..Default::default()
            })
            .unwrap();
        Routing {
            protocol: protocol.to_string(),
            counterparty_id: cp.id,
            ..Default::default()
        }
    }

    fn completion() -> Payload {
        let mut payload = btc_transfer();
        if let TransactionPayload::Transaction(txn) = &mut payload.transaction {
            txn.txid = TXID.to_string();
        }
        payload
    }

    /// Every stored envelope is readable with the local storage key.
    fn assert_stored_locally(t: &TestNode, id: Uuid) -> usize {
        let envelopes = t
            .node
            .store
            .list_secure_envelopes(id, &Default::default())
            .unwrap()
            .items;
        for envelope in envelopes.iter().filter(|env| !env.is_error) {
            envelope.open(&fixtures::local()).unwrap();
        }
        envelopes.len()
    }

    #[tokio::test]
    async fn trisa_approve() {
        let t = test_node();
        let routing = beneficiary(&t, Protocol::Trisa);

        t.remote.push(MockReply::State(TransferState::Accepted));
        let txn = send(&t.node, &routing, btc_transfer()).await.unwrap();
        assert_eq!(txn.status, Status::Accepted);
        assert_eq!(txn.source, crate::store::TransactionSource::Local);
        assert_eq!(txn.virtual_asset, "BTC");
        assert_eq!(txn.envelope_count, 2);

        t.remote.push(MockReply::State(TransferState::Completed));
        let txn = send_envelope(&t.node, txn.id, completion(), TransferState::Completed)
            .await
            .unwrap();
        assert_eq!(txn.status, Status::Completed);
        assert_eq!(txn.envelope_count, 4);
        assert_eq!(assert_stored_locally(&t, txn.id), 4);

        let received = t.remote.received();
        assert_eq!(received.len(), 2);
        match &received[1].payload().unwrap().transaction {
            TransactionPayload::Transaction(sent) => assert_eq!(sent.txid, TXID),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn trisa_reject() {
        let t = test_node();
        let routing = beneficiary(&t, Protocol::Trisa);

        t.remote.push(MockReply::Reject(Rejection::new(
            RejectionCode::HighRisk,
            "beneficiary not authorized",
            false,
        )));
        let txn = send(&t.node, &routing, btc_transfer()).await.unwrap();
        assert_eq!(txn.status, Status::Rejected);
        assert_eq!(txn.envelope_count, 2);

        let envelopes = t
            .node
            .store
            .list_secure_envelopes(txn.id, &Default::default())
            .unwrap()
            .items;
        let reply = envelopes
            .iter()
            .find(|env| env.direction == Direction::Incoming)
            .unwrap();
        assert!(reply.is_error);

        let again = send_envelope(&t.node, txn.id, completion(), TransferState::Completed).await;
        assert!(matches!(again, Err(SendError::Concluded(_, Status::Rejected))));
        assert_eq!(t.remote.transfers(), 1);
    }

    #[tokio::test]
    async fn conclusion_while_waiting_for_lock_is_seen() {
        let t = test_node();
        let routing = beneficiary(&t, Protocol::Trisa);
        t.remote.push(MockReply::State(TransferState::Accepted));
        let txn = send(&t.node, &routing, btc_transfer()).await.unwrap();

        let mut db = t.node.store.prepare_transaction(txn.id).await.unwrap();
        let conclude = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            db.update(&Transaction {
                status: Status::Rejected,
                ..Default::default()
            })
            .unwrap();
            db.commit().unwrap();
        };
        let (sent, ()) = tokio::join!(
            send_envelope(&t.node, txn.id, completion(), TransferState::Completed),
            conclude
        );

        assert!(matches!(sent, Err(SendError::Concluded(_, Status::Rejected))));
        assert_eq!(t.remote.transfers(), 1);
        let stored = t.node.store.retrieve_transaction(txn.id).unwrap();
        assert_eq!(stored.status, Status::Rejected);
        assert_eq!(stored.envelope_count, 2);
    }

    #[tokio::test]
    async fn trisa_repair() {
        let t = test_node();
        let routing = beneficiary(&t, Protocol::Trisa);

        t.remote.push(MockReply::Reject(Rejection::new(
            RejectionCode::IncompleteIdentity,
            "beneficiary date of birth required",
            true,
        )));
        let txn = send(&t.node, &routing, btc_transfer()).await.unwrap();
        assert_eq!(txn.status, Status::Repair);

        t.remote.push(MockReply::State(TransferState::Accepted));
        let txn = send_envelope(&t.node, txn.id, btc_transfer(), TransferState::Review)
            .await
            .unwrap();
        assert_eq!(txn.status, Status::Accepted);

        t.remote.push(MockReply::State(TransferState::Completed));
        let txn = send_envelope(&t.node, txn.id, completion(), TransferState::Completed)
            .await
            .unwrap();
        assert_eq!(txn.status, Status::Completed);
        assert_eq!(txn.envelope_count, 6);
        assert!(txn.last_update.is_some());
        assert_eq!(assert_stored_locally(&t, txn.id), 6);
    }

    #[tokio::test]
    async fn sunrise_invite() {
        let t = test_node();
        let routing = Routing {
            protocol: "sunrise".to_string(),
            email_address: Some("barry@example.com".to_string()),
            counterparty: Some("SpudCoin Exchange".to_string()),
            ..Default::default()
        };

        let txn = send(&t.node, &routing, btc_transfer()).await.unwrap();
        assert_eq!(txn.status, Status::Pending);
        assert_eq!(txn.counterparty, "SpudCoin Exchange");

        let cp = t
            .node
            .store
            .retrieve_counterparty(txn.counterparty_id.unwrap())
            .unwrap();
        assert_eq!(cp.source, CounterpartySource::Sunrise);
        assert_eq!(cp.protocol, Protocol::Sunrise);

        let records = t.node.store.list_sunrise(txn.id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, SunriseStatus::Pending);
        assert_eq!(t.email.sent().len(), 1);
        assert_eq!(t.email.sent()[0].to, "barry@example.com");
        assert_eq!(assert_stored_locally(&t, txn.id), 2);
    }

    #[tokio::test]
    async fn key_exchange_on_first_send() {
        let t = test_node();
        let routing = beneficiary(&t, Protocol::Trisa);
        assert!(matches!(
            t.node.keychain.sealing_key(REMOTE, ""),
            Err(KeyError::KeyNotMatched)
        ));

        send(&t.node, &routing, btc_transfer()).await.unwrap();
        assert_eq!(t.remote.exchanges(), 1);
        assert!(t.node.keychain.sealing_key(REMOTE, "").is_ok());

        send(&t.node, &routing, btc_transfer()).await.unwrap();
        assert_eq!(t.remote.exchanges(), 1);
        assert_eq!(t.remote.transfers(), 2);
    }

    #[tokio::test]
    async fn concurrent_prepares_share_one_transfer() {
        let t = test_node();
        let id = Uuid::new_v4();

        let mut first = t.node.store.prepare_transaction(id).await.unwrap();
        let store = t.node.store.clone();
        let second = tokio::spawn(async move {
            let mut db = store.prepare_transaction(id).await.unwrap();
            let created = db.created();
            let seen = db.fetch().unwrap();
            db.commit().unwrap();
            (created, seen)
        });

        assert!(first.created());
        first.commit().unwrap();

        let (created, seen) = second.await.unwrap();
        assert!(!created);
        let stored = t.node.store.retrieve_transaction(id).unwrap();
        assert_eq!(seen.id, stored.id);
        assert_eq!(seen.created, stored.created);
    }

    #[tokio::test]
    async fn transport_failure_rolls_back() {
        let t = test_node();
        let routing = beneficiary(&t, Protocol::Trisa);

        t.remote.push(MockReply::Fail("connection reset".to_string()));
        let err = send(&t.node, &routing, btc_transfer()).await.unwrap_err();
        assert!(err.is_retryable());
        let page = t.node.store.list_transactions(&Default::default()).unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn trp_inquiry_approved() {
        let t = test_node();
        let routing = beneficiary(&t, Protocol::Trp);
        t.remote.set_resolution(Resolution {
            approved: Some(Approval {
                address: "n3Vgn8wF6ZkpKSe186NnytLPXdZ6j1JbHg".to_string(),
                callback: "https://beneficiary.example.com/trp/confirm".to_string(),
            }),
            ..Resolution::pending()
        });

        let txn = send(&t.node, &routing, btc_transfer()).await.unwrap();
        assert_eq!(txn.status, Status::Accepted);
        assert_eq!(txn.envelope_count, 2);
        assert_eq!(assert_stored_locally(&t, txn.id), 2);

        let inquiries = t.remote.inquiries();
        assert_eq!(inquiries.len(), 1);
        assert_eq!(inquiries[0].callback, "https://originator.example.com:443/trp/resolve");
    }

    #[tokio::test]
    async fn protocol_mismatch_is_refused() {
        let t = test_node();
        let mut routing = beneficiary(&t, Protocol::Trisa);
        routing.protocol = "trp".to_string();
        let err = send(&t.node, &routing, btc_transfer()).await.unwrap_err();
        assert!(matches!(err, SendError::Resolve(ResolveError::ProtocolMismatch { .. })));
    }
}
