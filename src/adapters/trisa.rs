// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TRISA transfers: sealed envelopes exchanged with a peer node.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn, Instrument};

use super::{rejection_state, AdapterError, AdapterResult, Node};
use crate::envelope::payload::Pending;
use crate::envelope::{
    format_timestamp, Envelope, EnvelopeOptions, EnvelopeState, Payload, Rejection, RejectionCode,
    SecureEnvelope, TransactionPayload, TransferState,
};
use crate::keys::Key;
use crate::peers::{self, PeerInfo, SigningKey};
use crate::postman::{Packet, PostmanError};
use crate::store::Protocol;

/// Earliest a counterparty should expect our review of a transfer.
pub const REPLY_NOT_BEFORE: TimeDelta = TimeDelta::minutes(5);

/// Latest a counterparty should expect our review of a transfer.
pub const REPLY_NOT_AFTER: TimeDelta = TimeDelta::hours(24);

// =============================================================================
// Outgoing
// =============================================================================

/// Seal the outgoing envelope for the counterparty, transfer it and bind the
/// reply. Storage keys are set on the packet; nothing is committed.
pub async fn send(node: &Node, packet: &mut Packet) -> AdapterResult<()> {
    let span = packet.span().clone();
    let counterparty = packet.counterparty.as_ref().ok_or(PostmanError::NoCounterparty)?;
    let endpoint = Some(counterparty.endpoint.as_str()).filter(|ep| !ep.is_empty());
    let peer = node.peers.lookup(&counterparty.common_name, endpoint)?;

    if !packet.outgoing.is_error() {
        let key = peers::sealing_key(&peer, &node.keychain, node.settings.key_ttl)
            .instrument(span.clone())
            .await?;
        packet.outgoing.sealing_key = Some(key);
        packet.outgoing.seal()?;
    }

    let request = packet.outgoing.proto()?.clone();
    let reply = peer.transfer(request).instrument(span.clone()).await?;
    packet.incoming.bind(reply);

    if packet.incoming.state() == Some(EnvelopeState::Sealed) {
        match node.keychain.unsealing_key(packet.incoming.public_key_signature(), "") {
            Ok(key) => {
                packet.incoming.unsealing_key = Some(key);
                if let Some(rejection) = packet.incoming.open()? {
                    warn!(parent: &span, code = %rejection.code, "Could not open reply from counterparty");
                }
            }
            Err(e) => {
                warn!(
                    parent: &span,
                    signature = %packet.incoming.public_key_signature(),
                    error = %e,
                    "Reply sealed with an unknown key, storing as received"
                );
            }
        }
    }

    let storage = node.storage_key(packet.incoming.public_key_signature(), peer.common_name())?;
    packet.set_storage_key(&storage);
    debug!(parent: &span, state = %packet.incoming.transfer_state(), "Received reply");
    Ok(())
}

// =============================================================================
// Incoming
// =============================================================================

/// Handle a transfer started or continued by a peer and return the reply
/// to send back. Malformed requests are answered without being stored.
pub async fn handle_incoming(
    node: &Node,
    wire: SecureEnvelope,
    remote: PeerInfo,
) -> AdapterResult<SecureEnvelope> {
    remote.validate()?;

    if let Err(e) = wire.validate() {
        info!(common_name = %remote.common_name, error = %e, "Invalid secure envelope received");
        return Ok(bad_request(&wire, e.to_string()));
    }

    let mut packet = Packet::receive(wire, Protocol::Trisa)?;
    let span = packet.span().clone();
    let peer = node.peers.observe(remote)?;
    packet.peer = Some(peer.info().clone());

    let db = node
        .store
        .prepare_transaction(packet.envelope_id())
        .instrument(span.clone())
        .await?;
    packet.attach(db)?;

    let result = dispatch(node, &mut packet, &peer).instrument(span.clone()).await;
    if let Err(e) = result {
        packet.rollback();
        return Err(e);
    }

    let storage = node.storage_key(packet.incoming.public_key_signature(), peer.common_name())?;
    packet.set_storage_key(&storage);
    packet.store_envelopes()?;
    packet.commit()?;

    info!(parent: &span, status = %packet.transaction.status, "Incoming transfer handled");
    Ok(packet.outgoing.proto()?.clone())
}

async fn dispatch(node: &Node, packet: &mut Packet, peer: &peers::Peer) -> AdapterResult<()> {
    match packet.incoming.state() {
        Some(EnvelopeState::Sealed) => handle_sealed(node, packet, peer).await,
        Some(EnvelopeState::Error) => {
            if packet.created() {
                return Err(AdapterError::UnknownTransfer(packet.envelope_id()));
            }
            let rejection = packet.incoming.error().cloned().unwrap_or_else(|| {
                Rejection::new(RejectionCode::Rejected, "transfer rejected", false)
            });
            let state = packet.incoming.transfer_state();
            packet.update_from_incoming()?;
            packet.reject(rejection, state);
            packet.update_from_outgoing()?;
            Ok(())
        }
        Some(EnvelopeState::Corrupted) => refuse(
            packet,
            Rejection::new(RejectionCode::BadRequest, "secure envelope is corrupted", false),
        ),
        _ => refuse(
            packet,
            Rejection::new(RejectionCode::BadRequest, "secure envelope must be sealed", true),
        ),
    }
}

async fn handle_sealed(node: &Node, packet: &mut Packet, peer: &peers::Peer) -> AdapterResult<()> {
    let sealing = match peers::sealing_key(peer, &node.keychain, node.settings.key_ttl).await {
        Ok(key) => key,
        Err(e) => {
            warn!(common_name = %peer.common_name(), error = %e, "No sealing key for counterparty");
            return refuse(
                packet,
                Rejection::new(RejectionCode::NoSigningKey, "no sealing key for counterparty, exchange keys", true),
            );
        }
    };
    packet.outgoing.sealing_key = Some(sealing);

    let signature = packet.incoming.public_key_signature().to_string();
    match node.keychain.unsealing_key(&signature, peer.common_name()) {
        Ok(key) => packet.incoming.unsealing_key = Some(key),
        Err(e) => {
            warn!(%signature, error = %e, "Envelope sealed with an unknown key");
            return refuse(
                packet,
                Rejection::new(RejectionCode::InvalidKey, "unknown public key signature", true),
            );
        }
    }

    if let Some(rejection) = packet.incoming.open()? {
        return refuse(packet, rejection);
    }

    let received = packet.incoming.payload().cloned().unwrap_or_default();
    if let Err(rejection) = validate_payload(&received) {
        return refuse(packet, rejection);
    }

    packet.update_from_incoming()?;
    let reply = pending_payload(node, packet, &received, Utc::now());
    packet.reply(reply, TransferState::Pending);
    packet.outgoing.seal()?;
    packet.update_from_outgoing()?;
    Ok(())
}

/// Record the request and answer with a rejection.
fn refuse(packet: &mut Packet, rejection: Rejection) -> AdapterResult<()> {
    packet.update_from_incoming()?;
    let state = rejection_state(&rejection);
    packet.reject(rejection, state);
    packet.update_from_outgoing()?;
    Ok(())
}

/// Rejection for an envelope that failed field checks; never stored.
fn bad_request(wire: &SecureEnvelope, message: String) -> SecureEnvelope {
    let mut reply = Envelope::reject(
        Rejection::new(RejectionCode::BadRequest, message, true),
        EnvelopeOptions::default().with_transfer_state(TransferState::Repair),
    )
    .into_proto();
    reply.id = wire.id.clone();
    reply
}

/// Minimum content of a transfer request.
pub fn validate_payload(payload: &Payload) -> Result<(), Rejection> {
    if payload.identity.is_empty() {
        return Err(Rejection::new(
            RejectionCode::MissingFields,
            "missing identity payload",
            true,
        ));
    }
    if payload.transaction.transaction().is_none() {
        return Err(Rejection::new(
            RejectionCode::MissingFields,
            "missing transaction payload",
            true,
        ));
    }
    if payload.sent_at.is_empty() {
        return Err(Rejection::new(
            RejectionCode::MissingFields,
            "missing sent at timestamp",
            true,
        ));
    }
    if DateTime::parse_from_rfc3339(&payload.sent_at).is_err() {
        return Err(Rejection::new(
            RejectionCode::ValidationError,
            "could not parse sent at timestamp",
            true,
        ));
    }
    Ok(())
}

/// Reply telling the counterparty its transfer awaits review.
fn pending_payload(node: &Node, packet: &Packet, received: &Payload, now: DateTime<Utc>) -> Payload {
    Payload {
        identity: received.identity.clone(),
        transaction: TransactionPayload::Pending(Pending {
            envelope_id: packet.envelope_id().to_string(),
            received_by: node.settings.organization.clone(),
            received_at: format_timestamp(now),
            message: "transfer received and is awaiting compliance review".to_string(),
            reply_not_after: format_timestamp(now + REPLY_NOT_AFTER),
            reply_not_before: format_timestamp(now + REPLY_NOT_BEFORE),
            extra_json: String::new(),
            transaction: received.transaction.transaction().cloned(),
        }),
        sent_at: format_timestamp(now),
        received_at: received.received_at.clone(),
    }
}

// =============================================================================
// Key Exchange
// =============================================================================

/// Cache the key a peer offered and return the key it should seal with.
pub fn key_exchange(node: &Node, remote: PeerInfo, offered: SigningKey) -> AdapterResult<SigningKey> {
    remote.validate()?;
    let key = offered.public_key()?;
    node.keychain.cache(
        &remote.common_name,
        Key::Public(key.clone()),
        node.settings.key_ttl,
    )?;
    let common_name = remote.common_name.clone();
    node.peers.observe(remote)?;

    let local = node.keychain.exchange_key(&common_name)?;
    info!(
        %common_name,
        remote = %key.public_key_signature(),
        local = %local.public_key_signature(),
        "Key exchange with peer"
    );
    Ok(SigningKey::from(&local))
}
