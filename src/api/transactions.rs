// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transfer endpoints for compliance officers and back office systems.

use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use ulid::Ulid;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    adapters::Node,
    auth::Operator,
    envelope::{Payload, Rejection, TransferState},
    error::ApiError,
    send,
    resolver::Routing,
    state::AppState,
    store::{Direction, EnvelopeRecord, PageInfo, Transaction},
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TransactionList {
    pub transactions: Vec<Transaction>,
    pub page: PageInfo,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EnvelopeList {
    pub envelopes: Vec<EnvelopeRecord>,
    pub page: PageInfo,
}

/// A stored envelope opened with the local storage key.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EnvelopeView {
    #[schema(value_type = Option<String>)]
    pub id: Option<Ulid>,
    pub envelope_id: Uuid,
    pub direction: Direction,
    /// Transfer state carried by the envelope (`pending`, `accepted`, ...).
    pub transfer_state: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub payload: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub error: Option<Rejection>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PayloadQuery {
    /// Only consider envelopes in this direction (`incoming` or `outgoing`).
    pub direction: Option<String>,
}

/// Request to start a new transfer.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SendRequest {
    /// Which counterparty to send to and over which protocol.
    pub routing: Routing,
    /// Identity and transaction details.
    #[schema(value_type = Object)]
    pub payload: Payload,
}

/// Request to send the next envelope of an existing transfer.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SendEnvelopeRequest {
    #[schema(value_type = Object)]
    pub payload: Payload,
    /// Transfer state of the envelope: `started` to resend a repaired
    /// request, `completed` once the on-chain transaction is broadcast.
    pub transfer_state: String,
}

// =============================================================================
// Helpers
// =============================================================================

/// Decrypt a stored envelope with the key that resealed it.
pub(crate) fn open_record(node: &Node, record: &EnvelopeRecord) -> Result<EnvelopeView, ApiError> {
    let signature = record.public_key.as_deref().unwrap_or_default();
    let storage = node
        .keychain
        .unsealing_key(signature, "")
        .map_err(ApiError::internal)?;
    let env = record.open(&storage).map_err(ApiError::internal)?;

    Ok(EnvelopeView {
        id: record.id,
        envelope_id: record.envelope_id,
        direction: record.direction,
        transfer_state: record.transfer_state.as_str().to_string(),
        timestamp: record.timestamp,
        is_error: record.is_error,
        payload: env.payload().cloned(),
        error: env.error().cloned(),
    })
}

fn parse_direction(raw: Option<&str>) -> Result<Option<Direction>, ApiError> {
    raw.map(Direction::from_str)
        .transpose()
        .map_err(ApiError::bad_request)
}

// =============================================================================
// Handlers
// =============================================================================

/// List transfers, newest first.
#[utoipa::path(
    get,
    path = "/v1/transactions",
    tag = "Transactions",
    params(PageInfo),
    responses(
        (status = 200, description = "Page of transfers", body = TransactionList),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_transactions(
    Operator(_claims): Operator,
    State(state): State<AppState>,
    Query(page): Query<PageInfo>,
) -> Result<Json<TransactionList>, ApiError> {
    let page = state.node.store.list_transactions(&page)?;
    Ok(Json(TransactionList {
        transactions: page.items,
        page: page.page,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/transactions/{transaction_id}",
    tag = "Transactions",
    params(("transaction_id" = Uuid, Path, description = "Envelope id of the transfer")),
    responses(
        (status = 200, description = "Transfer", body = Transaction),
        (status = 404, description = "Transfer not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn retrieve_transaction(
    Operator(_claims): Operator,
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Transaction>, ApiError> {
    Ok(Json(state.node.store.retrieve_transaction(transaction_id)?))
}

/// Secure envelopes exchanged for a transfer, oldest first. Payloads stay
/// encrypted under the storage key.
#[utoipa::path(
    get,
    path = "/v1/transactions/{transaction_id}/envelopes",
    tag = "Transactions",
    params(
        ("transaction_id" = Uuid, Path, description = "Envelope id of the transfer"),
        PageInfo
    ),
    responses(
        (status = 200, description = "Page of envelopes", body = EnvelopeList),
        (status = 404, description = "Transfer not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_envelopes(
    Operator(_claims): Operator,
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
    Query(page): Query<PageInfo>,
) -> Result<Json<EnvelopeList>, ApiError> {
    if !state.node.store.transaction_exists(transaction_id)? {
        return Err(ApiError::not_found(format!("transaction {transaction_id} not found")));
    }
    let page = state.node.store.list_secure_envelopes(transaction_id, &page)?;
    Ok(Json(EnvelopeList {
        envelopes: page.items,
        page: page.page,
    }))
}

/// One envelope of a transfer, decrypted.
#[utoipa::path(
    get,
    path = "/v1/transactions/{transaction_id}/envelopes/{envelope_id}",
    tag = "Transactions",
    params(
        ("transaction_id" = Uuid, Path, description = "Envelope id of the transfer"),
        ("envelope_id" = String, Path, description = "Id of the stored envelope")
    ),
    responses(
        (status = 200, description = "Decrypted envelope", body = EnvelopeView),
        (status = 404, description = "Envelope not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn retrieve_envelope(
    Operator(_claims): Operator,
    State(state): State<AppState>,
    Path((transaction_id, envelope_id)): Path<(Uuid, String)>,
) -> Result<Json<EnvelopeView>, ApiError> {
    let envelope_id = Ulid::from_string(&envelope_id)
        .map_err(|e| ApiError::bad_request(format!("invalid envelope id: {e}")))?;
    let record = state
        .node
        .store
        .retrieve_secure_envelope(transaction_id, envelope_id)?;
    Ok(Json(open_record(&state.node, &record)?))
}

/// The most recent payload of a transfer, decrypted.
#[utoipa::path(
    get,
    path = "/v1/transactions/{transaction_id}/payload",
    tag = "Transactions",
    params(
        ("transaction_id" = Uuid, Path, description = "Envelope id of the transfer"),
        PayloadQuery
    ),
    responses(
        (status = 200, description = "Latest decrypted envelope", body = EnvelopeView),
        (status = 404, description = "Transfer has no envelopes")
    ),
    security(("bearer_auth" = []))
)]
pub async fn latest_payload(
    Operator(_claims): Operator,
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
    Query(query): Query<PayloadQuery>,
) -> Result<Json<EnvelopeView>, ApiError> {
    let direction = parse_direction(query.direction.as_deref())?;
    let record = state
        .node
        .store
        .latest_secure_envelope(transaction_id, direction)?;
    Ok(Json(open_record(&state.node, &record)?))
}

/// Start a transfer to the counterparty the routing resolves to.
///
/// A rejection from the counterparty is not an error: the transfer is
/// returned with status `rejected` or `repair`.
#[utoipa::path(
    post,
    path = "/v1/transactions/send",
    tag = "Transactions",
    request_body = SendRequest,
    responses(
        (status = 201, description = "Transfer sent", body = Transaction),
        (status = 404, description = "Counterparty not found"),
        (status = 422, description = "Invalid routing"),
        (status = 502, description = "Counterparty unreachable")
    ),
    security(("bearer_auth" = []))
)]
pub async fn send_transfer(
    Operator(claims): Operator,
    State(state): State<AppState>,
    Json(request): Json<SendRequest>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    info!(
        actor = %claims.sub,
        subject_type = %claims.subject_type,
        protocol = %request.routing.protocol,
        "Send requested"
    );
    let txn = send::send(&state.node, &request.routing, request.payload).await?;
    Ok((StatusCode::CREATED, Json(txn)))
}

/// Send the next envelope of an existing transfer.
#[utoipa::path(
    post,
    path = "/v1/transactions/{transaction_id}/send",
    tag = "Transactions",
    params(("transaction_id" = Uuid, Path, description = "Envelope id of the transfer")),
    request_body = SendEnvelopeRequest,
    responses(
        (status = 200, description = "Envelope sent", body = Transaction),
        (status = 404, description = "Transfer not found"),
        (status = 409, description = "Transfer already concluded")
    ),
    security(("bearer_auth" = []))
)]
pub async fn send_envelope(
    Operator(claims): Operator,
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
    Json(request): Json<SendEnvelopeRequest>,
) -> Result<Json<Transaction>, ApiError> {
    let transfer_state = TransferState::from_str(&request.transfer_state).map_err(ApiError::unprocessable)?;
    info!(
        actor = %claims.sub,
        envelope_id = %transaction_id,
        transfer_state = transfer_state.as_str(),
        "Send envelope requested"
    );
    let txn = send::send_envelope(&state.node, transaction_id, request.payload, transfer_state).await?;
    Ok(Json(txn))
}
