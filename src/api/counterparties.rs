// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Counterparty directory endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use ulid::Ulid;
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::Operator,
    error::ApiError,
    state::AppState,
    store::{Contact, Counterparty, CounterpartySource, PageInfo},
};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CounterpartyList {
    pub counterparties: Vec<Counterparty>,
    pub page: PageInfo,
}

/// Find one counterparty by a unique field or by travel address.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LookupQuery {
    /// `common_name`, `name` or `lei`.
    pub field: Option<String>,
    pub value: Option<String>,
    /// Resolve a travel address instead of a field.
    pub travel_address: Option<String>,
}

fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw).map_err(|e| ApiError::bad_request(format!("invalid counterparty id: {e}")))
}

#[utoipa::path(
    get,
    path = "/v1/counterparties",
    tag = "Counterparties",
    params(PageInfo),
    responses((status = 200, description = "Page of counterparties", body = CounterpartyList)),
    security(("bearer_auth" = []))
)]
pub async fn list_counterparties(
    Operator(_claims): Operator,
    State(state): State<AppState>,
    Query(page): Query<PageInfo>,
) -> Result<Json<CounterpartyList>, ApiError> {
    let page = state.node.store.list_counterparties(&page)?;
    Ok(Json(CounterpartyList {
        counterparties: page.items,
        page: page.page,
    }))
}

/// Register a counterparty by hand.
#[utoipa::path(
    post,
    path = "/v1/counterparties",
    tag = "Counterparties",
    request_body = Counterparty,
    responses(
        (status = 201, description = "Counterparty created", body = Counterparty),
        (status = 409, description = "Common name already registered")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_counterparty(
    Operator(claims): Operator,
    State(state): State<AppState>,
    Json(mut request): Json<Counterparty>,
) -> Result<(StatusCode, Json<Counterparty>), ApiError> {
    if request.id.is_some() {
        return Err(ApiError::bad_request("counterparty id is assigned by the node"));
    }
    request.source = CounterpartySource::User;
    request.normalize();
    if request.common_name.is_empty() || request.name.is_empty() {
        return Err(ApiError::unprocessable("name and common name or endpoint are required"));
    }

    let created = state.node.store.create_counterparty(request)?;
    info!(actor = %claims.sub, common_name = %created.common_name, "Counterparty created");
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/v1/counterparties/lookup",
    tag = "Counterparties",
    params(LookupQuery),
    responses(
        (status = 200, description = "Matching counterparty", body = Counterparty),
        (status = 404, description = "No counterparty matched"),
        (status = 409, description = "More than one counterparty matched")
    ),
    security(("bearer_auth" = []))
)]
pub async fn lookup_counterparty(
    Operator(_claims): Operator,
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<Counterparty>, ApiError> {
    if let Some(address) = query.travel_address.as_deref().filter(|a| !a.is_empty()) {
        return Ok(Json(state.node.resolver.from_travel_address(address)?));
    }

    match (query.field.as_deref(), query.value.as_deref()) {
        (Some(field), Some(value)) if !value.is_empty() => {
            Ok(Json(state.node.store.lookup_counterparty(field, value)?))
        }
        _ => Err(ApiError::bad_request("field and value, or travel_address, are required")),
    }
}

#[utoipa::path(
    get,
    path = "/v1/counterparties/{counterparty_id}",
    tag = "Counterparties",
    params(("counterparty_id" = String, Path, description = "Counterparty ULID")),
    responses(
        (status = 200, description = "Counterparty with contacts", body = Counterparty),
        (status = 404, description = "Counterparty not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn retrieve_counterparty(
    Operator(_claims): Operator,
    State(state): State<AppState>,
    Path(counterparty_id): Path<String>,
) -> Result<Json<Counterparty>, ApiError> {
    let id = parse_id(&counterparty_id)?;
    Ok(Json(state.node.store.retrieve_counterparty(id)?))
}

/// Update the non-empty fields of a counterparty.
#[utoipa::path(
    put,
    path = "/v1/counterparties/{counterparty_id}",
    tag = "Counterparties",
    params(("counterparty_id" = String, Path, description = "Counterparty ULID")),
    request_body = Counterparty,
    responses(
        (status = 200, description = "Updated counterparty", body = Counterparty),
        (status = 404, description = "Counterparty not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_counterparty(
    Operator(claims): Operator,
    State(state): State<AppState>,
    Path(counterparty_id): Path<String>,
    Json(mut request): Json<Counterparty>,
) -> Result<Json<Counterparty>, ApiError> {
    let id = parse_id(&counterparty_id)?;
    if request.id.is_some_and(|body_id| body_id != id) {
        return Err(ApiError::bad_request("counterparty id does not match the path"));
    }
    request.id = Some(id);

    let previous = state.node.store.retrieve_counterparty(id)?;
    let updated = state.node.store.update_counterparty(&request)?;
    state.node.resolver.invalidate(&previous.common_name);
    info!(actor = %claims.sub, counterparty_id = %id, "Counterparty updated");
    Ok(Json(updated))
}

#[utoipa::path(
    get,
    path = "/v1/counterparties/{counterparty_id}/contacts",
    tag = "Counterparties",
    params(("counterparty_id" = String, Path, description = "Counterparty ULID")),
    responses(
        (status = 200, description = "Contacts", body = [Contact]),
        (status = 404, description = "Counterparty not found")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_contacts(
    Operator(_claims): Operator,
    State(state): State<AppState>,
    Path(counterparty_id): Path<String>,
) -> Result<Json<Vec<Contact>>, ApiError> {
    let id = parse_id(&counterparty_id)?;
    Ok(Json(state.node.store.list_contacts(id)?))
}

/// Add a person Sunrise invitations are emailed to.
#[utoipa::path(
    post,
    path = "/v1/counterparties/{counterparty_id}/contacts",
    tag = "Counterparties",
    params(("counterparty_id" = String, Path, description = "Counterparty ULID")),
    request_body = Contact,
    responses(
        (status = 201, description = "Contact created", body = Contact),
        (status = 400, description = "Invalid email address"),
        (status = 409, description = "Email already registered")
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_contact(
    Operator(_claims): Operator,
    State(state): State<AppState>,
    Path(counterparty_id): Path<String>,
    Json(contact): Json<Contact>,
) -> Result<(StatusCode, Json<Contact>), ApiError> {
    let id = parse_id(&counterparty_id)?;
    let contact = state.node.store.create_contact(id, contact)?;
    Ok((StatusCode::CREATED, Json(contact)))
}
