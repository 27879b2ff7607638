// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP surface of the node.
//!
//! | Prefix       | Caller                         | Authentication          |
//! |--------------|--------------------------------|-------------------------|
//! | `/v1`        | operators and back office      | bearer token            |
//! | `/trisa`     | TRISA peer nodes               | client certificate      |
//! | `/trp`       | TRP counterparties             | client certificate      |
//! | `/sunrise`   | invited counterparty contacts  | emailed token, session  |
//! | `/health`    | orchestrator health checks     | none                    |

use axum::{
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    peers::{PeerInfo, SigningKey},
    resolver::Routing,
    state::AppState,
    store::{Contact, Counterparty, EnvelopeRecord, PageInfo, Transaction},
    trp::{Confirmation, Extensions, Inquiry, Resolution, VersionInfo},
};

pub mod counterparties;
pub mod health;
pub mod peer;
pub mod sunrise;
pub mod transactions;
pub mod trisa;
pub mod trp;
pub mod utilities;

/// Trimmed, non-empty value of a request header.
pub(crate) fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/status", get(health::status))
        .route("/transactions", get(transactions::list_transactions))
        .route("/transactions/send", post(transactions::send_transfer))
        .route(
            "/transactions/{transaction_id}",
            get(transactions::retrieve_transaction),
        )
        .route(
            "/transactions/{transaction_id}/envelopes",
            get(transactions::list_envelopes),
        )
        .route(
            "/transactions/{transaction_id}/envelopes/{envelope_id}",
            get(transactions::retrieve_envelope),
        )
        .route(
            "/transactions/{transaction_id}/payload",
            get(transactions::latest_payload),
        )
        .route(
            "/transactions/{transaction_id}/send",
            post(transactions::send_envelope),
        )
        .route(
            "/counterparties",
            get(counterparties::list_counterparties).post(counterparties::create_counterparty),
        )
        .route("/counterparties/lookup", get(counterparties::lookup_counterparty))
        .route(
            "/counterparties/{counterparty_id}",
            get(counterparties::retrieve_counterparty).put(counterparties::update_counterparty),
        )
        .route(
            "/counterparties/{counterparty_id}/contacts",
            get(counterparties::list_contacts).post(counterparties::create_contact),
        )
        .route(
            "/utilities/travel-address/encode",
            post(utilities::encode_travel_address),
        )
        .route(
            "/utilities/travel-address/decode",
            post(utilities::decode_travel_address),
        );

    let peer_routes = Router::new()
        .route("/trisa/transfer", post(trisa::transfer))
        .route("/trisa/keyexchange", post(trisa::key_exchange))
        .route("/trisa/info", get(trisa::info))
        .route("/trp", post(trp::inquiry))
        .route("/trp/resolve", post(trp::resolve))
        .route("/trp/confirmation", post(trp::confirmation))
        .route("/trp/version", get(trp::version))
        .route("/trp/extensions", get(trp::extensions))
        .route("/sunrise/verify", get(sunrise::verify))
        .route("/sunrise/review", get(sunrise::review))
        .route("/sunrise/accept", post(sunrise::accept))
        .route("/sunrise/reject", post(sunrise::reject))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    Router::new()
        .nest("/v1", v1_routes)
        .merge(peer_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::status,
        health::liveness,
        health::readiness,
        transactions::list_transactions,
        transactions::retrieve_transaction,
        transactions::list_envelopes,
        transactions::retrieve_envelope,
        transactions::latest_payload,
        transactions::send_transfer,
        transactions::send_envelope,
        counterparties::list_counterparties,
        counterparties::create_counterparty,
        counterparties::lookup_counterparty,
        counterparties::retrieve_counterparty,
        counterparties::update_counterparty,
        counterparties::list_contacts,
        counterparties::create_contact,
        utilities::encode_travel_address,
        utilities::decode_travel_address,
        trisa::transfer,
        trisa::key_exchange,
        trisa::info,
        trp::inquiry,
        trp::resolve,
        trp::confirmation,
        trp::version,
        trp::extensions,
        sunrise::verify,
        sunrise::review,
        sunrise::accept,
        sunrise::reject
    ),
    components(
        schemas(
            health::StatusResponse,
            health::HealthChecks,
            health::HealthResponse,
            transactions::TransactionList,
            transactions::EnvelopeList,
            transactions::EnvelopeView,
            transactions::SendRequest,
            transactions::SendEnvelopeRequest,
            counterparties::CounterpartyList,
            utilities::DecodedAddress,
            utilities::EncodedAddress,
            sunrise::SunriseSessionResponse,
            Transaction,
            EnvelopeRecord,
            Counterparty,
            Contact,
            PageInfo,
            Routing,
            PeerInfo,
            SigningKey,
            Inquiry,
            Resolution,
            Confirmation,
            VersionInfo,
            Extensions
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Status", description = "Node status and health checks"),
        (name = "Transactions", description = "Travel Rule transfers and their envelopes"),
        (name = "Counterparties", description = "Counterparty directory and contacts"),
        (name = "Utilities", description = "Travel address encoding"),
        (name = "TRISA", description = "TRISA peer transport"),
        (name = "TRP", description = "Travel Rule Protocol"),
        (name = "Sunrise", description = "Email review of transfers by contacts without a node")
    )
)]
struct ApiDoc;

#[cfg(test)]
pub(crate) mod testing {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::router;
    use crate::state::testing::TestApp;

    /// Send one request through a fresh router and decode the JSON reply.
    /// Empty or non-JSON bodies decode as `null`.
    pub async fn call(
        app: &TestApp,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = router(app.state.clone())
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// [`call`] as the node operator with a JSON body.
    pub async fn call_with(app: &TestApp, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
        let token = app.operator_token();
        call(app, method, uri, Some(&token), Some(body)).await
    }
}
