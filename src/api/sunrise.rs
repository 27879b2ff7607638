// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sunrise review routes for counterparty contacts invited by email.
//!
//! The emailed link lands on `/sunrise/verify`, which trades the
//! verification token for a short bearer session scoped to one transfer.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::transactions::{open_record, EnvelopeView};
use crate::{
    adapters::sunrise,
    auth::SunriseSession,
    envelope::{Payload, Rejection},
    error::ApiError,
    state::AppState,
    store::{Direction, Transaction},
};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VerifyQuery {
    /// Verification token from the invitation email.
    pub token: String,
}

/// Bearer session for reviewing one transfer.
#[derive(Debug, Serialize, ToSchema)]
pub struct SunriseSessionResponse {
    pub access_token: String,
    pub token_type: String,
    /// Unix timestamp the session expires at.
    pub expires_at: i64,
    pub envelope_id: Uuid,
}

fn session_envelope(claims: &crate::auth::Claims) -> Result<Uuid, ApiError> {
    claims
        .envelope_id
        .ok_or_else(|| ApiError::unauthorized("sunrise session is not scoped to a transfer"))
}

#[utoipa::path(
    get,
    path = "/sunrise/verify",
    tag = "Sunrise",
    params(VerifyQuery),
    responses(
        (status = 200, description = "Review session", body = SunriseSessionResponse),
        (status = 401, description = "Invalid token"),
        (status = 410, description = "Invitation expired")
    )
)]
pub async fn verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Result<Json<SunriseSessionResponse>, ApiError> {
    let record = sunrise::verify(&state.node, &query.token)?;
    let sunrise_id = record
        .id
        .ok_or_else(|| ApiError::internal("sunrise record without id"))?;

    let (access_token, claims) = state.auth.issue_sunrise(sunrise_id, record.envelope_id)?;
    Ok(Json(SunriseSessionResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_at: claims.exp,
        envelope_id: record.envelope_id,
    }))
}

/// The transfer as sent to the contact.
#[utoipa::path(
    get,
    path = "/sunrise/review",
    tag = "Sunrise",
    responses(
        (status = 200, description = "Outgoing envelope", body = EnvelopeView),
        (status = 403, description = "Not a sunrise session")
    ),
    security(("bearer_auth" = []))
)]
pub async fn review(
    SunriseSession(claims): SunriseSession,
    State(state): State<AppState>,
) -> Result<Json<EnvelopeView>, ApiError> {
    let envelope_id = session_envelope(&claims)?;
    let record = state
        .node
        .store
        .latest_secure_envelope(envelope_id, Some(Direction::Outgoing))?;
    Ok(Json(open_record(&state.node, &record)?))
}

#[utoipa::path(
    post,
    path = "/sunrise/accept",
    tag = "Sunrise",
    request_body(content = Object, description = "Payload completed with the beneficiary details"),
    responses(
        (status = 200, description = "Transfer accepted", body = Transaction),
        (status = 409, description = "Transfer already reviewed"),
        (status = 410, description = "Invitation expired")
    ),
    security(("bearer_auth" = []))
)]
pub async fn accept(
    SunriseSession(claims): SunriseSession,
    State(state): State<AppState>,
    Json(payload): Json<Payload>,
) -> Result<Json<Transaction>, ApiError> {
    let sunrise_id = claims.sunrise_id()?;
    let txn = sunrise::accept(&state.node, sunrise_id, payload).await?;
    info!(%sunrise_id, envelope_id = %txn.id, "Sunrise transfer accepted");
    Ok(Json(txn))
}

#[utoipa::path(
    post,
    path = "/sunrise/reject",
    tag = "Sunrise",
    request_body(content = Object, description = "Rejection code and message"),
    responses(
        (status = 200, description = "Transfer rejected", body = Transaction),
        (status = 409, description = "Transfer already reviewed"),
        (status = 410, description = "Invitation expired")
    ),
    security(("bearer_auth" = []))
)]
pub async fn reject(
    SunriseSession(claims): SunriseSession,
    State(state): State<AppState>,
    Json(rejection): Json<Rejection>,
) -> Result<Json<Transaction>, ApiError> {
    let sunrise_id = claims.sunrise_id()?;
    let txn = sunrise::reject(&state.node, sunrise_id, rejection).await?;
    info!(%sunrise_id, envelope_id = %txn.id, "Sunrise transfer rejected");
    Ok(Json(txn))
}

#[cfg(test)]
mod tests {
    use crate::api::testing::{call, call_with};
    use crate::state::testing::{test_app, TestApp};
    use axum::http::{Method, StatusCode};
    use serde_json::{json, Value};

    /// Start a Sunrise transfer and return the path of the emailed link.
    async fn invite(app: &TestApp) -> (String, String) {
        let (status, txn) = call_with(
            app,
            Method::POST,
            "/v1/transactions/send",
            json!({
                "routing": {
                    "protocol": "sunrise",
                    "email_address": "barry@spudcoin.example",
                    "counterparty": "SpudCoin Exchange"
                },
                "payload": serde_json::to_value(crate::postman::fixtures::btc_transfer()).unwrap()
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{txn}");

        let text = app.email.sent().last().unwrap().text.clone();
        let start = text.find("/sunrise/verify?token=").unwrap();
        let link = text[start..].split_whitespace().next().unwrap().to_string();
        (txn["id"].as_str().unwrap().to_string(), link)
    }

    async fn session(app: &TestApp, link: &str) -> String {
        let (status, body) = call(app, Method::GET, link, None, None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["token_type"], "Bearer");
        body["access_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn contact_reviews_and_rejects() {
        let app = test_app();
        let (id, link) = invite(&app).await;
        let token = session(&app, &link).await;

        let (status, review) = call(&app, Method::GET, "/sunrise/review", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK, "{review}");
        assert_eq!(review["envelope_id"], id.as_str());
        assert!(review["payload"].is_object());

        let rejection = json!({"code": "UNKNOWN_BENEFICIARY", "message": "no such customer", "retry": false});
        let (status, txn) = call(&app, Method::POST, "/sunrise/reject", Some(&token), Some(rejection.clone())).await;
        assert_eq!(status, StatusCode::OK, "{txn}");
        assert_eq!(txn["status"], "rejected");

        let (status, _) = call(&app, Method::POST, "/sunrise/reject", Some(&token), Some(rejection)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn contact_accepts() {
        let app = test_app();
        let (_, link) = invite(&app).await;
        let token = session(&app, &link).await;

        let payload: Value = serde_json::to_value(crate::postman::fixtures::btc_transfer()).unwrap();
        let (status, txn) = call(&app, Method::POST, "/sunrise/accept", Some(&token), Some(payload)).await;
        assert_eq!(status, StatusCode::OK, "{txn}");
        assert_eq!(txn["status"], "accepted");
    }

    #[tokio::test]
    async fn sessions_are_separate_from_operators() {
        let app = test_app();
        let (_, link) = invite(&app).await;
        let token = session(&app, &link).await;

        let (status, _) = call(&app, Method::GET, "/v1/transactions", Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let operator = app.operator_token();
        let (status, _) = call(&app, Method::GET, "/sunrise/review", Some(&operator), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, Method::GET, "/sunrise/verify?token=not-a-token", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
