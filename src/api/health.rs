// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;
use crate::store::PageInfo;
use crate::traddr;

/// Node status with individual component checks.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// Overall status ("ok" or "degraded").
    pub status: String,
    pub version: String,
    /// Common name of this node on the TRISA network.
    pub common_name: String,
    pub endpoint: String,
    pub organization: String,
    /// Travel address counterparties can route transfers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub travel_address: Option<String>,
    pub sunrise_enabled: bool,
    /// Number of peers in the registry.
    pub peers: usize,
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    /// Whether the transaction store answers reads.
    pub store: String,
    /// Signature of the default storage key, when one is loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
}

/// Simple health check response for liveness checks.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

fn check_store(state: &AppState) -> String {
    let page = PageInfo {
        page_size: 1,
        ..Default::default()
    };
    match state.node.store.list_transactions(&page) {
        Ok(_) => "ok".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Store health check failed");
            "unavailable".to_string()
        }
    }
}

/// Node status handler.
///
/// Returns 200 if all checks pass, 503 if any check fails.
#[utoipa::path(
    get,
    path = "/v1/status",
    tag = "Status",
    responses(
        (status = 200, description = "Node is healthy", body = StatusResponse),
        (status = 503, description = "Node is degraded", body = StatusResponse)
    )
)]
pub async fn status(State(state): State<AppState>) -> (StatusCode, Json<StatusResponse>) {
    let store = check_store(&state);
    let storage_key = state.node.keychain.default_signature();
    let all_ok = store == "ok" && storage_key.is_some();

    let settings = &state.node.settings;
    let response = StatusResponse {
        status: if all_ok { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        common_name: settings.common_name.clone(),
        endpoint: settings.endpoint.clone(),
        organization: settings.organization.clone(),
        travel_address: traddr::for_resource(&settings.endpoint, "", "").ok(),
        sunrise_enabled: settings.sunrise_enabled,
        peers: state.node.peers.len(),
        checks: HealthChecks { store, storage_key },
    };

    let status = if all_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Liveness check handler.
///
/// Always returns 200 if the process is running.
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Status",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse)
    )
)]
pub async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check handler.
///
/// Returns 200 only if the store and the storage key are available.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Status",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse),
        (status = 503, description = "Service is not ready", body = HealthResponse)
    )
)]
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let ready = check_store(&state) == "ok" && state.node.keychain.default_signature().is_some();
    if ready {
        (StatusCode::OK, Json(HealthResponse { status: "ok".to_string() }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unavailable".to_string(),
            }),
        )
    }
}
