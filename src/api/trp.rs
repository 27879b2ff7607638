// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Travel Rule Protocol routes called by counterparty VASPs.

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::{header_value, peer::AuthenticatedPeer};
use crate::{
    adapters::trp as adapter,
    error::ApiError,
    state::AppState,
    trp::{
        self, Confirmation, Extensions, Info, Inquiry, Resolution, VersionInfo,
        API_EXTENSIONS_HEADER, API_VERSION_HEADER, REQUEST_IDENTIFIER_HEADER,
    },
};

fn protocol_info(headers: &HeaderMap) -> Info {
    Info::from_headers(
        header_value(headers, API_VERSION_HEADER),
        header_value(headers, REQUEST_IDENTIFIER_HEADER),
        header_value(headers, API_EXTENSIONS_HEADER),
    )
}

/// Resolution body with the protocol headers echoed back.
fn resolution_response(resolution: Resolution) -> Result<Response, ApiError> {
    let header = |value: &str| {
        HeaderValue::from_str(value).map_err(|e| ApiError::internal(format!("invalid trp header: {e}")))
    };
    let mut response = Json(&resolution).into_response();
    let headers = response.headers_mut();
    headers.insert(API_VERSION_HEADER, header(&resolution.info.api_version)?);
    headers.insert(REQUEST_IDENTIFIER_HEADER, header(&resolution.info.request_identifier)?);
    if !resolution.info.api_extensions.is_empty() {
        headers.insert(API_EXTENSIONS_HEADER, header(&resolution.info.extensions_header())?);
    }
    Ok(response)
}

#[utoipa::path(
    post,
    path = "/trp",
    tag = "TRP",
    request_body = Inquiry,
    params(
        ("api-version" = String, Header, description = "TRP version"),
        ("request-identifier" = String, Header, description = "Transfer UUID"),
    ),
    responses(
        (status = 200, description = "Pending resolution", body = Resolution),
        (status = 400, description = "Invalid inquiry"),
        (status = 401, description = "No client certificate"),
        (status = 403, description = "Callback not covered by the client certificate")
    )
)]
pub async fn inquiry(
    State(state): State<AppState>,
    peer: AuthenticatedPeer,
    headers: HeaderMap,
    Json(mut inquiry): Json<Inquiry>,
) -> Result<Response, ApiError> {
    inquiry.info = protocol_info(&headers);
    let resolution = adapter::handle_inquiry(&state.node, inquiry, &peer.certificate).await?;
    resolution_response(resolution)
}

#[utoipa::path(
    post,
    path = "/trp/resolve",
    tag = "TRP",
    request_body = Resolution,
    responses(
        (status = 204, description = "Resolution recorded"),
        (status = 403, description = "Sender is not the transfer's counterparty"),
        (status = 404, description = "Unknown transfer"),
        (status = 409, description = "Transfer already concluded")
    )
)]
pub async fn resolve(
    State(state): State<AppState>,
    peer: AuthenticatedPeer,
    headers: HeaderMap,
    Json(mut resolution): Json<Resolution>,
) -> Result<StatusCode, ApiError> {
    resolution.info = protocol_info(&headers);
    adapter::handle_resolve(&state.node, resolution, &peer.certificate).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/trp/confirmation",
    tag = "TRP",
    request_body = Confirmation,
    responses(
        (status = 204, description = "Confirmation recorded"),
        (status = 403, description = "Sender is not the transfer's counterparty"),
        (status = 404, description = "Unknown transfer"),
        (status = 409, description = "Transfer already concluded")
    )
)]
pub async fn confirmation(
    State(state): State<AppState>,
    peer: AuthenticatedPeer,
    headers: HeaderMap,
    Json(mut confirmation): Json<Confirmation>,
) -> Result<StatusCode, ApiError> {
    confirmation.info = protocol_info(&headers);
    adapter::handle_confirmation(&state.node, confirmation, &peer.certificate).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/trp/version",
    tag = "TRP",
    responses((status = 200, description = "Supported TRP version", body = VersionInfo))
)]
pub async fn version() -> Json<VersionInfo> {
    Json(trp::version_info())
}

#[utoipa::path(
    get,
    path = "/trp/extensions",
    tag = "TRP",
    responses((status = 200, description = "Supported TRP extensions", body = Extensions))
)]
pub async fn extensions() -> Json<Extensions> {
    Json(trp::extensions())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::peer::testing::with_peer;
    use crate::api::router;
    use crate::postman::fixtures::btc_transfer;
    use crate::state::testing::test_app;
    use crate::store::Status;
    use crate::trp::{inquiry_from_payload, API_VERSION};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn request(uri: &str, id: &str, body: String) -> Request<Body> {
        let builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .header(API_VERSION_HEADER, API_VERSION)
            .header(REQUEST_IDENTIFIER_HEADER, id);
        with_peer(builder, "originator.example.com")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn inquiry_then_confirmation() {
        let app = test_app();
        let id = Uuid::new_v4();
        let inquiry =
            inquiry_from_payload(id, &btc_transfer(), "https://originator.example.com/trp/resolve");

        let response = router(app.state.clone())
            .oneshot(request("/trp", &id.to_string(), serde_json::to_string(&inquiry).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(REQUEST_IDENTIFIER_HEADER).unwrap(),
            id.to_string().as_str()
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let resolution: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(resolution["version"], API_VERSION);
        assert!(resolution.get("approved").is_none());

        let response = router(app.state.clone())
            .oneshot(request("/trp/confirmation", &id.to_string(), r#"{"txid":"4c1d1f0c"}"#.into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let txn = app.state.node.store.retrieve_transaction(id).unwrap();
        assert_eq!(txn.status, Status::Completed);
    }

    #[tokio::test]
    async fn inquiry_without_identifier_is_rejected() {
        let app = test_app();
        let id = Uuid::new_v4();
        let inquiry =
            inquiry_from_payload(id, &btc_transfer(), "https://originator.example.com/trp/resolve");
        let response = router(app.state.clone())
            .oneshot(request("/trp", "", serde_json::to_string(&inquiry).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!app.state.node.store.transaction_exists(id).unwrap());
    }

    #[tokio::test]
    async fn resolve_for_unknown_transfer_is_not_found() {
        let app = test_app();
        let id = Uuid::new_v4().to_string();
        let response = router(app.state.clone())
            .oneshot(request("/trp/resolve", &id, r#"{"rejected":"no"}"#.into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn confirmation_after_conclusion_conflicts() {
        let app = test_app();
        let id = Uuid::new_v4();
        let inquiry =
            inquiry_from_payload(id, &btc_transfer(), "https://originator.example.com/trp/resolve");
        let response = router(app.state.clone())
            .oneshot(request("/trp", &id.to_string(), serde_json::to_string(&inquiry).unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let canceled = r#"{"canceled":"customer withdrew"}"#;
        let response = router(app.state.clone())
            .oneshot(request("/trp/confirmation", &id.to_string(), canceled.into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router(app.state.clone())
            .oneshot(request("/trp/confirmation", &id.to_string(), r#"{"txid":"4c1d1f0c"}"#.into()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let txn = app.state.node.store.retrieve_transaction(id).unwrap();
        assert_eq!(txn.status, Status::Rejected);
        assert_eq!(txn.envelope_count, 3);
    }

    #[tokio::test]
    async fn confirmation_without_certificate_is_unauthorized() {
        let app = test_app();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/trp/confirmation")
            .header("content-type", "application/json")
            .header(API_VERSION_HEADER, API_VERSION)
            .header(REQUEST_IDENTIFIER_HEADER, Uuid::new_v4().to_string())
            .header(crate::peers::http::CLIENT_CERT_CN_HEADER, "originator.example.com")
            .body(Body::from(r#"{"txid":"4c1d1f0c"}"#))
            .unwrap();
        let response = router(app.state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
