// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TRISA transport routes called by peer nodes.
//!
//! Requests without an authenticated peer certificate are refused.

use axum::{extract::State, Json};

use super::peer::AuthenticatedPeer;
use crate::{
    adapters::trisa,
    envelope::SecureEnvelope,
    error::ApiError,
    peers::{PeerInfo, SigningKey},
    state::AppState,
};

#[utoipa::path(
    post,
    path = "/trisa/transfer",
    tag = "TRISA",
    request_body(content = Object, description = "Secure envelope"),
    responses(
        (status = 200, description = "Reply secure envelope", body = Object),
        (status = 401, description = "No authenticated peer")
    )
)]
pub async fn transfer(
    State(state): State<AppState>,
    peer: AuthenticatedPeer,
    Json(envelope): Json<SecureEnvelope>,
) -> Result<Json<SecureEnvelope>, ApiError> {
    let reply = trisa::handle_incoming(&state.node, envelope, peer.info()).await?;
    Ok(Json(reply))
}

#[utoipa::path(
    post,
    path = "/trisa/keyexchange",
    tag = "TRISA",
    request_body = SigningKey,
    responses(
        (status = 200, description = "Key the peer should seal with", body = SigningKey),
        (status = 401, description = "No authenticated peer")
    )
)]
pub async fn key_exchange(
    State(state): State<AppState>,
    peer: AuthenticatedPeer,
    Json(offered): Json<SigningKey>,
) -> Result<Json<SigningKey>, ApiError> {
    Ok(Json(trisa::key_exchange(&state.node, peer.info(), offered)?))
}

#[utoipa::path(
    get,
    path = "/trisa/info",
    tag = "TRISA",
    responses((status = 200, description = "Details of this node", body = PeerInfo))
)]
pub async fn info(State(state): State<AppState>) -> Json<PeerInfo> {
    Json(state.node.info())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::REMOTE;
    use crate::api::peer::testing::with_peer;
    use crate::api::router;
    use crate::envelope::{Envelope, EnvelopeOptions, TransferState};
    use crate::keys::fixtures;
    use crate::postman::fixtures::btc_transfer;
    use crate::state::testing::test_app;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn post(app: &crate::state::testing::TestApp, uri: &str, peer: Option<&str>, body: String) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(cn) = peer {
            request = with_peer(request, cn);
        }
        let response = router(app.state.clone())
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec())
    }

    #[tokio::test]
    async fn transfer_over_http() {
        let app = test_app();
        let offered = SigningKey::from(fixtures::remote().public_key());
        let (status, body) = post(
            &app,
            "/trisa/keyexchange",
            Some(REMOTE),
            serde_json::to_string(&offered).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let local: SigningKey = serde_json::from_slice(&body).unwrap();
        assert_eq!(local.signature, fixtures::local().public_key_signature());

        let id = Uuid::new_v4();
        let payload = crate::envelope::Payload {
            sent_at: crate::envelope::format_timestamp(chrono::Utc::now()),
            ..btc_transfer()
        };
        let mut env = Envelope::new(
            payload,
            EnvelopeOptions::default()
                .with_envelope_id(id)
                .with_transfer_state(TransferState::Started),
        );
        env.encrypt().unwrap();
        env.seal(fixtures::local().public_key()).unwrap();

        let (status, body) = post(
            &app,
            "/trisa/transfer",
            Some(REMOTE),
            serde_json::to_string(&env.into_proto()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let reply: SecureEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply.transfer_state, TransferState::Pending);
        assert!(app.state.node.store.transaction_exists(id).unwrap());
    }

    #[tokio::test]
    async fn anonymous_peers_are_refused() {
        let app = test_app();
        let offered = SigningKey::from(fixtures::remote().public_key());
        let (status, _) = post(
            &app,
            "/trisa/keyexchange",
            None,
            serde_json::to_string(&offered).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn spoofed_peer_headers_are_refused() {
        let app = test_app();
        let offered = SigningKey::from(fixtures::remote().public_key());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/trisa/keyexchange")
            .header("content-type", "application/json")
            .header(crate::peers::http::PEER_COMMON_NAME_HEADER, REMOTE)
            .header(crate::peers::http::PEER_ENDPOINT_HEADER, "attacker.example.net:443")
            .body(Body::from(serde_json::to_string(&offered).unwrap()))
            .unwrap();
        let response = router(app.state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(app.state.node.keychain.sealing_key(REMOTE, "").is_err());
    }

    #[tokio::test]
    async fn info_describes_this_node() {
        let app = test_app();
        let response = router(app.state.clone())
            .oneshot(Request::get("/trisa/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let info: PeerInfo = serde_json::from_slice(&body).unwrap();
        assert_eq!(info.common_name, "originator.example.com");
    }
}
