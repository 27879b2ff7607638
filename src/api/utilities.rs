// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{auth::Operator, error::ApiError, traddr};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DecodedAddress {
    /// Scheme-less URI, e.g. `node.example.com:443/x?t=i`.
    pub decoded: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EncodedAddress {
    /// Travel address starting with `ta`.
    pub encoded: String,
}

#[utoipa::path(
    post,
    path = "/v1/utilities/travel-address/encode",
    tag = "Utilities",
    request_body = DecodedAddress,
    responses(
        (status = 200, description = "Encoded travel address", body = EncodedAddress),
        (status = 400, description = "URI is not a valid travel address target")
    ),
    security(("bearer_auth" = []))
)]
pub async fn encode_travel_address(
    Operator(_claims): Operator,
    Json(request): Json<DecodedAddress>,
) -> Result<Json<EncodedAddress>, ApiError> {
    let decoded = request.decoded.trim();
    if decoded.is_empty() {
        return Err(ApiError::bad_request("decoded is required"));
    }
    traddr::parse(decoded)?;
    Ok(Json(EncodedAddress {
        encoded: traddr::encode(decoded),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/utilities/travel-address/decode",
    tag = "Utilities",
    request_body = EncodedAddress,
    responses(
        (status = 200, description = "Decoded URI", body = DecodedAddress),
        (status = 400, description = "Not a travel address")
    ),
    security(("bearer_auth" = []))
)]
pub async fn decode_travel_address(
    Operator(_claims): Operator,
    Json(request): Json<EncodedAddress>,
) -> Result<Json<DecodedAddress>, ApiError> {
    Ok(Json(DecodedAddress {
        decoded: traddr::decode(&request.encoded)?,
    }))
}
