// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::adapters::AdapterError;
use crate::auth::AuthError;
use crate::postman::PostmanError;
use crate::resolver::ResolveError;
use crate::send::SendError;
use crate::store::StoreError;
use crate::traddr::TravelAddressError;
use crate::trp::TrpError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Counterparty could not be reached or answered with an error.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    /// Log the cause and hide it from the caller.
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        error!(error = %cause, "Internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::new(err.status_code(), err.public_message())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ApiError::not_found(err.to_string()),
            StoreError::InvalidEmail(_) | StoreError::UnknownField(_) => {
                ApiError::bad_request(err.to_string())
            }
            StoreError::Ambiguous(_) | StoreError::Duplicate(_) => ApiError::conflict(err.to_string()),
            other => ApiError::internal(other),
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Validation(_) => ApiError::unprocessable(err.to_string()),
            ResolveError::NotFound(_) | ResolveError::ProtocolMismatch { .. } => {
                ApiError::not_found(err.to_string())
            }
            ResolveError::TravelAddress(_) => ApiError::bad_request(err.to_string()),
            ResolveError::Store(inner) => inner.into(),
        }
    }
}

impl From<TravelAddressError> for ApiError {
    fn from(err: TravelAddressError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<TrpError> for ApiError {
    fn from(err: TrpError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<PostmanError> for ApiError {
    fn from(err: PostmanError) -> Self {
        match err {
            PostmanError::Store(inner) => inner.into(),
            PostmanError::Trp(inner) => inner.into(),
            PostmanError::Email(_) => ApiError::bad_gateway(err.to_string()),
            PostmanError::NoCounterparty | PostmanError::NoContacts => {
                ApiError::unprocessable(err.to_string())
            }
            other => ApiError::internal(other),
        }
    }
}

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Postman(inner) => inner.into(),
            AdapterError::Store(inner) => inner.into(),
            AdapterError::Resolve(inner) => inner.into(),
            AdapterError::Trp(inner) => inner.into(),
            AdapterError::Peer(_) => ApiError::bad_gateway(err.to_string()),
            AdapterError::Token(_) => ApiError::unauthorized(err.to_string()),
            AdapterError::UnknownTransfer(_) | AdapterError::SunriseDisabled => {
                ApiError::not_found(err.to_string())
            }
            AdapterError::Expired => ApiError::new(StatusCode::GONE, err.to_string()),
            AdapterError::AlreadyReviewed(_) | AdapterError::Concluded(..) => {
                ApiError::conflict(err.to_string())
            }
            AdapterError::PeerMismatch(_) => ApiError::new(StatusCode::FORBIDDEN, err.to_string()),
            AdapterError::Key(_) => ApiError::internal(err),
        }
    }
}

impl From<SendError> for ApiError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Resolve(inner) => inner.into(),
            SendError::Adapter(inner) => inner.into(),
            SendError::Store(inner) => inner.into(),
            SendError::Postman(inner) => inner.into(),
            SendError::Concluded(..) => ApiError::conflict(err.to_string()),
            SendError::NoCounterparty(_) => ApiError::unprocessable(err.to_string()),
        }
    }
}
