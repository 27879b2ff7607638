// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer token failures and their HTTP rendering.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authorization header is required")]
    MissingAuthHeader,

    #[error("expected an authorization header of the form 'Bearer <token>'")]
    InvalidAuthHeader,

    #[error("bearer token is malformed")]
    MalformedToken,

    #[error("bearer token signature is invalid")]
    InvalidSignature,

    #[error("bearer token has expired")]
    TokenExpired,

    #[error("bearer token was not issued by this node")]
    InvalidIssuer,

    #[error("bearer token is not yet valid")]
    TokenNotYetValid,

    /// Operator token on a Sunrise route or the other way round.
    #[error("bearer token cannot be used for this operation")]
    WrongSubject,

    #[error("could not sign token: {0}")]
    Signing(#[source] JwtError),
}

/// Verification failures reported by `jsonwebtoken`.
impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            _ => AuthError::MalformedToken,
        }
    }
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: &'static str,
}

impl AuthError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidIssuer => "invalid_issuer",
            AuthError::TokenNotYetValid => "token_not_yet_valid",
            AuthError::WrongSubject => "wrong_subject",
            AuthError::Signing(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::WrongSubject => StatusCode::FORBIDDEN,
            AuthError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Message safe to return to the caller.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::Signing(e) => {
                error!(error = %e, "Token signing failed");
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = AuthErrorBody {
            error: self.public_message(),
            error_code: self.error_code(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
