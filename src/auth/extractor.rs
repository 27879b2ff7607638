// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated callers.
//!
//! ```rust,ignore
//! async fn list_transactions(Operator(claims): Operator) -> impl IntoResponse {
//!     // claims.sub is the user or API key id
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::{AuthError, Claims};
use crate::state::AppState;

/// Any valid bearer token.
pub struct Auth(pub Claims);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(claims) = parts.extensions.get::<Claims>().cloned() {
            return Ok(Auth(claims));
        }

        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidAuthHeader)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidAuthHeader)?;

        let claims = state.auth.verify(token.trim())?;
        parts.extensions.insert(claims.clone());
        Ok(Auth(claims))
    }
}

/// A user or API key operating the node.
pub struct Operator(pub Claims);

impl FromRequestParts<AppState> for Operator {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(claims) = Auth::from_request_parts(parts, state).await?;
        if !claims.is_operator() {
            return Err(AuthError::WrongSubject);
        }
        Ok(Operator(claims))
    }
}

/// A verified Sunrise contact reviewing a single transfer.
pub struct SunriseSession(pub Claims);

impl FromRequestParts<AppState> for SunriseSession {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Auth(claims) = Auth::from_request_parts(parts, state).await?;
        if !claims.is_sunrise() {
            return Err(AuthError::WrongSubject);
        }
        Ok(SunriseSession(claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{SubjectType, DEFAULT_ACCESS_TTL};
    use crate::state::testing::test_app;
    use axum::http::Request;
    use ulid::Ulid;
    use uuid::Uuid;

    fn parts(token: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/test");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn auth_extractor_requires_auth_header() {
        let app = test_app();
        let result = Auth::from_request_parts(&mut parts(None), &app.state).await;
        assert!(matches!(result, Err(AuthError::MissingAuthHeader)));

        let mut basic = Request::builder()
            .uri("/test")
            .header("Authorization", "Basic dXNlcjpwYXNz")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let result = Auth::from_request_parts(&mut basic, &app.state).await;
        assert!(matches!(result, Err(AuthError::InvalidAuthHeader)));
    }

    #[tokio::test]
    async fn operator_accepts_users_and_api_keys() {
        let app = test_app();
        for subject_type in [SubjectType::User, SubjectType::ApiKey] {
            let (token, _) = app
                .state
                .auth
                .issue("ops", subject_type, None, DEFAULT_ACCESS_TTL)
                .unwrap();
            let Operator(claims) = Operator::from_request_parts(&mut parts(Some(&token)), &app.state)
                .await
                .unwrap();
            assert_eq!(claims.subject_type, subject_type);
        }
    }

    #[tokio::test]
    async fn sunrise_sessions_cannot_operate() {
        let app = test_app();
        let (token, _) = app.state.auth.issue_sunrise(Ulid::new(), Uuid::new_v4()).unwrap();

        let result = Operator::from_request_parts(&mut parts(Some(&token)), &app.state).await;
        assert!(matches!(result, Err(AuthError::WrongSubject)));
        assert!(SunriseSession::from_request_parts(&mut parts(Some(&token)), &app.state)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn auth_extractor_prefers_extensions() {
        let app = test_app();
        let (_, claims) = app
            .state
            .auth
            .issue("from_middleware", SubjectType::User, None, DEFAULT_ACCESS_TTL)
            .unwrap();
        let mut parts = parts(None);
        parts.extensions.insert(claims);

        let Auth(claims) = Auth::from_request_parts(&mut parts, &app.state).await.unwrap();
        assert_eq!(claims.sub, "from_middleware");
    }
}
