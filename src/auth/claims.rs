// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer token claims, issuance and verification.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use utoipa::ToSchema;
use uuid::Uuid;

use super::AuthError;

/// Default lifetime of tokens minted for operators and API keys.
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(60 * 60);

/// Lifetime of the session handed to a verified Sunrise contact.
pub const SUNRISE_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Who a token was issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    /// A person operating this node.
    User,
    /// A back office system calling the API.
    ApiKey,
    /// A counterparty contact reviewing one transfer through Sunrise.
    Sunrise,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::User => "user",
            SubjectType::ApiKey => "api_key",
            SubjectType::Sunrise => "sunrise",
        }
    }

    /// Parse a subject type (case-insensitive).
    pub fn parse(s: &str) -> Option<SubjectType> {
        match s.to_lowercase().as_str() {
            "user" => Some(SubjectType::User),
            "api_key" | "apikey" => Some(SubjectType::ApiKey),
            "sunrise" => Some(SubjectType::Sunrise),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by every bearer token the node accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Claims {
    /// Subject id: user id, API key id or Sunrise record id.
    pub sub: String,
    pub subject_type: SubjectType,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    /// Transfer a Sunrise session is scoped to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope_id: Option<Uuid>,
}

impl Claims {
    pub fn is_sunrise(&self) -> bool {
        self.subject_type == SubjectType::Sunrise
    }

    /// Users and API keys operate the node; Sunrise contacts only review.
    pub fn is_operator(&self) -> bool {
        matches!(self.subject_type, SubjectType::User | SubjectType::ApiKey)
    }

    /// Sunrise record id of a Sunrise session.
    pub fn sunrise_id(&self) -> Result<Ulid, AuthError> {
        if !self.is_sunrise() {
            return Err(AuthError::WrongSubject);
        }
        Ulid::from_string(&self.sub).map_err(|_| AuthError::MalformedToken)
    }
}

/// HS256 signing and verification of bearer tokens.
#[derive(Clone)]
pub struct AuthConfig {
    encoding: EncodingKey,
    decoding: DecodingKey,
    /// Expected and issued `iss` claim.
    pub issuer: String,
    /// Grace period after expiry in which a token is still accepted so
    /// clients can swap tokens without a gap.
    pub overlap: Duration,
}

impl AuthConfig {
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            overlap: Duration::from_secs(60),
        }
    }

    pub fn with_overlap(mut self, overlap: Duration) -> Self {
        self.overlap = overlap;
        self
    }

    /// Sign a token for `sub`.
    pub fn issue(
        &self,
        sub: impl Into<String>,
        subject_type: SubjectType,
        envelope_id: Option<Uuid>,
        ttl: Duration,
    ) -> Result<(String, Claims), AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: sub.into(),
            subject_type,
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl.as_secs() as i64,
            envelope_id,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(AuthError::Signing)?;
        Ok((token, claims))
    }

    /// Session for a verified Sunrise contact, scoped to one transfer.
    pub fn issue_sunrise(&self, sunrise_id: Ulid, envelope_id: Uuid) -> Result<(String, Claims), AuthError> {
        self.issue(
            sunrise_id.to_string(),
            SubjectType::Sunrise,
            Some(envelope_id),
            SUNRISE_SESSION_TTL,
        )
    }

    /// Check the signature, expiry and issuer of a token.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.overlap.as_secs();
        validation.validate_aud = false;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding, &validation)?.claims;
        if claims.is_sunrise() && claims.envelope_id.is_none() {
            return Err(AuthError::MalformedToken);
        }
        Ok(claims)
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("issuer", &self.issuer)
            .field("overlap", &self.overlap)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(b"0123456789abcdef0123456789abcdef", "https://node.example.com")
    }

    #[test]
    fn issued_tokens_verify() {
        let auth = config();
        let (token, issued) = auth
            .issue("ops@example.com", SubjectType::User, None, DEFAULT_ACCESS_TTL)
            .unwrap();
        let claims = auth.verify(&token).unwrap();
        assert_eq!(claims, issued);
        assert!(claims.is_operator());
        assert!(matches!(claims.sunrise_id(), Err(AuthError::WrongSubject)));
    }

    #[test]
    fn sunrise_sessions_carry_record_and_transfer() {
        let auth = config();
        let id = Ulid::new();
        let envelope_id = Uuid::new_v4();
        let (token, _) = auth.issue_sunrise(id, envelope_id).unwrap();

        let claims = auth.verify(&token).unwrap();
        assert!(claims.is_sunrise());
        assert!(!claims.is_operator());
        assert_eq!(claims.sunrise_id().unwrap(), id);
        assert_eq!(claims.envelope_id, Some(envelope_id));
    }

    #[test]
    fn foreign_and_expired_tokens_are_refused() {
        let auth = config();
        let other = AuthConfig::new(b"another secret entirely, 32 bytes", "https://node.example.com");
        let (token, _) = other
            .issue("key_1", SubjectType::ApiKey, None, DEFAULT_ACCESS_TTL)
            .unwrap();
        assert!(matches!(auth.verify(&token), Err(AuthError::InvalidSignature)));

        let elsewhere = AuthConfig::new(b"0123456789abcdef0123456789abcdef", "https://other.example.com");
        let (token, _) = elsewhere
            .issue("key_1", SubjectType::ApiKey, None, DEFAULT_ACCESS_TTL)
            .unwrap();
        assert!(matches!(auth.verify(&token), Err(AuthError::InvalidIssuer)));

        let strict = config().with_overlap(Duration::ZERO);
        let mut claims = strict
            .issue("key_1", SubjectType::ApiKey, None, DEFAULT_ACCESS_TTL)
            .unwrap()
            .1;
        claims.exp = Utc::now().timestamp() - 120;
        let token = encode(&Header::new(Algorithm::HS256), &claims, &strict.encoding).unwrap();
        assert!(matches!(strict.verify(&token), Err(AuthError::TokenExpired)));
        assert!(matches!(strict.verify("not.a.token"), Err(AuthError::MalformedToken)));
    }

    #[test]
    fn subject_types_parse() {
        assert_eq!(SubjectType::parse("API_KEY"), Some(SubjectType::ApiKey));
        assert_eq!(SubjectType::parse("sunrise"), Some(SubjectType::Sunrise));
        assert_eq!(SubjectType::parse("admin"), None);
        assert_eq!(SubjectType::User.to_string(), "user");
    }
}
