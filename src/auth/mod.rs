// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Bearer tokens signed with the node's HMAC secret (HS256).
//!
//! ## Subjects
//!
//! | Subject type | Issued to                       | May call                  |
//! |--------------|---------------------------------|---------------------------|
//! | `user`       | operators of this node          | `/v1/*`                   |
//! | `api_key`    | back office systems             | `/v1/*`                   |
//! | `sunrise`    | a verified Sunrise contact      | `/sunrise/{accept,reject,review}` for one transfer |
//!
//! Sunrise sessions are issued by `/sunrise/verify` and expire after
//! [`SUNRISE_SESSION_TTL`]. Peer routes (`/trisa/*`, `/trp*`) authenticate
//! with mutual TLS instead.
//!
//! Clock skew and token hand-over are covered by [`AuthConfig::overlap`].

pub mod claims;
pub mod error;
pub mod extractor;

pub use claims::{AuthConfig, Claims, SubjectType, DEFAULT_ACCESS_TTL, SUNRISE_SESSION_TTL};
pub use error::AuthError;
pub use extractor::{Auth, Operator, SunriseSession};
