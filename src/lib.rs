// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envoy Node - Travel Rule Envelope Pipeline
//!
//! A self-hosted compliance node that exchanges Travel Rule information with
//! counterparty VASPs as secure envelopes: encrypted payloads whose keys are
//! sealed to the recipient.
//!
//! ## Modules
//!
//! - `envelope` - Secure envelope codec, encryption and sealing
//! - `keys`, `keychain` - RSA key material and the local / peer key chain
//! - `peers`, `traddr`, `resolver` - Counterparty transport and routing
//! - `store` - Transfers, envelopes and counterparties (redb)
//! - `postman`, `adapters`, `send` - Packet pipeline for TRISA, TRP and Sunrise
//! - `sunrise`, `emails` - Email invitations and verification tokens
//! - `api`, `auth` - HTTP surface (Axum) and bearer tokens
//! - `tls` - Mutual TLS listener and verified peer certificates

pub mod adapters;
pub mod api;
pub mod auth;
pub mod config;
pub mod emails;
pub mod envelope;
pub mod error;
pub mod keychain;
pub mod keys;
pub mod peers;
pub mod postman;
pub mod resolver;
pub mod send;
pub mod state;
pub mod store;
pub mod sunrise;
pub mod tls;
pub mod traddr;
pub mod trp;
