// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Travel Addresses
//!
//! A travel address is `ta` followed by the base58 encoding of a
//! scheme-less URI with a four byte double SHA-256 checksum appended.

use sha2::{Digest, Sha256};
use url::Url;

const PREFIX: &str = "ta";
const CHECKSUM_LENGTH: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum TravelAddressError {
    #[error("travel address must start with {PREFIX:?}")]
    MissingPrefix,

    #[error("travel address is not valid base58: {0}")]
    Base58(#[from] bs58::decode::Error),

    #[error("travel address is too short")]
    TooShort,

    #[error("travel address checksum mismatch")]
    Checksum,

    #[error("travel address does not contain a utf-8 uri")]
    NotUtf8,

    #[error("could not parse travel address url: {0}")]
    Url(#[from] url::ParseError),

    #[error("travel address url has no host")]
    NoHost,
}

pub type TravelAddressResult<T> = Result<T, TravelAddressError>;

fn checksum(data: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    let digest = Sha256::digest(Sha256::digest(data));
    let mut out = [0u8; CHECKSUM_LENGTH];
    out.copy_from_slice(&digest[..CHECKSUM_LENGTH]);
    out
}

/// Encode a URI as a travel address. Any `https://` or `//` prefix is dropped.
pub fn encode(uri: &str) -> String {
    let uri = uri
        .strip_prefix("https://")
        .or_else(|| uri.strip_prefix("//"))
        .unwrap_or(uri);

    let mut data = uri.as_bytes().to_vec();
    data.extend_from_slice(&checksum(uri.as_bytes()));
    format!("{PREFIX}{}", bs58::encode(data).into_string())
}

/// Decode a travel address into its URI.
pub fn decode(address: &str) -> TravelAddressResult<String> {
    let body = address
        .trim()
        .strip_prefix(PREFIX)
        .ok_or(TravelAddressError::MissingPrefix)?;

    let data = bs58::decode(body).into_vec()?;
    if data.len() <= CHECKSUM_LENGTH {
        return Err(TravelAddressError::TooShort);
    }

    let (uri, check) = data.split_at(data.len() - CHECKSUM_LENGTH);
    if checksum(uri) != check {
        return Err(TravelAddressError::Checksum);
    }

    String::from_utf8(uri.to_vec()).map_err(|_| TravelAddressError::NotUtf8)
}

/// Parse a decoded travel address URI, assuming https when there is no scheme.
pub fn parse(uri: &str) -> TravelAddressResult<Url> {
    let candidate = if uri.contains("://") {
        uri.to_string()
    } else {
        format!("https://{}", uri.trim_start_matches("//"))
    };

    let url = Url::parse(&candidate)?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(TravelAddressError::NoHost);
    }
    Ok(url)
}

/// `host[:port]` of a parsed travel address.
pub fn host_with_port(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}

/// Build the travel address of a local resource under `endpoint`.
pub fn for_resource(endpoint: &str, id: &str, protocol: &str) -> TravelAddressResult<String> {
    let mut url = parse(endpoint)?;
    url.set_path(id);
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        if !protocol.is_empty() {
            query.append_pair("mode", protocol);
        }
        query.append_pair("t", "i");
    }
    Ok(encode(url.as_str()))
}
