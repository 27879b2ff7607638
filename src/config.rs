// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read once from the environment at startup into
//! [`Config`]. Invalid values stop the node before it binds.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ENVOY_DATA_DIR` | Directory holding the redb database | `/data` |
//! | `ENVOY_BIND_ADDR` | Server bind address | `0.0.0.0:8080` |
//! | `ENVOY_ENDPOINT` | TRISA endpoint (`host:port`); its host is the node's common name | Required |
//! | `ENVOY_ORGANIZATION` | Name shown to counterparties and in emails | `Envoy Node` |
//! | `ENVOY_KEYS_PATH` | PKCS#8 PEM storage / sealing key | Required |
//! | `ENVOY_TLS_CERT` | Server certificate chain (PEM); enables HTTPS | Optional |
//! | `ENVOY_TLS_KEY` | Server private key (PEM) | Required with `ENVOY_TLS_CERT` |
//! | `ENVOY_TLS_CLIENT_CA` | CA bundle (PEM) peer client certificates are verified against | Optional |
//! | `ENVOY_TRUSTED_PROXY` | Take peer identity from headers set by a mutual TLS proxy | `false` |
//! | `ENVOY_SUNRISE_ENABLED` | Invite counterparties without a node by email | `true` |
//! | `ENVOY_SUNRISE_KEYS_PATH` | PKCS#8 PEM key reserved for Sunrise envelopes | Default storage key |
//! | `ENVOY_SUNRISE_URL` | Base URL of the links in Sunrise emails | `https://{endpoint}` |
//! | `ENVOY_KEY_CACHE_TTL` | Seconds exchanged keys stay cached | `86400` |
//! | `ENVOY_REFRESH_OVERLAP` | Seconds an expired bearer token is still accepted | `60` |
//! | `ENVOY_AUTH_SECRET` | HMAC secret for bearer tokens (at least 32 bytes) | Required |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::keychain::DEFAULT_CACHE_DURATION;
use crate::traddr;

pub const DATA_DIR_ENV: &str = "ENVOY_DATA_DIR";
pub const BIND_ADDR_ENV: &str = "ENVOY_BIND_ADDR";
pub const ENDPOINT_ENV: &str = "ENVOY_ENDPOINT";
pub const ORGANIZATION_ENV: &str = "ENVOY_ORGANIZATION";
pub const KEYS_PATH_ENV: &str = "ENVOY_KEYS_PATH";
pub const TLS_CERT_ENV: &str = "ENVOY_TLS_CERT";
pub const TLS_KEY_ENV: &str = "ENVOY_TLS_KEY";
pub const TLS_CLIENT_CA_ENV: &str = "ENVOY_TLS_CLIENT_CA";
pub const TRUSTED_PROXY_ENV: &str = "ENVOY_TRUSTED_PROXY";
pub const SUNRISE_ENABLED_ENV: &str = "ENVOY_SUNRISE_ENABLED";
pub const SUNRISE_URL_ENV: &str = "ENVOY_SUNRISE_URL";
pub const SUNRISE_KEYS_PATH_ENV: &str = "ENVOY_SUNRISE_KEYS_PATH";
pub const KEY_CACHE_TTL_ENV: &str = "ENVOY_KEY_CACHE_TTL";
pub const REFRESH_OVERLAP_ENV: &str = "ENVOY_REFRESH_OVERLAP";
pub const AUTH_SECRET_ENV: &str = "ENVOY_AUTH_SECRET";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_ORGANIZATION: &str = "Envoy Node";
pub const DEFAULT_REFRESH_OVERLAP: Duration = Duration::from_secs(60);

/// Shortest HMAC secret accepted for bearer tokens.
pub const MIN_AUTH_SECRET_LEN: usize = 32;

/// Name of the redb file inside the data directory.
pub const DATABASE_FILE: &str = "envoy.redb";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub bind_addr: SocketAddr,
    /// TRISA endpoint, `host:port`.
    pub endpoint: String,
    /// Host of the endpoint.
    pub common_name: String,
    pub organization: String,
    pub keys_path: PathBuf,
    pub tls: Option<TlsFiles>,
    /// Peer identity headers are honoured only behind a trusted proxy.
    pub trusted_proxy: bool,
    pub sunrise_enabled: bool,
    pub sunrise_url: String,
    pub sunrise_keys_path: Option<PathBuf>,
    pub key_cache_ttl: Duration,
    pub refresh_overlap: Duration,
    pub auth_secret: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
    /// Roots for client certificates; none means peers are not asked for one.
    pub client_ca: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let endpoint = var(ENDPOINT_ENV).ok_or(ConfigError::Missing(ENDPOINT_ENV))?;
        let url = traddr::parse(&endpoint).map_err(|e| ConfigError::Invalid {
            var: ENDPOINT_ENV,
            message: e.to_string(),
        })?;
        let common_name = url.host_str().unwrap_or_default().to_string();
        let endpoint = endpoint
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_string();

        let bind_addr = var(BIND_ADDR_ENV)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: BIND_ADDR_ENV,
                message: e.to_string(),
            })?;

        let tls = match (var(TLS_CERT_ENV), var(TLS_KEY_ENV)) {
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.into(),
                key: key.into(),
                client_ca: var(TLS_CLIENT_CA_ENV).map(PathBuf::from),
            }),
            (None, None) if var(TLS_CLIENT_CA_ENV).is_some() => {
                return Err(ConfigError::Missing(TLS_CERT_ENV))
            }
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing(TLS_KEY_ENV)),
            (None, Some(_)) => return Err(ConfigError::Missing(TLS_CERT_ENV)),
        };

        let auth_secret = var(AUTH_SECRET_ENV).ok_or(ConfigError::Missing(AUTH_SECRET_ENV))?;
        if auth_secret.len() < MIN_AUTH_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: AUTH_SECRET_ENV,
                message: format!("must be at least {MIN_AUTH_SECRET_LEN} bytes"),
            });
        }

        let log_format = match var(LOG_FORMAT_ENV).as_deref().map(str::to_lowercase).as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: LOG_FORMAT_ENV,
                    message: format!("unknown format {other:?}"),
                })
            }
        };

        Ok(Self {
            data_dir: var(DATA_DIR_ENV).unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()).into(),
            bind_addr,
            sunrise_url: var(SUNRISE_URL_ENV).unwrap_or_else(|| format!("https://{endpoint}")),
            endpoint,
            common_name,
            organization: var(ORGANIZATION_ENV).unwrap_or_else(|| DEFAULT_ORGANIZATION.to_string()),
            keys_path: var(KEYS_PATH_ENV).ok_or(ConfigError::Missing(KEYS_PATH_ENV))?.into(),
            tls,
            trusted_proxy: parse_bool(TRUSTED_PROXY_ENV, var(TRUSTED_PROXY_ENV), false)?,
            sunrise_keys_path: var(SUNRISE_KEYS_PATH_ENV).map(PathBuf::from),
            sunrise_enabled: parse_bool(SUNRISE_ENABLED_ENV, var(SUNRISE_ENABLED_ENV), true)?,
            key_cache_ttl: parse_secs(KEY_CACHE_TTL_ENV, var(KEY_CACHE_TTL_ENV), DEFAULT_CACHE_DURATION)?,
            refresh_overlap: parse_secs(REFRESH_OVERLAP_ENV, var(REFRESH_OVERLAP_ENV), DEFAULT_REFRESH_OVERLAP)?,
            auth_secret,
            log_format,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("data_dir", &self.data_dir)
            .field("bind_addr", &self.bind_addr)
            .field("endpoint", &self.endpoint)
            .field("organization", &self.organization)
            .field("keys_path", &self.keys_path)
            .field("tls", &self.tls)
            .field("trusted_proxy", &self.trusted_proxy)
            .field("sunrise_enabled", &self.sunrise_enabled)
            .field("key_cache_ttl", &self.key_cache_ttl)
            .finish_non_exhaustive()
    }
}

fn parse_bool(var: &'static str, value: Option<String>, default: bool) -> ConfigResult<bool> {
    match value.as_deref().map(str::to_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            var,
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}

fn parse_secs(var: &'static str, value: Option<String>, default: Duration) -> ConfigResult<Duration> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::Invalid {
                var,
                message: e.to_string(),
            }),
    }
}
