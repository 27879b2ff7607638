// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use envoy_node::{
    adapters::{store_sunrise_key, Node, NodeSettings},
    api::router,
    auth::{AuthConfig, SubjectType, DEFAULT_ACCESS_TTL},
    config::{Config, ConfigError, LogFormat},
    emails::{Backoff, LogSender},
    keychain::{KeyChain, KeyError, StoreOptions, DEFAULT_JANITOR_INTERVAL},
    keys::{Key, KeyMaterialError, KeyPair},
    peers::{http::HttpConnector, PeerError, Peers, KEY_EXCHANGE_TIMEOUT, TRANSFER_TIMEOUT},
    resolver::Resolver,
    state::AppState,
    store::{Store, StoreError},
    tls::{self, PeerCertAcceptor, TlsError},
};

/// Time in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("storage key: {0}")]
    KeyMaterial(#[from] KeyMaterialError),

    #[error("key chain: {0}")]
    Key(#[from] KeyError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("peer transport: {0}")]
    Peer(#[from] PeerError),

    #[error("tls: {0}")]
    Tls(#[from] TlsError),

    #[error("auth: {0}")]
    Auth(#[from] envoy_node::auth::AuthError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("usage: envoy-node [token <subject> [user|api_key]]")]
    Usage,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

fn auth_config(config: &Config) -> AuthConfig {
    AuthConfig::new(config.auth_secret.as_bytes(), format!("https://{}", config.common_name))
        .with_overlap(config.refresh_overlap)
}

/// Print a bearer token for an operator or back office system.
fn issue_token(config: &Config, args: &[String]) -> Result<(), StartupError> {
    let subject = args.first().ok_or(StartupError::Usage)?;
    let subject_type = match args.get(1) {
        Some(raw) => SubjectType::parse(raw)
            .filter(|kind| *kind != SubjectType::Sunrise)
            .ok_or(StartupError::Usage)?,
        None => SubjectType::ApiKey,
    };

    let (token, claims) = auth_config(config).issue(subject.as_str(), subject_type, None, DEFAULT_ACCESS_TTL)?;
    println!("{token}");
    eprintln!("{} token for {:?} expires at {}", claims.subject_type, claims.sub, claims.exp);
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}

async fn serve(config: Config) -> Result<(), StartupError> {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider was already installed");
    }

    let keychain = Arc::new(KeyChain::new());
    let storage = KeyPair::load(&config.keys_path)?;
    let signature = storage.public_key_signature().to_string();
    keychain.store(
        Key::from(storage),
        StoreOptions {
            is_default: true,
            ..Default::default()
        },
    )?;
    info!(%signature, path = %config.keys_path.display(), "Loaded storage key");

    match &config.sunrise_keys_path {
        Some(path) => {
            let sunrise = KeyPair::load(path)?;
            let signature = sunrise.public_key_signature().to_string();
            store_sunrise_key(&keychain, sunrise)?;
            info!(%signature, path = %path.display(), "Loaded Sunrise storage key");
        }
        None => info!("Sunrise envelopes are stored under the default storage key"),
    }

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(Store::open(&config.database_path())?);

    let identity = match &config.tls {
        Some(tls) => {
            let mut pem = std::fs::read(&tls.cert)?;
            pem.push(b'\n');
            pem.extend(std::fs::read(&tls.key)?);
            Some(pem)
        }
        None => None,
    };
    let connector = HttpConnector::new(TRANSFER_TIMEOUT, identity.as_deref())?;
    let peers = Arc::new(Peers::new(Arc::new(connector)).with_timeouts(TRANSFER_TIMEOUT, KEY_EXCHANGE_TIMEOUT));

    let shutdown = CancellationToken::new();
    let node = Node {
        resolver: Arc::new(Resolver::new(Arc::clone(&store))),
        store,
        keychain: Arc::clone(&keychain),
        peers: Arc::clone(&peers),
        email: Arc::new(LogSender),
        settings: NodeSettings {
            common_name: config.common_name.clone(),
            endpoint: config.endpoint.clone(),
            organization: config.organization.clone(),
            sunrise_enabled: config.sunrise_enabled,
            sunrise_url: config.sunrise_url.clone(),
            key_ttl: config.key_cache_ttl,
            email_backoff: Backoff::default(),
        },
        shutdown: shutdown.clone(),
    };

    let janitor = tokio::spawn(Arc::clone(&keychain).run_janitor(DEFAULT_JANITOR_INTERVAL, shutdown.clone()));

    let state = AppState::new(node, auth_config(&config)).with_trusted_proxy(config.trusted_proxy);
    if config.trusted_proxy {
        warn!("Peer identity headers are trusted; the node must only be reachable through the proxy");
    }
    let app = router(state);
    let addr = config.bind_addr;

    match &config.tls {
        Some(files) => {
            let acceptor = PeerCertAcceptor::new(tls::server_config(files)?);
            let handle = axum_server::Handle::new();
            let signal = shutdown.clone();
            let graceful = handle.clone();
            tokio::spawn(async move {
                shutdown_signal(signal).await;
                graceful.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });

            info!(%addr, common_name = %config.common_name, "Envoy node listening on https (docs at /docs)");
            axum_server::bind(addr)
                .acceptor(acceptor)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            warn!(%addr, "No TLS identity configured, serving plain http behind a TLS terminator");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
                .await?;
        }
    }

    shutdown.cancel();
    if let Err(e) = janitor.await {
        warn!(error = %e, "Key chain janitor did not stop cleanly");
    }
    peers.close().await?;
    info!("Envoy node stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("envoy-node: {e}");
            return ExitCode::FAILURE;
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let result = match args.first().map(String::as_str) {
        Some("token") => issue_token(&config, &args[1..]),
        Some(_) => Err(StartupError::Usage),
        None => {
            init_tracing(config.log_format);
            info!(?config, "Starting envoy node");
            serve(config).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("envoy-node: {e}");
            ExitCode::FAILURE
        }
    }
}
