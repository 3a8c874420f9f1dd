// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Parcel Relay Server
//!
//! A relay for end-to-end-encrypted peer messages. Provides:
//! - WebSocket endpoint with nonce/signature identity handshake
//! - Direct relay to online recipients, mailbox parking for offline ones
//! - HTTP endpoints for health checks and Prometheus metrics
//! - Rate limiting and abuse prevention

use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tracing::{error, info};

use parcel_relay::config::RelayConfig;
use parcel_relay::connection_limit::ConnectionLimiter;
use parcel_relay::connection_registry::ConnectionRegistry;
use parcel_relay::handler::{self, ConnectionDeps};
use parcel_relay::handshake::IdentityHandshake;
use parcel_relay::http::{create_router, HttpState};
use parcel_relay::mailbox::{create_mailbox_store, MailboxStore};
use parcel_relay::metrics::RelayMetrics;
use parcel_relay::rate_limit::RateLimiter;
use parcel_relay::router::MessageRouter;
use parcel_relay::verifier::Ed25519Verifier;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("parcel_relay=info".parse().unwrap()),
        )
        .init();

    // Load configuration
    let config = RelayConfig::from_env();

    // TLS enforcement: refuse to start if not localhost and TLS not confirmed
    let is_localhost = config.listen_addr.ip().is_loopback();
    let tls_verified = std::env::var("RELAY_TLS_VERIFIED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    if !is_localhost && !tls_verified {
        error!("Relay is configured to listen on a non-localhost address");
        error!(
            "({}) but TLS verification has not been confirmed.",
            config.listen_addr
        );
        error!("Either run behind a TLS-terminating proxy and set RELAY_TLS_VERIFIED=true,");
        error!("or bind to localhost (RELAY_LISTEN_ADDR=127.0.0.1:8080) for development.");
        std::process::exit(1);
    }

    // HTTP listen address for health/metrics. Binds to localhost by default
    // since metrics expose internal state; override to expose elsewhere.
    let http_addr =
        std::env::var("RELAY_METRICS_ADDR").unwrap_or_else(|_| "127.0.0.1:8081".to_string());

    info!(
        "Starting Parcel Relay Server v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("WebSocket: {}", config.listen_addr);
    if tls_verified {
        info!("TLS: Verified (handled by external proxy)");
    } else {
        info!("TLS: Local development mode (localhost only)");
    }
    info!("Metrics endpoint: {}", http_addr);
    info!("Storage backend: {:?}", config.storage_backend);
    info!("Idle timeout: {}s", config.idle_timeout_secs);

    // Initialize shared state
    let metrics = RelayMetrics::new();
    let mailbox: Arc<dyn MailboxStore> = Arc::from(
        create_mailbox_store(config.storage_backend, Some(&config.data_dir))
            .expect("Failed to open mailbox store"),
    );
    let registry = Arc::new(ConnectionRegistry::new());
    let handshake = Arc::new(IdentityHandshake::new(
        registry.clone(),
        mailbox.clone(),
        Arc::new(Ed25519Verifier),
    ));
    let router = Arc::new(MessageRouter::new(registry.clone(), mailbox.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_min));
    let connection_limiter = ConnectionLimiter::new(config.max_connections);

    // Check for metrics auth token (optional additional protection)
    let metrics_token = std::env::var("RELAY_METRICS_TOKEN").ok();
    if metrics_token.is_some() {
        info!("Metrics endpoint protected with bearer token");
    } else if !http_addr.starts_with("127.0.0.1") && !http_addr.starts_with("localhost") {
        info!("WARNING: Metrics exposed on non-localhost without auth token");
        info!("Consider setting RELAY_METRICS_TOKEN for production use");
    }

    // Start HTTP server for health/metrics
    let http_state = HttpState {
        metrics: metrics.clone(),
        metrics_token,
        mailbox: mailbox.clone(),
        started_at: Instant::now(),
    };
    let http_router = create_router(http_state);

    let http_listener = TcpListener::bind(&http_addr)
        .await
        .expect("Failed to bind HTTP listener");

    tokio::spawn(async move {
        info!("HTTP server listening on {}", http_addr);
        axum::serve(http_listener, http_router).await.unwrap();
    });

    // Start cleanup task for expired mailbox entries
    let cleanup_mailbox = mailbox.clone();
    let cleanup_metrics = metrics.clone();
    let mailbox_ttl = config.mailbox_ttl();
    let cleanup_interval = config.cleanup_interval();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(cleanup_interval).await;
            match cleanup_mailbox.cleanup_expired(mailbox_ttl) {
                Ok(removed) if removed > 0 => {
                    info!("Cleaned up {} expired mailbox entries", removed);
                    cleanup_metrics.parcels_expired.inc_by(removed as u64);
                }
                Ok(_) => {}
                Err(e) => error!("Mailbox cleanup failed: {}", e),
            }
            cleanup_metrics
                .mailbox_entries
                .set(cleanup_mailbox.entry_count() as i64);
        }
    });

    // Start cleanup task for rate limiter buckets of closed connections
    let cleanup_rate_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        loop {
            // Clean up every 10 minutes, removing buckets idle for 30 minutes
            tokio::time::sleep(std::time::Duration::from_secs(600)).await;
            let removed =
                cleanup_rate_limiter.cleanup_inactive(std::time::Duration::from_secs(1800));
            if removed > 0 {
                info!("Cleaned up {} stale rate limiter buckets", removed);
            }
        }
    });

    // Start TCP listener for WebSocket
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .expect("Failed to bind WebSocket listener");

    info!("WebSocket server listening on {}", config.listen_addr);

    // Accept connections
    while let Ok((stream, _addr)) = listener.accept().await {
        // Enforce connection limit
        let connection_guard = match connection_limiter.try_acquire() {
            Some(guard) => guard,
            None => {
                tracing::warn!(
                    "Connection rejected: at max capacity ({}/{})",
                    connection_limiter.active_count(),
                    config.max_connections
                );
                metrics.connection_errors.inc();
                drop(stream);
                continue;
            }
        };

        let deps = ConnectionDeps {
            registry: registry.clone(),
            handshake: handshake.clone(),
            router: router.clone(),
            rate_limiter: rate_limiter.clone(),
            metrics: metrics.clone(),
            max_message_size: config.max_message_size,
            idle_timeout: config.idle_timeout(),
        };
        let metrics = metrics.clone();
        let idle_timeout = config.idle_timeout();

        tokio::spawn(async move {
            // Keep the guard alive for the duration of the connection
            let _guard = connection_guard;

            // Upgrade with timeout so half-open sockets cannot hold slots
            match tokio::time::timeout(idle_timeout, accept_async(stream)).await {
                Ok(Ok(ws_stream)) => {
                    metrics.connections_total.inc();
                    metrics.connections_active.inc();

                    handler::handle_connection(ws_stream, deps).await;

                    metrics.connections_active.dec();
                }
                Ok(Err(e)) => {
                    error!("WebSocket handshake failed: {}", e);
                    metrics.connection_errors.inc();
                }
                Err(_) => {
                    tracing::warn!("WebSocket handshake timeout (slowloris protection)");
                    metrics.connection_errors.inc();
                }
            }
            // _guard dropped here, releasing the connection slot
        });
    }
}
