//! # campus-server
//!
//! Real-time messaging and call-signaling server for the campus platform.
//!
//! This binary provides:
//! - **WebSocket channel** (`/ws`) carrying room joins, direct and group
//!   chat, deletions, and WebRTC call signaling
//! - **Room registry** with per-room FIFO fan-out to live connections
//! - **Call orchestrator** tracking ringing/active calls per user pair
//! - **REST API** (axum) for message history, HTTP send and delete
//! - **Per-IP rate limiting** on the HTTP routes

mod api;
mod auth;
mod broadcaster;
mod config;
mod error;
mod rate_limit;
mod rooms;
mod session;
mod signaling;
mod store;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use campus_shared::constants::APP_NAME;
use campus_store::Database;

use crate::api::AppState;
use crate::auth::DirectoryAuthenticator;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;
use crate::session::Realtime;
use crate::store::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing (RUST_LOG overrides the default filter)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,campus_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Storage and the real-time core
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");
    let store = SqliteStore::new(db);

    let realtime = Arc::new(Realtime::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        &config,
    ));
    let authenticator = Arc::new(DirectoryAuthenticator::new(
        Arc::new(store.clone()),
        config.store_timeout,
    ));
    let rate_limiter = RateLimiter::from_config(&config);

    let http_addr = config.http_addr;
    let app_state = AppState {
        realtime,
        store,
        authenticator,
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Background tasks
    // -----------------------------------------------------------------------

    // Every 5 minutes, forget clients idle for more than 10.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            let purged = rate_limiter.purge_idle(Duration::from_secs(600)).await;
            if purged > 0 {
                tracing::debug!(purged, "Purged idle rate-limit buckets");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. HTTP + WebSocket server (runs until Ctrl+C)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
