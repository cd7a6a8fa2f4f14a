//! a2a-hub server binary.
//!
//! Starts an axum server exposing the agent coordination protocol over a
//! WebSocket endpoint, with a background liveness sweep.
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 8080)
//! - `HUB_HEARTBEAT_TIMEOUT_SECS` — silence before an agent is demoted (default: 60)
//! - `HUB_SWEEP_INTERVAL_SECS` — liveness sweep period (default: 15)
//! - `RUST_LOG` — Tracing filter (default: "info")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! ```

use std::sync::Arc;

use a2a_hub::config::HubConfig;
use a2a_hub::liveness::LivenessMonitor;
use a2a_hub::server::{app_router, AppState};

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,a2a_hub=debug".into()),
        )
        .init();

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let bind_addr = format!("0.0.0.0:{}", port);

    let mut config = HubConfig::default();
    config.heartbeat_timeout_secs =
        env_u64("HUB_HEARTBEAT_TIMEOUT_SECS", config.heartbeat_timeout_secs);
    config.sweep_interval_secs = env_u64("HUB_SWEEP_INTERVAL_SECS", config.sweep_interval_secs);

    let state = AppState::new(config);
    let _monitor = LivenessMonitor::spawn(Arc::clone(&state.hub));

    let app = app_router(state);

    tracing::info!("a2a-hub server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET /health — liveness probe");
    tracing::info!("  GET /agents — registered agent snapshot");
    tracing::info!("  GET /ws     — agent protocol WebSocket");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app)
        .await
        .expect("Server failed");
}
