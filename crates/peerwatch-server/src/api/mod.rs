//! HTTP API Module
//!
//! Operator endpoints for the peerwatch server.
//!
//! This module contains:
//! - `state`: Shared application state
//! - `health`: Liveness and readiness probes
//! - `peers`: Peer table, reported membership and manual refresh
//! - `metrics`: Prometheus metrics endpoint

mod health;
mod metrics;
mod peers;
mod state;

pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};

/// Create the API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        // Membership
        .route("/peers", get(peers::list_peers))
        .route("/members", get(peers::get_members))
        .route("/refresh", post(peers::trigger_refresh))
        .with_state(state)
}
