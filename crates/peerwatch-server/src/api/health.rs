//! Health Check Endpoints
//!
//! Liveness and readiness probe handlers.

use super::state::AppState;
use crate::network::types::PeerCounts;
use crate::network::PeerAddress;
use crate::version::VersionInfo;
use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: VersionInfo,
    pub local_addr: PeerAddress,
    pub directory: &'static str,
    pub peers: PeerCounts,
}

/// Liveness probe. The process answering is the whole check.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: VersionInfo::current(),
        local_addr: state.local_addr.clone(),
        directory: state.refresher.directory_name(),
        peers: state.table.counts_by_state(),
    })
}

/// Readiness probe. OK once the directory has been read successfully at least once.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<&'static str, StatusCode> {
    if state.refresher.is_ready() {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_state;
    use crate::network::types::PeerState;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_health_reports_counts() {
        let (state, _directory) = test_state(Ok(vec![]));
        let peer = PeerAddress::new("10.0.0.1", 7800);
        state
            .table
            .insert_if_absent(&peer, PeerState::Alive, Instant::now());

        let Json(health) = health_check(State(state)).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.peers.alive, 1);
        assert_eq!(health.directory, "scripted");
    }

    #[tokio::test]
    async fn test_readiness_follows_first_refresh() {
        let (state, _directory) = test_state(Ok(vec![PeerAddress::new("10.0.0.1", 7800)]));
        assert_eq!(
            readiness_check(State(state.clone())).await,
            Err(StatusCode::SERVICE_UNAVAILABLE)
        );

        state.refresher.refresh_once().await;
        assert_eq!(readiness_check(State(state)).await, Ok("READY"));
    }
}
