//! Peer Endpoints
//!
//! Inspection of the peer table and the membership the framework would see,
//! plus a manual directory refresh.

use super::state::AppState;
use crate::network::types::{PeerOrigin, PeerRecord, PeerState};
use crate::network::{CollectedResponses, PeerAddress, RefreshOutcome};
use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Serialize)]
pub struct PeerView {
    pub address: PeerAddress,
    pub state: PeerState,
    pub origin: PeerOrigin,
    pub last_seen_ms_ago: u64,
    pub last_probed_ms_ago: Option<u64>,
    pub last_rtt_ms: Option<u64>,
}

impl PeerView {
    fn from_record(record: PeerRecord, now: Instant) -> Self {
        Self {
            last_seen_ms_ago: record.silence(now).as_millis() as u64,
            last_probed_ms_ago: record
                .last_probed_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            last_rtt_ms: record.last_rtt.map(|rtt| rtt.as_millis() as u64),
            address: record.address,
            state: record.state,
            origin: record.origin,
        }
    }
}

/// GET /peers - every tracked peer
#[tracing::instrument(skip(state))]
pub async fn list_peers(State(state): State<AppState>) -> Json<Vec<PeerView>> {
    let now = Instant::now();
    Json(
        state
            .table
            .snapshot()
            .into_iter()
            .map(|record| PeerView::from_record(record, now))
            .collect(),
    )
}

/// GET /members - runs a discovery round exactly as the framework would
#[tracing::instrument(skip(state))]
pub async fn get_members(State(state): State<AppState>) -> Json<CollectedResponses> {
    Json(state.adapter.collect(&[], false))
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RefreshResponse {
    Applied {
        listed: usize,
        inserted: usize,
        dropped: usize,
        evicted: usize,
    },
    Failed {
        error: String,
    },
    Skipped,
}

/// POST /refresh - query the directory now
#[tracing::instrument(skip(state))]
pub async fn trigger_refresh(
    State(state): State<AppState>,
) -> (StatusCode, Json<RefreshResponse>) {
    match state.refresher.refresh_once().await {
        RefreshOutcome::Applied {
            listed,
            inserted,
            dropped,
            evicted,
        } => (
            StatusCode::OK,
            Json(RefreshResponse::Applied {
                listed,
                inserted,
                dropped,
                evicted,
            }),
        ),
        RefreshOutcome::Failed(e) => (
            StatusCode::BAD_GATEWAY,
            Json(RefreshResponse::Failed {
                error: e.to_string(),
            }),
        ),
        RefreshOutcome::Skipped => (StatusCode::CONFLICT, Json(RefreshResponse::Skipped)),
    }
}
