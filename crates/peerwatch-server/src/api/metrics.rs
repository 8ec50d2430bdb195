//! Prometheus Metrics Endpoint

use super::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};

const CONTENT_TYPE: (&str, &str) = ("content-type", "text/plain; version=0.0.4; charset=utf-8");

/// GET /metrics - Prometheus exposition format
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_state {
        Some(metrics) => (StatusCode::OK, [CONTENT_TYPE], metrics.prometheus_handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [CONTENT_TYPE],
            "Metrics not initialized".to_string(),
        ),
    }
}
