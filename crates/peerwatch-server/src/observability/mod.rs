//! Observability Module
//!
//! - `events`: structured membership events with consistent fields
//! - `metrics`: Prometheus metrics for peers, probes and directory refreshes
//! - `tracing`: subscriber setup with optional OpenTelemetry export

pub mod events;
pub mod metrics;
pub mod tracing;

pub use metrics::{init_metrics, MetricsState};
pub use tracing::{init_tracing, shutdown_tracing, TracingConfig};
