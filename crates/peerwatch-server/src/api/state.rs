//! Application State
//!
//! Shared state passed to all API handlers.

use crate::network::{
    DirectoryRefresher, DiscoveryAdapter, PeerAddress, PeerTable, RunningDiscovery,
};
use crate::observability::MetricsState;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub table: Arc<PeerTable>,
    pub adapter: Arc<DiscoveryAdapter>,
    pub refresher: Arc<DirectoryRefresher>,
    pub local_addr: PeerAddress,
    pub metrics_state: Option<MetricsState>,
}

impl AppState {
    pub fn new(discovery: &RunningDiscovery, metrics_state: Option<MetricsState>) -> Self {
        Self {
            table: discovery.table(),
            adapter: discovery.adapter(),
            refresher: discovery.refresher(),
            local_addr: discovery.config().advertise_addr.clone(),
            metrics_state,
        }
    }
}
