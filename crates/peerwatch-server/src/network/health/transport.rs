//! Probe Transport
//!
//! Send hook used by the prober. Acknowledgments travel the other way through
//! [`LivenessProber::on_ack`](super::LivenessProber::on_ack).

use super::messages::ProbeRequest;
use crate::network::types::PeerAddress;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("could not resolve {0}")]
    Unresolvable(PeerAddress),
    #[error("probe send timed out after {0:?}")]
    Timeout(Duration),
    #[error("probe encoding failed: {0}")]
    Encode(#[from] bincode::Error),
    #[error("probe I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivers probes to peers
#[async_trait]
pub trait ProbeTransport: Send + Sync + 'static {
    async fn send_probe(&self, target: &PeerAddress, request: ProbeRequest)
        -> Result<(), ProbeError>;
}
