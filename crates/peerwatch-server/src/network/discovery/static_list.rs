//! Static peer list, for local runs and fixed deployments

use super::{DirectoryError, PeerDirectory};
use crate::network::types::PeerAddress;
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct StaticDirectory {
    peers: Vec<PeerAddress>,
}

impl StaticDirectory {
    pub fn new(peers: Vec<PeerAddress>) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl PeerDirectory for StaticDirectory {
    async fn list(
        &self,
        _cluster_id: &str,
        _service_id: &str,
    ) -> Result<Vec<PeerAddress>, DirectoryError> {
        Ok(self.peers.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
