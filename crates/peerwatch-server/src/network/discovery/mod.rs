//! Directory Discovery
//!
//! Candidate peers come from an external directory that lists the running
//! tasks of a service. The directory is treated as unreliable: every error is
//! non-fatal and leaves the peer table exactly as it was.
//!
//! - `static_list`: fixed peer list
//! - `dns`: DNS name with one A/AAAA record per running task
//! - `ecs`: running tasks of an ECS service via the ECS API
//! - `refresher`: periodic polling and reconciliation into the peer table

mod dns;
mod ecs;
mod refresher;
mod static_list;

pub use dns::DnsDirectory;
pub use ecs::EcsServiceDirectory;
pub use refresher::{DirectoryRefresher, RefreshOutcome};
pub use static_list::StaticDirectory;

use super::config::{DirectoryKind, DiscoveryConfig};
use super::types::PeerAddress;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("directory query timed out after {0:?}")]
    Timeout(Duration),
    #[error("directory rejected credentials: {0}")]
    Unauthorized(String),
    #[error("cluster or service not found: {0}")]
    NotFound(String),
    #[error("transient directory failure: {0}")]
    Transient(String),
    #[error("malformed directory response: {0}")]
    Malformed(String),
    #[error("directory returned no peers")]
    Empty,
}

/// Source of the addresses of currently running peers
#[async_trait]
pub trait PeerDirectory: Send + Sync + 'static {
    /// List the addresses of running peers of `service_id` in `cluster_id`
    async fn list(
        &self,
        cluster_id: &str,
        service_id: &str,
    ) -> Result<Vec<PeerAddress>, DirectoryError>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Build the directory client selected by `config`
pub fn build_directory(config: &DiscoveryConfig) -> Arc<dyn PeerDirectory> {
    let probe_port = config.advertise_addr.port;
    match config.effective_directory_kind() {
        DirectoryKind::Static | DirectoryKind::Auto => {
            Arc::new(StaticDirectory::new(config.static_peers.clone()))
        }
        DirectoryKind::Dns => Arc::new(DnsDirectory::new(config.dns_name(), probe_port)),
        DirectoryKind::Ecs => Arc::new(EcsServiceDirectory::new(
            probe_port,
            config.directory_query_timeout,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_directory_follows_config() {
        let mut config = DiscoveryConfig::default();
        assert_eq!(build_directory(&config).name(), "static");

        config.directory_dns_name = Some("orders.prod.local".to_string());
        assert_eq!(build_directory(&config).name(), "dns");

        config.ecs_metadata_uri = Some("http://169.254.170.2/v4/abc".to_string());
        assert_eq!(build_directory(&config).name(), "ecs");

        config.directory_kind = DirectoryKind::Dns;
        assert_eq!(build_directory(&config).name(), "dns");
    }
}
