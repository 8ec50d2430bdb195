//! DNS-based peer directory
//!
//! Resolves a service DNS name that carries one record per running task
//! (e.g. an ECS service registered in a Cloud Map namespace, or a Kubernetes
//! headless service) and pairs every address with the probe port.

use super::{DirectoryError, PeerDirectory};
use crate::network::types::PeerAddress;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DnsDirectory {
    /// Service DNS name (e.g., "orders.prod.local")
    dns_name: String,
    /// Port for probe traffic
    probe_port: u16,
}

impl DnsDirectory {
    pub fn new(dns_name: String, probe_port: u16) -> Self {
        Self {
            dns_name,
            probe_port,
        }
    }
}

#[async_trait]
impl PeerDirectory for DnsDirectory {
    async fn list(
        &self,
        _cluster_id: &str,
        _service_id: &str,
    ) -> Result<Vec<PeerAddress>, DirectoryError> {
        let addresses = tokio::net::lookup_host((self.dns_name.as_str(), self.probe_port))
            .await
            .map_err(|e| {
                DirectoryError::Transient(format!("lookup of {} failed: {e}", self.dns_name))
            })?;

        let ips: BTreeSet<_> = addresses.map(|addr| addr.ip()).collect();
        debug!(
            target: "peerwatch::discovery",
            dns_name = %self.dns_name,
            records = ips.len(),
            "Resolved service DNS name"
        );

        Ok(ips
            .into_iter()
            .map(|ip| PeerAddress::new(ip.to_string(), self.probe_port))
            .collect())
    }

    fn name(&self) -> &'static str {
        "dns"
    }
}
