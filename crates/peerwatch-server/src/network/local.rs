//! Local Address Detection
//!
//! Works out the address this node advertises when `ADVERTISE_ADDR` is left
//! at the unspecified default. Inside an ECS task the task's own IPv4 address
//! comes from the container metadata endpoint; elsewhere it is the source
//! address the kernel picks for traffic towards the first configured peer.

use super::config::{DirectoryKind, DiscoveryConfig};
use super::types::PeerAddress;
use reqwest::StatusCode;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LocalAddrError {
    #[error("task metadata request failed: {0}")]
    Metadata(String),
    #[error("malformed task metadata: {0}")]
    Malformed(String),
    #[error("task metadata lists no IPv4 address")]
    NoAddress,
    #[error("failed to resolve {0}")]
    Unresolvable(String),
    #[error("failed to find a route: {0}")]
    Route(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaskMetadata {
    #[serde(default)]
    containers: Vec<ContainerMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerMetadata {
    #[serde(default)]
    networks: Vec<ContainerNetwork>,
}

#[derive(Debug, Deserialize)]
struct ContainerNetwork {
    #[serde(rename = "IPv4Addresses", default)]
    ipv4_addresses: Vec<String>,
}

/// First IPv4 address of the first container network that has one
fn parse_task_ip(body: &str) -> Result<IpAddr, LocalAddrError> {
    let task: TaskMetadata =
        serde_json::from_str(body).map_err(|e| LocalAddrError::Malformed(e.to_string()))?;

    let ip = task
        .containers
        .iter()
        .filter_map(|c| c.networks.first())
        .find_map(|n| n.ipv4_addresses.first())
        .ok_or(LocalAddrError::NoAddress)?;
    ip.parse()
        .map_err(|_| LocalAddrError::Malformed(format!("invalid IPv4 address {ip:?}")))
}

/// Ask the ECS container metadata endpoint (v4) for this task's address
async fn task_ip_from_metadata(
    metadata_uri: &str,
    timeout: std::time::Duration,
) -> Result<IpAddr, LocalAddrError> {
    let url = format!("{}/task", metadata_uri.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LocalAddrError::Metadata(e.to_string()))?;

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| LocalAddrError::Metadata(e.to_string()))?;
    let status = response.status();
    if status != StatusCode::OK {
        return Err(LocalAddrError::Metadata(format!("{url} returned {status}")));
    }

    let body = response
        .text()
        .await
        .map_err(|e| LocalAddrError::Metadata(e.to_string()))?;
    parse_task_ip(&body)
}

/// Source address of a connected (never written) UDP socket towards `target`
async fn route_source_ip(target: SocketAddr) -> Result<IpAddr, LocalAddrError> {
    let any: IpAddr = if target.is_ipv4() {
        Ipv4Addr::UNSPECIFIED.into()
    } else {
        Ipv6Addr::UNSPECIFIED.into()
    };
    let socket = UdpSocket::bind(SocketAddr::new(any, 0)).await?;
    socket.connect(target).await?;
    Ok(socket.local_addr()?.ip())
}

/// A peer the node expects to reach, used to pick the outgoing interface
fn route_target(config: &DiscoveryConfig) -> Option<(String, u16)> {
    match config.effective_directory_kind() {
        DirectoryKind::Dns => Some((config.dns_name(), config.advertise_addr.port)),
        _ => config
            .static_peers
            .first()
            .map(|peer| (peer.host.clone(), peer.port)),
    }
}

/// Detect the address other peers can reach this node on.
///
/// The advertised port is kept; only the host is detected. With nothing to
/// route towards the node has no remote peers and loopback is returned.
pub async fn detect_advertise_addr(
    config: &DiscoveryConfig,
) -> Result<PeerAddress, LocalAddrError> {
    let port = config.advertise_addr.port;

    let ip = if let Some(uri) = &config.ecs_metadata_uri {
        task_ip_from_metadata(uri, config.directory_query_timeout).await?
    } else if let Some((host, target_port)) = route_target(config) {
        let target = tokio::net::lookup_host((host.as_str(), target_port))
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| LocalAddrError::Unresolvable(format!("{host}:{target_port}")))?;
        route_source_ip(target).await?
    } else {
        debug!("No peer to route towards, advertising loopback");
        Ipv4Addr::LOCALHOST.into()
    };

    Ok(PeerAddress::new(ip.to_string(), port))
}

/// Replace an unspecified advertise address with the detected one
pub async fn resolve_advertise_addr(config: &mut DiscoveryConfig) -> Result<(), LocalAddrError> {
    if !config.advertise_addr.is_unspecified() {
        return Ok(());
    }

    let detected = detect_advertise_addr(config).await?;
    info!(advertise_addr = %detected, "Detected advertise address");
    config.advertise_addr = detected;
    Ok(())
}
