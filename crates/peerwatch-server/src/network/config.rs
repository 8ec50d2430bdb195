//! Discovery Configuration
//!
//! Centralized configuration for the discovery subsystem with environment
//! variable overrides. Durations are given in milliseconds in the environment.

use super::types::{AddressParseError, PeerAddress};
use std::net::SocketAddr;
use std::time::Duration;
use strum::{Display, EnumString};
use thiserror::Error;

/// Environment variable pointing at the ECS task metadata endpoint (v4)
pub const ECS_METADATA_ENV: &str = "ECS_CONTAINER_METADATA_URI_V4";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
    #[error("invalid peer address in {name}: {source}")]
    InvalidAddress {
        name: &'static str,
        #[source]
        source: AddressParseError,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Which directory client backs the refresher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum DirectoryKind {
    /// ECS service listing inside an ECS task, then DNS if a name is configured, else static
    Auto,
    Static,
    Dns,
    Ecs,
}

/// Discovery configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    // Identity
    /// Cluster identifier passed to the directory (env: CLUSTER_ID)
    pub cluster_id: String,
    /// Service identifier passed to the directory (env: SERVICE_ID)
    pub service_id: String,

    // Probe endpoint
    /// Local UDP address probes are received on (env: PROBE_BIND_ADDR)
    pub probe_bind_addr: SocketAddr,
    /// Address other peers know this node by (env: ADVERTISE_ADDR).
    /// The unspecified default is replaced by the detected local address at startup.
    pub advertise_addr: PeerAddress,

    // Directory settings
    /// Directory client selection (env: DIRECTORY_KIND)
    pub directory_kind: DirectoryKind,
    /// Fixed peer list for the static directory (env: STATIC_PEERS, comma-separated)
    pub static_peers: Vec<PeerAddress>,
    /// DNS name resolved by the DNS directory (env: DIRECTORY_DNS_NAME)
    pub directory_dns_name: Option<String>,
    /// ECS task metadata endpoint, set by the ECS agent (env: ECS_CONTAINER_METADATA_URI_V4)
    pub ecs_metadata_uri: Option<String>,

    // Refresh settings
    /// Period between directory queries (env: DIRECTORY_REFRESH_INTERVAL_MS)
    pub directory_refresh_interval: Duration,
    /// Upper bound of the random delay added before each query (env: DIRECTORY_REFRESH_JITTER_MS)
    pub directory_refresh_jitter: Duration,
    /// Bound on a single directory query (env: DIRECTORY_QUERY_TIMEOUT_MS)
    pub directory_query_timeout: Duration,
    /// Insert directory-listed peers as ALIVE rather than CANDIDATE (env: TRUST_DIRECTORY)
    pub trust_directory: bool,
    /// Evict SUSPECT peers missing from a successful directory listing
    /// (env: EVICT_SUSPECTS_MISSING_FROM_DIRECTORY)
    pub evict_suspects_missing_from_directory: bool,

    // Liveness settings
    /// Silence after which a probed peer is evicted (env: PING_TIMEOUT_MS)
    pub ping_timeout: Duration,
    /// Silence after which a probed ALIVE peer becomes SUSPECT (env: SUSPECT_TIMEOUT_MS)
    pub suspect_timeout: Duration,
    /// Period between sweep/probe rounds (env: PROBE_SWEEP_INTERVAL_MS)
    pub probe_sweep_interval: Duration,
    /// Bound on a single probe send (env: PROBE_SEND_TIMEOUT_MS)
    pub probe_send_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cluster_id: "default".to_string(),
            service_id: "peerwatch".to_string(),

            probe_bind_addr: SocketAddr::from(([0, 0, 0, 0], 7800)),
            advertise_addr: PeerAddress::new("0.0.0.0", 7800),

            directory_kind: DirectoryKind::Auto,
            static_peers: Vec::new(),
            directory_dns_name: None,
            ecs_metadata_uri: None,

            directory_refresh_interval: Duration::from_secs(15),
            directory_refresh_jitter: Duration::from_secs(2),
            directory_query_timeout: Duration::from_secs(5),
            trust_directory: true,
            evict_suspects_missing_from_directory: false,

            ping_timeout: Duration::from_millis(5000),
            suspect_timeout: Duration::from_millis(2500),
            probe_sweep_interval: Duration::from_millis(2000),
            probe_send_timeout: Duration::from_millis(1000),
        }
    }
}

impl DiscoveryConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(cluster_id) = lookup("CLUSTER_ID") {
            config.cluster_id = cluster_id;
        }
        if let Some(service_id) = lookup("SERVICE_ID") {
            config.service_id = service_id;
        }

        if let Some(value) = lookup("PROBE_BIND_ADDR") {
            config.probe_bind_addr = value.parse().map_err(|_| ConfigError::InvalidValue {
                name: "PROBE_BIND_ADDR",
                value,
            })?;
        }
        if let Some(value) = lookup("ADVERTISE_ADDR") {
            config.advertise_addr = value.parse().map_err(|source| ConfigError::InvalidAddress {
                name: "ADVERTISE_ADDR",
                source,
            })?;
        }

        if let Some(value) = lookup("DIRECTORY_KIND") {
            config.directory_kind = value.parse().map_err(|_| ConfigError::InvalidValue {
                name: "DIRECTORY_KIND",
                value,
            })?;
        }
        if let Some(value) = lookup("STATIC_PEERS") {
            config.static_peers = parse_peer_list(&value).map_err(|source| {
                ConfigError::InvalidAddress {
                    name: "STATIC_PEERS",
                    source,
                }
            })?;
        }
        config.directory_dns_name = lookup("DIRECTORY_DNS_NAME").filter(|s| !s.is_empty());
        config.ecs_metadata_uri = lookup(ECS_METADATA_ENV).filter(|s| !s.is_empty());

        let millis = |name: &'static str| -> Result<Option<Duration>, ConfigError> {
            lookup(name)
                .map(|value| {
                    value
                        .parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|_| ConfigError::InvalidValue { name, value })
                })
                .transpose()
        };
        let flag = |name: &'static str| -> Result<Option<bool>, ConfigError> {
            lookup(name)
                .map(|value| match value.to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" => Ok(true),
                    "0" | "false" | "no" => Ok(false),
                    _ => Err(ConfigError::InvalidValue { name, value }),
                })
                .transpose()
        };

        if let Some(d) = millis("DIRECTORY_REFRESH_INTERVAL_MS")? {
            config.directory_refresh_interval = d;
        }
        if let Some(d) = millis("DIRECTORY_REFRESH_JITTER_MS")? {
            config.directory_refresh_jitter = d;
        }
        if let Some(d) = millis("DIRECTORY_QUERY_TIMEOUT_MS")? {
            config.directory_query_timeout = d;
        }
        if let Some(d) = millis("PING_TIMEOUT_MS")? {
            config.ping_timeout = d;
        }
        if let Some(d) = millis("SUSPECT_TIMEOUT_MS")? {
            config.suspect_timeout = d;
        }
        if let Some(d) = millis("PROBE_SWEEP_INTERVAL_MS")? {
            config.probe_sweep_interval = d;
        }
        if let Some(d) = millis("PROBE_SEND_TIMEOUT_MS")? {
            config.probe_send_timeout = d;
        }
        if let Some(b) = flag("TRUST_DIRECTORY")? {
            config.trust_directory = b;
        }
        if let Some(b) = flag("EVICT_SUSPECTS_MISSING_FROM_DIRECTORY")? {
            config.evict_suspects_missing_from_directory = b;
        }

        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster_id.trim().is_empty() || self.service_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "cluster_id and service_id must not be empty".to_string(),
            ));
        }
        if self.advertise_addr.is_unspecified() {
            return Err(ConfigError::Invalid(format!(
                "advertise address {} was neither configured nor detected",
                self.advertise_addr
            )));
        }
        if !self.advertise_addr.is_routable() {
            return Err(ConfigError::Invalid(format!(
                "advertise address {} is not routable",
                self.advertise_addr
            )));
        }
        if self.advertise_addr.is_loopback() && !self.is_local_only() {
            return Err(ConfigError::Invalid(format!(
                "advertise address {} is loopback but peers come from the {} directory",
                self.advertise_addr,
                self.effective_directory_kind()
            )));
        }
        for (name, value) in [
            ("directory_refresh_interval", self.directory_refresh_interval),
            ("directory_query_timeout", self.directory_query_timeout),
            ("ping_timeout", self.ping_timeout),
            ("suspect_timeout", self.suspect_timeout),
            ("probe_sweep_interval", self.probe_sweep_interval),
            ("probe_send_timeout", self.probe_send_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        if self.suspect_timeout >= self.ping_timeout {
            return Err(ConfigError::Invalid(format!(
                "suspect_timeout ({:?}) must be shorter than ping_timeout ({:?})",
                self.suspect_timeout, self.ping_timeout
            )));
        }
        if self.probe_send_timeout > self.ping_timeout {
            return Err(ConfigError::Invalid(format!(
                "probe_send_timeout ({:?}) must not exceed ping_timeout ({:?})",
                self.probe_send_timeout, self.ping_timeout
            )));
        }
        Ok(())
    }

    /// Whether every possible peer runs on this machine
    fn is_local_only(&self) -> bool {
        self.effective_directory_kind() == DirectoryKind::Static
            && self.static_peers.iter().all(PeerAddress::is_loopback)
    }

    /// Resolve `Auto` into a concrete directory kind
    pub fn effective_directory_kind(&self) -> DirectoryKind {
        match self.directory_kind {
            DirectoryKind::Auto if self.ecs_metadata_uri.is_some() => DirectoryKind::Ecs,
            DirectoryKind::Auto if self.directory_dns_name.is_some() => DirectoryKind::Dns,
            DirectoryKind::Auto => DirectoryKind::Static,
            kind => kind,
        }
    }

    /// DNS name for the DNS directory, defaulting to `<service_id>.<cluster_id>`
    pub fn dns_name(&self) -> String {
        self.directory_dns_name
            .clone()
            .unwrap_or_else(|| format!("{}.{}", self.service_id, self.cluster_id))
    }
}

/// Parse a comma-separated `host:port` list, skipping blank entries
pub fn parse_peer_list(value: &str) -> Result<Vec<PeerAddress>, AddressParseError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.ping_timeout, Duration::from_millis(5000));
        assert_eq!(config.probe_sweep_interval, Duration::from_millis(2000));
        assert!(config.trust_directory);
        assert!(!config.evict_suspects_missing_from_directory);
        assert!(config.advertise_addr.is_unspecified());

        let config = DiscoveryConfig {
            advertise_addr: PeerAddress::new("10.0.0.9", 7800),
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_requires_detected_advertise_addr() {
        let err = DiscoveryConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("neither configured nor detected"));
    }

    #[test]
    fn test_validate_loopback_advertise_addr() {
        let local = DiscoveryConfig {
            advertise_addr: PeerAddress::new("127.0.0.1", 7800),
            static_peers: vec![
                PeerAddress::new("127.0.0.1", 7801),
                PeerAddress::new("localhost", 7802),
            ],
            ..Default::default()
        };
        local.validate().unwrap();

        let mixed = DiscoveryConfig {
            static_peers: vec![PeerAddress::new("10.0.0.1", 7800)],
            ..local.clone()
        };
        assert!(mixed.validate().is_err());

        let dns = DiscoveryConfig {
            directory_dns_name: Some("orders.prod.local".to_string()),
            ..local.clone()
        };
        assert!(dns.validate().is_err());

        let ecs = DiscoveryConfig {
            directory_kind: DirectoryKind::Ecs,
            ..local
        };
        assert!(ecs.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = DiscoveryConfig::from_lookup(lookup(&[
            ("CLUSTER_ID", "prod"),
            ("SERVICE_ID", "orders"),
            ("ADVERTISE_ADDR", "10.0.0.9:7800"),
            ("STATIC_PEERS", "10.0.0.1:7800, 10.0.0.2:7800,"),
            ("DIRECTORY_KIND", "static"),
            ("PING_TIMEOUT_MS", "8000"),
            ("SUSPECT_TIMEOUT_MS", "3000"),
            ("TRUST_DIRECTORY", "false"),
        ]))
        .unwrap();

        assert_eq!(config.cluster_id, "prod");
        assert_eq!(config.service_id, "orders");
        assert_eq!(config.advertise_addr, PeerAddress::new("10.0.0.9", 7800));
        assert_eq!(config.static_peers.len(), 2);
        assert_eq!(config.directory_kind, DirectoryKind::Static);
        assert_eq!(config.ping_timeout, Duration::from_secs(8));
        assert_eq!(config.suspect_timeout, Duration::from_secs(3));
        assert!(!config.trust_directory);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = DiscoveryConfig::from_lookup(lookup(&[("PING_TIMEOUT_MS", "soon")]));
        let err = err.unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "PING_TIMEOUT_MS",
                ..
            }
        ));

        let err = DiscoveryConfig::from_lookup(lookup(&[("STATIC_PEERS", "10.0.0.1")]));
        assert!(matches!(err, Err(ConfigError::InvalidAddress { .. })));
    }

    #[test]
    fn test_validate_rejects_inverted_timeouts() {
        let config = DiscoveryConfig {
            advertise_addr: PeerAddress::new("10.0.0.9", 7800),
            suspect_timeout: Duration::from_secs(6),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("suspect_timeout"));
    }

    #[test]
    fn test_auto_directory_selection() {
        let mut config = DiscoveryConfig::default();
        assert_eq!(config.effective_directory_kind(), DirectoryKind::Static);

        config.directory_dns_name = Some("orders.prod.local".to_string());
        assert_eq!(config.effective_directory_kind(), DirectoryKind::Dns);

        config.ecs_metadata_uri = Some("http://169.254.170.2/v4/abc".to_string());
        assert_eq!(config.effective_directory_kind(), DirectoryKind::Ecs);

        config.directory_kind = DirectoryKind::Static;
        assert_eq!(config.effective_directory_kind(), DirectoryKind::Static);
    }

    #[test]
    fn test_dns_name_default() {
        let config = DiscoveryConfig {
            cluster_id: "prod".to_string(),
            service_id: "orders".to_string(),
            ..Default::default()
        };
        assert_eq!(config.dns_name(), "orders.prod");
        assert_eq!("ecs".parse::<DirectoryKind>().unwrap(), DirectoryKind::Ecs);
    }
}
