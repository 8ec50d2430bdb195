//! Peer Identity Types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use strum::{Display, EnumString};
use thiserror::Error;

/// Network address of a peer. Two peers are the same peer iff their addresses are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("missing ':' port separator in {0:?}")]
    MissingPort(String),
    #[error("invalid port in {0:?}")]
    InvalidPort(String),
    #[error("empty host in {0:?}")]
    EmptyHost(String),
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Whether this address can be turned into a reachable endpoint.
    ///
    /// Empty hosts, port 0 and unspecified IPs (`0.0.0.0`, `::`) are rejected.
    pub fn is_routable(&self) -> bool {
        if self.host.trim().is_empty() || self.port == 0 {
            return false;
        }
        match self.host.parse::<IpAddr>() {
            Ok(ip) => !ip.is_unspecified(),
            Err(_) => true,
        }
    }

    /// Whether the host is the wildcard address, meaning "detect at startup"
    pub fn is_unspecified(&self) -> bool {
        self.host
            .parse::<IpAddr>()
            .map(|ip| ip.is_unspecified())
            .unwrap_or(false)
    }

    /// Whether the host only reaches this machine
    pub fn is_loopback(&self) -> bool {
        match self.host.parse::<IpAddr>() {
            Ok(ip) => ip.is_loopback(),
            Err(_) => self.host.eq_ignore_ascii_case("localhost"),
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for PeerAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError::MissingPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(AddressParseError::EmptyHost(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressParseError::InvalidPort(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for PeerAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Liveness state of a tracked peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PeerState {
    /// Discovered but without any positive liveness signal yet
    Candidate,
    /// Listed by the directory or answered a probe
    Alive,
    /// Probed, and silent for longer than the suspect timeout
    Suspect,
}

impl PeerState {
    pub const ALL: [PeerState; 3] = [PeerState::Candidate, PeerState::Alive, PeerState::Suspect];

    /// Whether a record in `self` may move to `next` through an upsert.
    ///
    /// Any state may become ALIVE. Only ALIVE may become SUSPECT. Nothing
    /// goes back to CANDIDATE once it has left it.
    pub fn can_transition_to(self, next: PeerState) -> bool {
        match (self, next) {
            (_, PeerState::Alive) => true,
            (PeerState::Alive, PeerState::Suspect) => true,
            (PeerState::Suspect, PeerState::Suspect) => true,
            (PeerState::Candidate, PeerState::Candidate) => true,
            _ => false,
        }
    }
}
