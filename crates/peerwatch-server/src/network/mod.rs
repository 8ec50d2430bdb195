//! Peer Discovery Module
//!
//! Discovers the running peers of a service from an external directory and
//! keeps an accurate view of which of them are alive by probing them.
//!
//! This module contains:
//! - `types`: peer addresses, liveness states and the shared peer table
//! - `config`: discovery configuration loaded from the environment
//! - `discovery`: directory clients and the periodic directory refresher
//! - `health`: probe wire messages, transports and the liveness prober
//! - `local`: detection of the address this node advertises
//! - `adapter`: membership rounds answered for the hosting framework
//! - `service`: startup and shutdown of the background tasks

pub mod adapter;
pub mod config;
pub mod discovery;
pub mod health;
pub mod local;
pub mod service;
pub mod types;

pub use adapter::{
    CollectedResponses, DiscoveryAdapter, MemberDiscovery, ReportedMember, ResponseSink,
};
pub use config::{ConfigError, DirectoryKind, DiscoveryConfig};
pub use discovery::{
    build_directory, DirectoryError, DirectoryRefresher, PeerDirectory, RefreshOutcome,
};
pub use local::{resolve_advertise_addr, LocalAddrError};
pub use health::{LivenessProber, ProbeTransport, UdpProbeTransport};
pub use service::{start, start_udp, RunningDiscovery};
pub use types::{PeerAddress, PeerRecord, PeerState, PeerTable};
