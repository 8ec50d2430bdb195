//! Health Monitoring Module
//!
//! Liveness probing of tracked peers and timeout-driven eviction.

mod messages;
mod prober;
mod transport;
mod udp;

pub use messages::{ProbeAck, ProbeMessage, ProbeRequest};
pub use prober::{LivenessPolicy, LivenessProber, ProbeRound, SweepReport};
pub use transport::{ProbeError, ProbeTransport};
pub use udp::UdpProbeTransport;
