//! peerwatch Server Library
//!
//! Peer discovery for clustered services: candidate peers come from an
//! external directory, liveness from direct probing.

pub mod api;
pub mod network;
pub mod observability;
pub mod version;
