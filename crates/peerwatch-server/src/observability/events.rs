//! Structured Events
//!
//! One function per membership event so field names stay consistent across
//! the refresher, the prober and the discovery adapter.
//!
//! Event types:
//! - `peer_discovered` - Peer entered the table
//! - `peer_suspected` - Peer went quiet past the suspect timeout
//! - `peer_recovered` - Suspected peer answered again
//! - `peer_evicted` - Peer removed from the table
//! - `directory_refresh_failed` - Directory query failed, table left as is
//! - `membership_reported` - Discovery round answered for the framework

use crate::network::types::{PeerAddress, PeerOrigin, PeerState};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Emit a peer discovered event
pub fn peer_discovered(peer: &PeerAddress, origin: PeerOrigin, state: PeerState) {
    info!(
        event_type = "peer_discovered",
        peer = %peer,
        origin = ?origin,
        state = %state,
        "Peer discovered"
    );
}

/// Emit a peer suspected event
pub fn peer_suspected(peer: &PeerAddress, silence: Duration) {
    warn!(
        event_type = "peer_suspected",
        peer = %peer,
        silence_ms = silence.as_millis() as u64,
        "Peer suspected"
    );
}

/// Emit a peer recovered event
pub fn peer_recovered(peer: &PeerAddress, rtt: Option<Duration>) {
    info!(
        event_type = "peer_recovered",
        peer = %peer,
        rtt_ms = rtt.map(|d| d.as_millis() as u64),
        "Suspected peer answered again"
    );
}

/// Emit a peer evicted event
pub fn peer_evicted(peer: &PeerAddress, reason: &str) {
    warn!(
        event_type = "peer_evicted",
        peer = %peer,
        reason = %reason,
        "Peer evicted"
    );
}

/// Emit a directory refresh failed event
pub fn directory_refresh_failed(directory: &str, error: &str, known_peers: usize) {
    warn!(
        event_type = "directory_refresh_failed",
        directory = %directory,
        error = %error,
        known_peers = known_peers,
        "Directory refresh failed, keeping last known peers"
    );
}

/// Emit a membership reported event
pub fn membership_reported(reported: usize, is_initial_discovery: bool) {
    debug!(
        event_type = "membership_reported",
        reported = reported,
        is_initial_discovery = is_initial_discovery,
        "Reported members to framework"
    );
}
