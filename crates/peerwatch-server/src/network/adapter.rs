//! Membership Adapter
//!
//! Answers the hosting framework's discovery rounds from the peer table.
//! A round never performs I/O, never awaits and never fails: whatever goes
//! wrong, the sink receives at least the local node and is completed.

use super::types::{PeerAddress, PeerState, PeerTable};
use crate::observability::{events, metrics};
use serde::Serialize;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace};

/// Receives the members reported in one discovery round
pub trait ResponseSink {
    fn add(&mut self, address: &PeerAddress, is_self: bool);
    fn complete(&mut self);
}

/// Membership source consumed by the hosting framework
pub trait MemberDiscovery: Send + Sync {
    fn discover(
        &self,
        current_members: &[PeerAddress],
        is_initial_discovery: bool,
        sink: &mut dyn ResponseSink,
    );
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportedMember {
    pub address: PeerAddress,
    pub is_self: bool,
}

/// Sink that buffers a round's response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectedResponses {
    pub members: Vec<ReportedMember>,
    pub completed: bool,
}

impl ResponseSink for CollectedResponses {
    fn add(&mut self, address: &PeerAddress, is_self: bool) {
        self.members.push(ReportedMember {
            address: address.clone(),
            is_self,
        });
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

pub struct DiscoveryAdapter {
    table: Arc<PeerTable>,
    local_addr: PeerAddress,
}

impl DiscoveryAdapter {
    pub fn new(table: Arc<PeerTable>, local_addr: PeerAddress) -> Self {
        Self { table, local_addr }
    }

    /// Run a round into a fresh buffer
    pub fn collect(
        &self,
        current_members: &[PeerAddress],
        is_initial_discovery: bool,
    ) -> CollectedResponses {
        let mut responses = CollectedResponses::default();
        self.discover(current_members, is_initial_discovery, &mut responses);
        responses
    }

    /// Every ALIVE or SUSPECT peer other than the local node
    fn reported_peers(&self) -> Vec<PeerAddress> {
        self.table
            .snapshot()
            .into_iter()
            .filter(|record| record.state != PeerState::Candidate)
            .map(|record| record.address)
            .filter(|address| *address != self.local_addr)
            .collect()
    }
}

impl MemberDiscovery for DiscoveryAdapter {
    fn discover(
        &self,
        current_members: &[PeerAddress],
        is_initial_discovery: bool,
        sink: &mut dyn ResponseSink,
    ) {
        let peers = catch_unwind(AssertUnwindSafe(|| self.reported_peers())).unwrap_or_else(|_| {
            error!("Failed to read peer table, reporting local node only");
            Vec::new()
        });

        if tracing::enabled!(tracing::Level::TRACE) {
            let known: HashSet<&PeerAddress> = current_members.iter().collect();
            let joining = peers.iter().filter(|p| !known.contains(p)).count();
            trace!(
                current = current_members.len(),
                reported = peers.len(),
                joining,
                "Answering discovery round"
            );
        }

        let mut reported = 0;
        let added = catch_unwind(AssertUnwindSafe(|| {
            sink.add(&self.local_addr, true);
            reported += 1;
            for peer in &peers {
                sink.add(peer, false);
                reported += 1;
            }
        }));
        if added.is_err() {
            error!(reported, "Response sink panicked, completing round early");
        }

        if catch_unwind(AssertUnwindSafe(|| sink.complete())).is_err() {
            error!("Response sink panicked on completion");
        }

        events::membership_reported(reported, is_initial_discovery);
        metrics::record_discovery_round();
    }
}
