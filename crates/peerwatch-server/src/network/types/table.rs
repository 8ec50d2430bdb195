//! Peer Table
//!
//! The single source of truth for known peers and their liveness state.
//! Every read and write goes through one table-wide lock, which is never
//! held across an `.await`, so the synchronous discovery callback can take
//! snapshots from any thread.

use super::peer::{PeerAddress, PeerState};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// How a peer first entered the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerOrigin {
    Directory,
    Probe,
}

/// Liveness bookkeeping for a single peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub address: PeerAddress,
    pub state: PeerState,
    pub origin: PeerOrigin,
    pub first_seen_at: Instant,
    pub last_seen_at: Instant,
    pub last_probed_at: Option<Instant>,
    pub last_rtt: Option<Duration>,
}

impl PeerRecord {
    fn new(address: PeerAddress, state: PeerState, origin: PeerOrigin, now: Instant) -> Self {
        Self {
            address,
            state,
            origin,
            first_seen_at: now,
            last_seen_at: now,
            last_probed_at: None,
            last_rtt: None,
        }
    }

    /// Time since the last positive liveness signal
    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen_at)
    }

    /// Whether at least one probe has been sent to this peer
    pub fn has_been_probed(&self) -> bool {
        self.last_probed_at.is_some()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerTableError {
    #[error("illegal transition for {address}: {from} -> {to}")]
    IllegalTransition {
        address: PeerAddress,
        from: PeerState,
        to: PeerState,
    },
}

/// Result of a successful upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Transitioned { from: PeerState, to: PeerState },
    Refreshed,
}

/// Decision taken by a sweep for one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    Keep,
    Suspect,
    Evict,
}

/// Per-state record counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeerCounts {
    pub candidate: usize,
    pub alive: usize,
    pub suspect: usize,
}

impl PeerCounts {
    pub fn total(&self) -> usize {
        self.candidate + self.alive + self.suspect
    }

    pub fn get(&self, state: PeerState) -> usize {
        match state {
            PeerState::Candidate => self.candidate,
            PeerState::Alive => self.alive,
            PeerState::Suspect => self.suspect,
        }
    }
}

/// Concurrency-safe map from peer address to liveness record
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: RwLock<HashMap<PeerAddress, PeerRecord>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the peer if absent, otherwise apply `state` when the transition is legal.
    ///
    /// Moving to ALIVE refreshes `last_seen_at`; moving to SUSPECT does not.
    /// Peers inserted through upsert are attributed to a probe response.
    pub fn upsert(
        &self,
        address: &PeerAddress,
        state: PeerState,
        now: Instant,
    ) -> Result<UpsertOutcome, PeerTableError> {
        let mut peers = self.peers.write();
        match peers.entry(address.clone()) {
            Entry::Vacant(e) => {
                debug!(peer = %address, state = %state, "Adding peer to table");
                e.insert(PeerRecord::new(address.clone(), state, PeerOrigin::Probe, now));
                Ok(UpsertOutcome::Inserted)
            }
            Entry::Occupied(mut e) => {
                let record = e.get_mut();
                let from = record.state;
                if !from.can_transition_to(state) {
                    return Err(PeerTableError::IllegalTransition {
                        address: address.clone(),
                        from,
                        to: state,
                    });
                }
                record.state = state;
                if state == PeerState::Alive {
                    record.last_seen_at = record.last_seen_at.max(now);
                }
                if from == state {
                    Ok(UpsertOutcome::Refreshed)
                } else {
                    debug!(peer = %address, from = %from, to = %state, "Peer state changed");
                    Ok(UpsertOutcome::Transitioned { from, to: state })
                }
            }
        }
    }

    /// Insert a directory-listed peer. Returns false when the address is already known,
    /// in which case its record is left untouched.
    pub fn insert_if_absent(&self, address: &PeerAddress, state: PeerState, now: Instant) -> bool {
        let mut peers = self.peers.write();
        match peers.entry(address.clone()) {
            Entry::Vacant(e) => {
                debug!(peer = %address, state = %state, "Adding directory peer to table");
                e.insert(PeerRecord::new(
                    address.clone(),
                    state,
                    PeerOrigin::Directory,
                    now,
                ));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Record a probe attempt without changing state. No-op for unknown peers.
    pub fn mark_probed(&self, address: &PeerAddress, now: Instant) {
        if let Some(record) = self.peers.write().get_mut(address) {
            record.last_probed_at = Some(now);
        }
    }

    pub fn record_rtt(&self, address: &PeerAddress, rtt: Duration) {
        if let Some(record) = self.peers.write().get_mut(address) {
            record.last_rtt = Some(rtt);
        }
    }

    /// Remove a peer. Returns whether it was present.
    pub fn evict(&self, address: &PeerAddress) -> bool {
        let removed = self.peers.write().remove(address).is_some();
        if removed {
            debug!(peer = %address, "Removed peer from table");
        }
        removed
    }

    /// Point-in-time copy of every record, ordered by address
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let mut records: Vec<PeerRecord> = self.peers.read().values().cloned().collect();
        records.sort_by(|a, b| a.address.cmp(&b.address));
        records
    }

    pub fn get(&self, address: &PeerAddress) -> Option<PeerRecord> {
        self.peers.read().get(address).cloned()
    }

    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.peers.read().contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn counts_by_state(&self) -> PeerCounts {
        let peers = self.peers.read();
        let mut counts = PeerCounts::default();
        for record in peers.values() {
            match record.state {
                PeerState::Candidate => counts.candidate += 1,
                PeerState::Alive => counts.alive += 1,
                PeerState::Suspect => counts.suspect += 1,
            }
        }
        counts
    }

    /// Apply `decide` to every record under a single write lock.
    ///
    /// Deciding and applying happen atomically, so a response that lands
    /// between two sweeps can never be overwritten by a stale verdict.
    /// Returns the addresses that were suspected and evicted.
    pub fn sweep<F>(&self, now: Instant, mut decide: F) -> (Vec<PeerAddress>, Vec<PeerAddress>)
    where
        F: FnMut(&PeerRecord, Instant) -> SweepAction,
    {
        let mut peers = self.peers.write();
        let mut suspected = Vec::new();
        let mut evicted = Vec::new();

        peers.retain(|address, record| match decide(record, now) {
            SweepAction::Keep => true,
            SweepAction::Suspect => {
                if record.state.can_transition_to(PeerState::Suspect)
                    && record.state != PeerState::Suspect
                {
                    record.state = PeerState::Suspect;
                    suspected.push(address.clone());
                }
                true
            }
            SweepAction::Evict => {
                evicted.push(address.clone());
                false
            }
        });

        suspected.sort();
        evicted.sort();
        (suspected, evicted)
    }
}
