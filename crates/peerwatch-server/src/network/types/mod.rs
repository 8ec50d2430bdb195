//! Peer Types
//!
//! Peer identity, liveness states and the shared peer table.

mod peer;
mod table;

pub use peer::{AddressParseError, PeerAddress, PeerState};
pub use table::{
    PeerCounts, PeerOrigin, PeerRecord, PeerTable, PeerTableError, SweepAction, UpsertOutcome,
};
