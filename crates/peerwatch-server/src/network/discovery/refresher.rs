//! Directory Refresher
//!
//! Periodically lists running peers from the directory and merges them into
//! the peer table. A failed or empty listing never modifies the table.

use super::{DirectoryError, PeerDirectory};
use crate::network::config::DiscoveryConfig;
use crate::network::types::{PeerAddress, PeerOrigin, PeerState, PeerTable, SweepAction};
use crate::observability::{events, metrics};
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Result of a single refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied {
        /// Entries returned by the directory
        listed: usize,
        /// Peers newly added to the table
        inserted: usize,
        /// Entries rejected as unusable or as the local node
        dropped: usize,
        /// Suspects evicted because the directory no longer lists them
        evicted: usize,
    },
    Failed(DirectoryError),
    /// Another refresh was still in flight
    Skipped,
}

/// Clears the in-flight flag when the refresh ends, including on cancellation
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DirectoryRefresher {
    table: Arc<PeerTable>,
    directory: Arc<dyn PeerDirectory>,
    cluster_id: String,
    service_id: String,
    local_addr: PeerAddress,
    interval: Duration,
    jitter: Duration,
    query_timeout: Duration,
    trust_directory: bool,
    evict_missing_suspects: bool,
    in_flight: AtomicBool,
    ready: AtomicBool,
}

impl DirectoryRefresher {
    pub fn new(
        table: Arc<PeerTable>,
        directory: Arc<dyn PeerDirectory>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            table,
            directory,
            cluster_id: config.cluster_id.clone(),
            service_id: config.service_id.clone(),
            local_addr: config.advertise_addr.clone(),
            interval: config.directory_refresh_interval,
            jitter: config.directory_refresh_jitter,
            query_timeout: config.directory_query_timeout,
            trust_directory: config.trust_directory,
            evict_missing_suspects: config.evict_suspects_missing_from_directory,
            in_flight: AtomicBool::new(false),
            ready: AtomicBool::new(false),
        }
    }

    /// Whether at least one refresh has been applied
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn directory_name(&self) -> &'static str {
        self.directory.name()
    }

    /// Query the directory once and merge the result into the table
    pub async fn refresh_once(&self) -> RefreshOutcome {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            debug!(directory = self.directory.name(), "Refresh already in flight, skipping");
            metrics::record_directory_refresh("skipped");
            return RefreshOutcome::Skipped;
        };

        let listing = match tokio::time::timeout(
            self.query_timeout,
            self.directory.list(&self.cluster_id, &self.service_id),
        )
        .await
        {
            Ok(listing) => listing,
            Err(_) => Err(DirectoryError::Timeout(self.query_timeout)),
        };

        match listing {
            Ok(peers) if !peers.is_empty() => {
                let outcome = self.apply(&peers, Instant::now());
                self.ready.store(true, Ordering::Release);
                metrics::record_directory_refresh("applied");
                metrics::set_peer_counts(self.table.counts_by_state());
                outcome
            }
            Ok(_) => self.fail(DirectoryError::Empty),
            Err(e) => self.fail(e),
        }
    }

    fn fail(&self, error: DirectoryError) -> RefreshOutcome {
        events::directory_refresh_failed(
            self.directory.name(),
            &error.to_string(),
            self.table.len(),
        );
        metrics::record_directory_refresh("failed");
        RefreshOutcome::Failed(error)
    }

    /// Merge a non-empty directory snapshot into the table
    fn apply(&self, peers: &[PeerAddress], now: Instant) -> RefreshOutcome {
        let state = if self.trust_directory {
            PeerState::Alive
        } else {
            PeerState::Candidate
        };

        let mut listed = HashSet::with_capacity(peers.len());
        let mut inserted = 0;
        let mut dropped = 0;

        for peer in peers {
            if !peer.is_routable() || *peer == self.local_addr {
                trace!(peer = %peer, "Dropping directory entry");
                dropped += 1;
                continue;
            }
            if !listed.insert(peer.clone()) {
                continue;
            }

            if self.table.insert_if_absent(peer, state, now) {
                inserted += 1;
                events::peer_discovered(peer, PeerOrigin::Directory, state);
            } else if self.trust_directory
                && self.table.get(peer).map(|r| r.state) == Some(PeerState::Candidate)
            {
                if let Err(e) = self.table.upsert(peer, PeerState::Alive, now) {
                    debug!(peer = %peer, error = %e, "Failed to promote candidate");
                }
            }
        }

        let evicted = if self.evict_missing_suspects {
            self.evict_absent_suspects(&listed, now)
        } else {
            0
        };

        debug!(
            directory = self.directory.name(),
            listed = peers.len(),
            inserted,
            dropped,
            evicted,
            known_peers = self.table.len(),
            "Directory refresh applied"
        );

        RefreshOutcome::Applied {
            listed: peers.len(),
            inserted,
            dropped,
            evicted,
        }
    }

    fn evict_absent_suspects(&self, listed: &HashSet<PeerAddress>, now: Instant) -> usize {
        let (_, evicted) = self.table.sweep(now, |record, _| {
            if record.state == PeerState::Suspect && !listed.contains(&record.address) {
                SweepAction::Evict
            } else {
                SweepAction::Keep
            }
        });

        for peer in &evicted {
            events::peer_evicted(peer, "absent from directory");
        }
        if !evicted.is_empty() {
            metrics::record_evictions("directory_absent", evicted.len());
        }
        evicted.len()
    }

    fn jitter_delay(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Refresh on a fixed period until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            directory = self.directory.name(),
            cluster_id = %self.cluster_id,
            service_id = %self.service_id,
            interval_ms = self.interval.as_millis() as u64,
            "Directory refresher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let delay = self.jitter_delay();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = async {
                    tokio::time::sleep(delay).await;
                    self.refresh_once().await
                } => {
                    trace!(outcome = ?outcome, "Refresh tick finished");
                }
            }
        }

        info!("Directory refresher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    struct ScriptedDirectory {
        response: Mutex<Result<Vec<PeerAddress>, DirectoryError>>,
        calls: AtomicUsize,
    }

    impl ScriptedDirectory {
        fn new(response: Result<Vec<PeerAddress>, DirectoryError>) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(response),
                calls: AtomicUsize::new(0),
            })
        }

        fn set(&self, response: Result<Vec<PeerAddress>, DirectoryError>) {
            *self.response.lock() = response;
        }
    }

    #[async_trait]
    impl PeerDirectory for ScriptedDirectory {
        async fn list(&self, _: &str, _: &str) -> Result<Vec<PeerAddress>, DirectoryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.lock().clone()
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    struct HangingDirectory;

    #[async_trait]
    impl PeerDirectory for HangingDirectory {
        async fn list(&self, _: &str, _: &str) -> Result<Vec<PeerAddress>, DirectoryError> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    struct GatedDirectory {
        gate: Notify,
        peers: Vec<PeerAddress>,
    }

    #[async_trait]
    impl PeerDirectory for GatedDirectory {
        async fn list(&self, _: &str, _: &str) -> Result<Vec<PeerAddress>, DirectoryError> {
            self.gate.notified().await;
            Ok(self.peers.clone())
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    fn peer(last_octet: u8) -> PeerAddress {
        PeerAddress::new(format!("10.0.0.{last_octet}"), 7800)
    }

    fn refresher(
        directory: Arc<dyn PeerDirectory>,
        config: DiscoveryConfig,
    ) -> (DirectoryRefresher, Arc<PeerTable>) {
        let table = Arc::new(PeerTable::new());
        (DirectoryRefresher::new(table.clone(), directory, &config), table)
    }

    #[tokio::test]
    async fn test_success_inserts_alive_when_trusted() {
        let (refresher, table) = refresher(
            ScriptedDirectory::new(Ok(vec![peer(1), peer(2)])),
            DiscoveryConfig::default(),
        );

        let outcome = refresher.refresh_once().await;
        assert_eq!(
            outcome,
            RefreshOutcome::Applied {
                listed: 2,
                inserted: 2,
                dropped: 0,
                evicted: 0,
            }
        );
        assert_eq!(table.get(&peer(1)).unwrap().state, PeerState::Alive);
        assert_eq!(table.get(&peer(2)).unwrap().origin, PeerOrigin::Directory);
        assert!(refresher.is_ready());
    }

    #[tokio::test]
    async fn test_untrusted_directory_inserts_candidates() {
        let config = DiscoveryConfig {
            trust_directory: false,
            ..Default::default()
        };
        let (refresher, table) = refresher(ScriptedDirectory::new(Ok(vec![peer(1)])), config);

        refresher.refresh_once().await;
        assert_eq!(table.get(&peer(1)).unwrap().state, PeerState::Candidate);
    }

    #[tokio::test]
    async fn test_trusted_refresh_promotes_existing_candidate() {
        let (refresher, table) = refresher(
            ScriptedDirectory::new(Ok(vec![peer(1)])),
            DiscoveryConfig::default(),
        );
        table.insert_if_absent(&peer(1), PeerState::Candidate, Instant::now());

        let outcome = refresher.refresh_once().await;
        assert!(matches!(outcome, RefreshOutcome::Applied { inserted: 0, .. }));
        assert_eq!(table.get(&peer(1)).unwrap().state, PeerState::Alive);
    }

    #[tokio::test]
    async fn test_existing_suspect_is_not_revived_by_directory() {
        let (refresher, table) = refresher(
            ScriptedDirectory::new(Ok(vec![peer(1)])),
            DiscoveryConfig::default(),
        );
        let now = Instant::now();
        table.insert_if_absent(&peer(1), PeerState::Alive, now);
        table.upsert(&peer(1), PeerState::Suspect, now).unwrap();

        refresher.refresh_once().await;
        assert_eq!(table.get(&peer(1)).unwrap().state, PeerState::Suspect);
    }

    #[tokio::test]
    async fn test_unusable_and_self_entries_are_dropped() {
        let config = DiscoveryConfig {
            advertise_addr: peer(9),
            ..Default::default()
        };
        let listing = vec![
            peer(1),
            peer(9),
            PeerAddress::new("10.0.0.3", 0),
            PeerAddress::new("0.0.0.0", 7800),
            PeerAddress::new("", 7800),
        ];
        let (refresher, table) = refresher(ScriptedDirectory::new(Ok(listing)), config);

        let outcome = refresher.refresh_once().await;
        assert_eq!(
            outcome,
            RefreshOutcome::Applied {
                listed: 5,
                inserted: 1,
                dropped: 4,
                evicted: 0,
            }
        );
        assert_eq!(table.len(), 1);
        assert!(table.contains(&peer(1)));
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_table_untouched() {
        let directory = ScriptedDirectory::new(Ok(vec![peer(1)]));
        let (refresher, table) = refresher(directory.clone(), DiscoveryConfig::default());
        refresher.refresh_once().await;
        let before = table.snapshot();

        for error in [
            DirectoryError::Unauthorized("expired".into()),
            DirectoryError::NotFound("cluster".into()),
            DirectoryError::Transient("503".into()),
            DirectoryError::Malformed("bad json".into()),
        ] {
            directory.set(Err(error.clone()));
            assert_eq!(refresher.refresh_once().await, RefreshOutcome::Failed(error));
            assert_eq!(table.snapshot(), before);
        }
        assert_eq!(directory.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_empty_listing_is_a_failure() {
        let directory = ScriptedDirectory::new(Ok(vec![peer(1)]));
        let (refresher, table) = refresher(directory.clone(), DiscoveryConfig::default());
        refresher.refresh_once().await;

        directory.set(Ok(Vec::new()));
        assert_eq!(
            refresher.refresh_once().await,
            RefreshOutcome::Failed(DirectoryError::Empty)
        );
        assert!(table.contains(&peer(1)));
    }

    #[tokio::test]
    async fn test_empty_first_listing_keeps_not_ready() {
        let (refresher, _) = refresher(
            ScriptedDirectory::new(Ok(Vec::new())),
            DiscoveryConfig::default(),
        );
        refresher.refresh_once().await;
        assert!(!refresher.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_directory_times_out() {
        let (refresher, table) = refresher(Arc::new(HangingDirectory), DiscoveryConfig::default());
        table.insert_if_absent(&peer(1), PeerState::Alive, Instant::now());
        let before = table.snapshot();

        let outcome = refresher.refresh_once().await;
        assert_eq!(
            outcome,
            RefreshOutcome::Failed(DirectoryError::Timeout(Duration::from_secs(5)))
        );
        assert_eq!(table.snapshot(), before);
    }

    #[tokio::test]
    async fn test_absent_peers_are_kept_by_default() {
        let directory = ScriptedDirectory::new(Ok(vec![peer(1), peer(2)]));
        let (refresher, table) = refresher(directory.clone(), DiscoveryConfig::default());
        refresher.refresh_once().await;
        table.upsert(&peer(2), PeerState::Suspect, Instant::now()).unwrap();

        directory.set(Ok(vec![peer(1)]));
        refresher.refresh_once().await;
        assert!(table.contains(&peer(2)));
    }

    #[tokio::test]
    async fn test_absent_suspects_are_evicted_when_enabled() {
        let config = DiscoveryConfig {
            evict_suspects_missing_from_directory: true,
            ..Default::default()
        };
        let directory = ScriptedDirectory::new(Ok(vec![peer(1), peer(2), peer(3)]));
        let (refresher, table) = refresher(directory.clone(), config);
        refresher.refresh_once().await;
        table.upsert(&peer(2), PeerState::Suspect, Instant::now()).unwrap();

        directory.set(Ok(vec![peer(1)]));
        let outcome = refresher.refresh_once().await;
        assert!(matches!(outcome, RefreshOutcome::Applied { evicted: 1, .. }));
        assert!(!table.contains(&peer(2)));
        // ALIVE peers missing from the listing stay
        assert!(table.contains(&peer(3)));
    }

    #[tokio::test]
    async fn test_overlapping_refresh_is_skipped() {
        let directory = Arc::new(GatedDirectory {
            gate: Notify::new(),
            peers: vec![peer(1)],
        });
        let (refresher, table) = refresher(directory.clone(), DiscoveryConfig::default());
        let refresher = Arc::new(refresher);

        let first = tokio::spawn({
            let refresher = refresher.clone();
            async move { refresher.refresh_once().await }
        });
        while !refresher.in_flight.load(Ordering::Acquire) {
            tokio::task::yield_now().await;
        }

        assert_eq!(refresher.refresh_once().await, RefreshOutcome::Skipped);

        directory.gate.notify_one();
        assert!(matches!(first.await.unwrap(), RefreshOutcome::Applied { inserted: 1, .. }));
        assert!(table.contains(&peer(1)));
        assert!(!refresher.in_flight.load(Ordering::Acquire));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_refreshes_periodically_until_shutdown() {
        let directory = ScriptedDirectory::new(Ok(vec![peer(1)]));
        let config = DiscoveryConfig {
            directory_refresh_jitter: Duration::ZERO,
            ..Default::default()
        };
        let (refresher, table) = refresher(directory.clone(), config);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Arc::new(refresher).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(directory.calls.load(Ordering::SeqCst), 3);
        assert!(table.contains(&peer(1)));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_in_flight_query() {
        let config = DiscoveryConfig {
            directory_query_timeout: Duration::from_secs(3600),
            directory_refresh_jitter: Duration::ZERO,
            ..Default::default()
        };
        let (refresher, table) = refresher(Arc::new(HangingDirectory), config);
        let refresher = Arc::new(refresher);
        table.insert_if_absent(&peer(1), PeerState::Alive, Instant::now());
        let before = table.snapshot();

        let shutdown = CancellationToken::new();
        let start = Instant::now();
        let handle = tokio::spawn(refresher.clone().run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(refresher.in_flight.load(Ordering::Acquire));

        shutdown.cancel();
        handle.await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(3600));
        assert!(!refresher.in_flight.load(Ordering::Acquire));
        assert!(!refresher.is_ready());
        assert_eq!(table.snapshot(), before);
    }
}
