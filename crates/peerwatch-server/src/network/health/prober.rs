//! Liveness Prober
//!
//! Probes every tracked peer on a fixed cadence and evicts peers that stay
//! silent for longer than the ping timeout.
//!
//! State machine, applied by [`LivenessPolicy::verdict`]:
//! - a never-probed peer is always kept (grace period on first discovery)
//! - ALIVE and silent past `suspect_timeout` becomes SUSPECT
//! - any state silent past `ping_timeout` is evicted
//! - any acknowledgment, however late, makes the peer ALIVE again

use super::messages::{ProbeAck, ProbeRequest};
use super::transport::{ProbeError, ProbeTransport};
use crate::network::config::DiscoveryConfig;
use crate::network::types::{
    PeerAddress, PeerOrigin, PeerRecord, PeerState, PeerTable, SweepAction, UpsertOutcome,
};
use crate::observability::{events, metrics};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Silence thresholds driving SUSPECT and eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub suspect_timeout: Duration,
    pub ping_timeout: Duration,
}

impl LivenessPolicy {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            suspect_timeout: config.suspect_timeout,
            ping_timeout: config.ping_timeout,
        }
    }

    pub fn verdict(&self, record: &PeerRecord, now: Instant) -> SweepAction {
        if !record.has_been_probed() {
            return SweepAction::Keep;
        }
        let silence = record.silence(now);
        if silence > self.ping_timeout {
            SweepAction::Evict
        } else if silence > self.suspect_timeout && record.state == PeerState::Alive {
            SweepAction::Suspect
        } else {
            SweepAction::Keep
        }
    }
}

/// Peers changed by one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub suspected: Vec<PeerAddress>,
    pub evicted: Vec<PeerAddress>,
}

/// Result of one probe round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeRound {
    pub sent: usize,
    pub failed: usize,
}

pub struct LivenessProber {
    table: Arc<PeerTable>,
    transport: Arc<dyn ProbeTransport>,
    policy: LivenessPolicy,
    local_addr: PeerAddress,
    sweep_interval: Duration,
    send_timeout: Duration,
}

impl LivenessProber {
    pub fn new(
        table: Arc<PeerTable>,
        transport: Arc<dyn ProbeTransport>,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            table,
            transport,
            policy: LivenessPolicy::from_config(config),
            local_addr: config.advertise_addr.clone(),
            sweep_interval: config.probe_sweep_interval,
            send_timeout: config.probe_send_timeout,
        }
    }

    pub fn policy(&self) -> LivenessPolicy {
        self.policy
    }

    /// Suspect and evict silent peers in one atomic pass over the table
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let policy = self.policy;
        let mut silences = Vec::new();
        let (suspected, evicted) = self.table.sweep(now, |record, now| {
            let action = policy.verdict(record, now);
            if action == SweepAction::Suspect && record.state == PeerState::Alive {
                silences.push((record.address.clone(), record.silence(now)));
            }
            action
        });

        for (peer, silence) in silences {
            events::peer_suspected(&peer, silence);
        }
        for peer in &evicted {
            events::peer_evicted(peer, "ping timeout");
        }
        if !evicted.is_empty() {
            metrics::record_evictions("ping_timeout", evicted.len());
        }

        SweepReport { suspected, evicted }
    }

    /// Send one probe to every tracked peer concurrently.
    ///
    /// Send failures are logged and counted but otherwise left to the sweep,
    /// exactly like an unanswered probe.
    pub async fn probe_all(&self) -> ProbeRound {
        let targets: Vec<PeerAddress> = self
            .table
            .snapshot()
            .into_iter()
            .map(|record| record.address)
            .filter(|address| *address != self.local_addr)
            .collect();

        let results = join_all(targets.iter().map(|target| self.probe(target))).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        ProbeRound {
            sent: results.len() - failed,
            failed,
        }
    }

    async fn probe(&self, target: &PeerAddress) -> Result<(), ProbeError> {
        self.table.mark_probed(target, Instant::now());
        let request = ProbeRequest::new(target.clone());

        let result = match tokio::time::timeout(
            self.send_timeout,
            self.transport.send_probe(target, request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.send_timeout)),
        };

        match &result {
            Ok(()) => {
                trace!(peer = %target, "Probe sent");
                metrics::record_probe_sent("sent");
            }
            Err(e) => {
                debug!(peer = %target, error = %e, "Probe send failed");
                metrics::record_probe_sent("failed");
            }
        }
        result
    }

    /// Receive hook for probe acknowledgments
    pub fn on_ack(&self, ack: ProbeAck, now: Instant) {
        if ack.responding == self.local_addr {
            return;
        }

        let elapsed_ms = chrono::Utc::now().timestamp_millis() - ack.original_send_timestamp_ms;
        let rtt = Duration::from_millis(elapsed_ms.max(0) as u64);

        match self.table.upsert(&ack.responding, PeerState::Alive, now) {
            Ok(UpsertOutcome::Inserted) => {
                events::peer_discovered(&ack.responding, PeerOrigin::Probe, PeerState::Alive);
            }
            Ok(UpsertOutcome::Transitioned {
                from: PeerState::Suspect,
                ..
            }) => {
                events::peer_recovered(&ack.responding, Some(rtt));
            }
            Ok(_) => {
                trace!(
                    peer = %ack.responding,
                    rtt_ms = rtt.as_millis() as u64,
                    "Probe acknowledged"
                );
            }
            Err(e) => {
                debug!(error = %e, "Ignoring acknowledgment");
                return;
            }
        }

        self.table.record_rtt(&ack.responding, rtt);
        metrics::record_probe_rtt(rtt);
    }

    /// One sweep followed by one probe round
    pub async fn tick(&self) -> (SweepReport, ProbeRound) {
        let report = self.sweep(Instant::now());
        let round = self.probe_all().await;
        metrics::set_peer_counts(self.table.counts_by_state());
        (report, round)
    }

    /// Run sweep/probe rounds until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                (report, round) = self.tick() => {
                    trace!(
                        suspected = report.suspected.len(),
                        evicted = report.evicted.len(),
                        probes_sent = round.sent,
                        probes_failed = round.failed,
                        "Probe round completed"
                    );
                }
            }
        }

        debug!("Liveness prober stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every probe and fails sends to configured addresses
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<ProbeRequest>>,
        unreachable: Vec<PeerAddress>,
    }

    #[async_trait]
    impl ProbeTransport for RecordingTransport {
        async fn send_probe(
            &self,
            target: &PeerAddress,
            request: ProbeRequest,
        ) -> Result<(), ProbeError> {
            if self.unreachable.contains(target) {
                return Err(ProbeError::Unresolvable(target.clone()));
            }
            self.sent.lock().push(request);
            Ok(())
        }
    }

    fn addr(s: &str) -> PeerAddress {
        s.parse().unwrap()
    }

    /// Never completes a send
    struct StalledTransport;

    #[async_trait]
    impl ProbeTransport for StalledTransport {
        async fn send_probe(&self, _: &PeerAddress, _: ProbeRequest) -> Result<(), ProbeError> {
            std::future::pending().await
        }
    }

    fn config() -> DiscoveryConfig {
        DiscoveryConfig {
            advertise_addr: addr("10.0.0.100:7800"),
            ..Default::default()
        }
    }

    fn setup(
        transport: RecordingTransport,
    ) -> (Arc<PeerTable>, Arc<RecordingTransport>, LivenessProber) {
        let table = Arc::new(PeerTable::new());
        let transport = Arc::new(transport);
        let prober = LivenessProber::new(table.clone(), transport.clone(), &config());
        (table, transport, prober)
    }

    fn ack(from: &PeerAddress) -> ProbeAck {
        ProbeRequest::new(from.clone()).ack_from(from.clone())
    }

    #[test]
    fn test_never_probed_peer_is_kept() {
        let (table, _, prober) = setup(RecordingTransport::default());
        let t0 = Instant::now();
        let a = addr("10.0.0.1:7800");
        table.insert_if_absent(&a, PeerState::Alive, t0);

        let report = prober.sweep(t0 + Duration::from_secs(60));
        assert!(report.evicted.is_empty());
        assert!(report.suspected.is_empty());
        assert!(table.contains(&a));
    }

    #[test]
    fn test_no_eviction_before_ping_timeout() {
        let (table, _, prober) = setup(RecordingTransport::default());
        let t0 = Instant::now();
        let a = addr("10.0.0.1:7800");
        table.insert_if_absent(&a, PeerState::Alive, t0);
        table.mark_probed(&a, t0);

        let ping_timeout = prober.policy().ping_timeout;
        for step in 0..=ping_timeout.as_millis() as u64 / 250 {
            let now = t0 + Duration::from_millis(step * 250);
            let report = prober.sweep(now);
            assert!(report.evicted.is_empty(), "evicted at +{}ms", step * 250);
        }

        let report = prober.sweep(t0 + ping_timeout + Duration::from_millis(1));
        assert_eq!(report.evicted, vec![a]);
    }

    #[test]
    fn test_alive_becomes_suspect_then_evicted() {
        let (table, _, prober) = setup(RecordingTransport::default());
        let t0 = Instant::now();
        let a = addr("10.0.0.1:7800");
        table.insert_if_absent(&a, PeerState::Alive, t0);
        table.mark_probed(&a, t0);

        let report = prober.sweep(t0 + Duration::from_millis(3000));
        assert_eq!(report.suspected, vec![a.clone()]);
        assert_eq!(table.get(&a).unwrap().state, PeerState::Suspect);

        let report = prober.sweep(t0 + Duration::from_millis(4000));
        assert!(report.suspected.is_empty());
        assert!(report.evicted.is_empty());

        let report = prober.sweep(t0 + Duration::from_millis(5001));
        assert_eq!(report.evicted, vec![a.clone()]);
        assert!(!table.contains(&a));
    }

    #[test]
    fn test_late_ack_recovers_suspect() {
        let (table, _, prober) = setup(RecordingTransport::default());
        let t0 = Instant::now();
        let a = addr("10.0.0.1:7800");
        table.insert_if_absent(&a, PeerState::Alive, t0);
        table.mark_probed(&a, t0);

        prober.sweep(t0 + Duration::from_millis(3000));
        assert_eq!(table.get(&a).unwrap().state, PeerState::Suspect);

        let t_ack = t0 + Duration::from_millis(4500);
        prober.on_ack(ack(&a), t_ack);
        let record = table.get(&a).unwrap();
        assert_eq!(record.state, PeerState::Alive);
        assert_eq!(record.last_seen_at, t_ack);
        assert!(record.last_rtt.is_some());

        let report = prober.sweep(t0 + Duration::from_millis(5500));
        assert!(report.evicted.is_empty());
        assert!(report.suspected.is_empty());
    }

    #[test]
    fn test_ack_from_unknown_peer_inserts_alive() {
        let (table, _, prober) = setup(RecordingTransport::default());
        let a = addr("10.0.0.7:7800");

        prober.on_ack(ack(&a), Instant::now());
        let record = table.get(&a).unwrap();
        assert_eq!(record.state, PeerState::Alive);
        assert_eq!(record.origin, PeerOrigin::Probe);
    }

    #[test]
    fn test_ack_from_self_is_ignored() {
        let (table, _, prober) = setup(RecordingTransport::default());
        prober.on_ack(ack(&addr("10.0.0.100:7800")), Instant::now());
        assert!(table.is_empty());
    }

    #[test]
    fn test_candidate_is_promoted_by_ack() {
        let (table, _, prober) = setup(RecordingTransport::default());
        let t0 = Instant::now();
        let a = addr("10.0.0.1:7800");
        table.insert_if_absent(&a, PeerState::Candidate, t0);

        prober.on_ack(ack(&a), t0 + Duration::from_millis(10));
        assert_eq!(table.get(&a).unwrap().state, PeerState::Alive);
    }

    #[tokio::test]
    async fn test_probe_all_marks_every_peer_and_skips_self() {
        let unreachable = addr("10.0.0.3:7800");
        let (table, transport, prober) = setup(RecordingTransport {
            unreachable: vec![unreachable.clone()],
            ..Default::default()
        });
        let now = Instant::now();
        for a in ["10.0.0.1:7800", "10.0.0.2:7800", "10.0.0.3:7800", "10.0.0.100:7800"] {
            table.insert_if_absent(&addr(a), PeerState::Alive, now);
        }

        let round = prober.probe_all().await;
        assert_eq!(round, ProbeRound { sent: 2, failed: 1 });

        let targets: Vec<_> = transport.sent.lock().iter().map(|r| r.target.clone()).collect();
        assert!(targets.contains(&addr("10.0.0.1:7800")));
        assert!(targets.contains(&addr("10.0.0.2:7800")));
        assert!(!targets.contains(&addr("10.0.0.100:7800")));

        assert!(table.get(&unreachable).unwrap().has_been_probed());
        assert!(!table.get(&addr("10.0.0.100:7800")).unwrap().has_been_probed());
        assert_eq!(table.get(&unreachable).unwrap().state, PeerState::Alive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_evicts_silent_peer_and_stops_on_shutdown() {
        let (table, _, prober) = setup(RecordingTransport::default());
        let prober = Arc::new(prober);
        let quiet = addr("10.0.0.2:7800");
        table.insert_if_absent(&quiet, PeerState::Alive, Instant::now());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(prober.clone().run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(!table.contains(&quiet));

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_in_flight_probe() {
        let table = Arc::new(PeerTable::new());
        let config = DiscoveryConfig {
            ping_timeout: Duration::from_secs(3600),
            suspect_timeout: Duration::from_secs(1800),
            probe_send_timeout: Duration::from_secs(3600),
            ..config()
        };
        let prober = Arc::new(LivenessProber::new(
            table.clone(),
            Arc::new(StalledTransport),
            &config,
        ));
        table.insert_if_absent(&addr("10.0.0.1:7800"), PeerState::Alive, Instant::now());

        let shutdown = CancellationToken::new();
        let start = Instant::now();
        let handle = tokio::spawn(prober.run(shutdown.clone()));

        // The first tick fires immediately and leaves the send hanging.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(table.get(&addr("10.0.0.1:7800")).unwrap().has_been_probed());

        shutdown.cancel();
        handle.await.unwrap();
        assert!(start.elapsed() < config.probe_send_timeout);
    }
}
