//! Discovery Service
//!
//! Wires the peer table, directory refresher, liveness prober and membership
//! adapter together and owns their background tasks.

use super::adapter::DiscoveryAdapter;
use super::config::DiscoveryConfig;
use super::discovery::{DirectoryRefresher, PeerDirectory};
use super::health::{LivenessProber, ProbeTransport, UdpProbeTransport};
use super::types::PeerTable;
use anyhow::Context;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Handle to a running discovery subsystem.
///
/// Dropping the handle cancels the background tasks without waiting for them;
/// use [`RunningDiscovery::shutdown`] to wait.
pub struct RunningDiscovery {
    config: DiscoveryConfig,
    table: Arc<PeerTable>,
    adapter: Arc<DiscoveryAdapter>,
    refresher: Arc<DirectoryRefresher>,
    prober: Arc<LivenessProber>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningDiscovery {
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn table(&self) -> Arc<PeerTable> {
        self.table.clone()
    }

    pub fn adapter(&self) -> Arc<DiscoveryAdapter> {
        self.adapter.clone()
    }

    pub fn refresher(&self) -> Arc<DirectoryRefresher> {
        self.refresher.clone()
    }

    pub fn prober(&self) -> Arc<LivenessProber> {
        self.prober.clone()
    }

    /// Token cancelled when the subsystem stops
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every background task and wait for all of them to finish
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Discovery task ended abnormally");
            }
        }
        info!("Discovery stopped");
    }
}

impl Drop for RunningDiscovery {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Start discovery with the given directory and probe transport
pub fn start(
    config: DiscoveryConfig,
    directory: Arc<dyn PeerDirectory>,
    transport: Arc<dyn ProbeTransport>,
) -> anyhow::Result<RunningDiscovery> {
    config.validate().context("invalid discovery configuration")?;

    let table = Arc::new(PeerTable::new());
    let prober = Arc::new(LivenessProber::new(table.clone(), transport, &config));
    let refresher = Arc::new(DirectoryRefresher::new(table.clone(), directory, &config));
    let adapter = Arc::new(DiscoveryAdapter::new(table.clone(), config.advertise_addr.clone()));
    let shutdown = CancellationToken::new();

    let tasks = vec![
        tokio::spawn(refresher.clone().run(shutdown.clone())),
        tokio::spawn(prober.clone().run(shutdown.clone())),
    ];

    info!(
        cluster_id = %config.cluster_id,
        service_id = %config.service_id,
        advertise_addr = %config.advertise_addr,
        directory = refresher.directory_name(),
        "Discovery started"
    );

    Ok(RunningDiscovery {
        config,
        table,
        adapter,
        refresher,
        prober,
        shutdown,
        tasks,
    })
}

/// Start discovery probing over UDP on `config.probe_bind_addr`
pub async fn start_udp(
    config: DiscoveryConfig,
    directory: Arc<dyn PeerDirectory>,
) -> anyhow::Result<RunningDiscovery> {
    config.validate().context("invalid discovery configuration")?;

    let transport = Arc::new(
        UdpProbeTransport::bind(config.probe_bind_addr)
            .await
            .with_context(|| format!("failed to bind probe socket on {}", config.probe_bind_addr))?,
    );

    let mut running = start(config, directory, transport.clone())?;
    let receiver = transport.run_receiver(running.prober(), running.shutdown_token());
    running.tasks.push(tokio::spawn(receiver));
    Ok(running)
}
