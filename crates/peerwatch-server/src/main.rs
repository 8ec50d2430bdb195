//! peerwatch - peer discovery and liveness for clustered services

use anyhow::Context;
use clap::{Parser, Subcommand};
use peerwatch_server::network::config::parse_peer_list;
use peerwatch_server::network::{
    self, build_directory, DirectoryKind, DiscoveryConfig, PeerAddress,
};
use peerwatch_server::observability::{self, TracingConfig};
use peerwatch_server::{api, version};
use std::net::SocketAddr;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "peerwatch")]
#[command(about = "Directory-backed peer discovery with probe-driven liveness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run discovery and the operator API
    Run(RunArgs),
    /// Print build information
    Version,
}

/// Flags override the discovery settings read from the environment
#[derive(clap::Args)]
struct RunArgs {
    /// Operator API listen address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: SocketAddr,

    /// Log format: text or json
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: String,

    /// OTLP collector endpoint for span export
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[arg(long)]
    cluster_id: Option<String>,

    #[arg(long)]
    service_id: Option<String>,

    /// Local address for probe traffic
    #[arg(long)]
    probe_bind_addr: Option<SocketAddr>,

    /// Address other peers reach this node on (host:port), detected when the host is 0.0.0.0
    #[arg(long)]
    advertise_addr: Option<PeerAddress>,

    /// auto, static, dns or ecs
    #[arg(long)]
    directory_kind: Option<DirectoryKind>,

    /// Comma-separated host:port list for the static directory
    #[arg(long)]
    static_peers: Option<String>,

    #[arg(long)]
    directory_dns_name: Option<String>,
}

impl RunArgs {
    fn tracing_config(&self) -> TracingConfig {
        TracingConfig {
            otlp_endpoint: self.otlp_endpoint.clone().filter(|s| !s.is_empty()),
            log_format: self.log_format.clone(),
            ..TracingConfig::from_env()
        }
    }

    async fn discovery_config(&self) -> anyhow::Result<DiscoveryConfig> {
        let mut config =
            DiscoveryConfig::from_env().context("failed to read discovery configuration")?;

        if let Some(cluster_id) = &self.cluster_id {
            config.cluster_id = cluster_id.clone();
        }
        if let Some(service_id) = &self.service_id {
            config.service_id = service_id.clone();
        }
        if let Some(addr) = self.probe_bind_addr {
            config.probe_bind_addr = addr;
        }
        if let Some(addr) = &self.advertise_addr {
            config.advertise_addr = addr.clone();
        }
        if let Some(kind) = self.directory_kind {
            config.directory_kind = kind;
        }
        if let Some(peers) = &self.static_peers {
            config.static_peers = parse_peer_list(peers).context("invalid --static-peers")?;
        }
        if let Some(name) = &self.directory_dns_name {
            config.directory_dns_name = Some(name.clone());
        }

        network::resolve_advertise_addr(&mut config)
            .await
            .context("failed to detect the advertise address, set ADVERTISE_ADDR")?;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("{}", version::build_info());
            Ok(())
        }
        Commands::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    observability::init_tracing(args.tracing_config())
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    info!(version = %version::full_version(), "Starting peerwatch");

    let metrics_state = match observability::init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Failed to install metrics recorder, /metrics disabled");
            None
        }
    };

    let config = args.discovery_config().await?;
    let directory = build_directory(&config);
    let discovery = network::start_udp(config, directory).await?;

    let app = api::create_router(api::AppState::new(&discovery, metrics_state));
    let listener = tokio::net::TcpListener::bind(args.bind_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", args.bind_addr))?;
    info!(bind_addr = %args.bind_addr, "API server listening");

    let stop = discovery.shutdown_token();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => info!("Shutdown signal received"),
                _ = stop.cancelled() => {}
            }
        })
        .await;

    discovery.shutdown().await;
    observability::shutdown_tracing();

    served.context("API server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
