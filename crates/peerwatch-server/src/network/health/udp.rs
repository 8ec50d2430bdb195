//! UDP Probe Transport
//!
//! Probes and acknowledgments travel as single bincode-encoded datagrams.
//! Every node answers a probe by echoing the address the prober targeted, so
//! the ack is credited to the key the prober tracks it under.

use super::messages::{ProbeMessage, ProbeRequest};
use super::prober::LivenessProber;
use super::transport::{ProbeError, ProbeTransport};
use crate::network::types::PeerAddress;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

const MAX_DATAGRAM: usize = 64 * 1024;

pub struct UdpProbeTransport {
    socket: UdpSocket,
}

impl UdpProbeTransport {
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, ProbeError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        debug!(bind_addr = %socket.local_addr()?, "Probe socket bound");
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    async fn resolve(target: &PeerAddress) -> Result<SocketAddr, ProbeError> {
        tokio::net::lookup_host((target.host.as_str(), target.port))
            .await
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| ProbeError::Unresolvable(target.clone()))
    }

    /// Answer probes and forward acknowledgments to `prober` until `shutdown` fires
    pub async fn run_receiver(
        self: Arc<Self>,
        prober: Arc<LivenessProber>,
        shutdown: CancellationToken,
    ) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, src)) => match ProbeMessage::decode(&buf[..len]) {
                    Ok(msg) => self.handle_message(msg, src, &prober).await,
                    Err(e) => {
                        warn!(src = %src, error = %e, "Failed to decode probe datagram");
                    }
                },
                Err(e) => {
                    error!(error = %e, "Failed to receive probe datagram");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        debug!("Probe receiver stopped");
    }

    async fn send_message(&self, msg: &ProbeMessage, dest: SocketAddr) -> Result<(), ProbeError> {
        let bytes = msg.encode()?;
        self.socket.send_to(&bytes, dest).await?;
        Ok(())
    }

    async fn handle_message(&self, msg: ProbeMessage, src: SocketAddr, prober: &LivenessProber) {
        match msg {
            ProbeMessage::Request(request) => {
                trace!(src = %src, target = %request.target, "Received probe");
                let responding = request.target.clone();
                let reply = ProbeMessage::Ack(request.ack_from(responding));
                if let Err(e) = self.send_message(&reply, src).await {
                    debug!(src = %src, error = %e, "Failed to acknowledge probe");
                }
            }
            ProbeMessage::Ack(ack) => {
                trace!(src = %src, responding = %ack.responding, "Received probe acknowledgment");
                prober.on_ack(ack, Instant::now());
            }
        }
    }
}

#[async_trait]
impl ProbeTransport for UdpProbeTransport {
    async fn send_probe(
        &self,
        target: &PeerAddress,
        request: ProbeRequest,
    ) -> Result<(), ProbeError> {
        let dest = Self::resolve(target).await?;
        self.send_message(&ProbeMessage::Request(request), dest).await
    }
}
