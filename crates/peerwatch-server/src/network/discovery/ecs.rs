//! ECS service directory
//!
//! Lists the RUNNING tasks of an ECS service with `ListTasks`, describes them
//! with `DescribeTasks` and reports the private IPv4 address of each task's
//! elastic network interface, paired with the probe port.

use super::{DirectoryError, PeerDirectory};
use crate::network::types::PeerAddress;
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_ecs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ecs::types::{DesiredStatus, Task};
use aws_sdk_ecs::Client;
use std::collections::HashSet;
use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

/// `DescribeTasks` accepts at most this many task ARNs per call
const DESCRIBE_BATCH: usize = 100;

const ENI_ATTACHMENT: &str = "ElasticNetworkInterface";
const PRIVATE_IPV4_DETAIL: &str = "privateIPv4Address";

pub struct EcsServiceDirectory {
    client: OnceCell<Client>,
    probe_port: u16,
    timeout: Duration,
}

impl EcsServiceDirectory {
    /// The AWS client is built from the default credential and region chain
    /// on the first listing.
    pub fn new(probe_port: u16, timeout: Duration) -> Self {
        Self {
            client: OnceCell::new(),
            probe_port,
            timeout,
        }
    }

    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                let timeouts = TimeoutConfig::builder()
                    .operation_timeout(self.timeout)
                    .build();
                let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                    .timeout_config(timeouts)
                    .load()
                    .await;
                Client::new(&sdk_config)
            })
            .await
    }

    async fn running_task_arns(
        &self,
        client: &Client,
        cluster_id: &str,
        service_id: &str,
    ) -> Result<Vec<String>, DirectoryError> {
        let mut arns = Vec::new();
        let mut next_token = None;

        loop {
            let page = client
                .list_tasks()
                .cluster(cluster_id)
                .service_name(service_id)
                .desired_status(DesiredStatus::Running)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| self.classify(e))?;

            arns.extend(page.task_arns().iter().cloned());
            match page.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(arns)
    }

    async fn describe(
        &self,
        client: &Client,
        cluster_id: &str,
        arns: &[String],
    ) -> Result<Vec<Task>, DirectoryError> {
        let mut tasks = Vec::with_capacity(arns.len());

        for batch in arns.chunks(DESCRIBE_BATCH) {
            let described = client
                .describe_tasks()
                .cluster(cluster_id)
                .set_tasks(Some(batch.to_vec()))
                .send()
                .await
                .map_err(|e| self.classify(e))?;

            for failure in described.failures() {
                debug!(
                    target: "peerwatch::discovery",
                    arn = failure.arn().unwrap_or_default(),
                    reason = failure.reason().unwrap_or_default(),
                    "Task could not be described"
                );
            }
            tasks.extend(described.tasks().iter().cloned());
        }
        Ok(tasks)
    }

    fn classify<E, R>(&self, err: SdkError<E, R>) -> DirectoryError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
        R: Debug,
    {
        if let SdkError::TimeoutError(_) = err {
            return DirectoryError::Timeout(self.timeout);
        }
        let code = err
            .as_service_error()
            .and_then(|e| e.code())
            .map(str::to_string);
        classify_error_code(code.as_deref(), DisplayErrorContext(&err).to_string())
    }
}

/// Map an AWS error code onto the directory error kinds
fn classify_error_code(code: Option<&str>, message: String) -> DirectoryError {
    match code {
        Some(
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "InvalidSignatureException"
            | "ExpiredTokenException"
            | "MissingAuthenticationTokenException",
        ) => DirectoryError::Unauthorized(message),
        Some("ClusterNotFoundException" | "ServiceNotFoundException") => {
            DirectoryError::NotFound(message)
        }
        _ => DirectoryError::Transient(message),
    }
}

/// Private IPv4 address of a task.
///
/// The ENI attachment of an awsvpc task is preferred; the container network
/// interfaces are the fallback.
fn task_private_ip(task: &Task) -> Option<&str> {
    task.attachments()
        .iter()
        .filter(|a| a.r#type() == Some(ENI_ATTACHMENT))
        .flat_map(|a| a.details())
        .find(|detail| detail.name() == Some(PRIVATE_IPV4_DETAIL))
        .and_then(|detail| detail.value())
        .or_else(|| {
            task.containers()
                .iter()
                .flat_map(|c| c.network_interfaces())
                .find_map(|ni| ni.private_ipv4_address())
        })
}

/// One address per task, deduplicated in order of appearance
fn task_addresses(tasks: &[Task], probe_port: u16) -> Vec<PeerAddress> {
    let mut seen = HashSet::new();
    tasks
        .iter()
        .filter_map(task_private_ip)
        .filter(|ip| seen.insert(ip.to_string()))
        .map(|ip| PeerAddress::new(ip, probe_port))
        .collect()
}

#[async_trait]
impl PeerDirectory for EcsServiceDirectory {
    async fn list(
        &self,
        cluster_id: &str,
        service_id: &str,
    ) -> Result<Vec<PeerAddress>, DirectoryError> {
        let client = self.client().await;

        let arns = self.running_task_arns(client, cluster_id, service_id).await?;
        if arns.is_empty() {
            return Ok(Vec::new());
        }
        let tasks = self.describe(client, cluster_id, &arns).await?;
        let peers = task_addresses(&tasks, self.probe_port);

        debug!(
            target: "peerwatch::discovery",
            cluster_id,
            service_id,
            tasks = arns.len(),
            peers = peers.len(),
            "Listed ECS service tasks"
        );
        Ok(peers)
    }

    fn name(&self) -> &'static str {
        "ecs"
    }
}
