//! Types for container runtime adapters
//!
//! A runtime answers status queries about the lab's containers and starts
//! processes inside them. Started processes are described by
//! [`SpawnedProcess`]: an ordered channel of [`ProcessEvent`]s ending in
//! exactly one [`ProcessEvent::Exited`], plus a [`ProcessControl`] used to
//! ask the process to stop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by container runtimes.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The runtime (daemon or CLI binary) cannot be reached
    #[error("Runtime not available: {0}")]
    NotAvailable(String),

    /// The OS or the daemon refused to start the process
    #[error("Failed to spawn process: {0}")]
    SpawnFailed(String),

    /// A query or exec call failed after the runtime was reached
    #[error("Runtime request failed: {0}")]
    RequestFailed(String),

    /// Output from the runtime could not be understood
    #[error("Unexpected runtime output: {0}")]
    Parse(String),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// One event from a running process, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// Final event. `None` when the process died from a signal or the
    /// exit status could not be determined.
    Exited(Option<i32>),
}

/// Handle for asking a spawned process to stop.
pub trait ProcessControl: Send + Sync {
    /// Send a cooperative termination request (SIGTERM or equivalent).
    ///
    /// Must not block and must be safe to call more than once.
    fn terminate(&self);

    /// OS process id, when one is known locally.
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// A process started by a runtime or by the host spawner.
pub struct SpawnedProcess {
    pub events: mpsc::Receiver<ProcessEvent>,
    pub control: Box<dyn ProcessControl>,
}

impl std::fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.control.pid())
            .finish()
    }
}

/// A running container as reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
    pub ports: Vec<String>,
    #[serde(default, skip_serializing)]
    pub labels: HashMap<String, String>,
}

/// Payload of `GET /api/docker/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerStatus {
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_details: Option<Vec<ContainerInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A container belonging to a Kafka cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub name: String,
    pub id: String,
    pub status: String,
    pub ports: Vec<String>,
}

/// Kafka brokers grouped by compose project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaCluster {
    pub name: String,
    pub containers: Vec<ClusterMember>,
}

/// Container runtime adapter.
///
/// Implementations: [`super::DaemonRuntime`] talks to the Docker Engine
/// API directly, [`super::CliRuntime`] shells out to a `docker` binary that
/// may live across a host boundary (e.g. `docker.exe` from WSL).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short runtime name for logs and health output.
    fn name(&self) -> &'static str;

    /// Map a logical target (e.g. `week1`) to a concrete container name.
    fn resolve_target(&self, target: &str) -> String;

    /// Program to spawn for a host command whose first word is `program`.
    fn host_program(&self, program: &str) -> String;

    /// Check that the runtime is reachable.
    async fn ping(&self) -> RuntimeResult<()>;

    /// Server version string.
    async fn version(&self) -> RuntimeResult<String>;

    /// Running containers.
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>>;

    /// Start `sh -c <command>` inside `container`.
    async fn exec(
        &self,
        container: &str,
        command: &str,
        env: &[(String, String)],
    ) -> RuntimeResult<SpawnedProcess>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_status_wire_shape() {
        let status = DockerStatus {
            running: true,
            version: Some("24.0.7".into()),
            containers: Some(1),
            container_details: Some(vec![ContainerInfo {
                id: "abc".into(),
                name: "kafka-xray-broker".into(),
                image: "confluentinc/cp-kafka".into(),
                state: "running".into(),
                status: "Up 2 hours".into(),
                ports: vec!["0.0.0.0:9092->9092/tcp".into()],
                labels: HashMap::from([("k".to_string(), "v".to_string())]),
            }]),
            error: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["running"], true);
        assert_eq!(json["containerDetails"][0]["name"], "kafka-xray-broker");
        assert!(json["containerDetails"][0].get("labels").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_runtime_error_display() {
        let err = RuntimeError::NotAvailable("docker.exe not found".into());
        assert_eq!(err.to_string(), "Runtime not available: docker.exe not found");
    }
}
