//! Container runtime module for labgate
//!
//! This module hides how the gateway reaches the Docker engine. Two
//! runtimes are provided:
//! - Daemon: native Engine API connection (via `bollard`)
//! - Cli: passthrough to a `docker`-compatible binary, e.g. `docker.exe`
//!   reached across the WSL boundary
//!
//! It also owns host process spawning, which both the executor and the
//! CLI runtime use.

pub mod cli;
pub mod daemon;
pub mod factory;
pub mod process;
pub mod status;
pub mod targets;
pub mod types;

pub use cli::CliRuntime;
pub use daemon::DaemonRuntime;
pub use factory::{available_runtimes, create_runtime};
pub use process::spawn_process;
pub use status::{docker_status, group_kafka_clusters, kafka_clusters};
pub use targets::TargetMap;
pub use types::{
    ClusterMember, ContainerInfo, ContainerRuntime, DockerStatus, KafkaCluster, ProcessControl,
    ProcessEvent, RuntimeError, RuntimeResult, SpawnedProcess,
};

#[cfg(test)]
pub use types::MockContainerRuntime;
