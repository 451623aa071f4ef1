//! Runtime factory for creating container runtimes from configuration

use std::sync::Arc;

use tracing::info;

use crate::config::{RuntimeConfig, RuntimeType};

use super::cli::CliRuntime;
use super::daemon::DaemonRuntime;
use super::targets::TargetMap;
use super::types::{ContainerRuntime, RuntimeResult};

/// Create the configured container runtime.
///
/// The daemon is not contacted here; an unreachable engine shows up later
/// as `running: false` in status queries and as spawn failures on exec.
pub fn create_runtime(config: &RuntimeConfig) -> RuntimeResult<Arc<dyn ContainerRuntime>> {
    let targets = TargetMap::with_overrides(&config.targets);
    let runtime: Arc<dyn ContainerRuntime> = match config.runtime_type {
        RuntimeType::Daemon => Arc::new(DaemonRuntime::connect(targets)?),
        RuntimeType::Cli => Arc::new(CliRuntime::new(&config.docker_cmd, targets)),
    };
    info!(runtime = runtime.name(), "Container runtime selected");
    Ok(runtime)
}

/// Runtimes that answer a ping on this host.
pub async fn available_runtimes(config: &RuntimeConfig) -> Vec<&'static str> {
    let mut available = Vec::new();
    let targets = TargetMap::with_overrides(&config.targets);

    if let Ok(daemon) = DaemonRuntime::connect(targets.clone()) {
        if daemon.ping().await.is_ok() {
            available.push("daemon");
        }
    }

    let cli = CliRuntime::new(&config.docker_cmd, targets);
    if cli.ping().await.is_ok() {
        available.push("cli");
    }

    available
}
