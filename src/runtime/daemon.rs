//! Native Docker Engine runtime
//!
//! Talks to the local daemon through `bollard`. Exec output arrives
//! multiplexed on one connection and is split back into stdout and stderr
//! events here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{ListContainersOptions, LogOutput};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::ContainerSummary;
use bollard::Docker;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::process::send_sigterm;
use super::targets::TargetMap;
use super::types::{
    ContainerInfo, ContainerRuntime, ProcessControl, ProcessEvent, RuntimeError, RuntimeResult,
    SpawnedProcess,
};

const EVENT_BUFFER: usize = 64;

/// Runtime backed by a direct connection to the Docker daemon.
#[derive(Debug, Clone)]
pub struct DaemonRuntime {
    docker: Docker,
    targets: TargetMap,
}

impl DaemonRuntime {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    ///
    /// Connecting is lazy; use [`ContainerRuntime::ping`] to check the daemon.
    pub fn connect(targets: TargetMap) -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::NotAvailable(e.to_string()))?;
        Ok(Self { docker, targets })
    }
}

#[async_trait]
impl ContainerRuntime for DaemonRuntime {
    fn name(&self) -> &'static str {
        "daemon"
    }

    fn resolve_target(&self, target: &str) -> String {
        self.targets.resolve(target)
    }

    fn host_program(&self, program: &str) -> String {
        program.to_string()
    }

    async fn ping(&self) -> RuntimeResult<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::NotAvailable(e.to_string()))
    }

    async fn version(&self) -> RuntimeResult<String> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| RuntimeError::RequestFailed(e.to_string()))?;
        Ok(version.version.unwrap_or_else(|| "unknown".to_string()))
    }

    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::RequestFailed(e.to_string()))?;
        Ok(summaries.into_iter().map(container_info).collect())
    }

    async fn exec(
        &self,
        container: &str,
        command: &str,
        env: &[(String, String)],
    ) -> RuntimeResult<SpawnedProcess> {
        let env: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let options = CreateExecOptions {
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
            env: if env.is_empty() { None } else { Some(env) },
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let created = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(|e| RuntimeError::SpawnFailed(format!("{}: {}", container, e)))?;
        let exec_id = created.id;

        let started = self
            .docker
            .start_exec(&exec_id, None)
            .await
            .map_err(|e| RuntimeError::SpawnFailed(format!("{}: {}", container, e)))?;
        let mut output = match started {
            StartExecResults::Attached { output, .. } => output,
            StartExecResults::Detached => {
                return Err(RuntimeError::SpawnFailed(
                    "exec started detached".to_string(),
                ))
            }
        };

        debug!(container = %container, exec_id = %exec_id, "Exec started");

        let exited = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let docker = self.docker.clone();
        let forward_exec_id = exec_id.clone();
        let forward_exited = Arc::clone(&exited);

        tokio::spawn(async move {
            while let Some(item) = output.next().await {
                let event = match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        ProcessEvent::Stdout(message.to_vec())
                    }
                    Ok(LogOutput::StdErr { message }) => ProcessEvent::Stderr(message.to_vec()),
                    Ok(LogOutput::StdIn { .. }) => continue,
                    Err(e) => {
                        warn!(exec_id = %forward_exec_id, error = %e, "Exec stream failed");
                        break;
                    }
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }

            let code = match docker.inspect_exec(&forward_exec_id).await {
                Ok(inspect) => inspect.exit_code.and_then(|c| i32::try_from(c).ok()),
                Err(e) => {
                    warn!(exec_id = %forward_exec_id, error = %e, "Failed to inspect exec");
                    None
                }
            };
            forward_exited.store(true, Ordering::SeqCst);
            let _ = tx.send(ProcessEvent::Exited(code)).await;
        });

        Ok(SpawnedProcess {
            events: rx,
            control: Box::new(ExecControl {
                docker: self.docker.clone(),
                exec_id,
                exited,
            }),
        })
    }
}

/// Terminates a daemon exec by signalling its host pid.
///
/// The Engine API has no call to signal an exec, so the pid reported by
/// `inspect_exec` is signalled directly. This only reaches processes when
/// the daemon shares the host pid namespace with this server.
struct ExecControl {
    docker: Docker,
    exec_id: String,
    exited: Arc<AtomicBool>,
}

impl ProcessControl for ExecControl {
    fn terminate(&self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(exec_id = %self.exec_id, "No runtime available to terminate exec");
            return;
        };
        let docker = self.docker.clone();
        let exec_id = self.exec_id.clone();
        let exited = Arc::clone(&self.exited);
        handle.spawn(async move {
            match docker.inspect_exec(&exec_id).await {
                Ok(inspect) => match inspect.pid.and_then(|p| u32::try_from(p).ok()) {
                    Some(pid) if pid > 0 && !exited.load(Ordering::SeqCst) => {
                        info!(exec_id = %exec_id, pid, "Sending SIGTERM to exec");
                        send_sigterm(pid);
                    }
                    _ => debug!(exec_id = %exec_id, "Exec has no live pid"),
                },
                Err(e) => warn!(exec_id = %exec_id, error = %e, "Failed to inspect exec"),
            }
        });
    }
}

fn container_info(summary: ContainerSummary) -> ContainerInfo {
    let name = summary
        .names
        .unwrap_or_default()
        .into_iter()
        .next()
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();
    let ports = summary
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|p| {
            let proto = p
                .typ
                .map(|t| t.to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "tcp".to_string());
            match p.public_port {
                Some(public) => format!(
                    "{}:{}->{}/{}",
                    p.ip.unwrap_or_else(|| "0.0.0.0".to_string()),
                    public,
                    p.private_port,
                    proto
                ),
                None => format!("{}/{}", p.private_port, proto),
            }
        })
        .collect();

    ContainerInfo {
        id: summary.id.unwrap_or_default(),
        name,
        image: summary.image.unwrap_or_default(),
        state: summary.state.unwrap_or_default(),
        status: summary.status.unwrap_or_default(),
        ports,
        labels: summary.labels.unwrap_or_default(),
    }
}
