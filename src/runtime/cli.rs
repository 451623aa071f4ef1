//! CLI passthrough runtime
//!
//! Drives the Docker Engine through its command-line client instead of the
//! API socket. Used when only a binary is reachable, e.g. `docker.exe` from
//! inside WSL talking to Docker Desktop on Windows. Output from `docker
//! exec` is a plain subprocess stream; stdout and stderr are whatever the
//! client itself writes.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::process::spawn_process;
use super::targets::TargetMap;
use super::types::{ContainerInfo, ContainerRuntime, RuntimeError, RuntimeResult, SpawnedProcess};

/// Runtime that shells out to a `docker`-compatible binary.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    binary: String,
    targets: TargetMap,
}

impl CliRuntime {
    pub fn new(binary: &str, targets: TargetMap) -> Self {
        Self {
            binary: binary.trim().to_string(),
            targets,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Argument vector for `exec -i [-e K=V].. <container> sh -c <command>`.
    fn exec_args(container: &str, command: &str, env: &[(String, String)]) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "-i".to_string()];
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(container.to_string());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(command.to_string());
        args
    }

    async fn capture(&self, args: &[&str]) -> RuntimeResult<String> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RuntimeError::NotAvailable(format!("{}: {}", self.binary, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::RequestFailed(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    fn name(&self) -> &'static str {
        "cli"
    }

    fn resolve_target(&self, target: &str) -> String {
        self.targets.resolve(target)
    }

    fn host_program(&self, program: &str) -> String {
        if program == "docker" {
            self.binary.clone()
        } else {
            program.to_string()
        }
    }

    async fn ping(&self) -> RuntimeResult<()> {
        if self.binary.is_empty() {
            return Err(RuntimeError::NotAvailable("empty docker binary".into()));
        }
        let ok = Command::new(&self.binary)
            .arg("info")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);
        if ok {
            Ok(())
        } else {
            Err(RuntimeError::NotAvailable(format!(
                "{} info failed; is the Docker engine running?",
                self.binary
            )))
        }
    }

    async fn version(&self) -> RuntimeResult<String> {
        let out = self
            .capture(&["version", "--format", "{{.Server.Version}}"])
            .await?;
        Ok(out.trim().to_string())
    }

    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>> {
        let out = self.capture(&["ps", "--format", "{{json .}}"]).await?;
        parse_ps_lines(&out)
    }

    async fn exec(
        &self,
        container: &str,
        command: &str,
        env: &[(String, String)],
    ) -> RuntimeResult<SpawnedProcess> {
        debug!(binary = %self.binary, container = %container, "Starting CLI exec");
        let args = Self::exec_args(container, command, env);
        spawn_process(&self.binary, &args, None, &[])
    }
}

/// One line of `docker ps --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    names: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    ports: String,
    #[serde(default)]
    labels: String,
}

/// Parse JSON-lines output from `docker ps`. Blank lines are skipped.
pub fn parse_ps_lines(output: &str) -> RuntimeResult<Vec<ContainerInfo>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let row: PsLine =
                serde_json::from_str(line).map_err(|e| RuntimeError::Parse(e.to_string()))?;
            Ok(ContainerInfo {
                id: row.id,
                name: row.names,
                image: row.image,
                state: row.state,
                status: row.status,
                ports: split_list(&row.ports, ", "),
                labels: parse_labels(&row.labels),
            })
        })
        .collect()
}

fn split_list(value: &str, sep: &str) -> Vec<String> {
    value
        .split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_labels(value: &str) -> HashMap<String, String> {
    split_list(value, ",")
        .into_iter()
        .filter_map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}
