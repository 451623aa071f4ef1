//! Types for the process executor

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::security::Rejection;

/// Identifier correlating an execute request with its output and cancel.
pub type CommandId = String;

/// Why a command did not finish with exit code 0.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The validator refused the request; nothing was spawned
    #[error("{0}")]
    Rejected(#[from] Rejection),

    /// The OS or the container runtime could not start the process
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    /// The process ran and exited non-zero (or was killed by a signal)
    #[error("Command failed with exit code {}", describe_exit(.exit_code))]
    Runtime { exit_code: Option<i32> },

    /// The deadline passed and the process was sent SIGTERM
    #[error("Command timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Cancelled on request
    #[error("Command cancelled")]
    Cancelled,

    /// The command id is already running
    #[error("Command id '{0}' is already running")]
    DuplicateId(CommandId),
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl ExecError {
    /// Stable short name used in logs and protocol messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecError::Rejected(_) => "rejected",
            ExecError::Spawn(_) => "spawn_failure",
            ExecError::Runtime { .. } => "runtime_failure",
            ExecError::Timeout(_) => "timeout",
            ExecError::Cancelled => "cancelled",
            ExecError::DuplicateId(_) => "duplicate_id",
        }
    }

    /// Text safe to show a client. Spawn failures are reduced to a generic
    /// message; the detail stays in the server log.
    pub fn client_message(&self) -> String {
        match self {
            ExecError::Spawn(_) => "Failed to start command".to_string(),
            other => other.to_string(),
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::Runtime { exit_code } => *exit_code,
            _ => None,
        }
    }
}

/// Which pipe a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// A chunk of process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub command_id: CommandId,
    pub stream: StreamKind,
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Everything a running command reports, in order. The last event is
/// always a single `Finished`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Output(OutputEvent),
    Progress {
        command_id: CommandId,
        elapsed: Duration,
    },
    Finished(std::result::Result<i32, ExecError>),
}

/// Per-request execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Deadline; the executor default when `None`. Clamped to the maximum.
    pub timeout: Option<Duration>,
    /// Working directory relative to the lab directory.
    pub cwd: Option<String>,
    /// Requested environment, sanitized before use.
    pub env: Vec<(String, String)>,
}

/// A command to run, on the host or inside a container.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: String,
    /// Concrete container name. Logical targets are resolved by the caller.
    pub container: Option<String>,
    pub options: ExecOptions,
}

impl ExecRequest {
    /// A host command with default options.
    pub fn host(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            container: None,
            options: ExecOptions::default(),
        }
    }

    /// `command` run through `sh -c` inside `container`.
    pub fn in_container(container: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            container: Some(container.into()),
            options: ExecOptions::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.options.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.env.push((key.into(), value.into()));
        self
    }
}

/// How a validated command will be launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LaunchPlan {
    Host {
        program: String,
        args: Vec<String>,
        cwd: PathBuf,
    },
    Container {
        container: String,
        command: String,
    },
}

/// A request that passed validation. Only [`super::CommandExecutor::prepare`]
/// builds these, so nothing reaches `launch` unvalidated.
#[derive(Debug, Clone)]
pub struct PreparedCommand {
    pub(crate) sanitized: String,
    pub(crate) plan: LaunchPlan,
    pub(crate) env: Vec<(String, String)>,
    pub(crate) timeout: Duration,
}

impl PreparedCommand {
    /// The command text that will run.
    pub fn command(&self) -> &str {
        &self.sanitized
    }

    pub fn container(&self) -> Option<&str> {
        match &self.plan {
            LaunchPlan::Container { container, .. } => Some(container),
            LaunchPlan::Host { .. } => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Collected output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub result: std::result::Result<i32, ExecError>,
}

/// Ordered event stream of one running command.
#[derive(Debug)]
pub struct CommandStream {
    pub id: CommandId,
    rx: mpsc::Receiver<ExecEvent>,
}

impl CommandStream {
    pub(crate) fn new(id: CommandId, rx: mpsc::Receiver<ExecEvent>) -> Self {
        Self { id, rx }
    }

    /// Next event, `None` after `Finished` has been delivered.
    pub async fn next(&mut self) -> Option<ExecEvent> {
        self.rx.recv().await
    }

    /// Feed output chunks to `on_output` and return the final result.
    pub async fn wait_with<F>(mut self, mut on_output: F) -> std::result::Result<i32, ExecError>
    where
        F: FnMut(&OutputEvent),
    {
        while let Some(event) = self.rx.recv().await {
            match event {
                ExecEvent::Output(out) => on_output(&out),
                ExecEvent::Progress { .. } => {}
                ExecEvent::Finished(result) => return result,
            }
        }
        // supervisor always sends Finished; a closed channel means it panicked
        Err(ExecError::Runtime { exit_code: None })
    }

    /// Gather all output and the final result.
    pub async fn collect(self) -> CommandOutput {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let result = self
            .wait_with(|out| match out.stream {
                StreamKind::Stdout => stdout.extend_from_slice(&out.data),
                StreamKind::Stderr => stderr.extend_from_slice(&out.data),
            })
            .await;
        CommandOutput {
            stdout,
            stderr,
            result,
        }
    }
}
