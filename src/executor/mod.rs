//! Process executor
//!
//! [`CommandExecutor`] validates, spawns and supervises commands. Each
//! executor owns its own registry of running commands; nothing here is
//! process-global, so several executors (or tests) can run side by side.
//!
//! A launched command is watched by one supervisor task, which forwards
//! output in order, fires the timeout, emits progress heartbeats and finally
//! sends exactly one [`ExecEvent::Finished`]. The registry holds a handle
//! only while the command is running.
//!
//! Cancellation is cooperative: the process receives SIGTERM and its handle
//! is dropped at once, whether or not the process actually exits.

mod types;

pub use types::{
    CommandId, CommandOutput, CommandStream, ExecError, ExecEvent, ExecOptions, ExecRequest,
    OutputEvent, PreparedCommand, StreamKind,
};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::runtime::{spawn_process, ContainerRuntime, ProcessControl, ProcessEvent, SpawnedProcess};
use crate::security::{
    expand_workspace_mounts, resolve_working_dir, sanitize_env, tokenize, BaseCommand,
    CommandValidator, Rejection,
};

use types::LaunchPlan;

/// Bookkeeping for one running command.
struct ProcessHandle {
    control: Box<dyn ProcessControl>,
    started: Instant,
    cancel: oneshot::Sender<()>,
}

type Registry = Arc<Mutex<HashMap<CommandId, ProcessHandle>>>;

/// Spawns validated commands and tracks them until they finish.
pub struct CommandExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    validator: Arc<CommandValidator>,
    running: Registry,
    default_timeout: Duration,
    max_timeout: Duration,
    progress_interval: Option<Duration>,
    working_dir: PathBuf,
    output_buffer: usize,
}

impl CommandExecutor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        validator: Arc<CommandValidator>,
        config: &ExecutorConfig,
    ) -> Self {
        let progress = config.progress_interval_secs;
        Self {
            runtime,
            validator,
            running: Arc::new(Mutex::new(HashMap::new())),
            default_timeout: Duration::from_secs(config.default_timeout_secs),
            max_timeout: Duration::from_secs(config.max_timeout_secs),
            progress_interval: (progress > 0).then(|| Duration::from_secs(progress)),
            working_dir: PathBuf::from(&config.working_dir),
            output_buffer: config.output_buffer.max(1),
        }
    }

    /// Override the heartbeat period (`None` disables heartbeats).
    pub fn with_progress_interval(mut self, interval: Option<Duration>) -> Self {
        self.progress_interval = interval.filter(|d| !d.is_zero());
        self
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn validator(&self) -> &CommandValidator {
        &self.validator
    }

    /// Validate `request` and work out how to run it.
    ///
    /// Host commands are tokenized here; the first token is mapped through
    /// the runtime (so `docker` may become `docker.exe`). Container commands
    /// are judged as `docker exec <container> <command>`.
    pub fn prepare(&self, request: &ExecRequest) -> std::result::Result<PreparedCommand, ExecError> {
        let parsed = match request.container.as_deref() {
            Some(container) => self
                .validator
                .check_in_container(container, &request.command)?,
            None => self.validator.check(&request.command)?,
        };

        let cwd = resolve_working_dir(&self.working_dir, request.options.cwd.as_deref())?;
        let requested_env: HashMap<String, String> =
            request.options.env.iter().cloned().collect();
        let env: Vec<(String, String)> = sanitize_env(&requested_env).into_iter().collect();

        let timeout = request
            .options
            .timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout);

        let plan = match request.container.as_deref() {
            Some(container) => LaunchPlan::Container {
                container: container.to_string(),
                command: parsed.sanitized.clone(),
            },
            None => {
                let mut tokens = tokenize(&parsed.sanitized);
                if tokens.is_empty() {
                    return Err(Rejection::EmptyCommand.into());
                }
                let program = self.runtime.host_program(&tokens.remove(0));
                // no shell runs host commands, so `${PWD}` in mounts is expanded here
                if parsed.base == BaseCommand::Docker && parsed.sub_command.as_deref() == Some("run")
                {
                    if let Some((_, run_args)) = tokens.split_first_mut() {
                        let dir = std::path::absolute(&cwd).unwrap_or_else(|_| cwd.clone());
                        expand_workspace_mounts(run_args, &dir);
                    }
                }
                LaunchPlan::Host {
                    program,
                    args: tokens,
                    cwd,
                }
            }
        };

        Ok(PreparedCommand {
            sanitized: parsed.sanitized,
            plan,
            env,
            timeout,
        })
    }

    /// Spawn a prepared command under `id`.
    pub async fn launch(
        &self,
        id: CommandId,
        prepared: PreparedCommand,
    ) -> std::result::Result<CommandStream, ExecError> {
        if self.running.lock().await.contains_key(&id) {
            return Err(ExecError::DuplicateId(id));
        }

        let spawned = match &prepared.plan {
            LaunchPlan::Host { program, args, cwd } => {
                spawn_process(program, args, Some(cwd), &prepared.env)
            }
            LaunchPlan::Container { container, command } => {
                self.runtime.exec(container, command, &prepared.env).await
            }
        };
        let SpawnedProcess { events, control } = spawned.map_err(|e| {
            warn!(command_id = %id, error = %e, "Failed to spawn command");
            ExecError::Spawn(e.to_string())
        })?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut running = self.running.lock().await;
            if running.contains_key(&id) {
                control.terminate();
                return Err(ExecError::DuplicateId(id));
            }
            running.insert(
                id.clone(),
                ProcessHandle {
                    control,
                    started: Instant::now(),
                    cancel: cancel_tx,
                },
            );
        }

        info!(
            command_id = %id,
            command = %prepared.sanitized,
            container = prepared.container().unwrap_or("-"),
            timeout_ms = prepared.timeout.as_millis() as u64,
            "Command started"
        );

        let (tx, rx) = mpsc::channel(self.output_buffer);
        tokio::spawn(supervise(Supervisor {
            id: id.clone(),
            events,
            cancel: cancel_rx,
            timeout: prepared.timeout,
            progress: self.progress_interval,
            tx,
            running: Arc::clone(&self.running),
        }));

        Ok(CommandStream::new(id, rx))
    }

    /// Validate and launch in one step.
    pub async fn start(
        &self,
        id: CommandId,
        request: &ExecRequest,
    ) -> std::result::Result<CommandStream, ExecError> {
        let prepared = self.prepare(request)?;
        self.launch(id, prepared).await
    }

    /// Run `request` to completion under a fresh id, passing output chunks
    /// to `on_output` as they arrive. Resolves with exit code 0 on success.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use labgate::config::ExecutorConfig;
    /// use labgate::executor::{CommandExecutor, ExecRequest};
    /// use labgate::runtime::{CliRuntime, TargetMap};
    /// use labgate::security::CommandValidator;
    ///
    /// # tokio_test::block_on(async {
    /// let executor = CommandExecutor::new(
    ///     Arc::new(CliRuntime::new("docker", TargetMap::default())),
    ///     Arc::new(CommandValidator::new()),
    ///     &ExecutorConfig::default(),
    /// );
    /// let mut out = Vec::new();
    /// let code = executor
    ///     .execute(&ExecRequest::host("docker ps"), |ev| out.extend_from_slice(&ev.data))
    ///     .await
    ///     .unwrap();
    /// assert_eq!(code, 0);
    /// # })
    /// ```
    pub async fn execute<F>(
        &self,
        request: &ExecRequest,
        on_output: F,
    ) -> std::result::Result<i32, ExecError>
    where
        F: FnMut(&OutputEvent),
    {
        let id = uuid::Uuid::new_v4().to_string();
        self.start(id, request).await?.wait_with(on_output).await
    }

    /// Send SIGTERM to `id` and forget it. Unknown ids are ignored.
    ///
    /// Returns whether a running command was found.
    pub async fn cancel(&self, id: &str) -> bool {
        let handle = self.running.lock().await.remove(id);
        match handle {
            Some(handle) => {
                debug!(
                    command_id = %id,
                    elapsed_ms = handle.started.elapsed().as_millis() as u64,
                    "Cancelling command"
                );
                handle.control.terminate();
                let _ = handle.cancel.send(());
                true
            }
            None => false,
        }
    }

    /// Cancel every running command of this executor.
    pub async fn cancel_all(&self) -> usize {
        let handles: Vec<(CommandId, ProcessHandle)> =
            self.running.lock().await.drain().collect();
        let count = handles.len();
        for (id, handle) in handles {
            debug!(command_id = %id, "Cancelling command");
            handle.control.terminate();
            let _ = handle.cancel.send(());
        }
        count
    }

    pub async fn is_running(&self, id: &str) -> bool {
        self.running.lock().await.contains_key(id)
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }
}

struct Supervisor {
    id: CommandId,
    events: mpsc::Receiver<ProcessEvent>,
    cancel: oneshot::Receiver<()>,
    timeout: Duration,
    progress: Option<Duration>,
    tx: mpsc::Sender<ExecEvent>,
    running: Registry,
}

async fn supervise(mut sup: Supervisor) {
    let started = Instant::now();
    let deadline = tokio::time::sleep(sup.timeout);
    tokio::pin!(deadline);
    let mut heartbeat = sup.progress.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let result = loop {
        let event = tokio::select! {
            biased;

            event = sup.events.recv() => match event {
                Some(ProcessEvent::Stdout(data)) => output(&sup.id, StreamKind::Stdout, data),
                Some(ProcessEvent::Stderr(data)) => output(&sup.id, StreamKind::Stderr, data),
                Some(ProcessEvent::Exited(code)) => {
                    sup.running.lock().await.remove(&sup.id);
                    break match code {
                        Some(0) => Ok(0),
                        other => Err(ExecError::Runtime { exit_code: other }),
                    };
                }
                None => {
                    sup.running.lock().await.remove(&sup.id);
                    break Err(ExecError::Runtime { exit_code: None });
                }
            },
            _ = &mut sup.cancel => break Err(ExecError::Cancelled),
            _ = deadline.as_mut() => break expire(&sup).await,
            _ = tick(&mut heartbeat) => ExecEvent::Progress {
                command_id: sup.id.clone(),
                elapsed: started.elapsed(),
            },
        };

        // delivery may block on a slow consumer; the deadline and cancel
        // still apply while it does
        tokio::select! {
            biased;

            _ = &mut sup.cancel => break Err(ExecError::Cancelled),
            _ = deadline.as_mut() => break expire(&sup).await,
            // a consumer that went away only loses output
            _ = sup.tx.send(event) => {}
        }
    };

    // unblock the pipe readers so the child is reaped even if nobody
    // collects the final event
    sup.events.close();

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(code) => info!(command_id = %sup.id, exit_code = code, elapsed_ms, "Command completed"),
        Err(e) => info!(
            command_id = %sup.id,
            outcome = e.kind(),
            exit_code = ?e.exit_code(),
            elapsed_ms,
            "Command finished"
        ),
    }
    let _ = sup.tx.send(ExecEvent::Finished(result)).await;
}

fn output(id: &CommandId, stream: StreamKind, data: Vec<u8>) -> ExecEvent {
    ExecEvent::Output(OutputEvent {
        command_id: id.clone(),
        stream,
        data,
        timestamp: Utc::now(),
    })
}

/// Terminate and unregister a command whose deadline passed.
async fn expire(sup: &Supervisor) -> std::result::Result<i32, ExecError> {
    if let Some(handle) = sup.running.lock().await.remove(&sup.id) {
        handle.control.terminate();
    }
    Err(ExecError::Timeout(sup.timeout))
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
