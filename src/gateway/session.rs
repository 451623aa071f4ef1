//! Per-connection sessions
//!
//! A [`Session`] is created for every WebSocket connection. It turns client
//! frames into executor calls and executor events into outbound frames:
//!
//! ```text
//! execute ─> validate ─┬─> error (rejected, nothing spawned)
//!                      └─> command_start ─> launch ─┬─> command_error (spawn failure)
//!                                                   └─> stdout/stderr/progress..
//!                                                       └─> command_complete | command_error
//! ```
//!
//! Every command gets exactly one terminal frame. The session remembers
//! which commands it started; [`Session::close`] cancels all of them so no
//! process outlives its connection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::bus::{ActivityBus, CommandActivity, CommandOutcome};
use crate::config::SessionConfig;
use crate::executor::{
    CommandExecutor, CommandId, CommandStream, ExecError, ExecEvent, ExecOptions, ExecRequest,
    StreamKind,
};
use crate::security::Rejection;

use super::protocol::{
    parse_client_message, ClientMessage, ExecuteOptions, Progress, ServerMessage, Utf8Carry,
};

/// Permission required to run commands.
pub const EXECUTE_PERMISSION: &str = "execute_docker_commands";

const WELCOME: &str = "Connected to Kafka lab command gateway";

/// Shared dependencies of all sessions of one server.
pub struct SessionContext {
    pub executor: Arc<CommandExecutor>,
    pub activity: ActivityBus,
    pub config: SessionConfig,
}

impl SessionContext {
    pub fn new(executor: Arc<CommandExecutor>, activity: ActivityBus, config: SessionConfig) -> Self {
        Self {
            executor,
            activity,
            config,
        }
    }
}

/// State of one client connection.
pub struct Session {
    id: String,
    identity: Option<String>,
    permissions: Vec<String>,
    commands: Arc<Mutex<HashSet<CommandId>>>,
    outbound: mpsc::Sender<ServerMessage>,
    ctx: Arc<SessionContext>,
}

impl Session {
    pub fn new(ctx: Arc<SessionContext>, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            identity: None,
            permissions: Vec::new(),
            commands: Arc::new(Mutex::new(HashSet::new())),
            outbound,
            ctx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    /// Ids of commands still running for this session.
    pub async fn running_commands(&self) -> Vec<CommandId> {
        self.commands.lock().await.iter().cloned().collect()
    }

    /// Send the `connected` greeting.
    pub async fn greet(&self) {
        self.send(ServerMessage::Connected {
            session_id: self.id.clone(),
            message: WELCOME.to_string(),
        })
        .await;
    }

    /// Handle one text frame. Malformed frames are answered with an error
    /// and never end the session.
    pub async fn handle_text(&mut self, text: &str) {
        match parse_client_message(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                debug!(session_id = %self.id, error = ?e, "Bad client frame");
                self.send(ServerMessage::error(e.to_string())).await;
            }
        }
    }

    pub async fn handle(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Authenticate { user_id } => self.authenticate(user_id).await,
            ClientMessage::Execute {
                command,
                target,
                container,
                options,
            } => {
                self.execute(&command, target.as_deref(), container.as_deref(), options)
                    .await;
            }
            ClientMessage::Cancel { command_id } | ClientMessage::Terminate { command_id } => {
                self.cancel(command_id).await;
            }
        }
    }

    async fn authenticate(&mut self, user_id: Option<String>) {
        if self.identity.is_some() {
            self.send(ServerMessage::error("Already authenticated")).await;
            return;
        }
        let user_id = user_id
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "anonymous".to_string());
        self.permissions = self.ctx.config.permissions.clone();
        self.identity = Some(user_id.clone());
        info!(session_id = %self.id, user_id = %user_id, "Session authenticated");
        self.send(ServerMessage::Authenticated {
            user_id,
            permissions: self.permissions.clone(),
        })
        .await;
    }

    fn may_execute(&self) -> bool {
        if !self.ctx.config.require_authentication {
            return true;
        }
        self.identity.is_some() && self.permissions.iter().any(|p| p == EXECUTE_PERMISSION)
    }

    /// Validate and start a command; returns its id when one was assigned.
    pub async fn execute(
        &mut self,
        command: &Value,
        target: Option<&str>,
        container: Option<&str>,
        options: ExecuteOptions,
    ) -> Option<CommandId> {
        if !self.may_execute() {
            self.send(ServerMessage::error("Unauthorized")).await;
            return None;
        }

        let command_id: CommandId = uuid::Uuid::new_v4().to_string();
        let Some(text) = command.as_str() else {
            self.reject(&command_id, "", &Rejection::InvalidFormat).await;
            return Some(command_id);
        };

        let executor = &self.ctx.executor;
        let container = match target {
            Some(t) => Some(executor.runtime().resolve_target(t)),
            None => container.map(String::from),
        };
        let request = ExecRequest {
            command: text.to_string(),
            container,
            options: ExecOptions {
                timeout: options.timeout.map(Duration::from_millis),
                cwd: options.cwd,
                env: options.env.into_iter().collect(),
            },
        };

        let prepared = match executor.prepare(&request) {
            Ok(p) => p,
            Err(ExecError::Rejected(rejection)) => {
                self.reject(&command_id, text, &rejection).await;
                return Some(command_id);
            }
            Err(e) => {
                self.fail_start(&command_id, text, &e).await;
                return Some(command_id);
            }
        };

        let sanitized = prepared.command().to_string();
        self.send(ServerMessage::CommandStart {
            command_id: command_id.clone(),
            command: sanitized.clone(),
            container: prepared.container().map(String::from),
        })
        .await;

        self.commands.lock().await.insert(command_id.clone());
        match executor.launch(command_id.clone(), prepared).await {
            Ok(stream) => {
                let forwarder = Forwarder {
                    session_id: self.id.clone(),
                    user_id: self.identity.clone(),
                    command: sanitized,
                    commands: Arc::clone(&self.commands),
                    outbound: self.outbound.clone(),
                    activity: self.ctx.activity.clone(),
                };
                tokio::spawn(forwarder.run(stream));
            }
            Err(e) => {
                self.commands.lock().await.remove(&command_id);
                self.fail_start(&command_id, &sanitized, &e).await;
            }
        }
        Some(command_id)
    }

    async fn reject(&self, command_id: &str, command: &str, rejection: &Rejection) {
        info!(
            session_id = %self.id,
            command_id = %command_id,
            reason = %rejection,
            "Command rejected"
        );
        self.send(ServerMessage::rejected(command_id, rejection.to_string()))
            .await;
        self.publish(command_id, command, CommandOutcome::Rejected, None);
    }

    async fn fail_start(&self, command_id: &str, command: &str, error: &ExecError) {
        self.send(ServerMessage::CommandError {
            command_id: command_id.to_string(),
            message: error.client_message(),
            reason: error.kind().to_string(),
            exit_code: error.exit_code(),
        })
        .await;
        self.publish(command_id, command, CommandOutcome::Errored, None);
    }

    fn publish(&self, command_id: &str, command: &str, outcome: CommandOutcome, code: Option<i32>) {
        self.ctx.activity.publish(
            CommandActivity::new(&self.id, self.identity.as_deref(), command_id, command, outcome)
                .with_exit_code(code),
        );
    }

    /// Cancel one command of this session, or all of them when `command_id`
    /// is `None`. Commands of other sessions are never touched.
    pub async fn cancel(&self, command_id: Option<CommandId>) {
        match command_id {
            Some(id) => {
                let owned = self.commands.lock().await.contains(&id);
                let success = owned && self.ctx.executor.cancel(&id).await;
                debug!(session_id = %self.id, command_id = %id, success, "Cancel requested");
                self.send(ServerMessage::Terminated {
                    command_id: Some(id),
                    success,
                })
                .await;
            }
            None => {
                let cancelled = self.cancel_all().await;
                debug!(session_id = %self.id, cancelled, "Cancel-all requested");
                self.send(ServerMessage::Terminated {
                    command_id: None,
                    success: true,
                })
                .await;
            }
        }
    }

    async fn cancel_all(&self) -> usize {
        let ids: Vec<CommandId> = self.commands.lock().await.iter().cloned().collect();
        let mut cancelled = 0;
        for id in ids {
            if self.ctx.executor.cancel(&id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Tear the session down, signalling every command it still runs.
    pub async fn close(&self) -> usize {
        let cancelled = self.cancel_all().await;
        info!(session_id = %self.id, cancelled, "Session closed");
        cancelled
    }

    async fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            debug!(session_id = %self.id, "Outbound channel closed");
        }
    }
}

/// Turns one command's executor events into protocol frames.
struct Forwarder {
    session_id: String,
    user_id: Option<String>,
    command: String,
    commands: Arc<Mutex<HashSet<CommandId>>>,
    outbound: mpsc::Sender<ServerMessage>,
    activity: ActivityBus,
}

impl Forwarder {
    async fn run(self, mut stream: CommandStream) {
        let command_id = stream.id.clone();
        let mut stdout = Utf8Carry::new();
        let mut stderr = Utf8Carry::new();

        let result = loop {
            match stream.next().await {
                Some(ExecEvent::Output(out)) => {
                    let carry = match out.stream {
                        StreamKind::Stdout => &mut stdout,
                        StreamKind::Stderr => &mut stderr,
                    };
                    let data = carry.push(&out.data);
                    if !data.is_empty() {
                        self.emit(output_frame(&command_id, out.stream, data)).await;
                    }
                }
                Some(ExecEvent::Progress { elapsed, .. }) => {
                    self.emit(ServerMessage::Progress {
                        command_id: command_id.clone(),
                        progress: Progress {
                            elapsed_ms: elapsed.as_millis() as u64,
                        },
                    })
                    .await;
                }
                Some(ExecEvent::Finished(result)) => break result,
                None => break Err(ExecError::Runtime { exit_code: None }),
            }
        };

        if let Some(data) = stdout.finish() {
            self.emit(output_frame(&command_id, StreamKind::Stdout, data)).await;
        }
        if let Some(data) = stderr.finish() {
            self.emit(output_frame(&command_id, StreamKind::Stderr, data)).await;
        }

        self.commands.lock().await.remove(&command_id);

        let (frame, outcome, code) = match result {
            Ok(exit_code) => (
                ServerMessage::CommandComplete {
                    command_id: command_id.clone(),
                    exit_code,
                },
                CommandOutcome::Completed,
                Some(exit_code),
            ),
            Err(e) => {
                let outcome = match &e {
                    ExecError::Timeout(_) => CommandOutcome::TimedOut,
                    ExecError::Cancelled => CommandOutcome::Cancelled,
                    ExecError::Runtime { .. } => CommandOutcome::Failed,
                    _ => CommandOutcome::Errored,
                };
                if matches!(e, ExecError::Spawn(_)) {
                    warn!(command_id = %command_id, error = %e, "Command could not run");
                }
                (
                    ServerMessage::CommandError {
                        command_id: command_id.clone(),
                        message: e.client_message(),
                        reason: e.kind().to_string(),
                        exit_code: e.exit_code(),
                    },
                    outcome,
                    e.exit_code(),
                )
            }
        };
        self.emit(frame).await;
        self.activity.publish(
            CommandActivity::new(
                &self.session_id,
                self.user_id.as_deref(),
                &command_id,
                &self.command,
                outcome,
            )
            .with_exit_code(code),
        );
    }

    async fn emit(&self, message: ServerMessage) {
        // the connection may already be gone; the command still runs to its end
        let _ = self.outbound.send(message).await;
    }
}

fn output_frame(command_id: &str, stream: StreamKind, data: String) -> ServerMessage {
    match stream {
        StreamKind::Stdout => ServerMessage::Stdout {
            command_id: command_id.to_string(),
            data,
        },
        StreamKind::Stderr => ServerMessage::Stderr {
            command_id: command_id.to_string(),
            data,
        },
    }
}

/// Summary of a live session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Registry of live sessions for one server.
///
/// Also carries the shutdown signal that connection loops watch.
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, SessionInfo>>>,
    shutdown: watch::Sender<bool>,
    started: Instant,
}

impl SessionManager {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
            started: Instant::now(),
        }
    }

    pub async fn register(&self, session: &Session) {
        self.sessions.write().await.insert(
            session.id().to_string(),
            SessionInfo {
                user_id: session.identity().map(String::from),
                connected_at: Utc::now(),
            },
        );
    }

    /// Record the identity a session authenticated with.
    pub async fn update(&self, session: &Session) {
        if let Some(info) = self.sessions.write().await.get_mut(session.id()) {
            info.user_id = session.identity().map(String::from);
        }
    }

    pub async fn unregister(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Receiver that flips to `true` when the server shuts down.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ask every connection loop to close its session.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::runtime::MockContainerRuntime;
    use crate::security::CommandValidator;
    use serde_json::json;

    fn context(config: SessionConfig) -> Arc<SessionContext> {
        let mut mock = MockContainerRuntime::new();
        mock.expect_host_program().returning(|p| p.to_string());
        mock.expect_resolve_target()
            .returning(|t| if t == "week1" { "kafka-xray-broker".into() } else { t.into() });
        let validator = CommandValidator::new()
            .register_base_command("sleep")
            .register_base_command("printf")
            .register_base_command("sh");
        let executor = CommandExecutor::new(
            Arc::new(mock),
            Arc::new(validator),
            &ExecutorConfig::default(),
        );
        Arc::new(SessionContext::new(
            Arc::new(executor),
            ActivityBus::new(),
            config,
        ))
    }

    fn session(config: SessionConfig) -> (Session, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(64);
        (Session::new(context(config), tx), rx)
    }

    async fn authed() -> (Session, mpsc::Receiver<ServerMessage>) {
        let (mut s, mut rx) = session(SessionConfig::default());
        s.handle_text(r#"{"type":"authenticate","userId":"learner"}"#).await;
        assert!(matches!(rx.recv().await, Some(ServerMessage::Authenticated { .. })));
        (s, rx)
    }

    async fn until_terminal(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut frames = Vec::new();
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("channel closed");
            let done = frame.is_terminal();
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    #[tokio::test]
    async fn test_greeting() {
        let (s, mut rx) = session(SessionConfig::default());
        s.greet().await;
        match rx.recv().await.unwrap() {
            ServerMessage::Connected { session_id, message } => {
                assert_eq!(session_id, s.id());
                assert!(!message.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_requires_authentication() {
        let (mut s, mut rx) = session(SessionConfig::default());
        s.handle_text(r#"{"type":"execute","command":"sleep 0"}"#).await;
        assert_eq!(rx.recv().await.unwrap(), ServerMessage::error("Unauthorized"));
    }

    #[tokio::test]
    async fn test_authentication_can_be_disabled() {
        let config = SessionConfig {
            require_authentication: false,
            ..Default::default()
        };
        let (mut s, mut rx) = session(config);
        s.handle_text(r#"{"type":"execute","command":"printf ok"}"#).await;
        let frames = until_terminal(&mut rx).await;
        assert!(matches!(frames.last(), Some(ServerMessage::CommandComplete { exit_code: 0, .. })));
    }

    #[tokio::test]
    async fn test_authenticate_once() {
        let (mut s, mut rx) = authed().await;
        assert_eq!(s.identity(), Some("learner"));
        assert_eq!(s.permissions(), &[EXECUTE_PERMISSION.to_string()]);
        s.handle_text(r#"{"type":"authenticate","userId":"mallory"}"#).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerMessage::error("Already authenticated")
        );
        assert_eq!(s.identity(), Some("learner"));
    }

    #[tokio::test]
    async fn test_anonymous_identity() {
        let (mut s, mut rx) = session(SessionConfig::default());
        s.handle_text(r#"{"type":"authenticate"}"#).await;
        match rx.recv().await.unwrap() {
            ServerMessage::Authenticated { user_id, .. } => assert_eq!(user_id, "anonymous"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_frames_keep_session_alive() {
        let (mut s, mut rx) = authed().await;
        s.handle_text("{{{").await;
        assert_eq!(rx.recv().await.unwrap(), ServerMessage::error("Invalid message format"));
        s.handle_text(r#"{"type":"shutdown"}"#).await;
        assert_eq!(rx.recv().await.unwrap(), ServerMessage::error("Unknown message type"));

        s.handle_text(r#"{"type":"execute","command":"printf ok"}"#).await;
        let frames = until_terminal(&mut rx).await;
        assert!(matches!(frames.last(), Some(ServerMessage::CommandComplete { .. })));
    }

    #[tokio::test]
    async fn test_successful_command_frames() {
        let (mut s, mut rx) = authed().await;
        let id = s
            .execute(&json!("printf 'a b'"), None, None, ExecuteOptions::default())
            .await
            .unwrap();
        let frames = until_terminal(&mut rx).await;
        assert_eq!(
            frames.first(),
            Some(&ServerMessage::CommandStart {
                command_id: id.clone(),
                command: "printf 'a b'".into(),
                container: None,
            })
        );
        let stdout: String = frames
            .iter()
            .filter_map(|f| match f {
                ServerMessage::Stdout { data, .. } => Some(data.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stdout, "a b");
        assert_eq!(
            frames.last(),
            Some(&ServerMessage::CommandComplete {
                command_id: id,
                exit_code: 0
            })
        );
        assert!(s.running_commands().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_command_is_single_error() {
        let (mut s, mut rx) = authed().await;
        let mut activity = s.ctx.activity.subscribe();
        let id = s
            .execute(&json!("rm -rf /"), None, None, ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerMessage::rejected(&id, "Command contains dangerous pattern")
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(activity.recv().await.unwrap().outcome, CommandOutcome::Rejected);
    }

    #[tokio::test]
    async fn test_non_string_command_rejected() {
        let (mut s, mut rx) = authed().await;
        s.handle_text(r#"{"type":"execute","command":["docker","ps"]}"#).await;
        match rx.recv().await.unwrap() {
            ServerMessage::Error { command_id, message } => {
                assert!(command_id.is_some());
                assert_eq!(message, "Invalid command format");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_command_reports_exit_code() {
        let (mut s, mut rx) = authed().await;
        s.handle_text(r#"{"type":"execute","command":"sh -c 'exit 3'"}"#).await;
        let frames = until_terminal(&mut rx).await;
        match frames.last().unwrap() {
            ServerMessage::CommandError {
                reason, exit_code, ..
            } => {
                assert_eq!(reason, "runtime_failure");
                assert_eq!(*exit_code, Some(3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_option_in_milliseconds() {
        let (mut s, mut rx) = authed().await;
        s.handle_text(r#"{"type":"execute","command":"sleep 30","options":{"timeout":200}}"#)
            .await;
        let frames = until_terminal(&mut rx).await;
        match frames.last().unwrap() {
            ServerMessage::CommandError { reason, message, .. } => {
                assert_eq!(reason, "timeout");
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_by_id() {
        let (mut s, mut rx) = authed().await;
        let id = s
            .execute(&json!("sleep 30"), None, None, ExecuteOptions::default())
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(ServerMessage::CommandStart { .. })));

        s.cancel(Some(id.clone())).await;
        let mut saw_ack = false;
        let mut saw_terminal = false;
        while !(saw_ack && saw_terminal) {
            match rx.recv().await.unwrap() {
                ServerMessage::Terminated { command_id, success } => {
                    assert_eq!(command_id.as_deref(), Some(id.as_str()));
                    assert!(success);
                    saw_ack = true;
                }
                ServerMessage::CommandError { reason, .. } => {
                    assert_eq!(reason, "cancelled");
                    saw_terminal = true;
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_unknown_id() {
        let (s, mut rx) = authed().await;
        s.cancel(Some("missing".into())).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerMessage::Terminated {
                command_id: Some("missing".into()),
                success: false
            }
        );
    }

    #[tokio::test]
    async fn test_cannot_cancel_other_sessions_commands() {
        let ctx = context(SessionConfig {
            require_authentication: false,
            ..Default::default()
        });
        let (tx_a, _rx_a) = mpsc::channel(64);
        let (tx_b, mut rx_b) = mpsc::channel(64);
        let mut a = Session::new(Arc::clone(&ctx), tx_a);
        let b = Session::new(Arc::clone(&ctx), tx_b);

        let id = a
            .execute(&json!("sleep 30"), None, None, ExecuteOptions::default())
            .await
            .unwrap();
        b.cancel(Some(id.clone())).await;
        assert!(matches!(
            rx_b.recv().await,
            Some(ServerMessage::Terminated { success: false, .. })
        ));
        assert!(ctx.executor.is_running(&id).await);
        assert_eq!(a.close().await, 1);
    }

    #[tokio::test]
    async fn test_close_cancels_everything() {
        let (mut s, _rx) = authed().await;
        for _ in 0..2 {
            s.execute(&json!("sleep 30"), None, None, ExecuteOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(s.running_commands().await.len(), 2);
        assert_eq!(s.close().await, 2);
        assert_eq!(s.ctx.executor.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_target_resolved_and_validated() {
        let (mut s, mut rx) = authed().await;
        s.execute(
            &json!("python3 -c 'print(1)'"),
            Some("week1"),
            None,
            ExecuteOptions::default(),
        )
        .await;
        match rx.recv().await.unwrap() {
            ServerMessage::Error { message, .. } => {
                assert_eq!(message, "Command not allowed in docker exec")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_activity_published_on_completion() {
        let (mut s, mut rx) = authed().await;
        let mut activity = s.ctx.activity.subscribe();
        let id = s
            .execute(&json!("printf done"), None, None, ExecuteOptions::default())
            .await
            .unwrap();
        until_terminal(&mut rx).await;
        let event = activity.recv().await.unwrap();
        assert_eq!(event.command_id, id);
        assert_eq!(event.user_id.as_deref(), Some("learner"));
        assert_eq!(event.outcome, CommandOutcome::Completed);
        assert_eq!(event.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_session_manager_tracks_sessions() {
        let manager = SessionManager::new();
        let (s, _rx) = session(SessionConfig::default());
        manager.register(&s).await;
        assert_eq!(manager.count().await, 1);
        assert!(manager.get(s.id()).await.unwrap().user_id.is_none());
        manager.unregister(s.id()).await;
        assert_eq!(manager.count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let manager = SessionManager::new();
        let mut signal = manager.shutdown_signal();
        assert!(!manager.is_shutting_down());
        manager.shutdown();
        signal.changed().await.unwrap();
        assert!(*signal.borrow());
    }
}
