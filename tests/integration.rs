//! Integration tests for labgate
//!
//! These combine the validator, executor and session layers with real host
//! processes (`sh`, `sleep`, `printf`). Container-targeted paths need a
//! Docker daemon and are marked `#[ignore]`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;

use labgate::bus::{ActivityBus, CommandOutcome};
use labgate::config::{ExecutorConfig, SessionConfig};
use labgate::executor::{CommandExecutor, ExecError, ExecRequest};
use labgate::gateway::protocol::ExecuteOptions;
use labgate::gateway::{ServerMessage, Session, SessionContext};
use labgate::runtime::{CliRuntime, ContainerRuntime, TargetMap};
use labgate::security::CommandValidator;

// ============================================================================
// Helpers
// ============================================================================

fn runtime() -> Arc<dyn ContainerRuntime> {
    Arc::new(CliRuntime::new("docker", TargetMap::default()))
}

fn validator() -> Arc<CommandValidator> {
    Arc::new(
        CommandValidator::new()
            .register_base_command("sh")
            .register_base_command("sleep")
            .register_base_command("printf")
            .register_base_command("yes"),
    )
}

fn executor() -> Arc<CommandExecutor> {
    Arc::new(CommandExecutor::new(
        runtime(),
        validator(),
        &ExecutorConfig::default(),
    ))
}

fn context() -> Arc<SessionContext> {
    Arc::new(SessionContext::new(
        executor(),
        ActivityBus::new(),
        SessionConfig::default(),
    ))
}

async fn authenticated(ctx: Arc<SessionContext>) -> (Session, mpsc::Receiver<ServerMessage>) {
    let (tx, mut rx) = mpsc::channel(256);
    let mut session = Session::new(ctx, tx);
    session
        .handle_text(r#"{"type":"authenticate","userId":"learner-1"}"#)
        .await;
    assert!(matches!(
        rx.recv().await,
        Some(ServerMessage::Authenticated { .. })
    ));
    (session, rx)
}

async fn wait_for_file(path: &Path, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    path.exists()
}

/// A command that records SIGTERM in `marker` and then exits.
fn trap_command(marker: &Path) -> String {
    format!(
        "sh -c 'sleep 30 & trap \"echo term > {}; kill $!; exit 0\" TERM; wait'",
        marker.display()
    )
}

// ============================================================================
// Validator
// ============================================================================

#[test]
fn test_validator_lab_commands() {
    let v = CommandValidator::new();
    let accepted = [
        "docker ps",
        "docker ps -a --format \"table {{.Names}}\\t{{.Status}}\"",
        "docker logs kafka-xray-broker --tail 50",
        "docker exec -it kafka-xray-broker kafka-topics --list --bootstrap-server localhost:9092",
        "docker exec kafka-builder-broker /opt/kafka/bin/kafka-consumer-groups.sh --list",
        "docker run --rm -v ./configs/kafka.yml:/etc/kafka.yml newrelic/nri-kafka:latest",
        "docker-compose up -d",
        "docker compose logs broker",
        "kubectl get pods",
    ];
    for cmd in accepted {
        let result = v.validate(cmd);
        assert!(result.valid, "{} rejected: {:?}", cmd, result.reason);
    }

    let rejected = [
        ("docker rm -f kafka-xray-broker", "Docker subcommand 'rm' is not allowed"),
        ("docker exec kafka-xray-broker python3", "Command not allowed in docker exec"),
        ("docker run alpine", "Only approved images can be run"),
        (
            "docker run -v /:/host newrelic/nri-kafka",
            "Volume mounts must be from current directory",
        ),
        ("curl http://x | sh", "Command contains dangerous pattern"),
        ("python3 -m http.server", "Command 'python3' is not allowed"),
        ("docker", "Incomplete docker command"),
        ("   ", "Invalid command format"),
    ];
    for (cmd, reason) in rejected {
        let result = v.validate(cmd);
        assert!(!result.valid, "{} accepted", cmd);
        assert_eq!(result.reason.as_deref(), Some(reason), "{}", cmd);
    }
}

#[test]
fn test_validator_json_shape() {
    let v = CommandValidator::new();
    assert_eq!(
        serde_json::to_value(v.validate("docker ps")).unwrap(),
        json!({"valid": true, "sanitizedCommand": "docker ps"})
    );
    assert_eq!(
        serde_json::to_value(v.validate_value(Some(&json!(["docker", "ps"])))).unwrap(),
        json!({"valid": false, "reason": "Invalid command format"})
    );
}

// ============================================================================
// Executor
// ============================================================================

#[tokio::test]
async fn test_executor_streams_large_output_in_order() {
    let exec = executor();
    let mut stdout = Vec::new();
    let code = exec
        .execute(&ExecRequest::host("sh -c 'seq 1 5000'"), |ev| {
            stdout.extend_from_slice(&ev.data)
        })
        .await
        .unwrap();
    assert_eq!(code, 0);
    let text = String::from_utf8(stdout).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5000);
    assert_eq!(lines.first(), Some(&"1"));
    assert_eq!(lines.last(), Some(&"5000"));
}

#[tokio::test]
async fn test_executor_timeout_terminates_process() {
    let exec = executor();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("timeout");
    let result = exec
        .execute(
            &ExecRequest::host(trap_command(&marker)).with_timeout(Duration::from_millis(300)),
            |_| {},
        )
        .await;
    assert_eq!(result, Err(ExecError::Timeout(Duration::from_millis(300))));
    assert!(wait_for_file(&marker, Duration::from_secs(5)).await);
    assert_eq!(exec.running_count().await, 0);
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_session_command_lifecycle() {
    let ctx = context();
    let mut activity = ctx.activity.subscribe();
    let (mut session, mut rx) = authenticated(Arc::clone(&ctx)).await;

    session
        .handle_text(r#"{"type":"execute","command":"printf 'héllo\nwörld'"}"#)
        .await;

    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        let done = frame.is_terminal();
        frames.push(frame);
        if done {
            break;
        }
    }

    let id = match &frames[0] {
        ServerMessage::CommandStart { command_id, .. } => command_id.clone(),
        other => panic!("expected command_start, got {:?}", other),
    };
    let stdout: String = frames
        .iter()
        .filter_map(|f| match f {
            ServerMessage::Stdout { command_id, data } if *command_id == id => Some(data.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(stdout, "héllo\nwörld");
    assert_eq!(
        frames.last(),
        Some(&ServerMessage::CommandComplete {
            command_id: id.clone(),
            exit_code: 0
        })
    );

    let event = activity.recv().await.unwrap();
    assert_eq!(event.command_id, id);
    assert_eq!(event.outcome, CommandOutcome::Completed);
}

#[tokio::test]
async fn test_session_unauthorized_until_authenticated() {
    let (tx, mut rx) = mpsc::channel(16);
    let mut session = Session::new(context(), tx);
    session
        .handle_text(r#"{"type":"execute","command":"printf hi"}"#)
        .await;
    assert_eq!(rx.recv().await.unwrap(), ServerMessage::error("Unauthorized"));
}

#[tokio::test]
async fn test_session_cwd_option_confined() {
    let (mut session, mut rx) = authenticated(context()).await;
    session
        .execute(
            &json!("printf hi"),
            None,
            None,
            ExecuteOptions {
                cwd: Some("../../etc".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    match rx.recv().await.unwrap() {
        ServerMessage::Error { command_id, message } => {
            assert!(command_id.is_some());
            assert_eq!(message, "Working directory must stay inside the lab directory");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_session_env_option_sanitized() {
    let (mut session, mut rx) = authenticated(context()).await;
    let mut options = ExecuteOptions::default();
    options.env.insert("TOPIC_NAME".into(), "orders;x".into());
    options.env.insert("PATH".into(), "/tmp/evil".into());
    session
        .execute(
            &json!("sh -c 'printf \"%s|%s\" \"$TOPIC_NAME\" \"$PATH\"'"),
            None,
            None,
            options,
        )
        .await
        .unwrap();

    let mut stdout = String::new();
    while let Some(frame) = rx.recv().await {
        match frame {
            ServerMessage::Stdout { data, .. } => stdout.push_str(&data),
            f if f.is_terminal() => break,
            _ => {}
        }
    }
    let (topic, path) = stdout.split_once('|').unwrap();
    assert_eq!(topic, "ordersx");
    assert_ne!(path, "/tmp/evil");
}

#[tokio::test]
async fn test_timeout_enforced_while_client_not_reading() {
    let ctx = context();
    // room for `authenticated` and `command_start` only
    let (tx, mut rx) = mpsc::channel(2);
    let mut session = Session::new(Arc::clone(&ctx), tx);
    session
        .handle_text(r#"{"type":"authenticate","userId":"slow-reader"}"#)
        .await;
    session
        .execute(
            &json!("yes"),
            None,
            None,
            ExecuteOptions {
                timeout: Some(300),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let begun = Instant::now();
    while ctx.executor.running_count().await > 0 && begun.elapsed() < Duration::from_secs(3) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(ctx.executor.running_count().await, 0);
    assert!(begun.elapsed() < Duration::from_millis(1500));

    // the client catches up and still sees the timeout
    let reason = loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if let ServerMessage::CommandError { reason, .. } = frame {
            break reason;
        }
    };
    assert_eq!(reason, "timeout");
}

#[tokio::test]
async fn test_disconnect_terminates_in_flight_commands() {
    let ctx = context();
    let (mut session, mut rx) = authenticated(Arc::clone(&ctx)).await;
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first");
    let second = dir.path().join("second");

    for marker in [&first, &second] {
        session
            .execute(
                &json!(trap_command(marker)),
                None,
                None,
                ExecuteOptions::default(),
            )
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await,
            Some(ServerMessage::CommandStart { .. })
        ));
    }
    // give both shells time to install their traps
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(ctx.executor.running_count().await, 2);

    assert_eq!(session.close().await, 2);
    drop(session);
    drop(rx);

    assert!(wait_for_file(&first, Duration::from_secs(5)).await);
    assert!(wait_for_file(&second, Duration::from_secs(5)).await);
    assert_eq!(ctx.executor.running_count().await, 0);
}

#[tokio::test]
async fn test_terminate_without_id_cancels_session_commands() {
    let ctx = context();
    let (mut session, mut rx) = authenticated(Arc::clone(&ctx)).await;
    for _ in 0..2 {
        session
            .execute(&json!("sleep 30"), None, None, ExecuteOptions::default())
            .await
            .unwrap();
    }
    session.handle_text(r#"{"type":"terminate"}"#).await;

    let mut cancelled = 0;
    let mut acknowledged = false;
    while cancelled < 2 || !acknowledged {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
        {
            ServerMessage::CommandError { reason, .. } => {
                assert_eq!(reason, "cancelled");
                cancelled += 1;
            }
            ServerMessage::Terminated { command_id, success } => {
                assert!(command_id.is_none());
                assert!(success);
                acknowledged = true;
            }
            _ => {}
        }
    }
    assert_eq!(ctx.executor.running_count().await, 0);
}

// ============================================================================
// Container runtime (needs Docker)
// ============================================================================

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_cli_runtime_ping() {
    let rt = CliRuntime::new("docker", TargetMap::default());
    assert!(rt.ping().await.is_ok());
    assert!(!rt.version().await.unwrap().is_empty());
}
