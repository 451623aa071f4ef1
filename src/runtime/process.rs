//! Host process spawning
//!
//! Starts a program with piped stdout/stderr and turns its output into an
//! ordered stream of [`ProcessEvent`]s. Both pipes are drained concurrently;
//! chunks are forwarded as soon as a read returns, with no line buffering.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::{ProcessControl, ProcessEvent, RuntimeError, RuntimeResult, SpawnedProcess};

const READ_CHUNK: usize = 8192;
const EVENT_BUFFER: usize = 64;

/// Sends SIGTERM to a local process id.
///
/// Once the process has been reaped the signal is suppressed, so a recycled
/// pid is never hit.
pub struct PidControl {
    pid: Option<u32>,
    exited: Arc<AtomicBool>,
}

impl PidControl {
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            exited: Arc::new(AtomicBool::new(false)),
        }
    }

    fn exit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exited)
    }
}

impl ProcessControl for PidControl {
    fn terminate(&self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        let Some(pid) = self.pid else {
            return;
        };
        send_sigterm(pid);
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Deliver SIGTERM to `pid`.
#[cfg(unix)]
pub fn send_sigterm(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range, not signalling");
        return;
    };
    // SAFETY: kill(2) with a positive pid and a valid signal number has no
    // memory-safety preconditions.
    let rc = unsafe { libc::kill(raw, libc::SIGTERM) };
    if rc != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "SIGTERM delivery failed");
    }
}

#[cfg(not(unix))]
pub fn send_sigterm(pid: u32) {
    warn!(pid, "SIGTERM is not supported on this platform");
}

/// Spawn `program args..` on the host.
///
/// `env` entries are added on top of the inherited environment. Stdin is
/// closed. Returns [`RuntimeError::SpawnFailed`] when the OS refuses.
pub fn spawn_process(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    env: &[(String, String)],
) -> RuntimeResult<SpawnedProcess> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| RuntimeError::SpawnFailed(format!("{}: {}", program, e)))?;

    let control = PidControl::new(child.id());
    let exited = control.exit_flag();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(async move {
        let out = pump(stdout, tx.clone(), ProcessEvent::Stdout);
        let err = pump(stderr, tx.clone(), ProcessEvent::Stderr);
        tokio::join!(out, err);

        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!(error = %e, "Failed to reap child process");
                None
            }
        };
        exited.store(true, Ordering::SeqCst);
        let _ = tx.send(ProcessEvent::Exited(code)).await;
    });

    Ok(SpawnedProcess {
        events: rx,
        control: Box::new(control),
    })
}

/// Forward everything read from `reader` as events built by `wrap`.
pub(crate) async fn pump<R>(
    reader: Option<R>,
    tx: mpsc::Sender<ProcessEvent>,
    wrap: fn(Vec<u8>) -> ProcessEvent,
) where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(wrap(buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Pipe read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut proc: SpawnedProcess) -> (Vec<u8>, Vec<u8>, Option<i32>) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        while let Some(event) = proc.events.recv().await {
            match event {
                ProcessEvent::Stdout(b) => out.extend(b),
                ProcessEvent::Stderr(b) => err.extend(b),
                ProcessEvent::Exited(code) => return (out, err, code),
            }
        }
        panic!("stream ended without Exited");
    }

    #[tokio::test]
    async fn test_spawn_echo() {
        let proc = spawn_process("echo", &["hello".to_string()], None, &[]).unwrap();
        assert!(proc.control.pid().is_some());
        let (out, err, code) = drain(proc).await;
        assert_eq!(out, b"hello\n");
        assert!(err.is_empty());
        assert_eq!(code, Some(0));
    }

    #[tokio::test]
    async fn test_stderr_and_exit_code() {
        let args = vec!["-c".to_string(), "echo oops >&2; exit 3".to_string()];
        let proc = spawn_process("sh", &args, None, &[]).unwrap();
        let (out, err, code) = drain(proc).await;
        assert!(out.is_empty());
        assert_eq!(err, b"oops\n");
        assert_eq!(code, Some(3));
    }

    #[tokio::test]
    async fn test_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let args = vec!["-c".to_string(), "echo $TOPIC_NAME; pwd".to_string()];
        let env = vec![("TOPIC_NAME".to_string(), "orders".to_string())];
        let proc = spawn_process("sh", &args, Some(dir.path()), &env).unwrap();
        let (out, _, code) = drain(proc).await;
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("orders"));
        let cwd = std::path::PathBuf::from(lines.next().unwrap());
        assert_eq!(
            cwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        assert_eq!(code, Some(0));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let err = spawn_process("labgate-no-such-binary", &[], None, &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::SpawnFailed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_stops_process() {
        let proc = spawn_process("sleep", &["30".to_string()], None, &[]).unwrap();
        proc.control.terminate();
        let (_, _, code) = tokio::time::timeout(std::time::Duration::from_secs(5), drain(proc))
            .await
            .unwrap();
        // killed by a signal, so no exit code
        assert_eq!(code, None);
    }
}
