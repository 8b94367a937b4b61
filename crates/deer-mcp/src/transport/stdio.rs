//! Standard I/O transport.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::Transport;
use crate::error::TransportError;
use crate::framing::LineBuffer;
use crate::pending::{CloseReason, PendingRequests};

/// Time a server gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// How long the reader waits to collect an exit status after stdout closes.
const EXIT_STATUS_WAIT: Duration = Duration::from_millis(200);

/// Outgoing messages that may wait for the child to read its stdin.
const WRITE_QUEUE: usize = 64;

static STDERR_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(error|fatal|panic(ked)?|exception|traceback)\b").expect("valid regex")
});

static STDERR_WARN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(warn(ing)?|deprecated)\b").expect("valid regex"));

/// Severity assigned to one line of server stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StderrLevel {
    Error,
    Warn,
    Info,
}

pub(crate) fn classify_stderr(line: &str) -> StderrLevel {
    if STDERR_ERROR.is_match(line) {
        StderrLevel::Error
    } else if STDERR_WARN.is_match(line) {
        StderrLevel::Warn
    } else {
        StderrLevel::Info
    }
}

/// Standard I/O transport for MCP servers.
///
/// Spawns a child process and communicates via stdin/stdout using
/// newline-delimited JSON. Background tasks own the pipes: one writes
/// queued messages to stdin, one reads stdout and dispatches each line,
/// one relays stderr into the log.
pub struct StdioTransport {
    server: String,
    child: Arc<Mutex<Child>>,
    writer: parking_lot::Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    pid: Option<u32>,
}

impl StdioTransport {
    /// Spawn `command` and start reading its output.
    ///
    /// `env` is applied on top of the inherited environment.
    pub async fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        working_dir: Option<&Path>,
        pending: Arc<PendingRequests>,
    ) -> Result<Self, TransportError> {
        debug!(server = %server, command = command, args = ?args, "Spawning MCP server process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        let pid = child.id();

        let child = Arc::new(Mutex::new(child));
        let connected = Arc::new(AtomicBool::new(true));
        let (writer, queue) = mpsc::channel(WRITE_QUEUE);

        tokio::spawn(write_stdin(
            server.to_string(),
            stdin,
            queue,
            Arc::clone(&pending),
            Arc::clone(&connected),
        ));
        tokio::spawn(read_stdout(
            server.to_string(),
            stdout,
            pending,
            Arc::clone(&child),
            Arc::clone(&connected),
        ));
        tokio::spawn(relay_stderr(server.to_string(), stderr));

        debug!(server = %server, pid = ?pid, "MCP server process spawned");

        Ok(Self {
            server: server.to_string(),
            child,
            writer: parking_lot::Mutex::new(Some(writer)),
            connected,
            closed: AtomicBool::new(false),
            pid,
        })
    }

    /// Get the process ID of the child process.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

fn missing_pipe(name: &str) -> TransportError {
    TransportError::SpawnFailed(std::io::Error::other(format!("failed to capture {}", name)))
}

/// Write queued frames to the child's stdin until the queue closes.
///
/// Each frame is written whole by this task alone, so a caller that stops
/// waiting never leaves half a line on the pipe.
async fn write_stdin(
    server: String,
    mut stdin: ChildStdin,
    mut queue: mpsc::Receiver<Vec<u8>>,
    pending: Arc<PendingRequests>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = queue.recv().await {
        let written = async {
            stdin.write_all(&frame).await?;
            stdin.flush().await
        }
        .await;

        if let Err(e) = written {
            let reason = TransportError::WriteError(e).to_string();
            warn!(server = %server, reason = %reason, "Failed to write to MCP server");
            connected.store(false, Ordering::SeqCst);
            pending.close(CloseReason::ConnectionLost(reason));
            return;
        }
    }
    // dropping stdin here lets well-behaved servers exit on their own
    debug!(server = %server, "MCP server stdin closed");
}

async fn read_stdout(
    server: String,
    mut stdout: ChildStdout,
    pending: Arc<PendingRequests>,
    child: Arc<Mutex<Child>>,
    connected: Arc<AtomicBool>,
) {
    let mut lines = LineBuffer::new();
    let mut chunk = vec![0u8; 8192];

    let reason = loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break TransportError::ConnectionClosed.to_string(),
            Ok(n) => {
                for line in lines.feed(&chunk[..n]) {
                    debug!(server = %server, message = %line, "Received message from MCP server");
                    pending.handle_message(&line);
                }
            }
            Err(e) => break TransportError::ReadError(e).to_string(),
        }
    };

    if let Some(line) = lines.finish() {
        pending.handle_message(&line);
    }
    connected.store(false, Ordering::SeqCst);

    // close() may hold the child while terminating it; don't wait on it then
    let reason = match child.try_lock() {
        Ok(mut child) => match tokio::time::timeout(EXIT_STATUS_WAIT, child.wait()).await {
            Ok(Ok(status)) => format!("process exited ({})", status),
            _ => reason,
        },
        Err(_) => reason,
    };

    let lost = CloseReason::ConnectionLost(reason.clone());
    let rejected = pending.close(lost.clone());
    if pending.close_reason() == Some(lost) {
        warn!(server = %server, reason = %reason, rejected, "MCP server connection lost");
    } else {
        debug!(server = %server, "MCP server output closed");
    }
}

/// Log server stderr until it closes. Returns the number of lines relayed.
///
/// Bytes that are not UTF-8 are replaced, never treated as an error: the
/// pipe has to stay open or the server dies on its next write.
async fn relay_stderr<R: AsyncRead + Unpin>(server: String, mut stderr: R) -> usize {
    let mut lines = LineBuffer::new();
    let mut chunk = vec![0u8; 4096];
    let mut relayed = 0;

    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in lines.feed(&chunk[..n]) {
                    log_stderr_line(&server, &line);
                    relayed += 1;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(server = %server, error = %e, "Stopped reading server stderr");
                break;
            }
        }
    }

    if let Some(line) = lines.finish() {
        log_stderr_line(&server, &line);
        relayed += 1;
    }
    relayed
}

fn log_stderr_line(server: &str, line: &str) {
    let line = line.trim_end();
    match classify_stderr(line) {
        StderrLevel::Error => error!(server = %server, "{}", line),
        StderrLevel::Warn => warn!(server = %server, "{}", line),
        StderrLevel::Info => info!(server = %server, "{}", line),
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        debug!(server = %self.server, message = message, "Sending message to MCP server");

        let writer = self.writer.lock().clone().ok_or(TransportError::NotConnected)?;

        let mut frame = Vec::with_capacity(message.len() + 1);
        frame.extend_from_slice(message.as_bytes());
        frame.push(b'\n');

        // the frame is queued whole or not at all
        writer
            .send(frame)
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!(server = %self.server, "Closing MCP server transport");
        self.connected.store(false, Ordering::SeqCst);

        // the writer task drains the queue, then drops stdin
        self.writer.lock().take();

        let mut child = self.child.lock().await;
        if let Ok(Some(status)) = child.try_wait() {
            debug!(server = %self.server, status = %status, "MCP server already exited");
            return Ok(());
        }

        // On Unix, try SIGTERM first. Elsewhere, just kill.
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                debug!(server = %self.server, pid = pid, "Sending SIGTERM to MCP server");
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

                tokio::select! {
                    _ = child.wait() => {
                        debug!(server = %self.server, "MCP server exited gracefully");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(TERMINATE_GRACE) => {
                        warn!(server = %self.server, "MCP server did not exit gracefully, killing");
                    }
                }
            }
        }

        child.kill().await.map_err(TransportError::TerminateFailed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn spawn_cat(pending: Arc<PendingRequests>) -> Option<StdioTransport> {
        // 'cat' echoes whatever we send, which is enough to exercise framing
        StdioTransport::spawn("cat", "cat", &[], &BTreeMap::new(), None, pending)
            .await
            .ok()
    }

    #[test]
    fn test_classify_stderr() {
        assert_eq!(classify_stderr("Error: could not bind"), StderrLevel::Error);
        assert_eq!(classify_stderr("thread 'main' panicked at src/main.rs"), StderrLevel::Error);
        assert_eq!(classify_stderr("WARNING: config missing"), StderrLevel::Warn);
        assert_eq!(classify_stderr("server listening on stdio"), StderrLevel::Info);
        assert_eq!(classify_stderr("errors=0"), StderrLevel::Info);
    }

    #[tokio::test]
    async fn test_stdio_transport_echo_dispatches_response() {
        let pending = Arc::new(PendingRequests::new("cat"));
        let Some(transport) = spawn_cat(Arc::clone(&pending)).await else {
            return;
        };
        assert!(transport.is_connected());
        assert!(transport.pid().is_some());

        let rx = pending.register(1).unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":1,"result":{"ok":true}}"#)
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), json!({"ok": true}));

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let pending = Arc::new(PendingRequests::new("cat"));
        let Some(transport) = spawn_cat(pending).await else {
            return;
        };

        transport.close().await.unwrap();
        let result = transport.send("test").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_stderr_relay_survives_invalid_utf8() {
        let (mut server_side, stderr) = tokio::io::duplex(64);
        let relay = tokio::spawn(relay_stderr("noisy".to_string(), stderr));

        server_side.write_all(b"\xff\xfe broken\n").await.unwrap();
        server_side.write_all(b"still logging\n\n").await.unwrap();
        server_side.write_all(b"no newline at exit").await.unwrap();
        drop(server_side);

        assert_eq!(relay.await.unwrap(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abandoned_send_does_not_tear_next_message() {
        let pending = Arc::new(PendingRequests::new("slow-cat"));
        // stdin is not read for a second, so a large message cannot be written at once
        let args = vec!["-c".to_string(), "sleep 1; exec cat".to_string()];
        let Ok(transport) =
            StdioTransport::spawn("slow-cat", "sh", &args, &BTreeMap::new(), None, Arc::clone(&pending))
                .await
        else {
            return;
        };

        let big = format!(
            r#"{{"jsonrpc":"2.0","method":"notifications/noise","params":{{"pad":"{}"}}}}"#,
            "x".repeat(400 * 1024)
        );
        let _ = tokio::time::timeout(Duration::from_millis(200), transport.send(&big)).await;

        let rx = pending.register(7).unwrap();
        transport
            .send(r#"{"jsonrpc":"2.0","id":7,"result":"ok"}"#)
            .await
            .unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(10), rx)
            .await
            .expect("reply after the large message")
            .unwrap()
            .unwrap();
        assert_eq!(reply, json!("ok"));

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_missing_command() {
        let pending = Arc::new(PendingRequests::new("missing"));
        let result = StdioTransport::spawn(
            "missing",
            "/definitely/not/a/real/binary",
            &[],
            &BTreeMap::new(),
            None,
            pending,
        )
        .await;
        assert!(matches!(result, Err(TransportError::SpawnFailed(_))));
    }
}
