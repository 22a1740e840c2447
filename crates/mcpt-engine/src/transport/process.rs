//! Stdio transport for MCP servers running as child processes.
//!
//! One writer task drains a channel into the child's stdin, so writes reach
//! the pipe whole and in call order. One reader task owns stdout for the
//! life of the process and hands every parsed line to the connection's
//! [`Correlator`]. A third task drains stderr into the log.

use crate::correlator::Correlator;
use crate::error::McpError;
use crate::framing::{LineDecoder, encode_line};
use crate::jsonrpc::{JsonRpcMessage, JsonRpcNotification};
use crate::launch::{LaunchPlan, PlatformFamily};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Size of a single stdout read.
const READ_CHUNK_BYTES: usize = 8192;

/// How long to wait for a killed child to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// What the stdout reader has seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReaderState {
    /// Nothing read yet.
    Waiting,
    /// At least one chunk of output arrived.
    Output,
    /// Stdout reached EOF or failed; the connection is closed.
    Closed,
}

/// Async stdio transport for communicating with an MCP server process.
pub struct ProcessTransport {
    command: String,
    correlator: Arc<Correlator>,
    write_tx: mpsc::Sender<String>,
    reader_state: watch::Receiver<ReaderState>,
    child: Mutex<Child>,
    cancel: CancellationToken,
}

impl ProcessTransport {
    /// Spawn `command` and start the background reader, writer and stderr tasks.
    ///
    /// `env` is merged over the ambient environment.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let plan = LaunchPlan::resolve(command, args, PlatformFamily::current());
        tracing::info!(
            program = %plan.program,
            args = ?plan.args,
            shell = plan.shell,
            "spawning MCP server"
        );

        let mut cmd = Command::new(&plan.program);
        apply_args(&mut cmd, &plan);
        cmd.envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let spawn_error = |source: std::io::Error| McpError::Spawn {
            command: command.to_string(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_error)?;

        let stdin = child.stdin.take().ok_or_else(|| spawn_error(missing_pipe("stdin")))?;
        let stdout = child.stdout.take().ok_or_else(|| spawn_error(missing_pipe("stdout")))?;
        let stderr = child.stderr.take().ok_or_else(|| spawn_error(missing_pipe("stderr")))?;

        let correlator = Arc::new(Correlator::new());
        let cancel = CancellationToken::new();
        let (state_tx, reader_state) = watch::channel(ReaderState::Waiting);
        let (write_tx, write_rx) = mpsc::channel::<String>(64);

        tokio::spawn(write_loop(stdin, write_rx, cancel.clone()));
        tokio::spawn(read_loop(
            stdout,
            Arc::clone(&correlator),
            state_tx,
            cancel.clone(),
            command.to_string(),
        ));
        tokio::spawn(drain_stderr(stderr, cancel.clone(), command.to_string()));

        Ok(Self {
            command: command.to_string(),
            correlator,
            write_tx,
            reader_state,
            child: Mutex::new(child),
            cancel,
        })
    }

    /// The command this transport was spawned from.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Send a JSON-RPC request and wait for the correlated response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<JsonRpcMessage, McpError> {
        self.correlator
            .dispatch(&self.write_tx, method, params, timeout)
            .await
    }

    /// Send a request whose response is consumed in the background.
    ///
    /// The request stays correlated, so its reply is matched and logged
    /// instead of being treated as unsolicited.
    pub fn request_detached(&self, method: &str, params: Option<Value>, timeout: Duration) {
        let correlator = Arc::clone(&self.correlator);
        let write_tx = self.write_tx.clone();
        let method = method.to_string();
        tokio::spawn(async move {
            match correlator.dispatch(&write_tx, &method, params, timeout).await {
                Ok(resp) => tracing::debug!(%method, ?resp, "background MCP request completed"),
                Err(e) => tracing::debug!(%method, error = %e, "background MCP request failed"),
            }
        });
    }

    /// Send a JSON-RPC notification (fire-and-forget, no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let line = encode_line(&JsonRpcNotification::new(method, params))?;
        tracing::debug!(method, "sending MCP notification");
        self.write_tx
            .send(line)
            .await
            .map_err(|_| McpError::ConnectionClosed {
                method: method.to_string(),
            })
    }

    /// Wait until the child writes anything to stdout.
    pub async fn wait_for_output(&self, timeout: Duration) -> Result<(), McpError> {
        let mut state = self.reader_state.clone();
        let seen = tokio::time::timeout(timeout, async {
            state
                .wait_for(|s| *s != ReaderState::Waiting)
                .await
                .map(|s| *s)
        })
        .await;

        match seen {
            Ok(Ok(ReaderState::Output)) => Ok(()),
            Ok(_) => Err(McpError::HandshakeFailed {
                command: self.command.clone(),
                message: self.exit_description().await,
            }),
            Err(_) => Err(McpError::HandshakeTimeout {
                command: self.command.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Whether the process is still connected (stdout open, not shut down).
    pub fn is_alive(&self) -> bool {
        !self.correlator.is_closed()
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Describe how the child ended, for error messages.
    pub async fn exit_description(&self) -> String {
        let mut child = self.child.lock().await;
        match child.try_wait() {
            Ok(Some(status)) => format!("process exited ({status})"),
            Ok(None) => "stdout closed".to_string(),
            Err(e) => format!("process state unknown: {e}"),
        }
    }

    /// Fail pending requests, stop the background tasks and kill the child.
    pub async fn shutdown(&self) {
        let failed = self.correlator.close();
        if failed > 0 {
            tracing::debug!(command = %self.command, failed, "failed pending MCP requests on shutdown");
        }
        self.cancel.cancel();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(REAP_TIMEOUT, child.kill()).await {
            Ok(Ok(())) => tracing::debug!(command = %self.command, "MCP server process terminated"),
            Ok(Err(e)) => {
                tracing::debug!(command = %self.command, error = %e, "MCP server process already gone")
            }
            Err(_) => tracing::warn!(command = %self.command, "MCP server process was not reaped in time"),
        }
    }
}

#[cfg(windows)]
fn apply_args(cmd: &mut Command, plan: &LaunchPlan) {
    if plan.shell {
        // cmd.exe does its own parsing; pass our quoting through untouched.
        for arg in &plan.args {
            cmd.raw_arg(arg);
        }
    } else {
        cmd.args(&plan.args);
    }
}

#[cfg(not(windows))]
fn apply_args(cmd: &mut Command, plan: &LaunchPlan) {
    cmd.args(&plan.args);
}

fn missing_pipe(name: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("failed to capture child {name}"),
    )
}

async fn write_loop(
    mut stdin: ChildStdin,
    mut write_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = write_rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        if let Err(e) = write_line(&mut stdin, &line).await {
            tracing::debug!(error = %e, "MCP server stdin closed");
            break;
        }
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

async fn read_loop(
    mut stdout: ChildStdout,
    correlator: Arc<Correlator>,
    state_tx: watch::Sender<ReaderState>,
    cancel: CancellationToken,
    command: String,
) {
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK_BYTES];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = stdout.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(%command, error = %e, "failed reading MCP server stdout");
                    break;
                }
            },
        };

        state_tx.send_if_modified(|state| {
            let first = *state == ReaderState::Waiting;
            if first {
                *state = ReaderState::Output;
            }
            first
        });

        for message in decoder.feed(&buf[..n]) {
            correlator.on_message(message);
        }
    }

    let failed = correlator.close();
    state_tx.send_replace(ReaderState::Closed);
    tracing::info!(%command, failed, dropped = decoder.dropped(), "MCP server stdout closed");
}

async fn drain_stderr(stderr: ChildStderr, cancel: CancellationToken, command: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => tracing::debug!(target: "mcpt::stderr", %command, "{line}"),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(%command, error = %e, "failed reading MCP server stderr");
                    break;
                }
            },
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn spawn_nonexistent_command_fails() {
        let result = ProcessTransport::spawn("this_command_does_not_exist_xyz123", &[], &HashMap::new());
        match result {
            Err(McpError::Spawn { command, .. }) => {
                assert_eq!(command, "this_command_does_not_exist_xyz123");
            }
            Err(other) => panic!("Expected Spawn, got: {other:?}"),
            Ok(_) => panic!("Expected error, got Ok"),
        }
    }

    #[tokio::test]
    async fn cat_echoes_request_with_same_id() {
        let transport = ProcessTransport::spawn("cat", &[], &HashMap::new()).unwrap();
        let resp = transport
            .request("ping", Some(serde_json::json!({"hello": "world"})), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(resp.numeric_id(), Some(1));
        assert_eq!(resp.params.unwrap()["hello"], "world");
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn first_output_marks_reader_state() {
        let transport = ProcessTransport::spawn(
            "sh",
            &["-c".to_string(), "echo booting; cat".to_string()],
            &HashMap::new(),
        )
        .unwrap();
        transport.wait_for_output(TIMEOUT).await.unwrap();
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn silent_process_times_out_waiting_for_output() {
        let transport =
            ProcessTransport::spawn("sleep", &["10".to_string()], &HashMap::new()).unwrap();
        match transport.wait_for_output(Duration::from_millis(100)).await {
            Err(McpError::HandshakeTimeout { timeout_ms, .. }) => assert_eq!(timeout_ms, 100),
            other => panic!("Expected HandshakeTimeout, got: {other:?}"),
        }
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn exit_before_output_is_reported() {
        let transport = ProcessTransport::spawn("true", &[], &HashMap::new()).unwrap();
        match transport.wait_for_output(TIMEOUT).await {
            Err(McpError::HandshakeFailed { command, .. }) => assert_eq!(command, "true"),
            other => panic!("Expected HandshakeFailed, got: {other:?}"),
        }
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn notification_does_not_block() {
        let transport = ProcessTransport::spawn("cat", &[], &HashMap::new()).unwrap();
        transport
            .notify("notifications/initialized", None)
            .await
            .unwrap();
        assert_eq!(transport.pending_count(), 0);
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_closes_transport() {
        let transport = ProcessTransport::spawn("cat", &[], &HashMap::new()).unwrap();
        assert!(transport.is_alive());
        transport.shutdown().await;
        assert!(!transport.is_alive());
        let result = transport.request("ping", None, TIMEOUT).await;
        assert!(matches!(result, Err(McpError::ConnectionClosed { .. })));
    }
}
