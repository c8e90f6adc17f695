use serde_json::{Value, json};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::Handshake;
use super::error::TransportError;
use crate::config::BackendConfig;
use crate::protocol;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Subprocess transport: newline-delimited JSON-RPC over the child's
/// stdin/stdout pipes.
pub struct StdioTransport {
    name: String,
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    // Captured so the child has somewhere to write; never read in the hot path.
    _stderr: Option<ChildStderr>,
}

impl StdioTransport {
    /// Spawn the child and perform the MCP handshake.
    ///
    /// Spawning must succeed; the handshake itself is best-effort. A silent
    /// child leaves the transport usable but uninitialized and uncached.
    pub async fn connect(config: &BackendConfig) -> Result<(Self, Handshake), TransportError> {
        let argv = config.command_argv().unwrap_or_default();
        if argv.is_empty() {
            warn!(backend = %config.name, "no command configured");
            return Err(TransportError::Unavailable);
        }

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| {
            warn!(backend = %config.name, command = %argv[0], error = %e, "failed to spawn backend");
            TransportError::Unavailable
        })?;

        info!(backend = %config.name, pid = ?child.id(), command = %argv[0], "spawned child process");

        let stdin = child.stdin.take().ok_or(TransportError::Unavailable)?;
        let stdout = child.stdout.take().ok_or(TransportError::Unavailable)?;
        let stderr = child.stderr.take();

        let mut transport = Self {
            name: config.name.clone(),
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            _stderr: stderr,
        };

        let handshake = transport.handshake().await;
        Ok((transport, handshake))
    }

    async fn handshake(&mut self) -> Handshake {
        let mut handshake = Handshake::default();

        if let Err(e) = self.write_line(&protocol::initialize_request()).await {
            warn!(backend = %self.name, error = %e, "handshake write failed");
            return handshake;
        }
        match self.read_line(HANDSHAKE_TIMEOUT).await {
            Ok(_) => {
                handshake.initialized = true;
                info!(backend = %self.name, "MCP handshake complete");
            }
            Err(e) => {
                warn!(backend = %self.name, error = %e, "MCP handshake failed");
                return handshake;
            }
        }

        // Populate the tools cache; failure here leaves the backend usable,
        // only caching is absent.
        if self.write_line(&protocol::tools_list_request()).await.is_err() {
            return handshake;
        }
        if let Ok(line) = self.read_line(HANDSHAKE_TIMEOUT).await
            && let Ok(reply) = serde_json::from_str::<Value>(&line)
            && reply.get("result").is_some()
        {
            let count = reply["result"]["tools"].as_array().map_or(0, Vec::len);
            info!(backend = %self.name, tools = count, "cached tools");
            handshake.tools = Some(reply);
        }

        handshake
    }

    /// Send one JSON-RPC request and read one reply line.
    ///
    /// Notifications (no `id`) are written and answered synthetically without
    /// touching stdout. A timed-out read leaves the child running.
    pub async fn request(&mut self, request: &Value) -> Result<Value, TransportError> {
        self.write_line(request).await?;

        if protocol::is_notification(request) {
            return Ok(json!({"jsonrpc": protocol::JSONRPC_VERSION, "result": null}));
        }

        let line = self.read_line(REQUEST_TIMEOUT).await?;
        serde_json::from_str(&line).map_err(|e| TransportError::Parse(e.to_string()))
    }

    async fn write_line(&mut self, value: &Value) -> Result<(), TransportError> {
        let line = serde_json::to_string(value).map_err(|e| TransportError::Wire(e.to_string()))?;
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Read one line with a deadline. EOF and timeout both surface as
    /// `Timeout`: from the caller's side the backend simply did not reply.
    async fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        match tokio::time::timeout(timeout, self.lines.next_line()).await {
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => Err(TransportError::Timeout),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, five seconds of grace, then SIGKILL.
    pub async fn shutdown(&mut self) {
        let pid = self.child.id();

        #[cfg(unix)]
        if let Some(pid) = pid {
            // SAFETY: kill(2) is safe to call with any PID value.
            unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        }

        match tokio::time::timeout(STOP_GRACE, self.child.wait()).await {
            Ok(_) => debug!(backend = %self.name, pid = ?pid, "child exited"),
            Err(_) => {
                warn!(backend = %self.name, pid = ?pid, "child did not exit, killing");
                let _ = self.child.kill().await;
            }
        }
    }
}
