use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use straylight_core::config::TransportKind;

use crate::protocol::*;
use crate::{McpError, ProviderClient, ProviderState};

/// How long to wait for handshake and catalog responses. Tool calls carry
/// their own deadline, owned by the router.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between requesting termination (stdin EOF) and killing.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Provider connection over a subprocess's stdin/stdout, one JSON-RPC
/// message per line. The subprocess's stderr is drained into the log and
/// never parsed for protocol data.
pub struct StdioProvider {
    name: String,
    command: Vec<String>,
    env: HashMap<String, String>,
    state: StdMutex<ProviderState>,
    next_id: AtomicU64,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<BufReader<ChildStdout>>>,
    child: Mutex<Option<Child>>,
    stderr_task: StdMutex<Option<JoinHandle<()>>>,
}

impl StdioProvider {
    pub fn new(
        name: impl Into<String>,
        command: Vec<String>,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            env,
            state: StdMutex::new(ProviderState::Disconnected),
            next_id: AtomicU64::new(1),
            stdin: Mutex::new(None),
            stdout: Mutex::new(None),
            child: Mutex::new(None),
            stderr_task: StdMutex::new(None),
        }
    }

    fn transition(
        &self,
        from: ProviderState,
        to: ProviderState,
        operation: &'static str,
    ) -> Result<(), McpError> {
        let mut state = self.state.lock().expect("state lock poisoned");
        if *state != from {
            return Err(McpError::InvalidState {
                provider: self.name.clone(),
                operation,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        let state = *self.state.lock().expect("state lock poisoned");
        if state != ProviderState::Ready {
            return Err(McpError::NotReady {
                provider: self.name.clone(),
                state,
            });
        }
        Ok(())
    }

    async fn write_line(&self, mut line: String) -> Result<(), McpError> {
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin
            .as_mut()
            .ok_or_else(|| McpError::Transport("stdin closed".into()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send a request and wait for the response with the matching id.
    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        self.write_line(serde_json::to_string(&request)?).await?;

        let response = match timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.read_response(id))
                .await
                .map_err(|_| {
                    McpError::Transport(format!("no response to {method} within {deadline:?}"))
                })??,
            None => self.read_response(id).await?,
        };

        response.into_result()
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        self.write_line(serde_json::to_string(&notification)?).await
    }

    /// Read stdout lines until a JSON-RPC response with the expected id
    /// appears. Other messages and non-protocol lines are skipped.
    async fn read_response(&self, expected_id: u64) -> Result<JsonRpcResponse, McpError> {
        let mut stdout = self.stdout.lock().await;
        let stdout = stdout
            .as_mut()
            .ok_or_else(|| McpError::Transport("stdout closed".into()))?;
        let mut buf = String::new();
        loop {
            buf.clear();
            let n = stdout.read_line(&mut buf).await?;
            if n == 0 {
                return Err(McpError::Transport("provider closed stdout".into()));
            }
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == Some(expected_id) => return Ok(resp),
                Ok(resp) => {
                    debug!(
                        provider = %self.name,
                        id = ?resp.id,
                        "skipping non-matching JSON-RPC message"
                    );
                }
                Err(_) => {
                    debug!(
                        provider = %self.name,
                        line = trimmed,
                        "ignoring non-protocol line from provider"
                    );
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ProviderClient for StdioProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn state(&self) -> ProviderState {
        *self.state.lock().expect("state lock poisoned")
    }

    async fn connect(&self) -> Result<(), McpError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| McpError::SpawnFailed("empty command".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        // Clear inherited environment to prevent secret leakage, then inject
        // only essential system variables and explicitly configured env vars.
        cmd.env_clear();
        for key in &["PATH", "HOME", "USER", "LANG", "TERM"] {
            if let Ok(val) = std::env::var(key) {
                cmd.env(key, val);
            }
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::SpawnFailed(format!("failed to spawn '{program}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::SpawnFailed("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::SpawnFailed("failed to capture stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::SpawnFailed("failed to capture stderr".into()))?;

        // Drain stderr into the log so a chatty provider cannot fill the pipe.
        let provider = self.name.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(provider = %provider, line = %line, "provider stderr");
            }
        });

        self.transition(
            ProviderState::Disconnected,
            ProviderState::Connected,
            "connect",
        )?;
        *self.stdin.lock().await = Some(stdin);
        *self.stdout.lock().await = Some(BufReader::new(stdout));
        *self.child.lock().await = Some(child);
        *self.stderr_task.lock().expect("stderr task lock poisoned") = Some(stderr_task);

        debug!(provider = %self.name, "subprocess spawned");
        Ok(())
    }

    async fn initialize(&self) -> Result<(), McpError> {
        {
            let state = *self.state.lock().expect("state lock poisoned");
            if state != ProviderState::Connected {
                return Err(McpError::InvalidState {
                    provider: self.name.clone(),
                    operation: "initialize",
                    state,
                });
            }
        }

        let params = InitializeParams::current();
        let response = self
            .send_request(
                "initialize",
                Some(serde_json::to_value(&params)?),
                Some(HANDSHAKE_TIMEOUT),
            )
            .await?;
        debug!(provider = %self.name, response = %response, "provider initialized");

        // The no-reply initialized notification must precede any other call.
        self.send_notification("notifications/initialized", None)
            .await?;

        self.transition(ProviderState::Connected, ProviderState::Ready, "initialize")
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.ensure_ready()?;
        let result = self
            .send_request("tools/list", None, Some(HANDSHAKE_TIMEOUT))
            .await?;

        let tools_value = result
            .get("tools")
            .cloned()
            .unwrap_or(serde_json::Value::Array(vec![]));

        serde_json::from_value(tools_value)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools list: {e}")))
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        self.ensure_ready()?;
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let result = self
            .send_request("tools/call", Some(serde_json::to_value(&params)?), None)
            .await?;

        // Tolerate providers that return something other than the structured
        // content-array form.
        Ok(serde_json::from_value(result).unwrap_or_default())
    }

    async fn close(&self) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state == ProviderState::Closed {
                return;
            }
            *state = ProviderState::Closed;
        }

        // Dropping stdin delivers EOF, the polite termination request.
        self.stdin.lock().await.take();
        self.stdout.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                Ok(_) => debug!(provider = %self.name, "subprocess exited"),
                Err(_) => {
                    debug!(provider = %self.name, "grace period expired, killing subprocess");
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
        }

        let task = self
            .stderr_task
            .lock()
            .expect("stderr task lock poisoned")
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}
