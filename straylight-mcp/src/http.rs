use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};

use straylight_core::config::TransportKind;

use crate::protocol::*;
use crate::{McpError, ProviderClient, ProviderState};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the provider-assigned session id. Once a value is seen it
/// must be echoed on every later request to that provider.
const SESSION_HEADER: &str = "mcp-session-id";

/// Provider connection over streamable HTTP: every message is POSTed to one
/// fixed endpoint; replies arrive as plain JSON or as a server-push event
/// stream whose `data:` lines carry JSON-RPC frames.
pub struct HttpProvider {
    name: String,
    url: String,
    auth_token: Option<String>,
    state: StdMutex<ProviderState>,
    next_id: AtomicU64,
    client: StdMutex<Option<reqwest::Client>>,
    session_id: StdMutex<Option<String>>,
}

impl HttpProvider {
    pub fn new(name: impl Into<String>, url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            auth_token,
            state: StdMutex::new(ProviderState::Disconnected),
            next_id: AtomicU64::new(1),
            client: StdMutex::new(None),
            session_id: StdMutex::new(None),
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

    fn http_client(&self) -> Result<reqwest::Client, McpError> {
        self.client
            .lock()
            .expect("client lock poisoned")
            .clone()
            .ok_or_else(|| McpError::Transport("HTTP client not connected".into()))
    }

    /// POST one JSON-RPC message and decode the reply. `expected_id` is None
    /// for notifications, which yield no logical response (status 202).
    async fn post(
        &self,
        body: serde_json::Value,
        expected_id: Option<u64>,
        timeout: Option<Duration>,
    ) -> Result<Option<JsonRpcResponse>, McpError> {
        let client = self.http_client()?;

        let mut request = client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        let session = self
            .session_id
            .lock()
            .expect("session lock poisoned")
            .clone();
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }

        let send = request.send();
        let response = match timeout {
            Some(deadline) => tokio::time::timeout(deadline, send)
                .await
                .map_err(|_| McpError::Transport(format!("no response within {deadline:?}")))?,
            None => send.await,
        }
        .map_err(|e| McpError::Transport(e.to_string()))?;

        // Session affinity: remember the server-assigned session id so every
        // later request carries it.
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            debug!(provider = %self.name, session_id = %session, "session id received");
            *self.session_id.lock().expect("session lock poisoned") = Some(session.to_string());
        }

        let status = response.status();
        if status.as_u16() == 202 {
            // Notification accepted, no body.
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let text = response
            .text()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        if !status.is_success() {
            // Hard transport failure, never silently retried.
            return Err(McpError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        if content_type.contains("text/event-stream") {
            let frame = parse_sse_body(&text, expected_id).ok_or_else(|| {
                McpError::Protocol("event stream contained no response frame".into())
            })?;
            return Ok(Some(frame));
        }

        if text.trim().is_empty() {
            return Ok(None);
        }

        let frame: JsonRpcResponse = serde_json::from_str(&text)?;
        if expected_id.is_some() && frame.id != expected_id {
            return Err(McpError::Protocol(format!(
                "mismatched response id: expected {expected_id:?}, got {:?}",
                frame.id
            )));
        }
        Ok(Some(frame))
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let frame = self
            .post(serde_json::to_value(&request)?, Some(id), timeout)
            .await?
            .ok_or_else(|| McpError::Protocol(format!("no response body for {method}")))?;
        frame.into_result()
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        self.post(serde_json::to_value(&notification)?, None, Some(HANDSHAKE_TIMEOUT))
            .await?;
        Ok(())
    }
}

/// Extract the one logical response from an event-stream body: scan `data:`
/// lines for JSON-RPC objects (or batched arrays) and return the first frame
/// carrying a result or error for the expected id.
pub(crate) fn parse_sse_body(body: &str, expected_id: Option<u64>) -> Option<JsonRpcResponse> {
    let frame_matches = |frame: &JsonRpcResponse| {
        (frame.result.is_some() || frame.error.is_some())
            && (expected_id.is_none() || frame.id == expected_id)
    };

    for line in body.lines() {
        let line = line.trim();
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }

        match serde_json::from_str::<serde_json::Value>(data) {
            Ok(serde_json::Value::Array(items)) => {
                for item in items {
                    if let Ok(frame) = serde_json::from_value::<JsonRpcResponse>(item) {
                        if frame_matches(&frame) {
                            return Some(frame);
                        }
                    }
                }
            }
            Ok(value) => {
                if let Ok(frame) = serde_json::from_value::<JsonRpcResponse>(value) {
                    if frame_matches(&frame) {
                        return Some(frame);
                    }
                }
            }
            Err(_) => {
                warn!(data = %data, "failed to parse event-stream data line");
            }
        }
    }

    None
}

#[async_trait::async_trait]
impl ProviderClient for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn state(&self) -> ProviderState {
        *self.state.lock().expect("state lock poisoned")
    }

    async fn connect(&self) -> Result<(), McpError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| McpError::Transport(e.to_string()))?;
        self.transition(
            ProviderState::Disconnected,
            ProviderState::Connected,
            "connect",
        )?;
        *self.client.lock().expect("client lock poisoned") = Some(client);
        debug!(provider = %self.name, url = %self.url, "HTTP client created");
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

        self.send_notification("notifications/initialized", None)
            .await?;

        self.transition(ProviderState::Connected, ProviderState::Ready, "initialize")
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.ensure_ready()?;
        let result = self
            .send_request(
                "tools/list",
                Some(serde_json::json!({})),
                Some(HANDSHAKE_TIMEOUT),
            )
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

        Ok(serde_json::from_value(result).unwrap_or_default())
    }

    async fn close(&self) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if *state == ProviderState::Closed {
            return;
        }
        *state = ProviderState::Closed;
        drop(state);

        *self.client.lock().expect("client lock poisoned") = None;
        *self.session_id.lock().expect("session lock poisoned") = None;
        debug!(provider = %self.name, "HTTP client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_object_frame_is_extracted() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[]}}\n\n";
        let frame = parse_sse_body(body, Some(1)).expect("frame");
        assert_eq!(frame.id, Some(1));
        assert!(frame.result.is_some());
    }

    #[test]
    fn sse_batched_array_frame_is_extracted() {
        let body = "data: [{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":\"ok\"}]\n";
        let frame = parse_sse_body(body, Some(7)).expect("frame");
        assert_eq!(frame.result, Some(serde_json::json!("ok")));
    }

    #[test]
    fn sse_skips_frames_for_other_ids() {
        let body = concat!(
            "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":\"stale\"}\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":\"fresh\"}\n",
        );
        let frame = parse_sse_body(body, Some(2)).expect("frame");
        assert_eq!(frame.result, Some(serde_json::json!("fresh")));
    }

    #[test]
    fn sse_takes_first_matching_frame_only() {
        // One call yields exactly one logical result even if the stream
        // carries several frames.
        let body = concat!(
            "data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":\"first\"}\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":\"second\"}\n",
        );
        let frame = parse_sse_body(body, Some(3)).expect("frame");
        assert_eq!(frame.result, Some(serde_json::json!("first")));
    }

    #[test]
    fn sse_ignores_garbage_and_non_data_lines() {
        let body = concat!(
            ": comment\n",
            "event: message\n",
            "data: not-json\n",
            "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n",
            "data: {\"jsonrpc\":\"2.0\",\"id\":4,\"error\":{\"code\":-1,\"message\":\"bad\"}}\n",
        );
        let frame = parse_sse_body(body, Some(4)).expect("frame");
        assert!(frame.error.is_some());
    }

    #[test]
    fn sse_without_response_frame_is_none() {
        assert!(parse_sse_body("data: {\"jsonrpc\":\"2.0\",\"method\":\"x\"}\n", Some(1)).is_none());
        assert!(parse_sse_body("", Some(1)).is_none());
    }

    #[tokio::test]
    async fn list_tools_before_handshake_fails_not_ready() {
        let p = HttpProvider::new("copilot", "http://127.0.0.1:9/mcp", None);
        let err = p.list_tools().await.unwrap_err();
        assert!(matches!(err, McpError::NotReady { .. }));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let p = HttpProvider::new("copilot", "http://127.0.0.1:9/mcp", None);
        p.connect().await.unwrap();
        p.close().await;
        p.close().await;
        assert_eq!(p.state(), ProviderState::Closed);
        let err = p.connect().await.unwrap_err();
        assert!(matches!(err, McpError::InvalidState { .. }));
    }
}
