//! Shared in-crate test double for the provider interface.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use straylight_core::config::TransportKind;

use crate::protocol::{CallToolResult, ContentPart, McpToolDefinition};
use crate::{McpError, ProviderClient, ProviderState};

pub(crate) enum CallBehavior {
    /// Respond with one text part naming the invoked provider and tool.
    Echo,
    Parts {
        parts: Vec<ContentPart>,
        is_error: bool,
    },
    Fail(String),
    Hang(Duration),
}

pub(crate) struct MockProvider {
    name: String,
    state: StdMutex<ProviderState>,
    tools: Vec<McpToolDefinition>,
    fail_listing: bool,
    fail_handshake: bool,
    call_behavior: CallBehavior,
    pub(crate) calls: StdMutex<Vec<String>>,
    pub(crate) close_count: AtomicU32,
}

impl MockProvider {
    pub(crate) fn ready(name: &str) -> Self {
        Self::with_state(name, ProviderState::Ready)
    }

    pub(crate) fn disconnected(name: &str) -> Self {
        Self::with_state(name, ProviderState::Disconnected)
    }

    fn with_state(name: &str, state: ProviderState) -> Self {
        Self {
            name: name.to_string(),
            state: StdMutex::new(state),
            tools: Vec::new(),
            fail_listing: false,
            fail_handshake: false,
            call_behavior: CallBehavior::Echo,
            calls: StdMutex::new(Vec::new()),
            close_count: AtomicU32::new(0),
        }
    }

    pub(crate) fn with_tools(mut self, names: &[&str]) -> Self {
        self.tools = names
            .iter()
            .map(|name| McpToolDefinition {
                name: name.to_string(),
                description: format!("mock tool {name}"),
                input_schema: serde_json::json!({"type": "object"}),
            })
            .collect();
        self
    }

    pub(crate) fn with_listing_failure(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub(crate) fn with_handshake_failure(mut self) -> Self {
        self.fail_handshake = true;
        self
    }

    pub(crate) fn with_call_parts(mut self, parts: Vec<ContentPart>, is_error: bool) -> Self {
        self.call_behavior = CallBehavior::Parts { parts, is_error };
        self
    }

    pub(crate) fn with_call_failure(mut self, message: &str) -> Self {
        self.call_behavior = CallBehavior::Fail(message.to_string());
        self
    }

    pub(crate) fn with_call_hang(mut self, duration: Duration) -> Self {
        self.call_behavior = CallBehavior::Hang(duration);
        self
    }

    pub(crate) fn text_part(text: &str) -> ContentPart {
        ContentPart {
            content_type: "text".into(),
            text: Some(text.to_string()),
            resource: None,
        }
    }
}

#[async_trait::async_trait]
impl ProviderClient for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn state(&self) -> ProviderState {
        *self.state.lock().unwrap()
    }

    async fn connect(&self) -> Result<(), McpError> {
        *self.state.lock().unwrap() = ProviderState::Connected;
        Ok(())
    }

    async fn initialize(&self) -> Result<(), McpError> {
        if self.fail_handshake {
            return Err(McpError::Protocol("handshake rejected".into()));
        }
        *self.state.lock().unwrap() = ProviderState::Ready;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        if self.fail_listing {
            return Err(McpError::Transport("listing failed".into()));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError> {
        self.calls.lock().unwrap().push(name.to_string());
        match &self.call_behavior {
            CallBehavior::Echo => Ok(CallToolResult {
                content: vec![Self::text_part(&format!("{}:{name}", self.name))],
                is_error: false,
            }),
            CallBehavior::Parts { parts, is_error } => Ok(CallToolResult {
                content: parts.clone(),
                is_error: *is_error,
            }),
            CallBehavior::Fail(message) => Err(McpError::Transport(message.clone())),
            CallBehavior::Hang(duration) => {
                tokio::time::sleep(*duration).await;
                Ok(CallToolResult::default())
            }
        }
    }

    async fn close(&self) {
        *self.state.lock().unwrap() = ProviderState::Closed;
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}
