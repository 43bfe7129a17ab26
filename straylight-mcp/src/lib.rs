mod http;
mod orchestrator;
mod protocol;
mod registry;
mod router;
mod stdio;

#[cfg(test)]
pub(crate) mod testing;

pub use http::HttpProvider;
pub use orchestrator::Orchestrator;
pub use protocol::{
    CallToolResult, ContentPart, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    McpToolDefinition, ResourceContents, PROTOCOL_VERSION,
};
pub use registry::ToolRegistry;
pub use router::ToolRouter;
pub use stdio::StdioProvider;

use async_trait::async_trait;
use straylight_core::config::TransportKind;

/// Lifecycle state of a provider connection. Transitions are monotonic:
/// Disconnected -> Connected -> Ready -> Closed, with no resurrection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProviderState {
    Disconnected,
    Connected,
    Ready,
    Closed,
}

impl std::fmt::Display for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::Ready => write!(f, "ready"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// One connection to one tool provider, behind either transport.
///
/// `list_tools` and `call_tool` are only valid in state Ready; calling them
/// earlier or after `close` fails with [`McpError::NotReady`]. `close` is
/// idempotent: a second call is a no-op, not an error.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> TransportKind;

    fn state(&self) -> ProviderState;

    /// Open the transport (spawn the subprocess / build the HTTP client).
    async fn connect(&self) -> Result<(), McpError>;

    /// Perform the initialize handshake followed by the `initialized`
    /// notification. Valid only in state Connected.
    async fn initialize(&self) -> Result<(), McpError>;

    /// Fetch this provider's tool catalog.
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError>;

    /// Invoke a tool and return the raw (un-normalized) result. The caller
    /// owns the deadline; this call itself never times out.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallToolResult, McpError>;

    /// Tear the connection down. Idempotent.
    async fn close(&self);
}

/// Transport-level errors, scoped to one provider connection.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("provider {provider} is not ready (state: {state})")]
    NotReady {
        provider: String,
        state: ProviderState,
    },

    #[error("provider {provider} cannot {operation} in state {state}")]
    InvalidState {
        provider: String,
        operation: &'static str,
        state: ProviderState,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider spawn failed: {0}")]
    SpawnFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
