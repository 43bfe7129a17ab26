use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StraylightError;

/// A tool exposed by a connected provider, as seen in the merged catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// Name of the provider that owns this tool.
    pub provider: String,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Result of executing a tool call, matched back by call id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub output: ToolOutput,
}

/// Expected, recoverable tool outcomes are values, not exceptions: a failed
/// call becomes an `Error` payload fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToolOutput {
    Text(String),
    Error(String),
}

impl ToolOutput {
    pub fn as_feedback(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Error(message) => format!("Error: {message}"),
        }
    }
}

/// The agent loop's view of the tool layer: a read-only catalog and a
/// dispatch operation.
#[async_trait]
pub trait ToolBroker: Send + Sync {
    /// The merged catalog across all ready providers.
    async fn list_tools(&self) -> Vec<ToolDescriptor>;

    /// Route a call to its owning provider and normalize the result.
    async fn call_tool(&self, call: &ToolCall) -> Result<ToolResult, StraylightError>;
}
