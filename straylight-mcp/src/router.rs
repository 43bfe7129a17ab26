use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use straylight_core::error::{StraylightError, ToolError};
use straylight_core::tool::{ToolBroker, ToolCall, ToolDescriptor, ToolOutput, ToolResult};

use crate::protocol::ContentPart;
use crate::registry::ToolRegistry;
use crate::{ProviderClient, ProviderState};

pub(crate) const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Routes tool calls to their owning provider, enforces the per-call
/// deadline, and normalizes results. No retries happen at this layer.
pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
    providers: HashMap<String, Arc<dyn ProviderClient>>,
    timeouts: HashMap<String, Duration>,
}

impl ToolRouter {
    pub fn new(
        registry: Arc<ToolRegistry>,
        providers: Vec<Arc<dyn ProviderClient>>,
        timeouts: HashMap<String, Duration>,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        Self {
            registry,
            providers,
            timeouts,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Resolve and execute one call. Deadline expiry abandons the in-flight
    /// request and yields a timeout error; the connection itself stays up.
    pub async fn dispatch(&self, call: &ToolCall) -> Result<ToolResult, StraylightError> {
        let provider_name =
            self.registry
                .provider_for(&call.name)
                .ok_or_else(|| ToolError::Unknown {
                    name: call.name.clone(),
                })?;

        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| ToolError::ProviderUnavailable {
                name: call.name.clone(),
                provider: provider_name.to_string(),
            })?;
        if provider.state() != ProviderState::Ready {
            return Err(ToolError::ProviderUnavailable {
                name: call.name.clone(),
                provider: provider_name.to_string(),
            }
            .into());
        }

        let deadline = self
            .timeouts
            .get(provider_name)
            .copied()
            .unwrap_or(DEFAULT_TOOL_TIMEOUT);

        debug!(
            tool = %call.name,
            provider = %provider_name,
            deadline = ?deadline,
            "dispatching tool call"
        );

        let raw = tokio::time::timeout(
            deadline,
            provider.call_tool(&call.name, call.arguments.clone()),
        )
        .await
        .map_err(|_| {
            warn!(tool = %call.name, provider = %provider_name, "tool call timed out");
            ToolError::Timeout {
                name: call.name.clone(),
                elapsed: deadline,
            }
        })?
        .map_err(|e| ToolError::Execution {
            name: call.name.clone(),
            message: e.to_string(),
        })?;

        let text = flatten_content(&raw.content);
        if raw.is_error {
            return Err(ToolError::Execution {
                name: call.name.clone(),
                message: text,
            }
            .into());
        }

        Ok(ToolResult {
            call_id: call.id.clone(),
            output: ToolOutput::Text(text),
        })
    }
}

/// Concatenate a result's textual parts, in order, into one payload. Text
/// parts contribute their text, embedded resources their inline text;
/// anything without a text representation is dropped.
fn flatten_content(parts: &[ContentPart]) -> String {
    let mut out = String::new();
    for part in parts {
        match part.content_type.as_str() {
            "text" => {
                if let Some(text) = &part.text {
                    out.push_str(text);
                }
            }
            "resource" => {
                if let Some(text) = part.resource.as_ref().and_then(|r| r.text.as_deref()) {
                    out.push_str(text);
                }
            }
            other => {
                debug!(part_type = %other, "dropping non-textual content part");
            }
        }
    }
    out
}

#[async_trait]
impl ToolBroker for ToolRouter {
    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.registry.catalog().to_vec()
    }

    async fn call_tool(&self, call: &ToolCall) -> Result<ToolResult, StraylightError> {
        self.dispatch(call).await
    }
}
