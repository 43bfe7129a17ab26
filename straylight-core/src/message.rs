//! Chat message types shared by the agent loop and the daemon surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::{ToolCall, ToolResult};

pub type MessageId = uuid::Uuid;

/// Role of a message in the conversation context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Content of a chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageContent {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    ToolResult(ToolResult),
}

/// A single message in the conversation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    pub token_estimate: u32,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        let text = text.into();
        let estimate = estimate_tokens(&text);
        Self {
            id: MessageId::new_v4(),
            role: MessageRole::System,
            content: MessageContent::Text(text),
            timestamp: Utc::now(),
            token_estimate: estimate,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        let text = text.into();
        let estimate = estimate_tokens(&text);
        Self {
            id: MessageId::new_v4(),
            role: MessageRole::User,
            content: MessageContent::Text(text),
            timestamp: Utc::now(),
            token_estimate: estimate,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let estimate = estimate_tokens(&text);
        Self {
            id: MessageId::new_v4(),
            role: MessageRole::Assistant,
            content: MessageContent::Text(text),
            timestamp: Utc::now(),
            token_estimate: estimate,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        let estimate = calls.len() as u32 * 50; // rough estimate per tool call
        Self {
            id: MessageId::new_v4(),
            role: MessageRole::Assistant,
            content: MessageContent::ToolCalls(calls),
            timestamp: Utc::now(),
            token_estimate: estimate,
        }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        let estimate = estimate_tokens(&result.output.as_feedback());
        Self {
            id: MessageId::new_v4(),
            role: MessageRole::Tool,
            content: MessageContent::ToolResult(result),
            timestamp: Utc::now(),
            token_estimate: estimate,
        }
    }
}

/// Strategy for truncating conversation when the token budget is exceeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TruncationStrategy {
    /// Keep the last N messages, always preserving the system prompt.
    SlidingWindow { keep_last: usize },
    /// Hard truncation: drop oldest non-system messages when budget exceeded.
    Strict,
}

impl Default for TruncationStrategy {
    fn default() -> Self {
        Self::SlidingWindow { keep_last: 50 }
    }
}

/// Simple token estimate: ~4 chars per token.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as u32 / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolOutput, ToolResult};

    #[test]
    fn constructors_set_role_and_estimate() {
        let msg = ChatMessage::user("What changed in the last release?");
        assert_eq!(msg.role, MessageRole::User);
        assert!(msg.token_estimate > 0);

        let msg = ChatMessage::tool_result(ToolResult {
            call_id: "call-1".into(),
            output: ToolOutput::Error("timed out".into()),
        });
        assert_eq!(msg.role, MessageRole::Tool);
    }

    #[test]
    fn estimate_is_never_zero() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }
}
