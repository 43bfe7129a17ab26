// Re-export message types from straylight-core so downstream code has one
// import path for conversation handling.
pub use straylight_core::message::{
    estimate_tokens, ChatMessage, MessageContent, MessageRole, TruncationStrategy,
};

use straylight_core::tool::ToolOutput;

/// The accumulated conversation for one session: an append-only message log
/// with a token budget. Owned by the caller of the agent loop, not by the
/// orchestration core.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConversationContext {
    pub messages: Vec<ChatMessage>,
    pub token_budget: u32,
    pub token_used: u32,
    pub truncation_strategy: TruncationStrategy,
}

impl ConversationContext {
    pub fn new(token_budget: u32, truncation_strategy: TruncationStrategy) -> Self {
        Self {
            messages: Vec::new(),
            token_budget,
            token_used: 0,
            truncation_strategy,
        }
    }

    pub fn add_message(&mut self, msg: ChatMessage) {
        self.token_used += msg.token_estimate;
        self.messages.push(msg);
    }

    pub fn token_count(&self) -> u32 {
        self.token_used
    }

    /// Count of non-system messages, used for the session history limit.
    pub fn history_len(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .count()
    }

    /// Reset the history (keeping system messages) once it reaches `max`.
    /// Returns true when a reset happened.
    pub fn clear_if_full(&mut self, max: usize) -> bool {
        if self.history_len() < max {
            return false;
        }
        self.messages.retain(|m| m.role == MessageRole::System);
        self.recalculate_tokens();
        true
    }

    /// Apply truncation if the budget is exceeded.
    pub fn maybe_truncate(&mut self) {
        if self.token_used <= self.token_budget {
            return;
        }

        match &self.truncation_strategy {
            TruncationStrategy::SlidingWindow { keep_last } => {
                // Always keep system messages + the last N non-system messages
                let system_msgs: Vec<ChatMessage> = self
                    .messages
                    .iter()
                    .filter(|m| m.role == MessageRole::System)
                    .cloned()
                    .collect();

                let non_system: Vec<ChatMessage> = self
                    .messages
                    .iter()
                    .filter(|m| m.role != MessageRole::System)
                    .cloned()
                    .collect();

                let keep_count = (*keep_last).min(non_system.len());
                let kept: Vec<ChatMessage> = non_system[non_system.len() - keep_count..].to_vec();

                self.messages = system_msgs;
                self.messages.extend(kept);
                self.recalculate_tokens();
            }
            TruncationStrategy::Strict => {
                self.strict_truncate();
            }
        }
    }

    fn strict_truncate(&mut self) {
        // Drop oldest non-system messages until under budget
        while self.token_used > self.token_budget && self.messages.len() > 1 {
            if let Some(idx) = self
                .messages
                .iter()
                .position(|m| m.role != MessageRole::System)
            {
                let removed = self.messages.remove(idx);
                self.token_used = self.token_used.saturating_sub(removed.token_estimate);
            } else {
                break;
            }
        }
    }

    fn recalculate_tokens(&mut self) {
        self.token_used = self.messages.iter().map(|m| m.token_estimate).sum();
    }

    /// Convert the conversation to rig Message format for the model call.
    pub fn to_rig_messages(&self) -> Vec<rig::completion::Message> {
        let mut out = Vec::new();
        for msg in &self.messages {
            match (&msg.role, &msg.content) {
                (MessageRole::User, MessageContent::Text(text)) => {
                    out.push(rig::completion::Message::user(text.clone()));
                }
                (MessageRole::Assistant, MessageContent::Text(text)) => {
                    out.push(rig::completion::Message::assistant(text.clone()));
                }
                (MessageRole::Assistant, MessageContent::ToolCalls(calls)) => {
                    // Preserve a single assistant turn even when multiple tools are requested.
                    if let Ok(content) = rig::OneOrMany::many(calls.iter().map(|call| {
                        rig::message::AssistantContent::tool_call(
                            &call.id,
                            &call.name,
                            call.arguments.clone(),
                        )
                    })) {
                        out.push(rig::completion::Message::Assistant { content });
                    }
                }
                (MessageRole::Tool, MessageContent::ToolResult(result)) => {
                    let text = match &result.output {
                        ToolOutput::Text(text) => text.clone(),
                        ToolOutput::Error(err) => format!("Error: {err}"),
                    };
                    out.push(rig::completion::Message::User {
                        content: rig::OneOrMany::one(rig::message::UserContent::tool_result(
                            &result.call_id,
                            rig::OneOrMany::one(rig::message::ToolResultContent::text(text)),
                        )),
                    });
                }
                // System messages are carried via the configured system prompt,
                // not chat history.
                (MessageRole::System, _) => {}
                _ => {}
            }
        }
        out
    }

    /// The system prompt, taken from the first system message.
    pub fn system_prompt(&self) -> Option<String> {
        self.messages.iter().find_map(|m| {
            if m.role == MessageRole::System {
                if let MessageContent::Text(text) = &m.content {
                    return Some(text.clone());
                }
            }
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use straylight_core::tool::{ToolCall, ToolOutput, ToolResult};

    #[test]
    fn add_messages_tracks_tokens() {
        let mut ctx = ConversationContext::new(1000, TruncationStrategy::Strict);
        ctx.add_message(ChatMessage::system("You are a helpful assistant."));
        ctx.add_message(ChatMessage::user("Hello!"));
        assert!(ctx.token_count() > 0);
        assert_eq!(ctx.messages.len(), 2);
    }

    #[test]
    fn strict_truncation_preserves_system_messages() {
        let mut ctx = ConversationContext::new(10, TruncationStrategy::Strict);
        ctx.add_message(ChatMessage::system("sys"));
        ctx.add_message(ChatMessage::user("x".repeat(200)));
        ctx.add_message(ChatMessage::user("recent"));

        ctx.maybe_truncate();
        assert!(ctx.messages.iter().any(|m| m.role == MessageRole::System));
    }

    #[test]
    fn sliding_window_keeps_last_n() {
        let mut ctx =
            ConversationContext::new(10, TruncationStrategy::SlidingWindow { keep_last: 1 });
        ctx.add_message(ChatMessage::system("sys"));
        ctx.add_message(ChatMessage::user("old".repeat(100)));
        ctx.add_message(ChatMessage::user("new"));

        ctx.maybe_truncate();
        let non_sys: Vec<_> = ctx
            .messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();
        assert_eq!(non_sys.len(), 1);
    }

    #[test]
    fn clear_if_full_resets_history_but_keeps_system() {
        let mut ctx = ConversationContext::new(100_000, TruncationStrategy::default());
        ctx.add_message(ChatMessage::system("sys"));
        for i in 0..4 {
            ctx.add_message(ChatMessage::user(format!("message {i}")));
        }

        assert!(!ctx.clear_if_full(10));
        assert!(ctx.clear_if_full(4));
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.messages[0].role, MessageRole::System);
    }

    #[test]
    fn to_rig_messages_skips_system_role() {
        let mut ctx = ConversationContext::new(10_000, TruncationStrategy::Strict);
        ctx.add_message(ChatMessage::system("System prompt"));
        ctx.add_message(ChatMessage::user("Hello"));
        ctx.add_message(ChatMessage::assistant_text("Hi there"));

        let rig_msgs = ctx.to_rig_messages();
        assert_eq!(rig_msgs.len(), 2);
        assert_eq!(ctx.system_prompt().as_deref(), Some("System prompt"));
    }

    #[test]
    fn to_rig_messages_keeps_multi_tool_calls_in_one_assistant_message() {
        let mut ctx = ConversationContext::new(10_000, TruncationStrategy::Strict);
        ctx.add_message(ChatMessage::assistant_tool_calls(vec![
            ToolCall {
                id: "call-1".into(),
                name: "get_forecast".into(),
                arguments: serde_json::json!({}),
            },
            ToolCall {
                id: "call-2".into(),
                name: "list_tasks".into(),
                arguments: serde_json::json!({ "board": "inbox" }),
            },
        ]));

        let rig_msgs = ctx.to_rig_messages();
        assert_eq!(rig_msgs.len(), 1);
        match &rig_msgs[0] {
            rig::completion::Message::Assistant { content, .. } => assert_eq!(content.len(), 2),
            _ => panic!("expected assistant message"),
        }
    }

    #[test]
    fn tool_results_become_tool_response_messages() {
        let mut ctx = ConversationContext::new(10_000, TruncationStrategy::Strict);
        ctx.add_message(ChatMessage::assistant_tool_calls(vec![ToolCall {
            id: "call-1".into(),
            name: "get_forecast".into(),
            arguments: serde_json::json!({}),
        }]));
        ctx.add_message(ChatMessage::tool_result(ToolResult {
            call_id: "call-1".into(),
            output: ToolOutput::Text("sunny".into()),
        }));
        ctx.add_message(ChatMessage::tool_result(ToolResult {
            call_id: "call-2".into(),
            output: ToolOutput::Error("timed out".into()),
        }));

        let rig_msgs = ctx.to_rig_messages();
        assert_eq!(rig_msgs.len(), 3);
        match &rig_msgs[1] {
            rig::completion::Message::User { content } => {
                assert!(matches!(
                    content.first(),
                    rig::message::UserContent::ToolResult(_)
                ));
            }
            _ => panic!("expected tool result as user tool_result message"),
        }
    }
}
