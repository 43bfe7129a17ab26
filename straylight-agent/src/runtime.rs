//! The bounded agent loop: model completions alternating with tool execution
//! until a final answer emerges.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use straylight_core::error::StraylightError;
use straylight_core::tool::{ToolBroker, ToolCall, ToolOutput, ToolResult};

use crate::conversation::{ChatMessage, ConversationContext, TruncationStrategy};
use crate::llm::ModelClient;
use crate::session::{InMemorySessionStore, SessionId};

/// Appended to the final answer when at least one tool ran, so downstream
/// consumers can tell tool-augmented answers apart.
pub const TOOL_USE_MARKER: &str = "\n\n\u{2713} tools used";

/// Sent once when the model returns neither text nor calls.
pub const FINALIZE_PROMPT: &str =
    "Based on all the information gathered above, provide a complete answer now.";

const DEFAULT_TOKEN_BUDGET: u32 = 128_000;

/// Non-system messages kept per session before the history is reset.
const MAX_SESSION_HISTORY: usize = 50;

#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Completion cap per turn. The cap'th completion is always issued with
    /// tools withheld, so a turn ends with a tool-free answer instead of
    /// looping indefinitely.
    pub max_iterations: u32,
    pub system_prompt: String,
}

impl AgentOptions {
    pub fn new(max_iterations: u32, system_prompt: impl Into<String>) -> Self {
        Self {
            max_iterations,
            system_prompt: system_prompt.into(),
        }
    }
}

/// What one turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub text: String,
    pub tool_calls: u32,
    pub tools_used: bool,
    pub iterations: u32,
}

/// Drives one conversation turn to completion against the model and the tool
/// broker. Each instance is cheap; many may run concurrently, one per
/// session, each internally sequential across its own iterations.
pub struct AgentRuntime {
    model: Arc<dyn ModelClient>,
    broker: Arc<dyn ToolBroker>,
    options: AgentOptions,
}

impl AgentRuntime {
    pub fn new(model: Arc<dyn ModelClient>, broker: Arc<dyn ToolBroker>, options: AgentOptions) -> Self {
        Self {
            model,
            broker,
            options,
        }
    }

    /// Run the loop over a caller-owned conversation. Tool failures are
    /// absorbed into error payloads the model can react to; only a failed
    /// model completion aborts the turn.
    pub async fn run(
        &self,
        conversation: &mut ConversationContext,
    ) -> Result<TurnOutcome, StraylightError> {
        let system_prompt = conversation
            .system_prompt()
            .unwrap_or_else(|| self.options.system_prompt.clone());

        let catalog = self.broker.list_tools().await;
        let tool_defs: Vec<rig::completion::ToolDefinition> = catalog
            .iter()
            .map(|d| rig::completion::ToolDefinition {
                name: d.name.clone(),
                description: d.description.clone(),
                parameters: d.input_schema.clone(),
            })
            .collect();

        let cap = self.options.max_iterations.max(1);
        let mut iteration: u32 = 0;
        let mut tools_used = false;
        let mut total_tool_calls: u32 = 0;

        let final_text = loop {
            iteration += 1;
            // Termination guarantee: on the cap'th completion the catalog is
            // withheld regardless of history.
            let tools_active = iteration < cap && !tool_defs.is_empty();

            debug!(iteration, cap, tools_active, "requesting completion");
            conversation.maybe_truncate();

            let definitions = if tools_active {
                tool_defs.clone()
            } else {
                Vec::new()
            };
            let response = self
                .model
                .complete(&system_prompt, conversation.to_rig_messages(), definitions)
                .await?;

            if response.tool_calls.is_empty() || !tools_active {
                if !response.tool_calls.is_empty() {
                    warn!(
                        requested = response.tool_calls.len(),
                        "model requested calls while tools were withheld, ignoring"
                    );
                }
                match response.text {
                    Some(text) if !text.trim().is_empty() => break text,
                    _ => {
                        debug!("empty completion, nudging for a final answer");
                        conversation.add_message(ChatMessage::user(FINALIZE_PROMPT));
                        let last = self
                            .model
                            .complete(&system_prompt, conversation.to_rig_messages(), Vec::new())
                            .await?;
                        break last.text.unwrap_or_default();
                    }
                }
            }

            tools_used = true;
            total_tool_calls += response.tool_calls.len() as u32;
            conversation.add_message(ChatMessage::assistant_tool_calls(
                response.tool_calls.clone(),
            ));

            // Calls from one iteration run concurrently; results come back
            // keyed by call id and are appended in call order.
            let results = join_all(
                response
                    .tool_calls
                    .iter()
                    .map(|call| self.execute_tool_call(call)),
            )
            .await;
            for result in results {
                if let ToolOutput::Error(err) = &result.output {
                    warn!(call_id = %result.call_id, error = %err, "tool call failed");
                }
                conversation.add_message(ChatMessage::tool_result(result));
            }
        };

        conversation.add_message(ChatMessage::assistant_text(final_text.clone()));

        info!(iterations = iteration, tool_calls = total_tool_calls, "turn completed");
        let text = if tools_used {
            format!("{final_text}{TOOL_USE_MARKER}")
        } else {
            final_text
        };
        Ok(TurnOutcome {
            text,
            tool_calls: total_tool_calls,
            tools_used,
            iterations: iteration,
        })
    }

    /// Run one turn against persistent session history.
    pub async fn execute_turn(
        &self,
        store: &InMemorySessionStore,
        session_id: SessionId,
        user_message: impl Into<String>,
    ) -> Result<TurnOutcome, StraylightError> {
        let default_conversation = {
            let mut conversation =
                ConversationContext::new(DEFAULT_TOKEN_BUDGET, TruncationStrategy::default());
            conversation.add_message(ChatMessage::system(&self.options.system_prompt));
            conversation
        };

        let session = store.load_or_create(session_id, default_conversation).await;
        let mut conversation = session.conversation;
        if conversation.clear_if_full(MAX_SESSION_HISTORY) {
            info!(session_id = %session_id, "session history reset (reached limit)");
        }
        conversation.add_message(ChatMessage::user(user_message.into()));

        let outcome = self.run(&mut conversation).await;
        store.save_conversation(session_id, conversation).await;
        outcome
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> ToolResult {
        match self.broker.call_tool(call).await {
            Ok(result) => result,
            Err(e) => ToolResult {
                call_id: call.id.clone(),
                output: ToolOutput::Error(e.to_string()),
            },
        }
    }
}
