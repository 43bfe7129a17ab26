use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use straylight_core::error::{ModelError, StraylightError};
use straylight_core::tool::ToolCall;

/// A model completion response the agent loop works with: text, requested
/// calls, or both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Abstraction over the model-completion collaborator. Decouples the agent
/// loop from any specific provider: it sends the conversation plus an
/// optional catalog and gets back text and/or requested calls.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Perform one completion. An empty `tool_definitions` means tools are
    /// withheld for this call.
    async fn complete(
        &self,
        system_prompt: &str,
        messages: Vec<rig::completion::Message>,
        tool_definitions: Vec<rig::completion::ToolDefinition>,
    ) -> Result<ModelResponse, StraylightError>;
}

/// A ModelClient backed by a rig CompletionModel.
pub struct RigModelClient<M: rig::completion::CompletionModel> {
    model: M,
}

impl<M: rig::completion::CompletionModel> RigModelClient<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<M> ModelClient for RigModelClient<M>
where
    M: rig::completion::CompletionModel + Send + Sync + 'static,
    M::Response: Send + Sync,
{
    async fn complete(
        &self,
        _system_prompt: &str,
        messages: Vec<rig::completion::Message>,
        tool_definitions: Vec<rig::completion::ToolDefinition>,
    ) -> Result<ModelResponse, StraylightError> {
        let (current_prompt, chat_history) = split_prompt_and_history(messages);

        let request = self
            .model
            .completion_request(current_prompt)
            .messages(chat_history)
            .tools(tool_definitions)
            .build();

        let response = self.model.completion(request).await.map_err(|e| {
            StraylightError::Model(ModelError::CompletionFailed {
                reason: e.to_string(),
            })
        })?;

        let mut text = None;
        let mut tool_calls = Vec::new();
        for content in response.choice.iter() {
            match content {
                rig::message::AssistantContent::Text(t) => {
                    text = Some(t.text.clone());
                }
                rig::message::AssistantContent::ToolCall(tc) => {
                    tool_calls.push(ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments: tc.function.arguments.clone(),
                    });
                }
                _ => {} // Reasoning, images, etc. — ignored
            }
        }

        Ok(ModelResponse { text, tool_calls })
    }
}

fn split_prompt_and_history(
    messages: Vec<rig::completion::Message>,
) -> (String, Vec<rig::completion::Message>) {
    let Some(last) = messages.last() else {
        return (String::new(), vec![]);
    };

    if let Some(text) = extract_user_text(last) {
        let history = if messages.len() > 1 {
            messages[..messages.len() - 1].to_vec()
        } else {
            vec![]
        };
        return (text, history);
    }

    (String::new(), messages)
}

fn extract_user_text(message: &rig::completion::Message) -> Option<String> {
    match message {
        rig::completion::Message::User { content } => content.iter().find_map(|c| {
            if let rig::message::UserContent::Text(t) = c {
                Some(t.text.clone())
            } else {
                None
            }
        }),
        _ => None,
    }
}

/// A scripted model client for tests.
pub struct MockModelClient {
    responses: std::sync::Mutex<Vec<ModelResponse>>,
}

impl MockModelClient {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
        }
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn complete(
        &self,
        _system_prompt: &str,
        _messages: Vec<rig::completion::Message>,
        _tool_definitions: Vec<rig::completion::ToolDefinition>,
    ) -> Result<ModelResponse, StraylightError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(ModelResponse {
                text: Some("No more scripted responses".into()),
                tool_calls: vec![],
            })
        } else {
            Ok(responses.remove(0))
        }
    }
}
