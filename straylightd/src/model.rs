use std::sync::Arc;

use anyhow::{anyhow, Result};
use rig::client::CompletionClient;

use straylight_agent::llm::{ModelClient, ModelResponse, RigModelClient};
use straylight_core::config::ModelConfig;
use straylight_core::error::StraylightError;

/// Build the model-completion client from config. Unknown providers are
/// treated as OpenAI-compatible and require a base_url.
pub fn build_model_client(config: &ModelConfig) -> Result<Arc<dyn ModelClient>> {
    if config.provider == "mock" {
        return Ok(Arc::new(EchoModelClient));
    }

    let env_var = config
        .api_key_env
        .clone()
        .unwrap_or_else(|| default_api_key_env(&config.provider));
    let key = std::env::var(&env_var).map_err(|_| {
        anyhow!("{env_var} is required when using model provider '{}'", config.provider)
    })?;

    let base_url = config
        .base_url
        .as_deref()
        .or_else(|| default_base_url(&config.provider));

    let client = match base_url {
        Some(url) => rig::providers::openai::Client::from_url(&key, url),
        None if config.provider == "openai" => rig::providers::openai::Client::new(&key),
        None => {
            return Err(anyhow!(
                "model provider '{}' requires a base_url in config",
                config.provider
            ));
        }
    };

    Ok(Arc::new(RigModelClient::new(
        client.completion_model(&config.model),
    )))
}

fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "mistral" => Some("https://api.mistral.ai/v1"),
        "xai" => Some("https://api.x.ai/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        _ => None,
    }
}

fn default_api_key_env(provider: &str) -> String {
    match provider {
        "openai" => "OPENAI_API_KEY".into(),
        "openrouter" => "OPENROUTER_API_KEY".into(),
        "groq" => "GROQ_API_KEY".into(),
        "mistral" => "MISTRAL_API_KEY".into(),
        "xai" => "XAI_API_KEY".into(),
        other => format!("{}_API_KEY", other.to_ascii_uppercase()),
    }
}

/// Smoke-test client: echoes the latest user message back, never calls tools.
struct EchoModelClient;

#[async_trait::async_trait]
impl ModelClient for EchoModelClient {
    async fn complete(
        &self,
        _system_prompt: &str,
        messages: Vec<rig::completion::Message>,
        _tool_definitions: Vec<rig::completion::ToolDefinition>,
    ) -> Result<ModelResponse, StraylightError> {
        let fallback = messages
            .iter()
            .rev()
            .find_map(|msg| match msg {
                rig::completion::Message::User { content } => content.iter().find_map(|part| {
                    if let rig::message::UserContent::Text(text) = part {
                        Some(text.text.clone())
                    } else {
                        None
                    }
                }),
                _ => None,
            })
            .unwrap_or_else(|| "No message provided.".to_string());

        Ok(ModelResponse {
            text: Some(format!("Echo: {fallback}")),
            tool_calls: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_env_vars_cover_known_providers() {
        assert_eq!(default_api_key_env("openai"), "OPENAI_API_KEY");
        assert_eq!(default_api_key_env("openrouter"), "OPENROUTER_API_KEY");
        assert_eq!(default_api_key_env("custom"), "CUSTOM_API_KEY");
    }

    #[test]
    fn mock_provider_needs_no_credentials() {
        let config = ModelConfig::default();
        assert!(build_model_client(&config).is_ok());
    }

    #[tokio::test]
    async fn echo_client_repeats_latest_user_message() {
        let client = EchoModelClient;
        let response = client
            .complete(
                "",
                vec![rig::completion::Message::user("ping")],
                vec![],
            )
            .await
            .unwrap();
        assert_eq!(response.text.as_deref(), Some("Echo: ping"));
        assert!(response.tool_calls.is_empty());
    }
}
