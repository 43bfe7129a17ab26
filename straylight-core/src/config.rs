use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level straylight configuration loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StraylightConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// Tool providers, in connection order. Order matters: when two providers
    /// expose a tool with the same name, the later one wins the route.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
        }
    }
}

fn default_instance_id() -> String {
    "straylight".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryConfig {
    pub service_name: Option<String>,
    pub otlp_endpoint: Option<String>,
}

/// Model-completion collaborator configuration (OpenAI-compatible providers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Env var holding the API key. Defaults per provider when absent.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".into(),
            model: "mock".into(),
            base_url: None,
            api_key_env: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Iteration cap for the tool-use loop. The cap'th completion is always
    /// issued with tools disabled so a turn cannot loop indefinitely.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_max_iterations() -> u32 {
    10
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. When a tool can answer the question, call it \
     instead of describing your intention. Only answer once you have all the \
     information you need."
        .into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".into()
}

/// One configured tool provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub name: String,
    pub transport: TransportKind,
    /// Stdio transport: command and arguments to spawn.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    /// Extra environment variables for the spawned process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// HTTP transport: the single endpoint URL.
    #[serde(default)]
    pub url: Option<String>,
    /// HTTP transport: env var holding the bearer token.
    #[serde(default)]
    pub auth_token_env: Option<String>,
    /// Per-call deadline for this provider's tools, in seconds.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_tool_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Stdio,
    Http,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Load and parse a config file.
pub fn load_config(path: &Path) -> Result<StraylightConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Validate cross-field constraints the TOML schema cannot express.
pub fn validate_config(config: &StraylightConfig) -> Result<(), ConfigError> {
    if config.agent.max_iterations == 0 {
        return Err(ConfigError::Invalid(
            "agent.max_iterations must be at least 1".into(),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for provider in &config.providers {
        if provider.name.trim().is_empty() {
            return Err(ConfigError::Invalid("provider name must not be empty".into()));
        }
        if !seen.insert(provider.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate provider name '{}'",
                provider.name
            )));
        }
        match provider.transport {
            TransportKind::Stdio => {
                let has_command = provider
                    .command
                    .as_ref()
                    .is_some_and(|cmd| !cmd.is_empty());
                if !has_command {
                    return Err(ConfigError::Invalid(format!(
                        "stdio provider '{}' requires a non-empty command",
                        provider.name
                    )));
                }
            }
            TransportKind::Http => {
                if provider.url.as_deref().unwrap_or("").is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "http provider '{}' requires a url",
                        provider.name
                    )));
                }
            }
        }
        if provider.tool_timeout_secs == 0 {
            return Err(ConfigError::Invalid(format!(
                "provider '{}' tool_timeout_secs must be at least 1",
                provider.name
            )));
        }
    }

    Ok(())
}
