use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StraylightError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Startup-time failures. These degrade a single provider and must never
/// abort the startup of the others.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider {provider} failed to connect: {reason}")]
    Connect { provider: String, reason: String },

    #[error("provider {provider} handshake failed: {reason}")]
    Handshake { provider: String, reason: String },
}

/// Call-time failures. Always recovered into a tool-error payload the model
/// can see; never fatal to a turn.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {name}")]
    Unknown { name: String },

    #[error("provider {provider} unavailable for tool {name}")]
    ProviderUnavailable { name: String, provider: String },

    #[error("tool {name} timed out after {elapsed:?}")]
    Timeout { name: String, elapsed: Duration },

    #[error("tool {name} execution failed: {message}")]
    Execution { name: String, message: String },
}

/// Fatal to the whole turn. The caller gets one generic failure, no partial
/// answer.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model completion failed: {reason}")]
    CompletionFailed { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_errors_format_with_context() {
        let err = ToolError::Unknown {
            name: "get_weather".into(),
        };
        assert_eq!(err.to_string(), "unknown tool: get_weather");

        let err = ToolError::ProviderUnavailable {
            name: "get_weather".into(),
            provider: "weather".into(),
        };
        assert_eq!(
            err.to_string(),
            "provider weather unavailable for tool get_weather"
        );
    }

    #[test]
    fn errors_convert_into_top_level() {
        let err: StraylightError = ToolError::Execution {
            name: "rag_query".into(),
            message: "index unavailable".into(),
        }
        .into();
        assert!(matches!(err, StraylightError::Tool(_)));

        let err: StraylightError = ModelError::CompletionFailed {
            reason: "upstream 503".into(),
        }
        .into();
        assert!(err.to_string().contains("upstream 503"));
    }
}
