use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use straylight_core::config::{ProviderConfig, TransportKind};
use straylight_core::error::ProviderError;

use crate::registry::ToolRegistry;
use crate::router::ToolRouter;
use crate::{HttpProvider, McpError, ProviderClient, ProviderState, StdioProvider};

/// Owns every provider connection as one scoped resource: connect all, build
/// the registry, and guarantee close-all on the way out. Typically opened
/// once per process lifetime.
pub struct Orchestrator {
    providers: Vec<Arc<dyn ProviderClient>>,
    registry: Arc<ToolRegistry>,
    router: Arc<ToolRouter>,
    startup_failures: Vec<ProviderError>,
}

impl Orchestrator {
    /// Connect and initialize every configured provider in parallel, then
    /// build the merged catalog. A provider that fails to connect or
    /// complete the handshake is logged, closed, and skipped; startup of the
    /// others always proceeds.
    pub async fn connect(configs: &[ProviderConfig]) -> Self {
        let mut providers: Vec<Arc<dyn ProviderClient>> = Vec::new();
        let mut timeouts = HashMap::new();

        for config in configs {
            match build_provider(config) {
                Ok(provider) => {
                    timeouts.insert(
                        config.name.clone(),
                        Duration::from_secs(config.tool_timeout_secs),
                    );
                    providers.push(provider);
                }
                Err(e) => {
                    warn!(
                        provider = %config.name,
                        error = %e,
                        "skipping misconfigured provider"
                    );
                }
            }
        }

        Self::start(providers, timeouts).await
    }

    pub(crate) async fn start(
        providers: Vec<Arc<dyn ProviderClient>>,
        timeouts: HashMap<String, Duration>,
    ) -> Self {
        let results = join_all(providers.iter().map(|provider| async move {
            provider.connect().await.map_err(|e| ProviderError::Connect {
                provider: provider.name().to_string(),
                reason: e.to_string(),
            })?;
            provider
                .initialize()
                .await
                .map_err(|e| ProviderError::Handshake {
                    provider: provider.name().to_string(),
                    reason: e.to_string(),
                })
        }))
        .await;

        let mut startup_failures = Vec::new();
        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(()) => {
                    info!(
                        provider = %provider.name(),
                        kind = %provider.kind(),
                        "provider ready"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "provider failed to start, continuing without it");
                    provider.close().await;
                    startup_failures.push(e);
                }
            }
        }

        let registry = Arc::new(ToolRegistry::build(&providers).await);
        let router = Arc::new(ToolRouter::new(
            registry.clone(),
            providers.clone(),
            timeouts,
        ));

        Self {
            providers,
            registry,
            router,
            startup_failures,
        }
    }

    /// Run `f` against a connected orchestrator and close every provider on
    /// the way out, on every exit path.
    pub async fn scope<T, F, Fut>(configs: &[ProviderConfig], f: F) -> T
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = T>,
    {
        let orchestrator = Arc::new(Self::connect(configs).await);
        let output = f(orchestrator.clone()).await;
        orchestrator.shutdown().await;
        output
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// The tool broker handed to the agent loop.
    pub fn broker(&self) -> Arc<ToolRouter> {
        self.router.clone()
    }

    /// Providers that failed to connect or complete the handshake during
    /// scope entry. Degradation is silent toward users; this is for logs and
    /// health reporting.
    pub fn startup_failures(&self) -> &[ProviderError] {
        &self.startup_failures
    }

    pub fn provider_states(&self) -> Vec<(String, ProviderState)> {
        self.providers
            .iter()
            .map(|p| (p.name().to_string(), p.state()))
            .collect()
    }

    /// Close every provider. Safe to call more than once.
    pub async fn shutdown(&self) {
        join_all(self.providers.iter().map(|p| p.close())).await;
        info!("all providers closed");
    }
}

fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn ProviderClient>, McpError> {
    match config.transport {
        TransportKind::Stdio => {
            let command = config.command.clone().unwrap_or_default();
            if command.is_empty() {
                return Err(McpError::SpawnFailed(format!(
                    "stdio provider '{}' has no command",
                    config.name
                )));
            }
            Ok(Arc::new(StdioProvider::new(
                &config.name,
                command,
                config.env.clone(),
            )))
        }
        TransportKind::Http => {
            let url = config
                .url
                .clone()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    McpError::Transport(format!("http provider '{}' has no url", config.name))
                })?;
            let auth_token = match &config.auth_token_env {
                Some(var) => Some(std::env::var(var).map_err(|_| {
                    McpError::Transport(format!(
                        "http provider '{}' auth env var {var} is not set",
                        config.name
                    ))
                })?),
                None => None,
            };
            Ok(Arc::new(HttpProvider::new(&config.name, url, auth_token)))
        }
    }
}
