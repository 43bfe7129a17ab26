use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use straylight_core::tool::ToolDescriptor;

use crate::{ProviderClient, ProviderState};

/// The merged tool catalog across all ready providers, plus the name→provider
/// routing table. Built once per orchestrator scope and read-only thereafter.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    catalog: Vec<ToolDescriptor>,
    routes: HashMap<String, String>,
}

impl ToolRegistry {
    /// Merge the catalogs of every Ready provider, in the given order. A
    /// provider whose listing fails is logged and skipped; that is normal
    /// partial degradation, never a reason to abort the others.
    pub async fn build(providers: &[Arc<dyn ProviderClient>]) -> Self {
        let mut catalog: Vec<ToolDescriptor> = Vec::new();
        let mut routes: HashMap<String, String> = HashMap::new();

        for provider in providers {
            if provider.state() != ProviderState::Ready {
                continue;
            }
            let tools = match provider.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(
                        provider = %provider.name(),
                        error = %e,
                        "failed to fetch tools, continuing without this provider"
                    );
                    continue;
                }
            };

            info!(
                provider = %provider.name(),
                tool_count = tools.len(),
                "fetched provider tools"
            );

            for tool in tools {
                if let Some(previous) = routes.insert(tool.name.clone(), provider.name().to_string())
                {
                    // Later provider wins the route; drop the superseded
                    // catalog entry so each name appears exactly once.
                    warn!(
                        tool = %tool.name,
                        previous = %previous,
                        now = %provider.name(),
                        "duplicate tool name across providers, later registration wins"
                    );
                    catalog.retain(|d| d.name != tool.name);
                }
                catalog.push(ToolDescriptor {
                    name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                    provider: provider.name().to_string(),
                });
            }
        }

        info!(total = catalog.len(), "tool catalog built");
        Self { catalog, routes }
    }

    pub fn catalog(&self) -> &[ToolDescriptor] {
        &self.catalog
    }

    /// Resolve the provider that owns a tool name.
    pub fn provider_for(&self, tool_name: &str) -> Option<&str> {
        self.routes.get(tool_name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }
}
