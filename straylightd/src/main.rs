mod model;
mod server;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use straylight_agent::runtime::{AgentOptions, AgentRuntime};
use straylight_agent::session::InMemorySessionStore;
use straylight_core::config::{self, StraylightConfig};
use straylight_mcp::Orchestrator;

/// Straylight daemon — tool-provider orchestration behind a small HTTP API.
#[derive(Parser, Debug)]
#[command(name = "straylightd", version, about)]
struct Cli {
    /// Config file path.
    #[arg(short, long, default_value = "straylight.toml")]
    config: PathBuf,

    /// Increase log verbosity (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Validate config and exit.
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(&cli.config)?;
    config::validate_config(&config)?;

    if cli.validate {
        println!("config is valid");
        return Ok(());
    }

    let telemetry_guard = telemetry::init_telemetry(&config.telemetry, cli.verbose)?;

    info!(
        instance_id = %config.global.instance_id,
        providers = config.providers.len(),
        "straylightd starting"
    );

    // One orchestrator scope per process lifetime: every provider connection
    // is torn down on the way out, whether we exit cleanly or not.
    let providers = config.providers.clone();
    let exit = Orchestrator::scope(&providers, |orchestrator| {
        let config = config.clone();
        async move { run_daemon(config, orchestrator).await }
    })
    .await;

    telemetry_guard.flush();
    info!("straylightd stopped");
    exit
}

async fn run_daemon(config: StraylightConfig, orchestrator: Arc<Orchestrator>) -> Result<()> {
    info!(
        tools = orchestrator.registry().len(),
        "tool catalog ready"
    );

    let model = model::build_model_client(&config.model)?;
    let runtime = Arc::new(AgentRuntime::new(
        model,
        orchestrator.broker(),
        AgentOptions::new(config.agent.max_iterations, &config.agent.system_prompt),
    ));

    let state = server::AppState {
        runtime,
        sessions: Arc::new(InMemorySessionStore::new()),
        orchestrator,
        started_at: Instant::now(),
    };

    let listener = TcpListener::bind(&config.server.bind_addr).await?;
    info!(bind = %config.server.bind_addr, "API listening");

    axum::serve(listener, server::api_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c, shutting down");
    }
}
