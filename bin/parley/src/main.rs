use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use parley_agent::Agent;
use parley_core::{AgentConfig, TransportKind};
use parley_transports::{HttpTransport, ShellTransport, Transport, TransportRegistry};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "An autonomous conversational agent", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the agent configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted
    Run,

    /// Validate the configuration and print a summary
    CheckConfig,
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("parley").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("parley.json"))
}

fn build_transport(config: &AgentConfig) -> parley_core::Result<Arc<dyn Transport>> {
    let t = &config.transport;
    Ok(match t.kind {
        TransportKind::Http => Arc::new(HttpTransport::new(
            &t.base_url,
            &t.username,
            &t.password,
            Duration::from_millis(t.request_timeout_ms),
            config.rate_limits.messages_per_minute,
        )?),
        TransportKind::Shell => Arc::new(ShellTransport::new(
            &t.fetch_command,
            &t.send_command,
            &t.base_url,
            &t.username,
            &t.password,
            config.rate_limits.messages_per_minute,
        )),
    })
}

async fn run(config_path: &PathBuf) -> anyhow::Result<()> {
    let config = AgentConfig::load(config_path)?;

    let transport = build_transport(&config)?;
    let mut registry = TransportRegistry::new();
    registry.register(transport.clone())?;
    registry.initialize_all().await?;

    let agent = Agent::with_placeholder(config, transport);
    agent.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");

    agent.stop().await?;
    registry.shutdown_all().await;

    let state = agent.state().await;
    info!(
        sent = state.messages_sent,
        received = state.messages_received,
        errors = state.errors,
        "Final counters"
    );
    Ok(())
}

async fn check_config(config_path: &PathBuf) -> anyhow::Result<()> {
    let config = AgentConfig::load(config_path)?;
    println!("Configuration OK: {}", config_path.display());
    println!("  agent:        {} ({})", config.identity.display_name, config.identity.agent_id);
    println!("  handle:       @{}", config.identity.handle.trim_start_matches('@'));
    println!(
        "  transport:    {}",
        match config.transport.kind {
            TransportKind::Http => format!("http ({})", config.transport.base_url),
            TransportKind::Shell => format!(
                "shell ({} / {})",
                config.transport.fetch_command, config.transport.send_command
            ),
        }
    );
    println!("  conversation: {}", config.transport.conversation_id);
    println!(
        "  polling:      {}ms - {}ms (batch {})",
        config.polling.min_interval_ms, config.polling.max_interval_ms, config.polling.batch_size
    );
    println!(
        "  targets:      density {:.2}, quality {:.2}",
        config.targets.density, config.targets.quality
    );
    println!(
        "  memory:       {} entries, max age {}s",
        config.memory.max_entries, config.memory.max_age_secs
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config_path = cli.config.unwrap_or_else(|| {
        let path = default_config_path();
        warn!(path = %path.display(), "No --config given, using default path");
        path
    });

    match cli.command {
        Commands::Run => run(&config_path).await?,
        Commands::CheckConfig => check_config(&config_path).await?,
    }
    Ok(())
}
