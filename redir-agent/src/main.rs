//! Redir Agent Binary Entry Point

use clap::Parser;
use redir_agent::config::load_agent_config;
use redir_agent::logging::init_logging;
use redir_agent::{run_agent, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_agent_config(&args)?;
    init_logging(&config.logging)?;

    tokio::select! {
        result = run_agent(args, config) => {
            if let Err(e) = result {
                tracing::error!("Agent failed: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, stopping agent...");
        }
    }

    Ok(())
}
