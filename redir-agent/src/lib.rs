//! Redir Agent
//!
//! Host process for the redirect rule manager. Reads one JSON message per
//! line, drives a `StateGateway` backed by SQLite and evaluates observed
//! requests with the in-process engine. Replies go to stdout, logs to stderr.

use clap::{Parser, Subcommand};
use redir_common::{PersistedState, RequestDetails, RuleId};
use redir_core::{
    Command, GatewayEvent, InstallReason, LocalEngine, MatchEvent, RedirectOutcome, Reply,
    SqliteStorage, StateGateway,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;

pub mod config;
pub mod logging;


use config::AgentConfig;

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// SQLite URL of the persisted state
    #[arg(long)]
    pub database_url: Option<String>,

    /// Request log capacity of a freshly initialized state
    #[arg(long)]
    pub requests_limit: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<AgentCommand>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    /// Process messages from stdin until EOF (default)
    Serve,
    /// Process a single message and exit
    Exec { line: String },
}

/// One inbound line
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Inbound {
    Observe { observe: RequestDetails },
    Command(Command),
}

/// One outbound line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentReply {
    pub ok: bool,
    /// Id assigned by a create or copy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RuleId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<PersistedState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Option<RedirectOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentReply {
    fn ok() -> Self {
        Self {
            ok: true,
            id: None,
            state: None,
            redirect: None,
            error: None,
        }
    }

    fn failed(error: impl ToString) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            ..Self::ok()
        }
    }
}

/// Gateway plus the engine that performs the redirects
#[derive(Clone)]
pub struct Agent {
    gateway: StateGateway,
    engine: Arc<LocalEngine>,
}

impl Agent {
    pub fn new(gateway: StateGateway, engine: Arc<LocalEngine>) -> Self {
        Self { gateway, engine }
    }

    pub fn gateway(&self) -> &StateGateway {
        &self.gateway
    }

    /// Load or create the persisted state and mirror its active rules into the engine
    pub async fn start(&self) -> redir_core::Result<()> {
        self.gateway.install(InstallReason::Update).await?;
        self.gateway.restore_engine().await?;
        Ok(())
    }

    pub async fn handle_line(&self, line: &str) -> AgentReply {
        let inbound: Inbound = match serde_json::from_str(line) {
            Ok(inbound) => inbound,
            Err(e) => return AgentReply::failed(format!("Invalid message: {}", e)),
        };

        match inbound {
            Inbound::Command(command) => match self.gateway.handle(command).await {
                Ok(Reply::State(state)) => AgentReply {
                    state: Some(state),
                    ..AgentReply::ok()
                },
                Ok(Reply::Created { id }) => AgentReply {
                    id: Some(id),
                    ..AgentReply::ok()
                },
                Ok(_) => AgentReply::ok(),
                Err(e) => {
                    tracing::warn!("Command failed: {}", e);
                    AgentReply::failed(e)
                }
            },
            Inbound::Observe { observe } => self.observe(observe).await,
        }
    }

    async fn observe(&self, request: RequestDetails) -> AgentReply {
        let outcome = self.engine.evaluate(&request).await;
        if let Some(outcome) = &outcome {
            tracing::debug!("Redirecting {} via rule {}", request.url, outcome.rule_id);
            let event = MatchEvent {
                rule_id: outcome.rule_id,
                request,
            };
            if let Err(e) = self.gateway.record_match(event).await {
                return AgentReply::failed(e);
            }
        }
        AgentReply {
            redirect: Some(outcome),
            ..AgentReply::ok()
        }
    }
}

/// Answer every line of `reader` on `writer` until EOF
pub async fn serve<R, W>(agent: &Agent, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = agent.handle_line(&line).await;
        write_reply(&mut writer, &reply).await?;
    }
    tracing::info!("Input closed");
    Ok(())
}

async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, reply: &AgentReply) -> anyhow::Result<()> {
    let mut encoded = serde_json::to_vec(reply)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Log outbound gateway events
fn spawn_event_logger(mut events: broadcast::Receiver<GatewayEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(GatewayEvent::Badge(badge)) => {
                    tracing::info!(
                        count = badge.count,
                        text = %badge.text,
                        color = %badge.color,
                        "Badge updated"
                    );
                }
                Ok(GatewayEvent::StateChanged(state)) => {
                    tracing::debug!(
                        rules = state.rules.order.len(),
                        active = state.rules.active.len(),
                        requests = state.requests.items.len(),
                        "State persisted"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event logger lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

pub async fn run_agent(args: Args, config: AgentConfig) -> anyhow::Result<()> {
    // Logging should be initialized by the caller (main or test)
    tracing::info!("Starting Redir Agent...");
    tracing::info!("  Storage: {}", config.storage.database_url);

    let storage = Arc::new(SqliteStorage::connect(&config.storage).await?);
    let engine = Arc::new(LocalEngine::new());
    let gateway = StateGateway::new(storage, engine.clone(), config.gateway.clone());
    spawn_event_logger(gateway.subscribe());

    let agent = Agent::new(gateway, engine);
    agent.start().await?;

    let mut stdout = tokio::io::stdout();
    match args.command.unwrap_or(AgentCommand::Serve) {
        AgentCommand::Serve => {
            let stdin = BufReader::new(tokio::io::stdin());
            serve(&agent, stdin, stdout).await
        }
        AgentCommand::Exec { line } => {
            let reply = agent.handle_line(&line).await;
            write_reply(&mut stdout, &reply).await?;
            if reply.ok {
                Ok(())
            } else {
                anyhow::bail!(reply.error.unwrap_or_default())
            }
        }
    }
}
