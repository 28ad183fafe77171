//! Layered agent configuration: defaults, TOML file, environment, CLI flags

use crate::logging::{levels, LoggingConfig};
use crate::Args;
use redir_core::{GatewayConfig, StorageConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub const ENV_DATABASE_URL: &str = "REDIR_DATABASE_URL";
pub const ENV_REQUESTS_LIMIT: &str = "REDIR_REQUESTS_LIMIT";
pub const ENV_LOG_LEVEL: &str = "REDIR_LOG_LEVEL";
pub const ENV_LOG_JSON: &str = "REDIR_LOG_JSON";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid {var} value '{value}'")]
    InvalidEnv { var: String, value: String },

    #[error("Configuration validation failed: {0}")]
    Validation(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Complete agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub storage: StorageConfig,
    pub gateway: GatewayConfig,
    pub logging: LoggingConfig,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.database_url.trim().is_empty() {
            return Err(ConfigError::Validation("database_url must not be empty".to_string()));
        }
        if self.storage.max_connections == 0 {
            return Err(ConfigError::Validation("max_connections must be at least 1".to_string()));
        }
        if self.gateway.default_requests_limit == 0 {
            return Err(ConfigError::Validation(
                "default_requests_limit must be at least 1".to_string(),
            ));
        }
        if !levels::is_valid_level(&self.logging.level) {
            return Err(ConfigError::Validation(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }
}

/// Load configuration from the process environment
pub fn load_agent_config(args: &Args) -> Result<AgentConfig, ConfigError> {
    load_agent_config_with(args, |var| std::env::var(var).ok())
}

/// Load configuration with an explicit environment lookup.
/// Precedence: CLI flags > environment > config file > defaults.
pub fn load_agent_config_with<F>(args: &Args, env: F) -> Result<AgentConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &args.config {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            toml::from_str(&content)?
        }
        None => AgentConfig::default(),
    };

    if let Some(url) = env(ENV_DATABASE_URL) {
        config.storage.database_url = url;
    }
    if let Some(value) = env(ENV_REQUESTS_LIMIT) {
        config.gateway.default_requests_limit =
            value.parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_REQUESTS_LIMIT.to_string(),
                value: value.clone(),
            })?;
    }
    if let Some(level) = env(ENV_LOG_LEVEL) {
        config.logging.level = level;
    }
    if let Some(value) = env(ENV_LOG_JSON) {
        config.logging.json_format = parse_bool(&value).ok_or_else(|| ConfigError::InvalidEnv {
            var: ENV_LOG_JSON.to_string(),
            value: value.clone(),
        })?;
    }

    if let Some(url) = &args.database_url {
        config.storage.database_url = url.clone();
    }
    if let Some(limit) = args.requests_limit {
        config.gateway.default_requests_limit = limit;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }

    config.validate()?;
    Ok(config)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
