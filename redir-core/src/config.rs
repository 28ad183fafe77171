//! Configuration types and utilities

use redir_common::DEFAULT_REQUESTS_LIMIT;
use serde::{Deserialize, Serialize};

/// State gateway configuration
/// Only used when a snapshot has to be (re)initialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Request log capacity of a fresh snapshot
    pub default_requests_limit: usize,
    /// Whether a fresh snapshot records matches
    pub default_listening: bool,
    /// Capacity of the outbound event channel
    pub event_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_requests_limit: DEFAULT_REQUESTS_LIMIT,
            default_listening: true,
            event_buffer: 64,
        }
    }
}

/// Persisted-state storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite connection URL
    pub database_url: String,
    /// Pool size
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./redir.db".to_string(),
            max_connections: 1,
        }
    }
}
