//! Redir Core Library
//!
//! Persisted-state manager for URL redirection rules: the ordered rule and
//! ruleset store, the activation synchronizer that mirrors active rules into
//! an external interception engine, and the bounded request log.

pub mod ids;
pub mod order;

/// Rule store and its invariants
pub mod store;

/// Engine seam and activation diffs
pub mod engine;
pub mod filter;
pub mod local_engine;
pub mod sync;

pub mod request_log;

/// Persisted-state storage backends
pub mod storage;

/// Command entry point
pub mod gateway;

/// Configuration types and utilities
pub mod config;

/// Error types for redir operations
pub mod error;

pub use config::{GatewayConfig, StorageConfig};
pub use engine::{CompiledRule, EngineDiff, Redirect, RuleAction, RuleCondition, RuleEngine, UrlCondition};
pub use error::{EngineSyncError, RedirError, StorageError};
pub use filter::UrlFilter;
pub use gateway::{
    Badge, Command, GatewayEvent, GatewayPhase, InstallReason, MatchEvent, Reply, RulesetData,
    StateGateway,
};
pub use local_engine::{LocalEngine, RedirectOutcome};
pub use request_log::RequestLog;
pub use storage::{MemoryStorage, RawSnapshot, SqliteStorage, StateStorage};
pub use store::RuleStore;
pub use sync::{compile_rule, ActivationSynchronizer};

/// Result type alias for redir operations
pub type Result<T> = std::result::Result<T, RedirError>;
