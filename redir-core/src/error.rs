//! Error types for state management and engine synchronization

use redir_common::{RuleId, RulesetId};
use thiserror::Error;

/// Main error type for redir operations
#[derive(Debug, Error)]
pub enum RedirError {
    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Rule not found: {rule_id}")]
    RuleNotFound { rule_id: RuleId },

    #[error("Ruleset not found: {ruleset_id}")]
    RulesetNotFound { ruleset_id: RulesetId },

    #[error("Identifier space exhausted")]
    IdSpaceExhausted,

    #[error("Engine sync failed: {0}")]
    EngineSync(#[from] EngineSyncError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RedirError {
    /// Create a validation error with field and reason
    pub fn validation(field: &str, reason: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether issuing the same command again could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            RedirError::EngineSync(err) => err.is_recoverable(),
            RedirError::Storage(_) => true,
            RedirError::Validation { .. }
            | RedirError::RuleNotFound { .. }
            | RedirError::RulesetNotFound { .. }
            | RedirError::IdSpaceExhausted => false,
        }
    }
}

/// Rejection of an add/remove call by the interception engine
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineSyncError {
    #[error("Rule {rule_id} rejected: {reason}")]
    InvalidRule { rule_id: RuleId, reason: String },

    #[error("Rule id {rule_id} is already registered")]
    IdCollision { rule_id: RuleId },

    #[error("Engine unavailable: {details}")]
    Unavailable { details: String },
}

impl EngineSyncError {
    pub fn invalid_rule(rule_id: RuleId, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule_id,
            reason: reason.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineSyncError::Unavailable { .. })
    }
}

/// Persisted-state read/write failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
