//! Seam to the declarative request-interception engine
//!
//! The engine owns the live set of dynamic rules and performs the actual
//! redirects. The core never owns it: it only sends [`EngineDiff`]s through
//! the [`RuleEngine`] trait.

use crate::error::EngineSyncError;
use async_trait::async_trait;
use redir_common::{ResourceType, RuleId};
use serde::{Deserialize, Serialize};

/// Priority every compiled redirect rule carries
pub const REDIRECT_PRIORITY: u32 = 1;

/// Rule in the engine's native representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledRule {
    pub id: RuleId,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

/// What the engine does with a matching request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    Redirect { redirect: Redirect },
}

/// Redirect target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Redirect {
    /// Replace the first regex match within the URL, `\N` back-references allowed
    RegexSubstitution(String),
    /// Literal destination URL
    Url(String),
}

/// When a compiled rule applies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub filter: UrlCondition,
    pub resource_types: Vec<ResourceType>,
}

/// URL pattern of a condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UrlCondition {
    RegexFilter(String),
    UrlFilter(String),
}

/// One atomic update of the engine's dynamic rule set.
/// Removals are processed before additions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineDiff {
    pub add_rules: Vec<CompiledRule>,
    pub remove_rule_ids: Vec<RuleId>,
}

impl EngineDiff {
    pub fn is_empty(&self) -> bool {
        self.add_rules.is_empty() && self.remove_rule_ids.is_empty()
    }

    /// Ids added by this diff, in batch order
    pub fn added_ids(&self) -> Vec<RuleId> {
        self.add_rules.iter().map(|rule| rule.id).collect()
    }
}

/// Declarative interception engine holding the live dynamic rules
#[async_trait]
pub trait RuleEngine: Send + Sync {
    /// Apply removals then additions as one call. On error nothing is applied.
    async fn apply_diff(&self, diff: &EngineDiff) -> Result<(), EngineSyncError>;
}
