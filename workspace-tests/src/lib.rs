//! Shared fixtures for cross-crate tests

use async_trait::async_trait;
use redir_common::{ResourceType, Rule, RuleKind};
use redir_core::{EngineDiff, EngineSyncError, RuleEngine};
use std::sync::Mutex;

/// Engine that accepts every diff and remembers it
#[derive(Debug, Default)]
pub struct RecordingEngine {
    calls: Mutex<Vec<EngineDiff>>,
}

impl RecordingEngine {
    pub fn calls(&self) -> Vec<EngineDiff> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RuleEngine for RecordingEngine {
    async fn apply_diff(&self, diff: &EngineDiff) -> Result<(), EngineSyncError> {
        let mut calls = self.calls.lock().map_err(|e| EngineSyncError::Unavailable {
            details: e.to_string(),
        })?;
        calls.push(diff.clone());
        Ok(())
    }
}

/// Wildcard script rule with a readable tag
pub fn wildcard_rule(tag: &str, from: &str, to: &str) -> Rule {
    Rule::new(tag, from, to, RuleKind::Wildcard).with_resource_types([ResourceType::Script])
}
