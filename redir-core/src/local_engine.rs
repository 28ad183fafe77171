//! In-process interception engine
//!
//! Holds the dynamic rule set in memory and evaluates observed requests
//! against it. Used by the agent and as a real engine in tests.

use crate::engine::{CompiledRule, EngineDiff, Redirect, RuleAction, RuleEngine, UrlCondition};
use crate::error::EngineSyncError;
use crate::filter::UrlFilter;
use async_trait::async_trait;
use redir_common::{RequestDetails, RuleId};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Result of evaluating a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectOutcome {
    pub rule_id: RuleId,
    pub url: String,
}

#[derive(Debug)]
enum Matcher {
    Regex { regex: Regex, replacement: String },
    Url { filter: UrlFilter, target: String },
}

#[derive(Debug)]
struct LoadedRule {
    rule: CompiledRule,
    matcher: Matcher,
}

impl LoadedRule {
    fn load(rule: &CompiledRule) -> Result<Self, EngineSyncError> {
        let RuleAction::Redirect { redirect } = &rule.action;
        let matcher = match (&rule.condition.filter, redirect) {
            (UrlCondition::RegexFilter(pattern), Redirect::RegexSubstitution(substitution)) => {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| EngineSyncError::invalid_rule(rule.id, format!("invalid regex: {}", e)))?;
                Matcher::Regex {
                    regex,
                    replacement: to_replacement(substitution),
                }
            }
            (UrlCondition::UrlFilter(filter), Redirect::Url(target)) => {
                let filter = UrlFilter::new(filter)
                    .map_err(|e| EngineSyncError::invalid_rule(rule.id, format!("invalid url filter: {}", e)))?;
                Matcher::Url {
                    filter,
                    target: target.clone(),
                }
            }
            _ => {
                return Err(EngineSyncError::invalid_rule(
                    rule.id,
                    "redirect does not fit the condition",
                ))
            }
        };

        Ok(Self {
            rule: rule.clone(),
            matcher,
        })
    }

    fn redirect(&self, request: &RequestDetails) -> Option<String> {
        if !self.rule.condition.resource_types.contains(&request.resource_type) {
            return None;
        }
        match &self.matcher {
            Matcher::Regex { regex, replacement } => regex
                .is_match(&request.url)
                .then(|| regex.replace(&request.url, replacement.as_str()).into_owned()),
            Matcher::Url { filter, target } => filter.matches(&request.url).then(|| target.clone()),
        }
    }
}

/// Rewrite `\N` back-references into the `${N}` form and escape literal `$`
fn to_replacement(substitution: &str) -> String {
    let mut out = String::with_capacity(substitution.len());
    let mut chars = substitution.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.peek().copied() {
                Some(digit) if digit.is_ascii_digit() => {
                    chars.next();
                    out.push_str("${");
                    out.push(digit);
                    out.push('}');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            '$' => out.push_str("$$"),
            _ => out.push(ch),
        }
    }
    out
}

/// Dynamic rule set kept in memory
#[derive(Debug, Default)]
pub struct LocalEngine {
    rules: RwLock<BTreeMap<RuleId, LoadedRule>>,
    applied_calls: AtomicUsize,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of the live rules, ascending
    pub async fn rule_ids(&self) -> Vec<RuleId> {
        self.rules.read().await.keys().copied().collect()
    }

    /// Live rules, ascending by id
    pub async fn rules(&self) -> Vec<CompiledRule> {
        self.rules
            .read()
            .await
            .values()
            .map(|loaded| loaded.rule.clone())
            .collect()
    }

    /// Number of diffs applied successfully
    pub fn applied_calls(&self) -> usize {
        self.applied_calls.load(Ordering::Relaxed)
    }

    /// Redirect for a request: highest priority wins, ties go to the lowest id
    pub async fn evaluate(&self, request: &RequestDetails) -> Option<RedirectOutcome> {
        let rules = self.rules.read().await;
        let mut best: Option<(u32, RedirectOutcome)> = None;
        for (id, loaded) in rules.iter() {
            if let Some((priority, _)) = &best {
                if loaded.rule.priority <= *priority {
                    continue;
                }
            }
            if let Some(url) = loaded.redirect(request) {
                best = Some((loaded.rule.priority, RedirectOutcome { rule_id: *id, url }));
            }
        }
        best.map(|(_, outcome)| outcome)
    }
}

#[async_trait]
impl RuleEngine for LocalEngine {
    async fn apply_diff(&self, diff: &EngineDiff) -> Result<(), EngineSyncError> {
        let mut rules = self.rules.write().await;

        let removed: HashSet<RuleId> = diff.remove_rule_ids.iter().copied().collect();
        let mut added = HashSet::new();
        let mut loaded = Vec::with_capacity(diff.add_rules.len());
        for rule in &diff.add_rules {
            let still_live = rules.contains_key(&rule.id) && !removed.contains(&rule.id);
            if still_live || !added.insert(rule.id) {
                return Err(EngineSyncError::IdCollision { rule_id: rule.id });
            }
            loaded.push(LoadedRule::load(rule)?);
        }

        for id in &diff.remove_rule_ids {
            rules.remove(id);
        }
        for rule in loaded {
            rules.insert(rule.rule.id, rule);
        }
        self.applied_calls.fetch_add(1, Ordering::Relaxed);

        debug!(
            "Applied diff: +{} -{}, {} live rules",
            diff.add_rules.len(),
            diff.remove_rule_ids.len(),
            rules.len()
        );
        Ok(())
    }
}
