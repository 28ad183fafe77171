//! Activation synchronizer
//!
//! Translates changes of the desired active set into the minimal diff for
//! the interception engine, and sends that diff as a single call.
//!
//! Planning and applying are split: the `plan_*` functions update the
//! in-memory active set and return the diff, [`ActivationSynchronizer::apply`]
//! sends it. Callers persist only after `apply` succeeded, so a rejected
//! diff leaves the persisted active set untouched.

use crate::engine::{
    CompiledRule, EngineDiff, Redirect, RuleAction, RuleCondition, RuleEngine, UrlCondition,
    REDIRECT_PRIORITY,
};
use crate::error::{EngineSyncError, RedirError};
use redir_common::{Rule, RuleId, RuleKind};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Compile a rule into the engine's native representation
pub fn compile_rule(id: RuleId, rule: &Rule) -> CompiledRule {
    let (filter, redirect) = match rule.kind {
        RuleKind::Regex => (
            UrlCondition::RegexFilter(rule.from.clone()),
            Redirect::RegexSubstitution(rule.to.clone()),
        ),
        RuleKind::Wildcard => (
            UrlCondition::UrlFilter(rule.from.clone()),
            Redirect::Url(rule.to.clone()),
        ),
    };

    CompiledRule {
        id,
        priority: REDIRECT_PRIORITY,
        action: RuleAction::Redirect { redirect },
        condition: RuleCondition {
            filter,
            resource_types: rule.resource_types.iter().copied().collect(),
        },
    }
}

/// Sends activation diffs to the engine
#[derive(Clone)]
pub struct ActivationSynchronizer {
    engine: Arc<dyn RuleEngine>,
}

impl ActivationSynchronizer {
    pub fn new(engine: Arc<dyn RuleEngine>) -> Self {
        Self { engine }
    }

    /// Activate every id of `ids` that is not active yet.
    ///
    /// Each newly activated id is also listed for removal so that a stale
    /// engine entry with the same id cannot collide.
    pub fn plan_enable(
        items: &BTreeMap<RuleId, Rule>,
        active: &mut Vec<RuleId>,
        ids: &[RuleId],
    ) -> Result<EngineDiff, RedirError> {
        if let Some(&missing) = ids.iter().find(|id| !items.contains_key(*id)) {
            return Err(RedirError::RuleNotFound { rule_id: missing });
        }

        let mut diff = EngineDiff::default();
        for &id in ids {
            if active.contains(&id) {
                continue;
            }
            let Some(rule) = items.get(&id) else {
                continue;
            };
            diff.add_rules.push(compile_rule(id, rule));
            diff.remove_rule_ids.push(id);
            active.push(id);
        }
        Ok(diff)
    }

    /// Deactivate every id of `ids` that is currently active
    pub fn plan_disable(active: &mut Vec<RuleId>, ids: &[RuleId]) -> EngineDiff {
        let mut diff = EngineDiff::default();
        for &id in ids {
            if let Some(index) = active.iter().position(|&active_id| active_id == id) {
                active.remove(index);
                diff.remove_rule_ids.push(id);
            }
        }
        diff
    }

    /// Replace the engine copy of one already active rule
    pub fn plan_refresh(id: RuleId, rule: &Rule) -> EngineDiff {
        EngineDiff {
            add_rules: vec![compile_rule(id, rule)],
            remove_rule_ids: vec![id],
        }
    }

    /// Full resync: remove and re-add every rule of `order`, not diffed against `active`
    pub fn plan_full_activation(
        items: &BTreeMap<RuleId, Rule>,
        order: &[RuleId],
        active: &mut Vec<RuleId>,
    ) -> Result<EngineDiff, RedirError> {
        let add_rules = order
            .iter()
            .map(|&id| {
                items
                    .get(&id)
                    .map(|rule| compile_rule(id, rule))
                    .ok_or(RedirError::RuleNotFound { rule_id: id })
            })
            .collect::<Result<Vec<_>, _>>()?;

        *active = order.to_vec();
        Ok(EngineDiff {
            add_rules,
            remove_rule_ids: order.to_vec(),
        })
    }

    /// Remove every active rule from the engine
    pub fn plan_deactivation(active: &mut Vec<RuleId>) -> EngineDiff {
        EngineDiff {
            add_rules: Vec::new(),
            remove_rule_ids: std::mem::take(active),
        }
    }

    /// Re-send the active set to an engine that may have lost it.
    /// Active ids without a definition are skipped.
    pub fn plan_restore(items: &BTreeMap<RuleId, Rule>, active: &[RuleId]) -> EngineDiff {
        let add_rules: Vec<_> = active
            .iter()
            .filter_map(|&id| items.get(&id).map(|rule| compile_rule(id, rule)))
            .collect();
        EngineDiff {
            remove_rule_ids: active.to_vec(),
            add_rules,
        }
    }

    /// Send a diff as one engine call. Empty diffs produce no engine traffic.
    pub async fn apply(&self, diff: &EngineDiff) -> Result<(), EngineSyncError> {
        if diff.is_empty() {
            return Ok(());
        }
        debug!(
            "Syncing engine: add={:?} remove={:?}",
            diff.added_ids(),
            diff.remove_rule_ids
        );
        self.engine.apply_diff(diff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redir_common::ResourceType;

    fn items() -> BTreeMap<RuleId, Rule> {
        let mut items = BTreeMap::new();
        items.insert(
            1,
            Rule::new("A", "http://a", "http://b", RuleKind::Wildcard)
                .with_resource_types([ResourceType::Script]),
        );
        items.insert(
            2,
            Rule::new("B", "^http://c/(.*)", r"http://d/\1", RuleKind::Regex)
                .with_resource_types([ResourceType::Image, ResourceType::Font]),
        );
        items
    }

    #[test]
    fn test_compile_rule() {
        let items = items();

        let wildcard = compile_rule(1, &items[&1]);
        assert_eq!(wildcard.priority, 1);
        assert_eq!(wildcard.condition.filter, UrlCondition::UrlFilter("http://a".to_string()));
        assert_eq!(
            wildcard.action,
            RuleAction::Redirect {
                redirect: Redirect::Url("http://b".to_string())
            }
        );
        assert_eq!(wildcard.condition.resource_types, vec![ResourceType::Script]);

        let regex = compile_rule(2, &items[&2]);
        assert_eq!(regex.condition.filter, UrlCondition::RegexFilter("^http://c/(.*)".to_string()));
        assert_eq!(
            regex.action,
            RuleAction::Redirect {
                redirect: Redirect::RegexSubstitution(r"http://d/\1".to_string())
            }
        );
    }

    #[test]
    fn test_plan_enable_skips_active() {
        let items = items();
        let mut active = vec![1];

        let diff = ActivationSynchronizer::plan_enable(&items, &mut active, &[1, 2, 2]).unwrap();
        assert_eq!(diff.added_ids(), vec![2]);
        assert_eq!(diff.remove_rule_ids, vec![2]);
        assert_eq!(active, vec![1, 2]);

        let diff = ActivationSynchronizer::plan_enable(&items, &mut active, &[1, 2]).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_plan_enable_unknown_rule() {
        let items = items();
        let mut active = Vec::new();

        let result = ActivationSynchronizer::plan_enable(&items, &mut active, &[1, 9]);
        assert!(matches!(result, Err(RedirError::RuleNotFound { rule_id: 9 })));
        assert!(active.is_empty());
    }

    #[test]
    fn test_plan_disable_skips_inactive() {
        let mut active = vec![2, 1];

        let diff = ActivationSynchronizer::plan_disable(&mut active, &[1, 5]);
        assert!(diff.add_rules.is_empty());
        assert_eq!(diff.remove_rule_ids, vec![1]);
        assert_eq!(active, vec![2]);
    }

    #[test]
    fn test_plan_full_activation() {
        let items = items();
        let mut active = vec![2];

        let diff =
            ActivationSynchronizer::plan_full_activation(&items, &[2, 1], &mut active).unwrap();
        assert_eq!(diff.remove_rule_ids, vec![2, 1]);
        assert_eq!(diff.added_ids(), vec![2, 1]);
        assert_eq!(active, vec![2, 1]);
    }

    #[test]
    fn test_plan_deactivation() {
        let mut active = vec![2, 1];

        let diff = ActivationSynchronizer::plan_deactivation(&mut active);
        assert_eq!(diff.remove_rule_ids, vec![2, 1]);
        assert!(active.is_empty());
    }
}
