//! Rule store
//!
//! Owns rule definitions, the rule order, rulesets, the ruleset order and
//! the active set, and keeps them consistent:
//! - `order` lists every rule exactly once
//! - every ruleset references at least two existing rules
//! - `active` is a subset of `order`
//!
//! Operations that change what the engine should hold return the
//! [`EngineDiff`] to send; the store never talks to the engine itself.

use crate::engine::EngineDiff;
use crate::error::RedirError;
use crate::ids::next_id;
use crate::order;
use crate::sync::ActivationSynchronizer;
use redir_common::{Rule, RuleId, Ruleset, RulesConfig, RulesState, RulesetId};
use std::collections::{BTreeSet, HashSet};
use tracing::info;

/// Minimum number of rules a ruleset groups
pub const MIN_RULESET_SIZE: usize = 2;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleStore {
    state: RulesState,
}

impl From<RulesState> for RuleStore {
    fn from(state: RulesState) -> Self {
        Self { state }
    }
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &RulesState {
        &self.state
    }

    pub fn into_state(self) -> RulesState {
        self.state
    }

    pub fn rule(&self, id: RuleId) -> Option<&Rule> {
        self.state.items.get(&id)
    }

    pub fn ruleset(&self, id: RulesetId) -> Option<&Ruleset> {
        self.state.groups.get(&id)
    }

    pub fn order(&self) -> &[RuleId] {
        &self.state.order
    }

    pub fn ruleset_order(&self) -> &[RulesetId] {
        &self.state.group_order
    }

    pub fn is_active(&self, id: RuleId) -> bool {
        self.state.active.contains(&id)
    }

    pub fn active_count(&self) -> usize {
        self.state.active.len()
    }

    /// Create a rule (`rule_id == None`) or replace an existing definition.
    ///
    /// New rules get the next id and go to the front of the order. Replacing
    /// an active rule yields a one-item remove+add refresh diff.
    pub fn save_rule(
        &mut self,
        rule_id: Option<RuleId>,
        rule: Rule,
    ) -> Result<(RuleId, EngineDiff), RedirError> {
        validate_rule(&rule)?;

        match rule_id {
            Some(id) => {
                if !self.state.items.contains_key(&id) {
                    return Err(RedirError::RuleNotFound { rule_id: id });
                }
                let diff = if self.is_active(id) {
                    ActivationSynchronizer::plan_refresh(id, &rule)
                } else {
                    EngineDiff::default()
                };
                self.state.items.insert(id, rule);
                info!("Updated rule {}", id);
                Ok((id, diff))
            }
            None => {
                let id = self.insert_rule(rule)?;
                Ok((id, EngineDiff::default()))
            }
        }
    }

    /// Store a copy of an existing rule under a new id and a derived tag
    pub fn copy_rule(&mut self, id: RuleId) -> Result<RuleId, RedirError> {
        let copy = self
            .rule(id)
            .map(Rule::to_copy)
            .ok_or(RedirError::RuleNotFound { rule_id: id })?;
        self.insert_rule(copy)
    }

    fn insert_rule(&mut self, rule: Rule) -> Result<RuleId, RedirError> {
        let id = next_id(&self.state.order)?;
        self.state.order.insert(0, id);
        self.state.items.insert(id, rule);
        info!("Created rule {}", id);
        Ok(id)
    }

    /// Delete rules, cascading into rulesets and the active set.
    ///
    /// With `default_to_all` an empty `ids` targets every rule. Absent ids
    /// are ignored. The returned diff removes exactly the targeted ids that
    /// were active.
    pub fn delete_rules(&mut self, ids: &[RuleId], default_to_all: bool) -> EngineDiff {
        let targets: Vec<RuleId> = if ids.is_empty() && default_to_all {
            self.state.order.clone()
        } else {
            let mut seen = HashSet::new();
            ids.iter().copied().filter(|id| seen.insert(*id)).collect()
        };
        let target_set: HashSet<RuleId> = targets.iter().copied().collect();

        let remove_rule_ids: Vec<RuleId> = targets
            .iter()
            .copied()
            .filter(|id| self.is_active(*id))
            .collect();

        for id in &targets {
            self.state.items.remove(id);
        }
        self.state.order.retain(|id| !target_set.contains(id));
        self.state.active.retain(|id| !target_set.contains(id));

        let mut dropped_groups = HashSet::new();
        for (&group_id, group) in self.state.groups.iter_mut() {
            group.rules.retain(|id| !target_set.contains(id));
            if group.rules.len() < MIN_RULESET_SIZE {
                dropped_groups.insert(group_id);
            }
        }
        if !dropped_groups.is_empty() {
            self.state.groups.retain(|id, _| !dropped_groups.contains(id));
            self.state
                .group_order
                .retain(|id| !dropped_groups.contains(id));
            info!("Dropped {} undersized rulesets", dropped_groups.len());
        }

        info!(
            "Deleted {} rules ({} were active)",
            targets.len(),
            remove_rule_ids.len()
        );
        EngineDiff {
            add_rules: Vec::new(),
            remove_rule_ids,
        }
    }

    /// Activate rules that are not active yet
    pub fn enable_rules(&mut self, ids: &[RuleId]) -> Result<EngineDiff, RedirError> {
        ActivationSynchronizer::plan_enable(&self.state.items, &mut self.state.active, ids)
    }

    /// Deactivate rules that are active
    pub fn disable_rules(&mut self, ids: &[RuleId]) -> EngineDiff {
        ActivationSynchronizer::plan_disable(&mut self.state.active, ids)
    }

    /// Make every rule active with a full remove+add resync
    pub fn activate_all(&mut self) -> Result<EngineDiff, RedirError> {
        let RulesState {
            items,
            order,
            active,
            ..
        } = &mut self.state;
        ActivationSynchronizer::plan_full_activation(&*items, order.as_slice(), active)
    }

    /// Deactivate every active rule
    pub fn deactivate_all(&mut self) -> EngineDiff {
        ActivationSynchronizer::plan_deactivation(&mut self.state.active)
    }

    pub fn move_rule_up(&mut self, id: RuleId) -> bool {
        order::move_up(&mut self.state.order, &id)
    }

    pub fn move_rule_down(&mut self, id: RuleId) -> bool {
        order::move_down(&mut self.state.order, &id)
    }

    pub fn move_ruleset_up(&mut self, id: RulesetId) -> bool {
        order::move_up(&mut self.state.group_order, &id)
    }

    pub fn move_ruleset_down(&mut self, id: RulesetId) -> bool {
        order::move_down(&mut self.state.group_order, &id)
    }

    /// Create a ruleset (`ruleset_id == None`) or replace an existing one.
    /// Duplicate member ids collapse to their first occurrence.
    pub fn save_ruleset(
        &mut self,
        ruleset_id: Option<RulesetId>,
        ruleset: Ruleset,
    ) -> Result<RulesetId, RedirError> {
        let ruleset = normalize_ruleset(ruleset);
        validate_ruleset(&ruleset, |id| self.state.items.contains_key(&id))?;

        let id = match ruleset_id {
            Some(id) => {
                if !self.state.groups.contains_key(&id) {
                    return Err(RedirError::RulesetNotFound { ruleset_id: id });
                }
                id
            }
            None => {
                let id = next_id(&self.state.group_order)?;
                self.state.group_order.insert(0, id);
                id
            }
        };
        self.state.groups.insert(id, ruleset);
        info!("Saved ruleset {}", id);
        Ok(id)
    }

    /// Delete rulesets; member rules are untouched
    pub fn delete_rulesets(&mut self, ids: &[RulesetId]) -> usize {
        let targets: HashSet<RulesetId> = ids.iter().copied().collect();
        let before = self.state.groups.len();
        self.state.groups.retain(|id, _| !targets.contains(id));
        self.state.group_order.retain(|id| !targets.contains(id));
        before - self.state.groups.len()
    }

    /// Replace the whole configuration with an imported one.
    ///
    /// The import never carries activation state: the returned diff removes
    /// everything that was active before.
    pub fn replace_config(&mut self, config: RulesConfig) -> Result<EngineDiff, RedirError> {
        let imported = RulesState::from(config);
        check_consistency(&imported)?;

        let diff = ActivationSynchronizer::plan_deactivation(&mut self.state.active);
        self.state = imported;
        info!(
            "Imported {} rules and {} rulesets",
            self.state.items.len(),
            self.state.groups.len()
        );
        Ok(diff)
    }

    /// Verify every store invariant
    pub fn check_invariants(&self) -> Result<(), RedirError> {
        check_consistency(&self.state)?;
        let order: HashSet<RuleId> = self.state.order.iter().copied().collect();
        let mut seen = HashSet::new();
        for id in &self.state.active {
            if !order.contains(id) {
                return Err(RedirError::validation("active", &format!("rule {} does not exist", id)));
            }
            if !seen.insert(*id) {
                return Err(RedirError::validation("active", &format!("rule {} listed twice", id)));
            }
        }
        Ok(())
    }
}

fn validate_rule(rule: &Rule) -> Result<(), RedirError> {
    if rule.tag.trim().is_empty() {
        return Err(RedirError::validation("tag", "must not be empty"));
    }
    if rule.from.trim().is_empty() {
        return Err(RedirError::validation("from", "must not be empty"));
    }
    if rule.to.trim().is_empty() {
        return Err(RedirError::validation("to", "must not be empty"));
    }
    if rule.resource_types.is_empty() {
        return Err(RedirError::validation("resourceTypes", "must not be empty"));
    }
    Ok(())
}

fn normalize_ruleset(mut ruleset: Ruleset) -> Ruleset {
    let mut seen = HashSet::new();
    ruleset.rules.retain(|id| seen.insert(*id));
    ruleset
}

fn validate_ruleset(ruleset: &Ruleset, exists: impl Fn(RuleId) -> bool) -> Result<(), RedirError> {
    if ruleset.tag.trim().is_empty() {
        return Err(RedirError::validation("tag", "must not be empty"));
    }
    if ruleset.rules.len() < MIN_RULESET_SIZE {
        return Err(RedirError::validation(
            "rules",
            &format!("a ruleset needs at least {} distinct rules", MIN_RULESET_SIZE),
        ));
    }
    if let Some(missing) = ruleset.rules.iter().find(|id| !exists(**id)) {
        return Err(RedirError::RuleNotFound { rule_id: *missing });
    }
    Ok(())
}

/// Order lists mirror the maps exactly and every definition is valid
fn check_consistency(state: &RulesState) -> Result<(), RedirError> {
    check_order("order", &state.order, state.items.keys().copied().collect())?;
    check_order(
        "groupOrder",
        &state.group_order,
        state.groups.keys().copied().collect(),
    )?;
    for rule in state.items.values() {
        validate_rule(rule)?;
    }
    for group in state.groups.values() {
        if group.rules.iter().collect::<HashSet<_>>().len() != group.rules.len() {
            return Err(RedirError::validation("groups", "ruleset lists a rule twice"));
        }
        validate_ruleset(group, |id| state.items.contains_key(&id))?;
    }
    Ok(())
}

fn check_order(field: &str, order: &[u32], keys: BTreeSet<u32>) -> Result<(), RedirError> {
    let listed: BTreeSet<u32> = order.iter().copied().collect();
    if listed.len() != order.len() {
        return Err(RedirError::validation(field, "contains duplicate ids"));
    }
    if listed != keys {
        return Err(RedirError::validation(field, "does not match the stored items"));
    }
    Ok(())
}
