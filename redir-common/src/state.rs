//! Persisted snapshot layout
//!
//! The durable state is exactly two documents, stored under the keys
//! `rules` and `requests`. Both are read and written as a whole.

use crate::request::RequestLogEntry;
use crate::rule::{Rule, RuleId, Ruleset, RulesetId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Request log capacity used when nothing else is configured
pub const DEFAULT_REQUESTS_LIMIT: usize = 100;

/// Rule definitions, rulesets, their explicit orders and the active set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesState {
    #[serde(default, deserialize_with = "id_map::deserialize")]
    pub items: BTreeMap<RuleId, Rule>,
    /// Presentation and activation order, one entry per rule
    #[serde(default)]
    pub order: Vec<RuleId>,
    /// Rules mirrored into the engine, in activation order
    #[serde(default)]
    pub active: Vec<RuleId>,
    #[serde(default, deserialize_with = "id_map::deserialize")]
    pub groups: BTreeMap<RulesetId, Ruleset>,
    #[serde(default)]
    pub group_order: Vec<RulesetId>,
}

/// Bounded log of observed matches, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestsState {
    #[serde(default)]
    pub items: Vec<RequestLogEntry>,
    pub limit: usize,
    pub is_listen: bool,
}

impl RequestsState {
    pub fn new(limit: usize, is_listen: bool) -> Self {
        Self {
            items: Vec::new(),
            limit,
            is_listen,
        }
    }
}

impl Default for RequestsState {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_LIMIT, true)
    }
}

/// The sole unit of durable storage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub rules: RulesState,
    pub requests: RequestsState,
}

/// Imported rule configuration. Missing parts fall back to empty defaults;
/// activation state is never imported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesConfig {
    #[serde(default, deserialize_with = "id_map::deserialize_option")]
    pub items: Option<BTreeMap<RuleId, Rule>>,
    #[serde(default)]
    pub order: Option<Vec<RuleId>>,
    #[serde(default, deserialize_with = "id_map::deserialize_option")]
    pub groups: Option<BTreeMap<RulesetId, Ruleset>>,
    #[serde(default)]
    pub group_order: Option<Vec<RulesetId>>,
}

impl From<RulesConfig> for RulesState {
    fn from(config: RulesConfig) -> Self {
        Self {
            items: config.items.unwrap_or_default(),
            order: config.order.unwrap_or_default(),
            active: Vec::new(),
            groups: config.groups.unwrap_or_default(),
            group_order: config.group_order.unwrap_or_default(),
        }
    }
}

/// Id-keyed maps whose JSON keys are decimal strings.
///
/// Reads the keys as strings first so the maps also decode when the
/// document was buffered, e.g. inside an internally tagged command.
mod id_map {
    use serde::de::{Deserialize, Deserializer, Error};
    use std::collections::BTreeMap;

    fn parse_keys<V, E: Error>(raw: BTreeMap<String, V>) -> Result<BTreeMap<u32, V>, E> {
        raw.into_iter()
            .map(|(key, value)| match key.parse::<u32>() {
                Ok(id) => Ok((id, value)),
                Err(_) => Err(E::custom(format!("invalid id key '{}'", key))),
            })
            .collect()
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<BTreeMap<u32, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        parse_keys(BTreeMap::<String, V>::deserialize(deserializer)?)
    }

    pub fn deserialize_option<'de, D, V>(
        deserializer: D,
    ) -> Result<Option<BTreeMap<u32, V>>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        Option::<BTreeMap<String, V>>::deserialize(deserializer)?
            .map(parse_keys::<V, D::Error>)
            .transpose()
    }
}
