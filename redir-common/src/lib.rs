//! Common data model for the redir workspace
//!
//! Every type in this crate is part of the persisted snapshot or of the
//! command payloads exchanged with the UI, so field names follow the
//! stored JSON layout (`camelCase`, `type` for the rule kind).

pub mod request;
pub mod rule;
pub mod state;

pub use request::{MatchedRule, RequestDetails, RequestLogEntry};
pub use rule::{next_copy_tag, ResourceType, Rule, RuleId, RuleKind, Ruleset, RulesetId};
pub use state::{PersistedState, RequestsState, RulesConfig, RulesState, DEFAULT_REQUESTS_LIMIT};
