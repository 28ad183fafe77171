//! Redirect rules and rulesets

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a [`Rule`]. Positive, never reused while a larger id exists.
pub type RuleId = u32;

/// Identifier of a [`Ruleset`].
pub type RulesetId = u32;

/// How the `from` pattern of a rule is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// `from` is a regular expression, `to` a substitution with `\N` back-references
    Regex,
    /// `from` is a URL filter with `*` wildcards, `to` a literal URL
    Wildcard,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Regex => write!(f, "regex"),
            RuleKind::Wildcard => write!(f, "wildcard"),
        }
    }
}

/// Kind of resource a request loads. Rules only apply to the types they list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    Object,
    Xmlhttprequest,
    Ping,
    CspReport,
    Media,
    Websocket,
    Webtransport,
    Webbundle,
    Other,
}

impl ResourceType {
    /// Every resource type, in declaration order. A new rule filters on all of them.
    pub const ALL: [ResourceType; 15] = [
        ResourceType::MainFrame,
        ResourceType::SubFrame,
        ResourceType::Stylesheet,
        ResourceType::Script,
        ResourceType::Image,
        ResourceType::Font,
        ResourceType::Object,
        ResourceType::Xmlhttprequest,
        ResourceType::Ping,
        ResourceType::CspReport,
        ResourceType::Media,
        ResourceType::Websocket,
        ResourceType::Webtransport,
        ResourceType::Webbundle,
        ResourceType::Other,
    ];
}

/// A single redirect directive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Human-readable label
    pub tag: String,
    /// Source pattern
    pub from: String,
    /// Destination URL or substitution
    pub to: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    #[serde(default)]
    pub resource_types: BTreeSet<ResourceType>,
}

impl Rule {
    pub fn new(
        tag: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        kind: RuleKind,
    ) -> Self {
        Self {
            tag: tag.into(),
            from: from.into(),
            to: to.into(),
            kind,
            resource_types: ResourceType::ALL.into_iter().collect(),
        }
    }

    pub fn with_resource_types(mut self, types: impl IntoIterator<Item = ResourceType>) -> Self {
        self.resource_types = types.into_iter().collect();
        self
    }

    /// Same definition under the tag a copy of this rule should carry
    pub fn to_copy(&self) -> Self {
        Self {
            tag: next_copy_tag(&self.tag),
            ..self.clone()
        }
    }
}

/// A named, ordered group of at least two rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruleset {
    pub tag: String,
    pub rules: Vec<RuleId>,
}

impl Ruleset {
    pub fn new(tag: impl Into<String>, rules: Vec<RuleId>) -> Self {
        Self {
            tag: tag.into(),
            rules,
        }
    }
}

/// Tag for a copied item: `"X (n)"` becomes `"X (n+1)"`, anything else `"X (1)"`.
pub fn next_copy_tag(tag: &str) -> String {
    if let Some(body) = tag.strip_suffix(')') {
        if let Some(open) = body.rfind('(') {
            let digits = &body[open + 1..];
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(count) = digits.parse::<u64>() {
                    return format!("{} ({})", body[..open].trim_end(), count.saturating_add(1));
                }
            }
        }
    }
    format!("{} (1)", tag)
}
