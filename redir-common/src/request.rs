//! Observed requests and the entries of the request log

use crate::rule::{ResourceType, RuleId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Request descriptor reported by the interception engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    /// Engine-assigned request id; identical requests may share it
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
    /// Originating tab, `-1` when the request is not tied to a tab
    #[serde(default = "default_tab_id")]
    pub tab_id: i64,
}

fn default_tab_id() -> i64 {
    -1
}

impl RequestDetails {
    pub fn new(
        request_id: impl Into<String>,
        url: impl Into<String>,
        resource_type: ResourceType,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            url: url.into(),
            method: "get".to_string(),
            resource_type,
            initiator: None,
            tab_id: default_tab_id(),
        }
    }
}

/// The rule a logged request matched, with the tag it had at match time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRule {
    pub id: RuleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// One observed request/match event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    /// `<requestId>-<datetime>`
    pub id: String,
    pub datetime: DateTime<Utc>,
    pub rule: MatchedRule,
    pub request: RequestDetails,
}

impl RequestLogEntry {
    pub fn new(request: RequestDetails, rule: MatchedRule, at: DateTime<Utc>) -> Self {
        let id = format!(
            "{}-{}",
            request.request_id,
            at.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        Self {
            id,
            datetime: at,
            rule,
            request,
        }
    }
}
