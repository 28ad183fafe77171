//! State gateway
//!
//! Single entry point for command messages. Every command loads the full
//! persisted snapshot, applies exactly one store/log operation, sends the
//! resulting engine diff, notifies the badge, and persists the snapshot, in
//! that order. A failed engine call aborts the command before persisting.
//!
//! Commands are not serialized against each other: two commands in flight
//! both read the same snapshot and the later write wins.

use crate::config::GatewayConfig;
use crate::engine::{EngineDiff, RuleEngine};
use crate::request_log::RequestLog;
use crate::storage::{RawSnapshot, StateStorage};
use crate::store::RuleStore;
use crate::sync::ActivationSynchronizer;
use crate::Result;
use chrono::{DateTime, Utc};
use redir_common::{
    MatchedRule, PersistedState, RequestDetails, RequestLogEntry, RequestsState, Rule, RuleId,
    Ruleset, RulesetId, RulesConfig, RulesState,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Inbound command message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    Init,
    SaveRule {
        #[serde(default, rename = "ruleId", skip_serializing_if = "Option::is_none")]
        rule_id: Option<RuleId>,
        rule: Rule,
    },
    CopyRule {
        id: RuleId,
    },
    DeleteRules {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ids: Option<Vec<RuleId>>,
    },
    EnableRules {
        ids: Vec<RuleId>,
    },
    DisableRules {
        ids: Vec<RuleId>,
    },
    Activate,
    Deactivate,
    MoveRuleUp {
        id: RuleId,
    },
    MoveRuleDown {
        id: RuleId,
    },
    SaveRuleset {
        data: RulesetData,
    },
    DeleteRuleset {
        ids: Vec<RulesetId>,
    },
    MoveRulesetUp {
        id: RulesetId,
    },
    MoveRulesetDown {
        id: RulesetId,
    },
    SetRulesConfig {
        config: RulesConfig,
    },
    SetRequestsLimit {
        limit: usize,
    },
    StartListen,
    StopListen,
    DeleteRequests {
        ids: Vec<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Payload of `saveRuleset`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesetData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RulesetId>,
    pub tag: String,
    pub rules: Vec<RuleId>,
}

/// Outcome of a handled command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Full snapshot, answer to `init`
    State(PersistedState),
    /// Id of a created rule or ruleset
    Created { id: u32 },
    Done,
    /// Unknown command type
    Ignored,
}

/// Active-rule counter shown by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Badge {
    pub count: usize,
    pub text: String,
    pub color: String,
}

impl Badge {
    pub fn for_count(count: usize) -> Self {
        if count > 0 {
            Self {
                count,
                text: count.to_string(),
                color: "green".to_string(),
            }
        } else {
            Self {
                count,
                text: String::new(),
                color: "#ffffff00".to_string(),
            }
        }
    }
}

/// Outbound notifications
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Badge(Badge),
    StateChanged(Arc<PersistedState>),
}

/// Why the host (re)started the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallReason {
    Install,
    Update,
}

/// A request the engine redirected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEvent {
    pub rule_id: RuleId,
    pub request: RequestDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayPhase {
    Uninitialized,
    Ready,
}

/// What a command did besides mutating the snapshot
struct Step {
    reply: Reply,
    diff: EngineDiff,
    badge: bool,
}

impl Step {
    fn done() -> Self {
        Self {
            reply: Reply::Done,
            diff: EngineDiff::default(),
            badge: false,
        }
    }

    fn created(id: u32) -> Self {
        Self {
            reply: Reply::Created { id },
            ..Self::done()
        }
    }

    fn with_diff(mut self, diff: EngineDiff) -> Self {
        self.diff = diff;
        self
    }

    fn with_badge(mut self) -> Self {
        self.badge = true;
        self
    }
}

#[derive(Clone)]
pub struct StateGateway {
    storage: Arc<dyn StateStorage>,
    synchronizer: ActivationSynchronizer,
    config: GatewayConfig,
    events: broadcast::Sender<GatewayEvent>,
    ready: Arc<AtomicBool>,
}

impl StateGateway {
    pub fn new(
        storage: Arc<dyn StateStorage>,
        engine: Arc<dyn RuleEngine>,
        config: GatewayConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            storage,
            synchronizer: ActivationSynchronizer::new(engine),
            config,
            events,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> GatewayPhase {
        if self.ready.load(Ordering::Acquire) {
            GatewayPhase::Ready
        } else {
            GatewayPhase::Uninitialized
        }
    }

    fn default_requests(&self) -> RequestsState {
        RequestsState::new(
            self.config.default_requests_limit.max(1),
            self.config.default_listening,
        )
    }

    fn default_state(&self) -> PersistedState {
        PersistedState {
            rules: RulesState::default(),
            requests: self.default_requests(),
        }
    }

    /// Host install/update hook. A fresh install always starts from defaults.
    pub async fn install(&self, reason: InstallReason) -> Result<PersistedState> {
        match reason {
            InstallReason::Install => {
                let state = self.default_state();
                self.commit(&state).await?;
                self.ready.store(true, Ordering::Release);
                info!("Installed with default state");
                self.emit(GatewayEvent::Badge(Badge::for_count(0)));
                Ok(state)
            }
            InstallReason::Update => self.initialize().await,
        }
    }

    /// Load the snapshot, creating the default one if needed, and become ready
    pub async fn initialize(&self) -> Result<PersistedState> {
        let state = self.load().await?;
        self.ready.store(true, Ordering::Release);
        info!(
            "Gateway ready: {} rules, {} active",
            state.rules.order.len(),
            state.rules.active.len()
        );
        self.emit(GatewayEvent::Badge(Badge::for_count(state.rules.active.len())));
        Ok(state)
    }

    /// Current persisted snapshot
    pub async fn snapshot(&self) -> Result<PersistedState> {
        self.load().await
    }

    pub async fn handle(&self, command: Command) -> Result<Reply> {
        if command == Command::Unknown {
            debug!("Ignoring unknown command");
            return Ok(Reply::Ignored);
        }
        if self.phase() == GatewayPhase::Uninitialized {
            self.initialize().await?;
        }

        let state = self.load().await?;
        if command == Command::Init {
            return Ok(Reply::State(state));
        }

        let mut store = RuleStore::from(state.rules);
        let mut log = RequestLog::from(state.requests);

        let step = match command {
            Command::Init | Command::Unknown => Step::done(),
            Command::SaveRule { rule_id, rule } => {
                let (id, diff) = store.save_rule(rule_id.filter(|id| *id != 0), rule)?;
                Step::created(id).with_diff(diff)
            }
            Command::CopyRule { id } => Step::created(store.copy_rule(id)?),
            Command::DeleteRules { ids } => {
                let ids = ids.unwrap_or_default();
                Step::done()
                    .with_diff(store.delete_rules(&ids, true))
                    .with_badge()
            }
            Command::EnableRules { ids } => {
                Step::done().with_diff(store.enable_rules(&ids)?).with_badge()
            }
            Command::DisableRules { ids } => {
                Step::done().with_diff(store.disable_rules(&ids)).with_badge()
            }
            Command::Activate => Step::done().with_diff(store.activate_all()?).with_badge(),
            Command::Deactivate => Step::done().with_diff(store.deactivate_all()).with_badge(),
            Command::MoveRuleUp { id } => {
                store.move_rule_up(id);
                Step::done()
            }
            Command::MoveRuleDown { id } => {
                store.move_rule_down(id);
                Step::done()
            }
            Command::SaveRuleset { data } => {
                let id = store.save_ruleset(
                    data.id.filter(|id| *id != 0),
                    Ruleset::new(data.tag, data.rules),
                )?;
                Step::created(id)
            }
            Command::DeleteRuleset { ids } => {
                store.delete_rulesets(&ids);
                Step::done()
            }
            Command::MoveRulesetUp { id } => {
                store.move_ruleset_up(id);
                Step::done()
            }
            Command::MoveRulesetDown { id } => {
                store.move_ruleset_down(id);
                Step::done()
            }
            Command::SetRulesConfig { config } => {
                let diff = store.replace_config(config)?;
                log = RequestLog::from(self.default_requests());
                Step::done().with_diff(diff).with_badge()
            }
            Command::SetRequestsLimit { limit } => {
                log.set_capacity(limit)?;
                Step::done()
            }
            Command::StartListen => {
                log.set_listening(true);
                Step::done()
            }
            Command::StopListen => {
                log.set_listening(false);
                Step::done()
            }
            Command::DeleteRequests { ids } => {
                log.delete_entries(&ids);
                Step::done()
            }
        };

        if let Err(e) = self.synchronizer.apply(&step.diff).await {
            warn!("Engine rejected diff, command discarded: {}", e);
            return Err(e.into());
        }
        if step.badge {
            self.emit(GatewayEvent::Badge(Badge::for_count(store.active_count())));
        }

        let state = PersistedState {
            rules: store.into_state(),
            requests: log.into_state(),
        };
        self.commit(&state).await?;
        Ok(step.reply)
    }

    /// Log a match reported by the engine. Returns the entry, or `None`
    /// when the log is not listening.
    pub async fn record_match(&self, event: MatchEvent) -> Result<Option<RequestLogEntry>> {
        self.record_match_at(event, Utc::now()).await
    }

    pub async fn record_match_at(
        &self,
        event: MatchEvent,
        at: DateTime<Utc>,
    ) -> Result<Option<RequestLogEntry>> {
        let state = self.load().await?;
        if !state.requests.is_listen {
            return Ok(None);
        }

        let tag = state.rules.items.get(&event.rule_id).map(|rule| rule.tag.clone());
        let entry = RequestLogEntry::new(
            event.request,
            MatchedRule {
                id: event.rule_id,
                tag,
            },
            at,
        );

        let mut log = RequestLog::from(state.requests);
        log.record(entry.clone());
        let state = PersistedState {
            rules: state.rules,
            requests: log.into_state(),
        };
        self.commit(&state).await?;
        Ok(Some(entry))
    }

    /// Re-send the persisted active set to the engine. Returns the active count.
    pub async fn restore_engine(&self) -> Result<usize> {
        let state = self.load().await?;
        let diff = ActivationSynchronizer::plan_restore(&state.rules.items, &state.rules.active);
        self.synchronizer.apply(&diff).await?;

        let count = state.rules.active.len();
        info!("Restored {} active rules into the engine", count);
        self.emit(GatewayEvent::Badge(Badge::for_count(count)));
        Ok(count)
    }

    /// Load the snapshot, re-initializing it when a part is missing or unusable
    async fn load(&self) -> Result<PersistedState> {
        let raw = self.storage.load().await?;
        match decode(&raw) {
            Ok(state) => Ok(state),
            Err(reason) => {
                warn!("Persisted state unusable ({}), re-initializing", reason);
                let orphaned = discarded_active_ids(&raw);
                if !orphaned.is_empty() {
                    warn!("Removing orphaned active rules {:?} from the engine", orphaned);
                    self.synchronizer
                        .apply(&EngineDiff {
                            add_rules: Vec::new(),
                            remove_rule_ids: orphaned,
                        })
                        .await?;
                }
                let state = self.default_state();
                self.commit(&state).await?;
                Ok(state)
            }
        }
    }

    async fn commit(&self, state: &PersistedState) -> Result<()> {
        self.storage.save(state).await?;
        self.emit(GatewayEvent::StateChanged(Arc::new(state.clone())));
        Ok(())
    }

    fn emit(&self, event: GatewayEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn decode(raw: &RawSnapshot) -> std::result::Result<PersistedState, String> {
    let rules = raw.rules.clone().ok_or("missing rules")?;
    let requests = raw.requests.clone().ok_or("missing requests")?;

    let rules: RulesState =
        serde_json::from_value(rules).map_err(|e| format!("invalid rules: {}", e))?;
    let mut requests: RequestsState =
        serde_json::from_value(requests).map_err(|e| format!("invalid requests: {}", e))?;

    RuleStore::from(rules.clone())
        .check_invariants()
        .map_err(|e| format!("inconsistent rules: {}", e))?;
    if requests.limit == 0 {
        return Err("request limit is zero".to_string());
    }
    requests.items.truncate(requests.limit);

    Ok(PersistedState { rules, requests })
}

/// Active ids still readable from a rules document that failed to decode
fn discarded_active_ids(raw: &RawSnapshot) -> Vec<RuleId> {
    raw.rules
        .as_ref()
        .and_then(|rules| rules.get("active"))
        .and_then(|active| serde_json::from_value::<Vec<RuleId>>(active.clone()).ok())
        .unwrap_or_default()
}
