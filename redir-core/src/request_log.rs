//! Bounded log of observed request/match events

use crate::error::RedirError;
use redir_common::{RequestLogEntry, RequestsState};
use std::collections::HashSet;
use tracing::debug;

/// Newest-first buffer that never holds more than its capacity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestLog {
    state: RequestsState,
}

impl From<RequestsState> for RequestLog {
    fn from(state: RequestsState) -> Self {
        Self { state }
    }
}

impl RequestLog {
    pub fn state(&self) -> &RequestsState {
        &self.state
    }

    pub fn into_state(self) -> RequestsState {
        self.state
    }

    pub fn entries(&self) -> &[RequestLogEntry] {
        &self.state.items
    }

    pub fn capacity(&self) -> usize {
        self.state.limit
    }

    pub fn is_listening(&self) -> bool {
        self.state.is_listen
    }

    /// Prepend an entry while listening, dropping the oldest one past capacity.
    /// Returns whether the entry was recorded.
    pub fn record(&mut self, entry: RequestLogEntry) -> bool {
        if !self.state.is_listen {
            return false;
        }
        self.state.items.insert(0, entry);
        if self.state.items.len() > self.state.limit {
            self.state.items.truncate(self.state.limit);
        }
        true
    }

    /// Change the capacity, keeping the most recent entries
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), RedirError> {
        if capacity == 0 {
            return Err(RedirError::validation("limit", "must be at least 1"));
        }
        self.state.items.truncate(capacity);
        self.state.limit = capacity;
        debug!("Request log capacity set to {}", capacity);
        Ok(())
    }

    pub fn set_listening(&mut self, listening: bool) {
        self.state.is_listen = listening;
    }

    /// Remove entries by id, returning how many were removed
    pub fn delete_entries(&mut self, ids: &[String]) -> usize {
        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let before = self.state.items.len();
        self.state.items.retain(|entry| !targets.contains(entry.id.as_str()));
        before - self.state.items.len()
    }
}
