//! Persisted-state storage
//!
//! The snapshot is stored as two JSON documents under the keys `rules` and
//! `requests`. `load` hands back the raw documents so the gateway can decide
//! whether they are usable; `save` always writes both together.

use crate::config::StorageConfig;
use crate::error::StorageError;
use async_trait::async_trait;
use redir_common::PersistedState;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const RULES_KEY: &str = "rules";
pub const REQUESTS_KEY: &str = "requests";

/// Raw persisted documents; `None` when a key is absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSnapshot {
    pub rules: Option<Value>,
    pub requests: Option<Value>,
}

impl RawSnapshot {
    pub fn from_state(state: &PersistedState) -> Result<Self, StorageError> {
        Ok(Self {
            rules: Some(serde_json::to_value(&state.rules)?),
            requests: Some(serde_json::to_value(&state.requests)?),
        })
    }
}

/// Durable home of the persisted snapshot
#[async_trait]
pub trait StateStorage: Send + Sync {
    async fn load(&self) -> Result<RawSnapshot, StorageError>;

    /// Write the whole snapshot; both documents or neither
    async fn save(&self, state: &PersistedState) -> Result<(), StorageError>;
}

/// Storage kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RwLock<HashMap<String, Value>>,
    saves: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed storage with raw documents, e.g. to simulate a damaged snapshot
    pub fn with_raw(raw: RawSnapshot) -> Self {
        let mut values = HashMap::new();
        if let Some(rules) = raw.rules {
            values.insert(RULES_KEY.to_string(), rules);
        }
        if let Some(requests) = raw.requests {
            values.insert(REQUESTS_KEY.to_string(), requests);
        }
        Self {
            values: RwLock::new(values),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of completed saves
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StateStorage for MemoryStorage {
    async fn load(&self) -> Result<RawSnapshot, StorageError> {
        let values = self.values.read().await;
        Ok(RawSnapshot {
            rules: values.get(RULES_KEY).cloned(),
            requests: values.get(REQUESTS_KEY).cloned(),
        })
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StorageError> {
        let raw = RawSnapshot::from_state(state)?;
        let mut values = self.values.write().await;
        if let Some(rules) = raw.rules {
            values.insert(RULES_KEY.to_string(), rules);
        }
        if let Some(requests) = raw.requests {
            values.insert(REQUESTS_KEY.to_string(), requests);
        }
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Storage backed by a SQLite key/value table
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: Pool<Sqlite>,
}

impl SqliteStorage {
    pub async fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        let options =
            SqliteConnectOptions::from_str(&config.database_url)?.create_if_missing(true);

        // Every connection to `:memory:` opens its own database
        let max_connections = if config.database_url.contains(":memory:") {
            1
        } else {
            config.max_connections.max(1)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS extension_state (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!("State storage ready at {}", config.database_url);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    async fn read_key(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let row = sqlx::query("SELECT value FROM extension_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let text: String = row.try_get("value")?;
        match serde_json::from_str(&text) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Stored '{}' document is not valid JSON: {}", key, e);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl StateStorage for SqliteStorage {
    async fn load(&self) -> Result<RawSnapshot, StorageError> {
        Ok(RawSnapshot {
            rules: self.read_key(RULES_KEY).await?,
            requests: self.read_key(REQUESTS_KEY).await?,
        })
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StorageError> {
        let rules = serde_json::to_string(&state.rules)?;
        let requests = serde_json::to_string(&state.requests)?;

        let mut tx = self.pool.begin().await?;
        for (key, value) in [(RULES_KEY, rules), (REQUESTS_KEY, requests)] {
            sqlx::query(
                r#"
                INSERT INTO extension_state (key, value)
                VALUES (?, ?)
                ON CONFLICT(key) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.load().await.unwrap(), RawSnapshot::default());

        storage.save(&PersistedState::default()).await.unwrap();
        let raw = storage.load().await.unwrap();
        assert_eq!(raw.requests.unwrap()["limit"], json!(100));
        assert_eq!(raw.rules.unwrap()["order"], json!([]));
        assert_eq!(storage.saves(), 1);
    }

    #[tokio::test]
    async fn test_memory_storage_seeded() {
        let storage = MemoryStorage::with_raw(RawSnapshot {
            rules: Some(json!({"order": [1]})),
            requests: None,
        });
        let raw = storage.load().await.unwrap();
        assert!(raw.rules.is_some());
        assert!(raw.requests.is_none());
    }

    #[tokio::test]
    async fn test_sqlite_storage_in_memory() {
        let config = StorageConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 4,
        };
        let storage = SqliteStorage::connect(&config).await.unwrap();
        assert_eq!(storage.load().await.unwrap(), RawSnapshot::default());

        let mut state = PersistedState::default();
        state.requests.limit = 7;
        storage.save(&state).await.unwrap();
        storage.save(&state).await.unwrap();

        let raw = storage.load().await.unwrap();
        assert_eq!(raw.requests.unwrap()["limit"], json!(7));
        assert!(raw.rules.is_some());
    }

    #[tokio::test]
    async fn test_sqlite_invalid_json_reads_as_missing() {
        let config = StorageConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
        };
        let storage = SqliteStorage::connect(&config).await.unwrap();
        sqlx::query("INSERT INTO extension_state (key, value) VALUES ('rules', '{broken')")
            .execute(storage.pool())
            .await
            .unwrap();

        let raw = storage.load().await.unwrap();
        assert!(raw.rules.is_none());
    }
}
