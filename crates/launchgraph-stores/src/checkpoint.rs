//! Checkpoint store backends.
//!
//! Append-only per-run snapshot logs. One writer per run; the index is
//! strictly monotonic. The in-memory backend is the dev/test default; Redis
//! and Postgres back production deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use launchgraph_core::ids::new_snapshot_id;
use launchgraph_core::state::CanonicalState;
use launchgraph_core::store::{CheckpointStore, Snapshot, StoreError};

fn snapshot_from_state(run_id: &str, index: u64, state: &CanonicalState) -> Result<Snapshot, StoreError> {
    Ok(Snapshot {
        id: new_snapshot_id(),
        run_id: run_id.to_string(),
        index,
        state: state
            .to_value()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        hash: state
            .state_hash()
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        created_at: Utc::now(),
    })
}

fn state_from_snapshot(snapshot: &Snapshot) -> Result<CanonicalState, StoreError> {
    CanonicalState::from_value(snapshot.state.clone())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

/// In-memory implementation for development and testing.
pub struct InMemoryCheckpointStore {
    runs: RwLock<HashMap<String, Vec<Snapshot>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of checkpoints appended for a run.
    pub fn len(&self, run_id: &str) -> usize {
        self.runs
            .read()
            .map(|runs| runs.get(run_id).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn append(&self, run_id: &str, state: &CanonicalState) -> Result<u64, StoreError> {
        let mut runs = self
            .runs
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let log = runs.entry(run_id.to_string()).or_default();
        let index = log.len() as u64;
        log.push(snapshot_from_state(run_id, index, state)?);
        Ok(index)
    }

    async fn latest(&self, run_id: &str) -> Result<Option<(u64, CanonicalState)>, StoreError> {
        let runs = self
            .runs
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        match runs.get(run_id).and_then(|log| log.last()) {
            Some(snapshot) => Ok(Some((snapshot.index, state_from_snapshot(snapshot)?))),
            None => Ok(None),
        }
    }

    async fn get(&self, run_id: &str, index: u64) -> Result<Option<CanonicalState>, StoreError> {
        let runs = self
            .runs
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        match runs.get(run_id).and_then(|log| log.get(index as usize)) {
            Some(snapshot) => Ok(Some(state_from_snapshot(snapshot)?)),
            None => Ok(None),
        }
    }
}

/// Redis implementation: a counter plus one key per checkpoint index.
pub struct RedisCheckpointStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisCheckpointStore {
    pub fn new(connection_url: &str, key_prefix: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(connection_url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
        })
    }

    fn counter_key(&self, run_id: &str) -> String {
        format!("{}:run:{}:ckpt:seq", self.key_prefix, run_id)
    }

    fn checkpoint_key(&self, run_id: &str, index: u64) -> String {
        format!("{}:run:{}:ckpt:{}", self.key_prefix, run_id, index)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    async fn load(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        run_id: &str,
        index: u64,
    ) -> Result<Option<Snapshot>, StoreError> {
        let payload: Option<String> = conn
            .get(self.checkpoint_key(run_id, index))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        match payload {
            Some(payload) => {
                let snapshot: Snapshot = serde_json::from_str(&payload)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn append(&self, run_id: &str, state: &CanonicalState) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let next: i64 = conn
            .incr(self.counter_key(run_id), 1_i64)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let index = (next - 1) as u64;
        let snapshot = snapshot_from_state(run_id, index, state)?;
        let payload = serde_json::to_string(&snapshot)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        conn.set::<_, _, ()>(self.checkpoint_key(run_id, index), payload)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(index)
    }

    async fn latest(&self, run_id: &str) -> Result<Option<(u64, CanonicalState)>, StoreError> {
        let mut conn = self.connection().await?;
        let count: Option<i64> = conn
            .get(self.counter_key(run_id))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let Some(count) = count.filter(|c| *c > 0) else {
            return Ok(None);
        };
        let index = (count - 1) as u64;
        match self.load(&mut conn, run_id, index).await? {
            Some(snapshot) => Ok(Some((index, state_from_snapshot(&snapshot)?))),
            None => Ok(None),
        }
    }

    async fn get(&self, run_id: &str, index: u64) -> Result<Option<CanonicalState>, StoreError> {
        let mut conn = self.connection().await?;
        match self.load(&mut conn, run_id, index).await? {
            Some(snapshot) => Ok(Some(state_from_snapshot(&snapshot)?)),
            None => Ok(None),
        }
    }
}

/// PostgreSQL implementation for append-only checkpoint persistence.
pub struct PostgresCheckpointStore {
    pool: PgPool,
    table_name: String,
}

impl PostgresCheckpointStore {
    pub async fn new(
        connection_url: &str,
        table_prefix: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(connection_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let prefix = normalize_table_prefix(&table_prefix.into());
        let table_name = format!("{}_checkpoints", prefix);
        let this = Self { pool, table_name };
        this.init_schema().await?;
        Ok(this)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                idx BIGINT NOT NULL,
                state_jsonb JSONB NOT NULL,
                hash TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (run_id, idx)
            )",
            self.table_name
        );
        sqlx::query(&create_table)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let idx_run = format!(
            "CREATE INDEX IF NOT EXISTS {0}_run_idx ON {1} (run_id, idx DESC)",
            self.table_name, self.table_name
        );
        sqlx::query(&idx_run)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn append(&self, run_id: &str, state: &CanonicalState) -> Result<u64, StoreError> {
        let snapshot = snapshot_from_state(run_id, 0, state)?;
        let sql = format!(
            "INSERT INTO {0} (id, run_id, idx, state_jsonb, hash, created_at)
             SELECT $1, $2, COALESCE(MAX(idx) + 1, 0), $3, $4, $5 FROM {0} WHERE run_id = $2
             RETURNING idx",
            self.table_name
        );
        let row = sqlx::query(&sql)
            .bind(&snapshot.id)
            .bind(run_id)
            .bind(&snapshot.state)
            .bind(&snapshot.hash)
            .bind(snapshot.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let index: i64 = row
            .try_get("idx")
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(index as u64)
    }

    async fn latest(&self, run_id: &str) -> Result<Option<(u64, CanonicalState)>, StoreError> {
        let sql = format!(
            "SELECT idx, state_jsonb FROM {} WHERE run_id = $1 ORDER BY idx DESC LIMIT 1",
            self.table_name
        );
        let row = sqlx::query(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        match row {
            Some(row) => {
                let index: i64 = row
                    .try_get("idx")
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                let value: serde_json::Value = row
                    .try_get("state_jsonb")
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                let state = CanonicalState::from_value(value)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some((index as u64, state)))
            }
            None => Ok(None),
        }
    }

    async fn get(&self, run_id: &str, index: u64) -> Result<Option<CanonicalState>, StoreError> {
        let sql = format!(
            "SELECT state_jsonb FROM {} WHERE run_id = $1 AND idx = $2",
            self.table_name
        );
        let row = sqlx::query(&sql)
            .bind(run_id)
            .bind(index as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        match row {
            Some(row) => {
                let value: serde_json::Value = row
                    .try_get("state_jsonb")
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                let state = CanonicalState::from_value(value)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }
}

fn normalize_table_prefix(raw: &str) -> String {
    let candidate = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string();
    if candidate.is_empty() {
        "launchgraph".to_string()
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchgraph_core::state::{Constraints, Idea};

    fn sample_state() -> CanonicalState {
        CanonicalState::new("proj_1", "scn_1", Idea::default(), Constraints::default())
    }

    #[test]
    fn test_append_returns_monotonic_indices() {
        tokio_test::block_on(async {
            let store = InMemoryCheckpointStore::new();
            let state = sample_state();
            assert_eq!(store.append("run_1", &state).await.expect("append"), 0);
            assert_eq!(store.append("run_1", &state).await.expect("append"), 1);
            assert_eq!(store.append("run_2", &state).await.expect("append"), 0);
            assert_eq!(store.len("run_1"), 2);
        });
    }

    #[test]
    fn test_latest_and_get_round_trip() {
        tokio_test::block_on(async {
            let store = InMemoryCheckpointStore::new();
            let mut state = sample_state();
            store.append("run_1", &state).await.expect("append");
            state.decisions.pricing.metric = "per_seat".to_string();
            store.append("run_1", &state).await.expect("append");

            let (index, latest) = store
                .latest("run_1")
                .await
                .expect("latest")
                .expect("present");
            assert_eq!(index, 1);
            assert_eq!(latest.decisions.pricing.metric, "per_seat");

            let first = store
                .get("run_1", 0)
                .await
                .expect("get")
                .expect("present");
            assert!(first.decisions.pricing.metric.is_empty());
            assert!(store.get("run_1", 9).await.expect("get").is_none());
        });
    }

    #[test]
    fn test_diff_between_checkpoints_yields_patch_list() {
        tokio_test::block_on(async {
            let store = InMemoryCheckpointStore::new();
            let mut state = sample_state();
            store.append("run_1", &state).await.expect("append");
            state.decisions.pricing.metric = "per_seat".to_string();
            store.append("run_1", &state).await.expect("append");

            let patches = store.diff("run_1", 0, 1).await.expect("diff");
            assert!(patches
                .iter()
                .any(|p| p.path == "/decisions/pricing/metric"));
        });
    }

    #[test]
    fn test_latest_on_unknown_run_is_none() {
        tokio_test::block_on(async {
            let store = InMemoryCheckpointStore::new();
            assert!(store.latest("run_missing").await.expect("latest").is_none());
        });
    }
}
