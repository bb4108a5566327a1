//! Checkpoint store contract.
//!
//! Append-only snapshots keyed by `(run_id, index)`. Implementations live in
//! the stores crate; this module only fixes the trait and error shape.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::output::Patch;
use crate::state::{diff_states, CanonicalState};

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// One durable `(run_id, index, state)` tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub run_id: String,
    pub index: u64,
    pub state: serde_json::Value,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only checkpoint log, one writer per run. The checkpoint index is
/// strictly monotonic per run; no event referring to a state version may be
/// published before that version is durably appended here.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Append a snapshot; returns the new checkpoint index.
    async fn append(&self, run_id: &str, state: &CanonicalState) -> Result<u64, StoreError>;

    /// Latest `(index, state)` for a run, if any checkpoint exists.
    async fn latest(&self, run_id: &str) -> Result<Option<(u64, CanonicalState)>, StoreError>;

    /// State at a specific checkpoint index.
    async fn get(&self, run_id: &str, index: u64) -> Result<Option<CanonicalState>, StoreError>;

    /// Patch list transforming checkpoint `a` into checkpoint `b`.
    async fn diff(&self, run_id: &str, a: u64, b: u64) -> Result<Vec<Patch>, StoreError> {
        let left = self.get(run_id, a).await?.ok_or_else(|| {
            StoreError::NotFound(format!("checkpoint {a} for {run_id}"))
        })?;
        let right = self.get(run_id, b).await?.ok_or_else(|| {
            StoreError::NotFound(format!("checkpoint {b} for {run_id}"))
        })?;
        diff_states(&left, &right).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}
