//! Typed run events.
//!
//! The per-run event log is both the UI feed and the audit trail. Ordering is
//! strict within a run (`seq` is monotonic); across runs there are no
//! guarantees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::new_event_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    AgentStarted,
    AgentProgress,
    AgentCompleted,
    AgentFailed,
    AgentSkipped,
    StateCheckpointed,
    NodeCreated,
    NodeUpdated,
    ValidatorWarning,
    RunBlocked,
    RunCompleted,
    RunFailed,
    RunResumed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::RunStarted => "run_started",
            EventKind::AgentStarted => "agent_started",
            EventKind::AgentProgress => "agent_progress",
            EventKind::AgentCompleted => "agent_completed",
            EventKind::AgentFailed => "agent_failed",
            EventKind::AgentSkipped => "agent_skipped",
            EventKind::StateCheckpointed => "state_checkpointed",
            EventKind::NodeCreated => "node_created",
            EventKind::NodeUpdated => "node_updated",
            EventKind::ValidatorWarning => "validator_warning",
            EventKind::RunBlocked => "run_blocked",
            EventKind::RunCompleted => "run_completed",
            EventKind::RunFailed => "run_failed",
            EventKind::RunResumed => "run_resumed",
        }
    }
}

/// One event on a run's ordered log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub event_id: String,
    pub run_id: String,
    pub scenario_id: String,
    /// Strictly monotonic position within the run.
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
}

impl RunEvent {
    pub fn new(run_id: &str, scenario_id: &str, seq: u64, kind: EventKind, data: Value) -> Self {
        Self {
            event_id: new_event_id(),
            run_id: run_id.to_string(),
            scenario_id: scenario_id.to_string(),
            seq,
            ts: Utc::now(),
            kind,
            data,
        }
    }
}
