//! Wire DTOs for the service facade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use launchgraph_core::output::Patch;
use launchgraph_core::state::{Constraints, DecisionKey, Idea, IntakeAnswer};
use launchgraph_core::validator::ValidationReport;

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectCreateRequest {
    pub project_name: String,
    pub idea: Idea,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectView {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioView {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCreateResponse {
    pub project: ProjectView,
    pub scenario: ScenarioView,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntakeSubmitRequest {
    pub answers: Vec<IntakeAnswer>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntakeSubmitResponse {
    pub scenario_id: String,
    pub intake_answers: usize,
    pub open_questions: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunStartRequest {
    #[serde(default)]
    pub changed_decision: Option<DecisionKey>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Test hook: fail deterministically at this agent.
    #[serde(default)]
    pub simulate_failure_at_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Blocked,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub run_id: String,
    pub scenario_id: String,
    pub status: RunStatus,
    pub stream_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusResponse {
    pub run_id: String,
    pub scenario_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from_run_id: Option<String>,
    pub checkpoint_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecisionSelectRequest {
    #[serde(default)]
    pub selected_option_id: Option<String>,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub custom_value: Option<Value>,
    #[serde(default)]
    pub primary_channels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionSelectResponse {
    pub scenario_id: String,
    pub decision_key: DecisionKey,
    pub decision: Value,
    pub validator: ValidationReport,
    /// Partial rerun started by this override, if the selection changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerun: Option<RunResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompareRequest {
    pub left_scenario_id: String,
    pub right_scenario_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompareResponse {
    pub left_scenario_id: String,
    pub right_scenario_id: String,
    pub decision_diff: Value,
    pub confidence_delta: f64,
    pub risk_delta: i64,
    pub patches: Vec<Patch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompleteResponse {
    pub scenario_id: String,
    pub status: String,
}
