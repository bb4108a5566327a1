//! Agent output wire types.
//!
//! Every agent, provider-backed or fixture-backed, returns one `AgentOutput`.
//! The merge engine is the only consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{DecisionKey, DecisionOption, MetaRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// One JSON-pointer write with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub meta: PatchMeta,
}

/// Provenance carried by a patch: the claim-level slice of `MetaRef`.
pub type PatchMeta = MetaRef;

impl Patch {
    pub fn replace(path: impl Into<String>, value: Value, meta: PatchMeta) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value,
            meta,
        }
    }
}

/// A decision proposal: options plus a recommendation, never a selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub decision_key: DecisionKey,
    #[serde(default)]
    pub options: Vec<DecisionOption>,
    #[serde(default)]
    pub recommended_option_id: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PatchMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub claim: String,
    #[serde(default = "default_fact_confidence")]
    pub confidence: f64,
    #[serde(default, alias = "supporting_sources")]
    pub sources: Vec<String>,
}

fn default_fact_confidence() -> f64 {
    0.6
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssumptionRecord {
    pub statement: String,
    #[serde(default)]
    pub how_to_validate: String,
    #[serde(default = "default_assumption_confidence")]
    pub confidence: f64,
}

fn default_assumption_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAction {
    Create,
    Update,
    Finalize,
}

/// Targeted graph node mutation, resolved by stable node id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub node_id: String,
    pub action: NodeAction,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "override", default)]
    pub override_: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub model: String,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// The full structured diff one agent contributes in one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent: String,
    #[serde(default = "default_agent_version")]
    pub agent_version: String,
    #[serde(default)]
    pub pillar: String,
    pub run_id: String,
    pub produced_at: DateTime<Utc>,
    #[serde(default)]
    pub patches: Vec<Patch>,
    #[serde(default)]
    pub proposals: Vec<Proposal>,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub assumptions: Vec<AssumptionRecord>,
    #[serde(default)]
    pub risks: Vec<Value>,
    #[serde(default)]
    pub required_inputs: Vec<String>,
    #[serde(default)]
    pub node_updates: Vec<NodeUpdate>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

fn default_agent_version() -> String {
    "1.0.0".to_string()
}

impl AgentOutput {
    /// Empty output for an agent that has nothing to contribute this pass.
    pub fn empty(agent: &str, run_id: &str) -> Self {
        Self {
            agent: agent.to_string(),
            agent_version: default_agent_version(),
            pillar: String::new(),
            run_id: run_id.to_string(),
            produced_at: Utc::now(),
            patches: Vec::new(),
            proposals: Vec::new(),
            facts: Vec::new(),
            assumptions: Vec::new(),
            risks: Vec::new(),
            required_inputs: Vec::new(),
            node_updates: Vec::new(),
            execution_time_ms: 0,
            token_usage: TokenUsage::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_output_deserializes_with_defaults() {
        let raw = json!({
            "agent": "icp_agent",
            "run_id": "run_x",
            "produced_at": "2026-01-01T00:00:00Z",
            "patches": [
                {
                    "op": "replace",
                    "path": "/decisions/icp/profile",
                    "value": {"buyer_role": "Head of Sales"},
                    "meta": {"source_type": "inference", "confidence": 0.7, "sources": []}
                }
            ]
        });
        let output: AgentOutput = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(output.agent, "icp_agent");
        assert_eq!(output.agent_version, "1.0.0");
        assert_eq!(output.patches.len(), 1);
        assert!(output.proposals.is_empty());
        assert_eq!(output.token_usage.total(), 0);
    }

    #[test]
    fn test_fact_accepts_supporting_sources_alias() {
        let raw = json!({
            "claim": "two competitors identified",
            "confidence": 0.78,
            "supporting_sources": ["https://example.com/a"]
        });
        let fact: Fact = serde_json::from_value(raw).expect("deserialize");
        assert_eq!(fact.sources.len(), 1);
    }

    #[test]
    fn test_node_update_override_defaults_false() {
        let raw = json!({
            "node_id": "market.icp.summary",
            "action": "finalize",
            "payload": {}
        });
        let update: NodeUpdate = serde_json::from_value(raw).expect("deserialize");
        assert!(!update.override_);
        assert_eq!(update.action, NodeAction::Finalize);
    }
}
