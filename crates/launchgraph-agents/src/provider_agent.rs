//! Provider-backed agent: prompt → provider → JSON extraction → `AgentOutput`.
//!
//! Agents share one pipeline and differ only in their instruction block and
//! which provider answers them (search-grounded for evidence agents, plain
//! LLM for the rest).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use launchgraph_core::output::{
    AgentOutput, AssumptionRecord, Fact, NodeUpdate, Patch, Proposal, TokenUsage,
};
use launchgraph_core::state::{validate_agent_output_value, CanonicalState};

use crate::agent::{Agent, AgentContext};
use crate::provider::{ProviderClient, ProviderError};

/// Which upstream answers an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Search-grounded provider (evidence gathering).
    Search,
    /// Plain LLM completion.
    Llm,
}

/// The body fields an agent is allowed to return; everything else is wrapped
/// on by the pipeline.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ParsedBody {
    #[serde(default)]
    patches: Vec<Patch>,
    #[serde(default)]
    proposals: Vec<Proposal>,
    #[serde(default)]
    facts: Vec<Fact>,
    #[serde(default)]
    assumptions: Vec<AssumptionRecord>,
    #[serde(default)]
    risks: Vec<Value>,
    #[serde(default)]
    required_inputs: Vec<String>,
    #[serde(default)]
    node_updates: Vec<NodeUpdate>,
}

pub struct ProviderAgent {
    name: String,
    pillar: String,
    kind: ProviderKind,
    instruction: String,
    client: Arc<ProviderClient>,
}

impl ProviderAgent {
    pub fn new(
        name: impl Into<String>,
        pillar: impl Into<String>,
        kind: ProviderKind,
        instruction: impl Into<String>,
        client: Arc<ProviderClient>,
    ) -> Self {
        Self {
            name: name.into(),
            pillar: pillar.into(),
            kind,
            instruction: instruction.into(),
            client,
        }
    }

    fn build_prompt(&self, state: &CanonicalState, ctx: &AgentContext) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!(
            "You are the {} in a go-to-market planning pipeline.\n\n",
            self.name
        ));
        prompt.push_str(&format!("Idea: {}\n", state.idea.name));
        prompt.push_str(&format!("One-liner: {}\n", state.idea.one_liner));
        prompt.push_str(&format!("Problem: {}\n", state.idea.problem));
        prompt.push_str(&format!("Region: {}\n", state.idea.target_region));
        prompt.push_str(&format!(
            "Constraints: team_size={}, timeline_weeks={}, budget_usd_monthly={}, compliance={:?}\n",
            state.constraints.team_size,
            state.constraints.timeline_weeks,
            state.constraints.budget_usd_monthly,
            state.constraints.compliance_level,
        ));
        if !state.inputs.intake_answers.is_empty() {
            prompt.push_str("Intake answers:\n");
            for answer in &state.inputs.intake_answers {
                prompt.push_str(&format!("- {}: {}\n", answer.question_id, answer.value));
            }
        }
        if let Some(changed) = ctx.changed_decision {
            prompt.push_str(&format!(
                "\nThe user changed the '{changed}' decision; rework only what depends on it.\n"
            ));
        }
        prompt.push('\n');
        prompt.push_str(self.instruction.trim());
        prompt.push_str(
            "\n\nReturn ONE JSON object with any of these keys: patches, proposals, facts, \
             assumptions, risks, required_inputs, node_updates. Each patch needs op/path/value/meta \
             where meta is {source_type, confidence, sources}. Use evidence source_type only when \
             you cite sources. Return JSON only.\n",
        );
        prompt
    }
}

#[async_trait]
impl Agent for ProviderAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn retryable(&self) -> bool {
        true
    }

    async fn produce(
        &self,
        state: &CanonicalState,
        ctx: &AgentContext,
    ) -> Result<AgentOutput, ProviderError> {
        let timer = Instant::now();
        let prompt = self.build_prompt(state, ctx);
        info!(agent = %self.name, prompt_len = prompt.len(), "provider agent request prepared");

        let raw = match self.kind {
            ProviderKind::Search => self.client.perplexity_json(&prompt).await?,
            ProviderKind::Llm => self.client.gemini_json(&prompt).await?,
        };

        let body: ParsedBody = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::Response(format!("invalid agent body: {e}")))?;

        let response_len = raw.to_string().len();
        let output = AgentOutput {
            agent: self.name.clone(),
            agent_version: "1.0.0".to_string(),
            pillar: self.pillar.clone(),
            run_id: ctx.run_id.clone(),
            produced_at: Utc::now(),
            patches: body.patches,
            proposals: body.proposals,
            facts: body.facts,
            assumptions: body.assumptions,
            risks: body.risks,
            required_inputs: body.required_inputs,
            node_updates: body.node_updates,
            execution_time_ms: timer.elapsed().as_millis() as u64,
            token_usage: TokenUsage {
                // Rough estimate: ~4 chars per token.
                input_tokens: (prompt.len() / 4) as u64,
                output_tokens: (response_len / 4) as u64,
                model: match self.kind {
                    ProviderKind::Search => "sonar-pro".to_string(),
                    ProviderKind::Llm => "gemini-2.0-flash".to_string(),
                },
            },
        };

        let value = serde_json::to_value(&output)
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        validate_agent_output_value(&value)
            .map_err(|e| ProviderError::Response(format!("agent output failed schema: {e}")))?;

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderSettings;
    use launchgraph_core::state::{Constraints, Idea};

    #[test]
    fn test_prompt_contains_idea_and_output_contract() {
        let client =
            Arc::new(ProviderClient::new(ProviderSettings::default()).expect("client"));
        let agent = ProviderAgent::new(
            "pricing_agent",
            "positioning_pricing",
            ProviderKind::Llm,
            "Propose a pricing metric, tiers, and a price to test.",
            client,
        );
        let state = CanonicalState::new(
            "proj_1",
            "scn_1",
            Idea {
                name: "AI call assistant".to_string(),
                ..Idea::default()
            },
            Constraints::default(),
        );
        let prompt = agent.build_prompt(&state, &AgentContext::new("run_1"));
        assert!(prompt.contains("pricing_agent"));
        assert!(prompt.contains("AI call assistant"));
        assert!(prompt.contains("Return ONE JSON object"));
    }

    #[test]
    fn test_changed_decision_is_surfaced_in_prompt() {
        let client =
            Arc::new(ProviderClient::new(ProviderSettings::default()).expect("client"));
        let agent = ProviderAgent::new(
            "sales_motion_agent",
            "go_to_market",
            ProviderKind::Llm,
            "Pick a sales motion.",
            client,
        );
        let state =
            CanonicalState::new("proj_1", "scn_1", Idea::default(), Constraints::default());
        let ctx = AgentContext::new("run_1")
            .with_changed_decision(Some(launchgraph_core::state::DecisionKey::Icp));
        let prompt = agent.build_prompt(&state, &ctx);
        assert!(prompt.contains("changed the 'icp' decision"));
    }
}
