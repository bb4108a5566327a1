//! Deterministic fixture agents.
//!
//! Each builder is a pure function of the state snapshot; outputs are stable
//! across invocations so fixture-mode runs replay byte-identically. A fixture
//! directory (keyed by agent + state fingerprint) can shadow any builder.

mod graph;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use launchgraph_core::output::{
    AgentOutput, AssumptionRecord, Fact, Patch, PatchMeta, Proposal, TokenUsage,
};
use launchgraph_core::state::{
    CanonicalState, ComplianceLevel, DecisionKey, DecisionOption, MetaRef,
};

use crate::agent::{Agent, AgentContext};
use crate::provider::{ProviderClient, ProviderError};

/// Fixture-backed agent: consults the recorded-fixture directory first, then
/// falls back to the built-in deterministic builder. Never retried.
pub struct FixtureAgent {
    name: &'static str,
    client: Option<Arc<ProviderClient>>,
}

impl FixtureAgent {
    pub fn new(name: &'static str, client: Option<Arc<ProviderClient>>) -> Self {
        Self { name, client }
    }
}

#[async_trait]
impl Agent for FixtureAgent {
    fn name(&self) -> &str {
        self.name
    }

    async fn produce(
        &self,
        state: &CanonicalState,
        ctx: &AgentContext,
    ) -> Result<AgentOutput, ProviderError> {
        if let Some(client) = &self.client {
            if let Some(mut output) = client.fixture_output(self.name, state)? {
                output.run_id = ctx.run_id.clone();
                return Ok(output);
            }
        }
        Ok(build_fixture_output(self.name, state, ctx))
    }
}

/// Dispatch to the deterministic builder for an agent name.
pub fn build_fixture_output(agent: &str, state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    match agent {
        "evidence_collector" => evidence_output(state, ctx),
        "competitive_teardown_agent" => teardown_output(state, ctx),
        "icp_agent" => icp_output(state, ctx),
        "positioning_agent" => positioning_output(state, ctx),
        "pricing_agent" => pricing_output(state, ctx),
        "channel_agent" => channel_output(state, ctx),
        "sales_motion_agent" => sales_output(state, ctx),
        "product_strategy_agent" => product_output(state, ctx),
        "tech_feasibility_agent" => tech_output(state, ctx),
        "people_cash_agent" => people_output(state, ctx),
        "execution_agent" => execution_output(state, ctx),
        "graph_builder" => graph::graph_output(state, ctx),
        _ => AgentOutput::empty(agent, &ctx.run_id),
    }
}

fn base(agent: &str, pillar: &str, ctx: &AgentContext) -> AgentOutput {
    AgentOutput {
        pillar: pillar.to_string(),
        produced_at: Utc::now(),
        token_usage: TokenUsage {
            input_tokens: 0,
            output_tokens: 0,
            model: "fixture".to_string(),
        },
        ..AgentOutput::empty(agent, &ctx.run_id)
    }
}

fn inference(confidence: f64) -> PatchMeta {
    MetaRef::inference(confidence)
}

fn evidence_meta(confidence: f64, sources: &[&str]) -> PatchMeta {
    MetaRef::evidence(confidence, sources.iter().map(|s| s.to_string()).collect())
}

fn option(id: &str, title: &str, description: &str) -> DecisionOption {
    DecisionOption {
        id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        ..DecisionOption::default()
    }
}

fn evidence_output(_state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    let sources = json!([
        {
            "id": "src_comp_1",
            "url": "https://example.com/competitor-a/pricing",
            "title": "Competitor A pricing page",
            "snippets": ["Team plan $50/seat", "Enterprise on request"],
            "quality_score": 0.8
        },
        {
            "id": "src_comp_2",
            "url": "https://example.com/competitor-b",
            "title": "Competitor B homepage",
            "snippets": ["Simple flat pricing at $29"],
            "quality_score": 0.6
        },
        {
            "id": "src_pricing_1",
            "url": "https://example.com/market-report",
            "title": "SMB sales-tooling pricing survey",
            "snippets": ["Median paid tool spend $40-90 per seat"],
            "quality_score": 0.7
        }
    ]);

    let mut output = base("evidence_collector", "market_intelligence", ctx);
    output.patches = vec![
        Patch::replace(
            "/evidence/sources",
            sources,
            evidence_meta(0.92, &["https://example.com/competitor-a/pricing"]),
        ),
        Patch::replace(
            "/evidence/competitors",
            json!([
                {"name": "Competitor A", "url": "https://example.com/competitor-a", "positioning": "All-in-one platform", "pricing_model": "per_seat"},
                {"name": "Competitor B", "url": "https://example.com/competitor-b", "positioning": "Simple and fast", "pricing_model": "flat_rate"}
            ]),
            evidence_meta(0.81, &["https://example.com/competitor-a"]),
        ),
        Patch::replace(
            "/evidence/pricing_anchors",
            json!([
                {"competitor": "Competitor A", "price": 50, "model": "per_seat", "source_id": "src_comp_1"},
                {"competitor": "Competitor B", "price": 29, "model": "flat_rate", "source_id": "src_comp_2"}
            ]),
            evidence_meta(0.88, &["https://example.com/competitor-a/pricing"]),
        ),
        Patch::replace(
            "/evidence/messaging_patterns",
            json!([
                {"pattern": "Never lose a follow-up", "frequency": "high"},
                {"pattern": "Close more deals with less admin", "frequency": "medium"}
            ]),
            evidence_meta(0.73, &["https://example.com/competitor-a"]),
        ),
        Patch::replace(
            "/evidence/channel_signals",
            json!([
                {"channel": "linkedin_outbound", "signal": "Both competitors run founder-led outbound"},
                {"channel": "seo_blog", "signal": "Competitor B ranks for long-tail follow-up queries"}
            ]),
            evidence_meta(0.7, &["https://example.com/competitor-b"]),
        ),
    ];
    output.facts = vec![Fact {
        claim: "Two direct competitors price between $29 and $50 per month".to_string(),
        confidence: 0.8,
        sources: vec![
            "https://example.com/competitor-a/pricing".to_string(),
            "https://example.com/competitor-b".to_string(),
        ],
    }];
    output.assumptions = vec![AssumptionRecord {
        statement: "Buyers will pay for automated follow-up extraction".to_string(),
        how_to_validate: "Run 10 willingness-to-pay interviews".to_string(),
        confidence: 0.5,
    }];
    output
}

fn teardown_output(_state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    let mut output = base("competitive_teardown_agent", "market_intelligence", ctx);
    output.patches = vec![
        Patch::replace(
            "/evidence/competitors",
            json!([
                {
                    "name": "Competitor A",
                    "url": "https://example.com/competitor-a",
                    "positioning": "All-in-one platform",
                    "pricing_model": "per_seat",
                    "target_segment": "Mid-market",
                    "strengths": ["Brand recognition", "Feature breadth"],
                    "weaknesses": ["Complex onboarding", "High price"],
                    "category": "direct",
                    "channels": ["direct_sales", "content_marketing"],
                    "market_position": "leader",
                    "threat_level": "high",
                    "pricing_detail": {"base_price": 50, "model": "per_seat", "source_id": "src_comp_1"},
                    "weakness_evidence": [
                        {"claim": "Complex onboarding", "source": "G2 review", "relevance": "Speed-to-value wedge"},
                        {"claim": "High price excludes SMBs", "source": "Reddit thread", "relevance": "Price undercut opportunity"}
                    ],
                    "channel_footprint": {"channels_observed": ["linkedin_ads", "seo_blog", "webinars"], "estimated_primary": "direct_sales"}
                },
                {
                    "name": "Competitor B",
                    "url": "https://example.com/competitor-b",
                    "positioning": "Simple and fast",
                    "pricing_model": "flat_rate",
                    "target_segment": "SMB",
                    "strengths": ["Easy setup", "Low cost"],
                    "weaknesses": ["Limited integrations", "No enterprise features"],
                    "category": "direct",
                    "channels": ["product_led", "seo"],
                    "market_position": "niche",
                    "threat_level": "medium",
                    "pricing_detail": {"base_price": 29, "model": "flat_rate", "source_id": "src_comp_2"},
                    "weakness_evidence": [
                        {"claim": "Limited integrations", "source": "Capterra review", "relevance": "Integration gap for mid-market"}
                    ],
                    "channel_footprint": {"channels_observed": ["seo_blog", "product_hunt"], "estimated_primary": "product_led"}
                }
            ]),
            evidence_meta(
                0.78,
                &[
                    "https://example.com/competitor-a",
                    "https://example.com/competitor-b",
                ],
            ),
        ),
        Patch::replace(
            "/evidence/positioning_map",
            json!([
                {
                    "axes": {"x": "price_point", "y": "feature_depth"},
                    "placements": [
                        {"name": "Competitor A", "x": 0.7, "y": 0.85},
                        {"name": "Competitor B", "x": 0.3, "y": 0.4}
                    ],
                    "identified_gap": {
                        "x_range": [0.2, 0.5],
                        "y_range": [0.3, 0.6],
                        "description": "Low-price, focused-feature zone is underserved",
                        "confidence": 0.72
                    }
                }
            ]),
            inference(0.72),
        ),
    ];
    output.facts = vec![Fact {
        claim: "Two direct competitors identified with distinct positioning strategies".to_string(),
        confidence: 0.78,
        sources: vec![
            "https://example.com/competitor-a".to_string(),
            "https://example.com/competitor-b".to_string(),
        ],
    }];
    output
}

fn icp_output(_state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    let mut output = base("icp_agent", "customer", ctx);
    output.patches = vec![Patch::replace(
        "/decisions/icp/profile",
        json!({
            "buyer_role": "Head of Sales",
            "company_size": "50-200",
            "budget_owner": "sales_lead",
            "trigger_event": "Hiring new reps"
        }),
        inference(0.74),
    )];
    output.proposals = vec![Proposal {
        decision_key: DecisionKey::Icp,
        options: vec![
            option(
                "icp_opt_1",
                "Mid-market sales leaders",
                "Head of Sales at 50-200 person B2B companies actively hiring reps.",
            ),
            option(
                "icp_opt_2",
                "SMB founder-sellers",
                "Founders doing their own sales at companies under 20 people.",
            ),
        ],
        recommended_option_id: "icp_opt_1".to_string(),
        rationale: "Best evidence-backed fit from current source set.".to_string(),
        meta: Some(inference(0.74)),
    }];
    output
}

fn positioning_output(_state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    let mut output = base("positioning_agent", "positioning_pricing", ctx);
    output.patches = vec![
        Patch::replace(
            "/decisions/positioning/frame",
            json!({
                "category": "Revenue operations assistant",
                "wedge": "Call-to-follow-up automation",
                "value_prop": "Reduce lead leakage by 30%"
            }),
            inference(0.76),
        ),
        Patch::replace(
            "/pillars/positioning_pricing/summary",
            json!("Position around faster follow-up and measurable pipeline recovery."),
            inference(0.73),
        ),
    ];
    output.proposals = vec![Proposal {
        decision_key: DecisionKey::Positioning,
        options: vec![
            option(
                "pos_opt_1",
                "Follow-up automation wedge",
                "Lead with the painful, measurable follow-up gap.",
            ),
            option(
                "pos_opt_2",
                "Full conversation intelligence",
                "Compete head-on with call recording incumbents.",
            ),
        ],
        recommended_option_id: "pos_opt_1".to_string(),
        rationale: "Aligns with buyer pain from intake and evidence.".to_string(),
        meta: Some(inference(0.76)),
    }];
    output
}

fn pricing_output(_state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    let mut output = base("pricing_agent", "positioning_pricing", ctx);
    output.patches = vec![
        Patch::replace("/decisions/pricing/metric", json!("per_seat"), inference(0.72)),
        Patch::replace(
            "/decisions/pricing/tiers",
            json!([
                {"name": "Starter", "price": 49},
                {"name": "Growth", "price": 149}
            ]),
            inference(0.68),
        ),
        Patch::replace("/decisions/pricing/price_to_test", json!(99), inference(0.66)),
    ];
    output.proposals = vec![Proposal {
        decision_key: DecisionKey::Pricing,
        options: vec![
            option(
                "price_opt_1",
                "Per-seat, anchored under Competitor A",
                "Undercut the $50/seat anchor while staying above flat-rate floor.",
            ),
            option(
                "price_opt_2",
                "Usage-based per processed call",
                "Aligns cost with value but harder to forecast for buyers.",
            ),
        ],
        recommended_option_id: "price_opt_1".to_string(),
        rationale: "Closest match to evidence anchors.".to_string(),
        meta: Some(inference(0.72)),
    }];
    output
}

fn channel_output(_state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    let mut output = base("channel_agent", "go_to_market", ctx);
    output.patches = vec![
        Patch::replace(
            "/decisions/channels/primary",
            json!("linkedin_outbound"),
            inference(0.72),
        ),
        Patch::replace(
            "/decisions/channels/secondary",
            json!("founder_network"),
            inference(0.61),
        ),
        Patch::replace(
            "/decisions/channels/primary_channels",
            json!(["linkedin_outbound"]),
            inference(0.72),
        ),
        Patch::replace(
            "/pillars/go_to_market/summary",
            json!("Founder-led outbound on LinkedIn, warm network as backup."),
            inference(0.7),
        ),
    ];
    output.proposals = vec![Proposal {
        decision_key: DecisionKey::Channels,
        options: vec![
            option(
                "chan_opt_1",
                "LinkedIn outbound",
                "Direct outreach to sales leaders; strongest observed signal.",
            ),
            option(
                "chan_opt_2",
                "SEO content",
                "Long-tail follow-up queries; slower but compounding.",
            ),
        ],
        recommended_option_id: "chan_opt_1".to_string(),
        rationale: "Strongest signal from channel evidence set.".to_string(),
        meta: Some(inference(0.72)),
    }];
    output
}

fn sales_output(_state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    let mut output = base("sales_motion_agent", "go_to_market", ctx);
    output.patches = vec![Patch::replace(
        "/decisions/sales_motion/motion",
        json!("outbound_led"),
        inference(0.7),
    )];
    output.proposals = vec![Proposal {
        decision_key: DecisionKey::SalesMotion,
        options: vec![
            option(
                "sales_opt_1",
                "Founder-led outbound",
                "High-touch demos until messaging is proven.",
            ),
            option(
                "sales_opt_2",
                "Product-led trial",
                "Self-serve trial; requires onboarding investment first.",
            ),
        ],
        recommended_option_id: "sales_opt_1".to_string(),
        rationale: "Best fit for current ICP/channel combination.".to_string(),
        meta: Some(inference(0.7)),
    }];
    output
}

fn product_output(_state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    let mut output = base("product_strategy_agent", "product_tech", ctx);
    output.patches = vec![
        Patch::replace(
            "/pillars/product_tech/summary",
            json!("Prioritize call summarization, follow-up extraction, and CRM sync."),
            inference(0.75),
        ),
        Patch::replace(
            "/pillars/product_tech/nodes",
            json!(["product.core_offer", "product.onboarding", "product.integration", "product.security_plan"]),
            inference(0.7),
        ),
        Patch::replace(
            "/pillars/product_tech/mvp_features",
            json!(["Call summarization", "Follow-up extraction", "CRM sync"]),
            inference(0.7),
        ),
        Patch::replace(
            "/pillars/product_tech/roadmap_phases",
            json!(["MVP: core automation", "V2: integrations", "V3: analytics"]),
            inference(0.65),
        ),
    ];
    output
}

fn tech_output(state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    let security_plan = match state.constraints.compliance_level {
        ComplianceLevel::Medium | ComplianceLevel::High => {
            "Data retention policy + encrypted transcript storage"
        }
        ComplianceLevel::None => "Baseline logging and role-based access",
    };
    let mut output = base("tech_feasibility_agent", "product_tech", ctx);
    output.patches = vec![Patch::replace(
        "/pillars/product_tech/security_plan",
        json!(security_plan),
        inference(0.64),
    )];
    output
}

fn people_output(state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    let budget = state.constraints.budget_usd_monthly;
    let mut output = base("people_cash_agent", "execution", ctx);
    output.patches = vec![
        Patch::replace(
            "/pillars/execution/team_plan",
            json!({
                "summary": "Keep burn below budget and hire one SDR only after PMF signal.",
                "monthly_budget_usd": budget
            }),
            inference(0.66),
        ),
        Patch::replace(
            "/pillars/execution/nodes",
            json!(["people.team_plan", "people.runway", "people.hiring", "people.ops"]),
            inference(0.66),
        ),
    ];
    output
}

fn execution_output(state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    let mut actions = vec![
        json!({"title": "Interview 10 target buyers", "owner": "founder", "week": 1}),
        json!({"title": "Send first 50 outbound messages", "owner": "founder", "week": 1}),
        json!({"title": "Launch landing page with CTA", "owner": "marketing", "week": 2}),
    ];
    if let Some(changed) = ctx.changed_decision {
        actions.insert(
            0,
            json!({"title": format!("Revalidate after {changed} change"), "owner": "founder", "week": 0}),
        );
    }
    let _ = state;

    let mut output = base("execution_agent", "execution", ctx);
    output.patches = vec![
        Patch::replace("/execution/next_actions", Value::Array(actions), inference(0.7)),
        Patch::replace(
            "/execution/experiments",
            json!([
                {
                    "hypothesis": "Head of Sales will pay for automated follow-up",
                    "steps": ["Run outreach", "Book demos", "Collect objections"],
                    "metric": "Demo-to-trial conversion"
                }
            ]),
            inference(0.67),
        ),
        Patch::replace(
            "/pillars/execution/summary",
            json!("Two-week validation sprint feeding a founder-led outbound loop."),
            inference(0.68),
        ),
    ];
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchgraph_core::merge::merge_agent_output;
    use launchgraph_core::state::{validate_agent_output_value, Constraints, Idea, IdeaCategory};

    fn sample_state() -> CanonicalState {
        CanonicalState::new(
            "proj_1",
            "scn_1",
            Idea {
                name: "AI call assistant for B2B sales teams".to_string(),
                category: IdeaCategory::B2bSaas,
                ..Idea::default()
            },
            Constraints::default(),
        )
    }

    fn ctx() -> AgentContext {
        AgentContext::new("run_1")
    }

    #[test]
    fn test_every_fixture_output_passes_the_wire_schema() {
        let state = sample_state();
        for agent in launchgraph_core::deps::AGENT_SEQUENCE {
            let output = build_fixture_output(agent, &state, &ctx());
            let value = serde_json::to_value(&output).expect("serialize");
            validate_agent_output_value(&value)
                .unwrap_or_else(|e| panic!("{agent} output violates schema: {e}"));
        }
    }

    #[test]
    fn test_every_fixture_output_merges_cleanly() {
        let mut state = sample_state();
        for agent in launchgraph_core::deps::AGENT_SEQUENCE {
            let output = build_fixture_output(agent, &state, &ctx());
            let outcome = merge_agent_output(&state, &output)
                .unwrap_or_else(|e| panic!("{agent} output failed to merge: {e}"));
            state = outcome.state;
        }
        assert_eq!(state.evidence.sources.len(), 3);
        assert!(!state.decisions.pricing.metric.is_empty());
        assert!(state.graph.nodes.len() >= 20);
    }

    #[test]
    fn test_evidence_collector_provides_anchors_with_source_ids() {
        let output = evidence_output(&sample_state(), &ctx());
        let anchors = output
            .patches
            .iter()
            .find(|p| p.path == "/evidence/pricing_anchors")
            .expect("anchors patch");
        assert!(anchors.value.as_array().map(|a| a.len() >= 2).unwrap_or(false));
    }

    #[test]
    fn test_decision_agents_propose_but_never_select() {
        let state = sample_state();
        for agent in [
            "icp_agent",
            "positioning_agent",
            "pricing_agent",
            "channel_agent",
            "sales_motion_agent",
        ] {
            let output = build_fixture_output(agent, &state, &ctx());
            assert_eq!(output.proposals.len(), 1, "{agent} proposes once");
            assert!(
                !output
                    .patches
                    .iter()
                    .any(|p| p.path.ends_with("/selected_option_id")),
                "{agent} must not write selections"
            );
        }
    }

    #[test]
    fn test_execution_agent_prepends_revalidation_on_partial_rerun() {
        let state = sample_state();
        let ctx = AgentContext::new("run_1").with_changed_decision(Some(DecisionKey::Icp));
        let output = execution_output(&state, &ctx);
        let actions = output.patches[0].value.as_array().expect("actions");
        assert!(actions[0]["title"]
            .as_str()
            .expect("title")
            .contains("Revalidate after icp"));
    }

    #[test]
    fn test_security_plan_tracks_compliance_level() {
        let mut state = sample_state();
        state.constraints.compliance_level = ComplianceLevel::High;
        let strict = tech_output(&state, &ctx());
        assert!(strict.patches[0].value.as_str().expect("plan").contains("encrypted"));

        state.constraints.compliance_level = ComplianceLevel::None;
        let relaxed = tech_output(&state, &ctx());
        assert!(relaxed.patches[0].value.as_str().expect("plan").contains("Baseline"));
    }
}
