//! Static topology: the agent sequence, the decision dependency graph, and
//! the closure computations that drive partial reruns.

use std::collections::BTreeSet;

use crate::state::DecisionKey;

/// The full agent roster, topologically sorted. Runs sweep this in order.
pub const AGENT_SEQUENCE: [&str; 13] = [
    "evidence_collector",
    "competitive_teardown_agent",
    "icp_agent",
    "positioning_agent",
    "pricing_agent",
    "channel_agent",
    "sales_motion_agent",
    "product_strategy_agent",
    "tech_feasibility_agent",
    "people_cash_agent",
    "execution_agent",
    "graph_builder",
    "validator_agent",
];

/// Agents re-executed on every rerun regardless of scope.
pub const ALWAYS_RUN_AGENTS: [&str; 2] = ["graph_builder", "validator_agent"];

/// Downward cascade between decisions. Intentionally a DAG; bidirectional
/// influence would be modeled as a capped fixed-point loop, not direct edges.
pub fn dependents(decision: DecisionKey) -> &'static [DecisionKey] {
    match decision {
        DecisionKey::Icp => &[
            DecisionKey::Positioning,
            DecisionKey::Pricing,
            DecisionKey::Channels,
            DecisionKey::SalesMotion,
        ],
        DecisionKey::Positioning => &[DecisionKey::Pricing, DecisionKey::Channels],
        DecisionKey::Pricing => &[DecisionKey::SalesMotion],
        DecisionKey::Channels => &[DecisionKey::SalesMotion],
        DecisionKey::SalesMotion => &[],
    }
}

/// The agent that owns proposals for a decision slot.
pub fn decision_agent(decision: DecisionKey) -> &'static str {
    match decision {
        DecisionKey::Icp => "icp_agent",
        DecisionKey::Positioning => "positioning_agent",
        DecisionKey::Pricing => "pricing_agent",
        DecisionKey::Channels => "channel_agent",
        DecisionKey::SalesMotion => "sales_motion_agent",
    }
}

/// Transitive closure of decisions affected by a change (excluding the
/// changed decision itself).
pub fn impacted_decisions(changed: DecisionKey) -> BTreeSet<DecisionKey> {
    let mut impacted = BTreeSet::new();
    let mut frontier = vec![changed];
    while let Some(current) = frontier.pop() {
        for dep in dependents(current) {
            if impacted.insert(*dep) {
                frontier.push(*dep);
            }
        }
    }
    impacted
}

/// Agents that must execute for a run. A fresh run (no changed decision)
/// executes everything; an override rerun executes the agents of the impacted
/// decisions plus the always-run tail. The changed decision's own agent does
/// not rerun: its selection is exactly what the user just fixed.
pub fn impacted_agents(changed: Option<DecisionKey>) -> BTreeSet<String> {
    let Some(changed) = changed else {
        return AGENT_SEQUENCE.iter().map(|s| s.to_string()).collect();
    };

    let mut agents: BTreeSet<String> = impacted_decisions(changed)
        .into_iter()
        .map(|decision| decision_agent(decision).to_string())
        .collect();
    for agent in ALWAYS_RUN_AGENTS {
        agents.insert(agent.to_string());
    }
    agents
}

/// Hard scheduling dependencies: when the named agent's dependency failed
/// this pass, the agent is skipped rather than executed against a hole.
pub fn hard_dependencies(agent: &str) -> &'static [&'static str] {
    match agent {
        "competitive_teardown_agent" => &["evidence_collector"],
        "pricing_agent" | "channel_agent" | "sales_motion_agent" => &["icp_agent"],
        _ => &[],
    }
}
