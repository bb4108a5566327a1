//! Agent registry: maps agent names to implementations.
//!
//! Fixture mode wires every name to its deterministic builder; real mode
//! wires the analytical agents to providers while the graph builder and
//! validator stay deterministic (their logic is rule-driven, not generative).

use std::collections::HashMap;
use std::sync::Arc;

use launchgraph_core::deps::AGENT_SEQUENCE;

use crate::agent::Agent;
use crate::fixture::FixtureAgent;
use crate::provider::ProviderClient;
use crate::provider_agent::{ProviderAgent, ProviderKind};

const PROVIDER_ROSTER: [(&str, &str, ProviderKind, &str); 11] = [
    (
        "evidence_collector",
        "market_intelligence",
        ProviderKind::Search,
        "Collect competitor sources, pricing anchors, messaging patterns and channel signals \
         for this idea. Patch /evidence/* paths; cite every source URL.",
    ),
    (
        "competitive_teardown_agent",
        "market_intelligence",
        ProviderKind::Search,
        "Tear down the two most relevant competitors: positioning, pricing detail, weaknesses \
         with evidence, channel footprint. Patch /evidence/competitors and /evidence/positioning_map.",
    ),
    (
        "icp_agent",
        "customer",
        ProviderKind::Llm,
        "Define the ideal customer profile and propose 2-3 ICP options with a recommendation. \
         Patch /decisions/icp/profile.",
    ),
    (
        "positioning_agent",
        "positioning_pricing",
        ProviderKind::Llm,
        "Frame category, wedge and value proposition; propose positioning options. \
         Patch /decisions/positioning/frame and the positioning_pricing pillar summary.",
    ),
    (
        "pricing_agent",
        "positioning_pricing",
        ProviderKind::Llm,
        "Propose a pricing metric, tiers and a price to test, anchored to observed evidence. \
         Patch /decisions/pricing/metric, /decisions/pricing/tiers, /decisions/pricing/price_to_test.",
    ),
    (
        "channel_agent",
        "go_to_market",
        ProviderKind::Llm,
        "Pick primary and secondary acquisition channels from the channel signals. \
         Patch /decisions/channels/*.",
    ),
    (
        "sales_motion_agent",
        "go_to_market",
        ProviderKind::Llm,
        "Choose a sales motion consistent with the ICP and channels. \
         Patch /decisions/sales_motion/motion.",
    ),
    (
        "product_strategy_agent",
        "product_tech",
        ProviderKind::Llm,
        "Scope the MVP feature set and roadmap phases. Patch /pillars/product_tech/*.",
    ),
    (
        "tech_feasibility_agent",
        "product_tech",
        ProviderKind::Llm,
        "Assess feasibility and write the security/data handling plan appropriate to the \
         compliance level. Patch /pillars/product_tech/security_plan.",
    ),
    (
        "people_cash_agent",
        "execution",
        ProviderKind::Llm,
        "Plan team and cash: hiring triggers, burn ceiling, runway. \
         Patch /pillars/execution/team_plan and /pillars/execution/nodes.",
    ),
    (
        "execution_agent",
        "execution",
        ProviderKind::Llm,
        "Produce next actions, experiments and the execution pillar summary. \
         Patch /execution/next_actions and /execution/experiments.",
    ),
];

/// Name → agent lookup used by the scheduler.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    /// All thirteen agents backed by deterministic fixtures. An optional
    /// client supplies the recorded-fixture directory lookup.
    pub fn fixture(client: Option<Arc<ProviderClient>>) -> Self {
        let mut agents: HashMap<String, Arc<dyn Agent>> = HashMap::new();
        for name in AGENT_SEQUENCE {
            agents.insert(
                name.to_string(),
                Arc::new(FixtureAgent::new(name, client.clone())),
            );
        }
        Self { agents }
    }

    /// Provider-backed roster; graph builder and validator remain
    /// deterministic.
    pub fn provider(client: Arc<ProviderClient>) -> Self {
        let mut registry = Self::fixture(None);
        for (name, pillar, kind, instruction) in PROVIDER_ROSTER {
            registry.agents.insert(
                name.to_string(),
                Arc::new(ProviderAgent::new(
                    name,
                    pillar,
                    kind,
                    instruction,
                    client.clone(),
                )),
            );
        }
        registry
    }

    /// Replace one agent; used by tests to inject behaviors.
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.name().to_string(), agent);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderSettings;

    #[test]
    fn test_fixture_registry_covers_full_sequence() {
        let registry = AgentRegistry::fixture(None);
        for name in AGENT_SEQUENCE {
            assert!(registry.get(name).is_some(), "missing agent {name}");
        }
    }

    #[test]
    fn test_provider_registry_keeps_deterministic_tail() {
        let client = Arc::new(ProviderClient::new(ProviderSettings::default()).expect("client"));
        let registry = AgentRegistry::provider(client);
        // Every name still resolves; the tail stays fixture-backed.
        for name in AGENT_SEQUENCE {
            let agent = registry.get(name).expect("agent");
            if name == "graph_builder" || name == "validator_agent" {
                assert!(!agent.retryable(), "{name} should be deterministic");
            }
        }
        assert!(registry.get("evidence_collector").expect("agent").retryable());
    }
}
