//! The agent contract.

use async_trait::async_trait;

use launchgraph_core::output::AgentOutput;
use launchgraph_core::state::{CanonicalState, DecisionKey};

use crate::provider::ProviderError;

/// Per-invocation context handed to an agent alongside the state snapshot.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub run_id: String,
    pub changed_decision: Option<DecisionKey>,
}

impl AgentContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            changed_decision: None,
        }
    }

    pub fn with_changed_decision(mut self, changed: Option<DecisionKey>) -> Self {
        self.changed_decision = changed;
        self
    }
}

/// An analysis agent: reads a deep-copied state snapshot, returns a
/// structured diff. Never mutates state directly.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Whether failures should be retried upstream. Fixture agents are
    /// deterministic, so retrying them is pointless.
    fn retryable(&self) -> bool {
        false
    }

    async fn produce(
        &self,
        state: &CanonicalState,
        ctx: &AgentContext,
    ) -> Result<AgentOutput, ProviderError>;
}
