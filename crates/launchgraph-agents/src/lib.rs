//! # Launchgraph Agents
//!
//! The agent fleet. Every agent is a pure function from a state snapshot to
//! an `AgentOutput`; this crate provides the two implementations (provider-
//! backed and deterministic fixture-backed) and the registry that picks one
//! per agent name.

mod agent;
mod fixture;
mod provider;
mod provider_agent;
mod registry;

pub use agent::{Agent, AgentContext};
pub use fixture::FixtureAgent;
pub use provider::{
    extract_json, state_fingerprint, ProviderClient, ProviderError, ProviderMode, ProviderSettings,
};
pub use provider_agent::ProviderAgent;
pub use registry::AgentRegistry;
