//! Canonical state document.
//!
//! One scenario = one `CanonicalState`. The in-memory shape is strongly typed;
//! JSON only exists at the wire boundary and inside the patch machinery, where
//! the state is projected to a `serde_json::Value`, mutated, then re-ingested
//! through schema validation.

mod diff;
mod model;
mod pointer;
mod schema;

pub use diff::diff_states;
pub use model::{
    AgentRunStatus, AgentTiming, AgentTokenSpend, CanonicalState, ChannelsDecision,
    ComplianceLevel, ConflictCandidate, Constraints, Contradiction, Decision, DecisionCore,
    DecisionKey, DecisionOption, DecisionOverride, Decisions, Evidence, EvidenceSource,
    ExecutionPlan, Graph, GraphEdge, GraphGroup, GraphNode, IcpDecision, IcpProfile, Idea,
    IdeaCategory, Inputs, IntakeAnswer, MetaRef, Motion, NodeStatus, NodeType, OpenQuestion,
    Pillar, Pillars, PositioningDecision, PositioningFrame, PricingDecision, PricingTier, Risks,
    SalesMotionDecision, SelectionMode, Severity, SourceType, StateMeta, Telemetry, TokenSpend,
    SCHEMA_VERSION,
};
pub use pointer::{apply_patch_value, resolve_pointer, split_pointer, PointerError};
pub use schema::{validate_agent_output_value, validate_state_value};
