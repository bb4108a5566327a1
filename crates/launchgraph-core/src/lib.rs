//! # Launchgraph Core
//!
//! Deterministic heart of the Launchgraph runtime.
//!
//! This crate contains:
//! - The typed canonical state document and its JSON Schema contract
//! - JSON-pointer patching and structural state diffing
//! - The merge engine that folds `AgentOutput`s into state under fixed rules
//! - The validator rule table and contradiction → agent attribution
//! - The static agent sequence and decision dependency graph
//! - Typed run events and the checkpoint store contract
//!
//! This crate does NOT care about:
//! - How agents obtain their outputs (LLM, search, fixtures)
//! - Where checkpoints are persisted
//! - How events reach subscribers

pub mod deps;
pub mod error;
pub mod event;
pub mod ids;
pub mod merge;
pub mod output;
pub mod state;
pub mod store;
pub mod validator;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::deps::{decision_agent, hard_dependencies, impacted_agents, AGENT_SEQUENCE};
    pub use crate::error::CoreError;
    pub use crate::event::{EventKind, RunEvent};
    pub use crate::merge::{merge_agent_output, MergeError, MergeOutcome, MergeWarning};
    pub use crate::output::{
        AgentOutput, NodeAction, NodeUpdate, Patch, PatchMeta, PatchOp, Proposal, TokenUsage,
    };
    pub use crate::state::{
        CanonicalState, ComplianceLevel, Contradiction, DecisionKey, Motion, NodeStatus, Severity,
        SourceType,
    };
    pub use crate::store::{CheckpointStore, Snapshot, StoreError};
    pub use crate::validator::{evaluate, ValidationGates, ValidationReport};
}

pub use error::CoreError;
pub use event::{EventKind, RunEvent};
pub use merge::{merge_agent_output, MergeError, MergeOutcome};
pub use output::{AgentOutput, Patch, PatchMeta, PatchOp};
pub use state::{CanonicalState, Contradiction, DecisionKey, Severity, SourceType};
pub use store::{CheckpointStore, Snapshot, StoreError};
pub use validator::{evaluate, ValidationGates, ValidationReport};
