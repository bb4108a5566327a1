//! # Launchgraph Runtime
//!
//! The scheduler that drives a run: the initial sweep over the static agent
//! sequence, the validator-driven reconciliation pass, partial reruns after
//! decision overrides, and resume from the latest checkpoint. One logical
//! worker per run; agents execute sequentially so the merge stays
//! deterministic.

mod claim;
mod pipeline;

pub use claim::WorkClaim;
pub use pipeline::{
    run_pipeline, FailureCause, PipelineContext, PipelineFailure, PipelineResult, RunBudgets,
};
