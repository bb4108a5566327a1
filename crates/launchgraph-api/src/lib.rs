//! # Launchgraph API
//!
//! The service facade between transports (HTTP/SSE, tests) and the runtime:
//! project/scenario/run registry, idempotent creation, decision overrides
//! with cascading partial reruns, and event subscriptions.

mod dto;
mod error;
mod runtime;
mod service;

pub use dto::{
    CompareRequest, CompareResponse, CompleteResponse, DecisionSelectRequest,
    DecisionSelectResponse, IntakeSubmitRequest, IntakeSubmitResponse, ProjectCreateRequest,
    ProjectCreateResponse, ProjectView, RunResponse, RunStartRequest, RunStatus,
    RunStatusResponse, ScenarioView,
};
pub use error::{ApiError, ErrorCode};
pub use runtime::RuntimeApi;
pub use service::ApiService;
