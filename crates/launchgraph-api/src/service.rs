use async_trait::async_trait;
use tokio::sync::broadcast;

use launchgraph_core::event::RunEvent;

use crate::{
    ApiError, CompareRequest, CompareResponse, CompleteResponse, DecisionSelectRequest,
    DecisionSelectResponse, IntakeSubmitRequest, IntakeSubmitResponse, ProjectCreateRequest,
    ProjectCreateResponse, RunResponse, RunStartRequest, RunStatusResponse, ScenarioView,
};

/// The transport-agnostic service surface.
#[async_trait]
pub trait ApiService: Send + Sync {
    async fn create_project(
        &self,
        request: ProjectCreateRequest,
    ) -> Result<ProjectCreateResponse, ApiError>;

    async fn get_scenario(&self, scenario_id: &str) -> Result<ScenarioView, ApiError>;

    async fn submit_intake(
        &self,
        scenario_id: &str,
        request: IntakeSubmitRequest,
    ) -> Result<IntakeSubmitResponse, ApiError>;

    async fn start_run(
        &self,
        scenario_id: &str,
        request: RunStartRequest,
    ) -> Result<RunResponse, ApiError>;

    async fn resume_run(&self, run_id: &str) -> Result<RunResponse, ApiError>;

    async fn cancel_run(&self, run_id: &str) -> Result<RunStatusResponse, ApiError>;

    async fn run_status(&self, run_id: &str) -> Result<RunStatusResponse, ApiError>;

    /// Journal replay (optionally after a known event id) plus a live feed.
    async fn subscribe_events(
        &self,
        run_id: &str,
        last_event_id: Option<&str>,
    ) -> Result<(Vec<RunEvent>, broadcast::Receiver<RunEvent>), ApiError>;

    async fn select_decision(
        &self,
        scenario_id: &str,
        decision_key: &str,
        request: DecisionSelectRequest,
    ) -> Result<DecisionSelectResponse, ApiError>;

    async fn complete_scenario(&self, scenario_id: &str) -> Result<CompleteResponse, ApiError>;

    async fn compare_scenarios(
        &self,
        request: CompareRequest,
    ) -> Result<CompareResponse, ApiError>;
}
