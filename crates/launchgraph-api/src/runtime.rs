//! `RuntimeApi`: the concrete service implementation.
//!
//! Owns the project/scenario/run registry, enforces intake gating and
//! idempotency, and supervises pipeline tasks (one logical worker per run).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info};

use async_trait::async_trait;

use launchgraph_agents::AgentRegistry;
use launchgraph_core::deps::{decision_agent, impacted_decisions, AGENT_SEQUENCE};
use launchgraph_core::event::{EventKind, RunEvent};
use launchgraph_core::ids::{new_project_id, new_run_id, new_scenario_id};
use launchgraph_core::merge::merge_agent_output;
use launchgraph_core::output::{AgentOutput, Patch, PatchMeta};
use launchgraph_core::state::{
    diff_states, validate_state_value, CanonicalState, Contradiction, DecisionKey, OpenQuestion,
    SelectionMode, Severity,
};
use launchgraph_core::store::CheckpointStore;
use launchgraph_core::validator::{evaluate, ValidationGates};
use launchgraph_runtime::{
    run_pipeline, PipelineContext, RunBudgets, WorkClaim,
};
use launchgraph_stores::RunEventBus;

use crate::dto::*;
use crate::error::ApiError;
use crate::service::ApiService;

const REQUIRED_INTAKE_FIELDS: [&str; 5] = [
    "buyer_role",
    "company_type",
    "trigger_event",
    "current_workaround",
    "measurable_outcome",
];

struct ProjectRecord {
    id: String,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

struct ScenarioRecord {
    id: String,
    project_id: String,
    name: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    state: CanonicalState,
}

struct RunRecord {
    id: String,
    scenario_id: String,
    status: RunStatus,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    resumed_from_run_id: Option<String>,
    changed_decision: Option<DecisionKey>,
    /// First agent index a resume would execute.
    next_agent_index: usize,
    last_checkpoint: Option<u64>,
    completed_agents: Vec<String>,
    skipped_agents: Vec<String>,
    last_error: Option<String>,
    claim: WorkClaim,
}

#[derive(Default)]
struct Registry {
    projects: HashMap<String, ProjectRecord>,
    scenarios: HashMap<String, ScenarioRecord>,
    runs: HashMap<String, RunRecord>,
    idempotency: HashMap<String, Value>,
}

/// Service implementation backed by in-process state plus the pluggable
/// checkpoint store and event bus.
pub struct RuntimeApi {
    agents: Arc<AgentRegistry>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<RunEventBus>,
    budgets: RunBudgets,
    inner: Arc<RwLock<Registry>>,
}

impl RuntimeApi {
    pub fn new(
        agents: Arc<AgentRegistry>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<RunEventBus>,
        budgets: RunBudgets,
    ) -> Self {
        Self {
            agents,
            checkpoints,
            events,
            budgets,
            inner: Arc::new(RwLock::new(Registry::default())),
        }
    }

    pub fn event_bus(&self) -> Arc<RunEventBus> {
        self.events.clone()
    }

    /// Replace a scenario's state from raw JSON. The ingress check rejects
    /// unknown top-level keys by name; nothing is stored on failure.
    pub async fn import_scenario_state(
        &self,
        scenario_id: &str,
        value: Value,
    ) -> Result<(), ApiError> {
        let state = CanonicalState::from_value(value)?;
        let mut registry = self.inner.write().await;
        let scenario = registry
            .scenarios
            .get_mut(scenario_id)
            .ok_or_else(|| ApiError::NotFound(format!("scenario {scenario_id}")))?;
        scenario.state = state;
        scenario.updated_at = Utc::now();
        Ok(())
    }

    fn missing_intake_fields(state: &CanonicalState) -> Vec<String> {
        let answered = state.inputs.answered_fields();
        REQUIRED_INTAKE_FIELDS
            .iter()
            .filter(|field| !answered.iter().any(|a| a == *field))
            .map(|field| field.to_string())
            .collect()
    }

    fn spawn_run(&self, record: &RunRecord, state: CanonicalState, resumed: bool) {
        let ctx = PipelineContext {
            run_id: record.id.clone(),
            scenario_id: record.scenario_id.clone(),
            registry: self.agents.clone(),
            checkpoints: self.checkpoints.clone(),
            events: self.events.clone(),
            budgets: self.budgets.clone(),
            claim: record.claim.clone(),
            changed_decision: record.changed_decision,
            start_index: record.next_agent_index,
            resumed,
            resume_from_checkpoint: record.last_checkpoint,
            simulate_failure_at_agent: None,
        };
        self.spawn_run_with_ctx(ctx, state);
    }

    fn spawn_run_with_ctx(&self, ctx: PipelineContext, state: CanonicalState) {
        let inner = self.inner.clone();
        let events = self.events.clone();
        let run_id = ctx.run_id.clone();
        let scenario_id = ctx.scenario_id.clone();

        tokio::spawn(async move {
            match run_pipeline(state, ctx).await {
                Ok(result) => {
                    let status = if result.blocking {
                        RunStatus::Blocked
                    } else {
                        RunStatus::Completed
                    };
                    let mut registry = inner.write().await;
                    if let Some(scenario) = registry.scenarios.get_mut(&scenario_id) {
                        scenario.state = result.state;
                        scenario.updated_at = Utc::now();
                    }
                    if let Some(run) = registry.runs.get_mut(&run_id) {
                        run.status = status;
                        run.completed_at = Some(Utc::now());
                        run.completed_agents = result.completed_agents;
                        run.skipped_agents = result.skipped_agents;
                        run.next_agent_index = AGENT_SEQUENCE.len();
                        run.last_checkpoint = Some(result.last_checkpoint);
                    }
                    info!(run_id = %run_id, ?status, "run finished");
                }
                Err(failure) => {
                    {
                        let mut registry = inner.write().await;
                        if let Some(scenario) = registry.scenarios.get_mut(&scenario_id) {
                            scenario.state = failure.state.clone();
                            scenario.updated_at = Utc::now();
                        }
                        if let Some(run) = registry.runs.get_mut(&run_id) {
                            run.status = RunStatus::Failed;
                            run.completed_at = Some(Utc::now());
                            run.completed_agents = failure.completed_agents.clone();
                            run.skipped_agents = failure.skipped_agents.clone();
                            run.next_agent_index = failure.failed_index;
                            run.last_checkpoint = failure.last_checkpoint;
                            run.last_error = Some(failure.message.clone());
                        }
                    }
                    error!(
                        run_id = %run_id,
                        cause = failure.cause.as_str(),
                        error = %failure.message,
                        "run failed"
                    );
                    events
                        .publish(
                            &run_id,
                            &scenario_id,
                            EventKind::RunFailed,
                            json!({
                                "message": failure.message,
                                "cause": failure.cause.as_str(),
                                "failed_agent": failure.failed_agent,
                                "checkpoint_index": failure.last_checkpoint,
                            }),
                        )
                        .await;
                }
            }
        });
    }

    fn run_view(record: &RunRecord) -> RunStatusResponse {
        RunStatusResponse {
            run_id: record.id.clone(),
            scenario_id: record.scenario_id.clone(),
            status: record.status,
            started_at: record.started_at,
            completed_at: record.completed_at,
            resumed_from_run_id: record.resumed_from_run_id.clone(),
            checkpoint_index: record.last_checkpoint,
            last_error: record.last_error.clone(),
        }
    }

    fn decrease_dependent_confidence(state: &mut CanonicalState, changed: DecisionKey) {
        let mut impacted: Vec<String> = impacted_decisions(changed)
            .into_iter()
            .map(|d| d.as_str().to_string())
            .collect();
        impacted.push(changed.as_str().to_string());
        for node in &mut state.graph.nodes {
            if node.dependencies.iter().any(|dep| impacted.contains(dep)) {
                node.confidence = (node.confidence - 0.1).max(0.1);
            }
        }
    }
}

#[async_trait]
impl ApiService for RuntimeApi {
    async fn create_project(
        &self,
        request: ProjectCreateRequest,
    ) -> Result<ProjectCreateResponse, ApiError> {
        if let Some(key) = &request.idempotency_key {
            let registry = self.inner.read().await;
            if let Some(stored) = registry.idempotency.get(&format!("create_project:{key}")) {
                let response: ProjectCreateResponse = serde_json::from_value(stored.clone())
                    .map_err(|e| ApiError::Internal(e.to_string()))?;
                return Ok(response);
            }
        }

        if request.project_name.trim().is_empty() {
            return Err(ApiError::InvalidArgument(
                "project_name must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let project_id = new_project_id();
        let scenario_id = new_scenario_id();
        let state = CanonicalState::new(
            &project_id,
            &scenario_id,
            request.idea.clone(),
            request.constraints.clone(),
        );

        let response = ProjectCreateResponse {
            project: ProjectView {
                id: project_id.clone(),
                name: request.project_name.clone(),
                created_at: now,
                updated_at: now,
            },
            scenario: ScenarioView {
                id: scenario_id.clone(),
                project_id: project_id.clone(),
                name: "Scenario A".to_string(),
                created_at: now,
                updated_at: now,
                state: None,
            },
        };

        let mut registry = self.inner.write().await;
        registry.projects.insert(
            project_id.clone(),
            ProjectRecord {
                id: project_id.clone(),
                name: request.project_name,
                created_at: now,
                updated_at: now,
            },
        );
        registry.scenarios.insert(
            scenario_id.clone(),
            ScenarioRecord {
                id: scenario_id,
                project_id,
                name: "Scenario A".to_string(),
                created_at: now,
                updated_at: now,
                state,
            },
        );
        if let Some(key) = &request.idempotency_key {
            let stored = serde_json::to_value(&response)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            registry
                .idempotency
                .insert(format!("create_project:{key}"), stored);
        }
        Ok(response)
    }

    async fn get_scenario(&self, scenario_id: &str) -> Result<ScenarioView, ApiError> {
        let registry = self.inner.read().await;
        let scenario = registry
            .scenarios
            .get(scenario_id)
            .ok_or_else(|| ApiError::NotFound(format!("scenario {scenario_id}")))?;
        Ok(ScenarioView {
            id: scenario.id.clone(),
            project_id: scenario.project_id.clone(),
            name: scenario.name.clone(),
            created_at: scenario.created_at,
            updated_at: scenario.updated_at,
            state: Some(
                scenario
                    .state
                    .to_value()
                    .map_err(|e| ApiError::Internal(e.to_string()))?,
            ),
        })
    }

    async fn submit_intake(
        &self,
        scenario_id: &str,
        request: IntakeSubmitRequest,
    ) -> Result<IntakeSubmitResponse, ApiError> {
        let mut registry = self.inner.write().await;
        let scenario = registry
            .scenarios
            .get_mut(scenario_id)
            .ok_or_else(|| ApiError::NotFound(format!("scenario {scenario_id}")))?;

        // Intake is just another writer of patches: it goes through the same
        // merge engine as the agents, under the synthetic `_intake` name.
        let answers = serde_json::to_value(&request.answers)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let mut intake = AgentOutput::empty("_intake", &scenario.state.meta.run_id);
        intake.patches = vec![Patch::replace(
            "/inputs/intake_answers",
            answers,
            PatchMeta::inference(1.0),
        )];
        let outcome = merge_agent_output(&scenario.state, &intake)
            .map_err(|e| ApiError::InvalidArgument(e.to_string()))?;
        scenario.state = outcome.state;
        scenario.updated_at = Utc::now();

        let open_questions = scenario
            .state
            .inputs
            .open_questions
            .iter()
            .map(|q| serde_json::to_value(q).unwrap_or(Value::Null))
            .collect();

        Ok(IntakeSubmitResponse {
            scenario_id: scenario_id.to_string(),
            intake_answers: scenario.state.inputs.intake_answers.len(),
            open_questions,
        })
    }

    async fn start_run(
        &self,
        scenario_id: &str,
        request: RunStartRequest,
    ) -> Result<RunResponse, ApiError> {
        if let Some(key) = &request.idempotency_key {
            let registry = self.inner.read().await;
            if let Some(stored) = registry.idempotency.get(&format!("start_run:{key}")) {
                let response: RunResponse = serde_json::from_value(stored.clone())
                    .map_err(|e| ApiError::Internal(e.to_string()))?;
                return Ok(response);
            }
        }

        let mut registry = self.inner.write().await;
        let scenario = registry
            .scenarios
            .get_mut(scenario_id)
            .ok_or_else(|| ApiError::NotFound(format!("scenario {scenario_id}")))?;

        // A run with incomplete intake never starts agent execution.
        if request.changed_decision.is_none() {
            let missing = Self::missing_intake_fields(&scenario.state);
            if !missing.is_empty() {
                scenario.state.inputs.open_questions = missing
                    .iter()
                    .map(|field| OpenQuestion {
                        field: field.clone(),
                        question: format!("Please provide {}", field.replace('_', " ")),
                        blocking: true,
                    })
                    .collect();
                return Err(ApiError::Validation {
                    message: "Run blocked by intake validation".to_string(),
                    details: json!({ "missing_requirements": missing }),
                });
            }
        }

        // Schema gate at the run boundary: a hand-edited state never reaches
        // the scheduler.
        let state_value = scenario
            .state
            .to_value()
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        validate_state_value(&state_value).map_err(ApiError::from)?;

        let run_id = new_run_id();
        scenario.state.meta.run_id = run_id.clone();
        scenario.state.touch("runtime");
        let state = scenario.state.clone();

        let record = RunRecord {
            id: run_id.clone(),
            scenario_id: scenario_id.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            resumed_from_run_id: None,
            changed_decision: request.changed_decision,
            next_agent_index: 0,
            last_checkpoint: None,
            completed_agents: Vec::new(),
            skipped_agents: Vec::new(),
            last_error: None,
            claim: WorkClaim::new(),
        };

        let ctx = PipelineContext {
            run_id: run_id.clone(),
            scenario_id: scenario_id.to_string(),
            registry: self.agents.clone(),
            checkpoints: self.checkpoints.clone(),
            events: self.events.clone(),
            budgets: self.budgets.clone(),
            claim: record.claim.clone(),
            changed_decision: request.changed_decision,
            start_index: 0,
            resumed: false,
            resume_from_checkpoint: None,
            simulate_failure_at_agent: request.simulate_failure_at_agent,
        };

        let response = RunResponse {
            run_id: run_id.clone(),
            scenario_id: scenario_id.to_string(),
            status: RunStatus::Running,
            stream_url: format!("/runs/{run_id}/stream"),
        };

        registry.runs.insert(run_id.clone(), record);
        if let Some(key) = &request.idempotency_key {
            let stored = serde_json::to_value(&response)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            registry
                .idempotency
                .insert(format!("start_run:{key}"), stored);
        }
        drop(registry);

        self.spawn_run_with_ctx(ctx, state);
        Ok(response)
    }

    async fn resume_run(&self, run_id: &str) -> Result<RunResponse, ApiError> {
        let (scenario_id, changed_decision, next_agent_index, last_checkpoint, fallback_state) = {
            let registry = self.inner.read().await;
            let prior = registry
                .runs
                .get(run_id)
                .ok_or_else(|| ApiError::NotFound(format!("run {run_id}")))?;
            if prior.status != RunStatus::Failed {
                return Err(ApiError::Conflict("run is not in failed state".to_string()));
            }
            let scenario = registry
                .scenarios
                .get(&prior.scenario_id)
                .ok_or_else(|| ApiError::NotFound(format!("scenario {}", prior.scenario_id)))?;
            (
                prior.scenario_id.clone(),
                prior.changed_decision,
                prior.next_agent_index,
                prior.last_checkpoint,
                scenario.state.clone(),
            )
        };

        // Restore the failed run's latest durable snapshot.
        let mut state = match self.checkpoints.latest(run_id).await? {
            Some((_, snapshot)) => snapshot,
            None => fallback_state,
        };

        let resumed_id = new_run_id();
        state.meta.run_id = resumed_id.clone();

        let record = RunRecord {
            id: resumed_id.clone(),
            scenario_id: scenario_id.clone(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            resumed_from_run_id: Some(run_id.to_string()),
            changed_decision,
            next_agent_index,
            last_checkpoint,
            completed_agents: Vec::new(),
            skipped_agents: Vec::new(),
            last_error: None,
            claim: WorkClaim::new(),
        };

        let response = RunResponse {
            run_id: resumed_id.clone(),
            scenario_id,
            status: RunStatus::Running,
            stream_url: format!("/runs/{resumed_id}/stream"),
        };
        self.inner
            .write()
            .await
            .runs
            .insert(resumed_id, record);
        {
            let registry = self.inner.read().await;
            let record = registry
                .runs
                .get(&response.run_id)
                .ok_or_else(|| ApiError::Internal("resumed run vanished".to_string()))?;
            self.spawn_run(record, state, true);
        }
        Ok(response)
    }

    async fn cancel_run(&self, run_id: &str) -> Result<RunStatusResponse, ApiError> {
        let registry = self.inner.read().await;
        let run = registry
            .runs
            .get(run_id)
            .ok_or_else(|| ApiError::NotFound(format!("run {run_id}")))?;
        if run.status != RunStatus::Running {
            return Err(ApiError::Conflict("run is not running".to_string()));
        }
        // Drop the work claim; the scheduler observes it at the next fence.
        run.claim.release();
        Ok(Self::run_view(run))
    }

    async fn run_status(&self, run_id: &str) -> Result<RunStatusResponse, ApiError> {
        let registry = self.inner.read().await;
        let run = registry
            .runs
            .get(run_id)
            .ok_or_else(|| ApiError::NotFound(format!("run {run_id}")))?;
        Ok(Self::run_view(run))
    }

    async fn subscribe_events(
        &self,
        run_id: &str,
        last_event_id: Option<&str>,
    ) -> Result<(Vec<RunEvent>, broadcast::Receiver<RunEvent>), ApiError> {
        {
            let registry = self.inner.read().await;
            if !registry.runs.contains_key(run_id) {
                return Err(ApiError::NotFound(format!("run {run_id}")));
            }
        }
        Ok(self.events.subscribe_after(run_id, last_event_id).await)
    }

    async fn select_decision(
        &self,
        scenario_id: &str,
        decision_key: &str,
        request: DecisionSelectRequest,
    ) -> Result<DecisionSelectResponse, ApiError> {
        let key = DecisionKey::parse(decision_key)
            .ok_or_else(|| ApiError::NotFound(format!("decision key {decision_key}")))?;

        let justification = request.justification.clone().unwrap_or_default();
        if request.is_custom && justification.trim().is_empty() {
            return Err(ApiError::Validation {
                message: "Custom decision override requires justification.".to_string(),
                details: json!({ "path": format!("/decisions/{key}/override/justification") }),
            });
        }

        let (decision_value, report, changed, state_for_rerun) = {
            let mut registry = self.inner.write().await;
            let scenario = registry
                .scenarios
                .get_mut(scenario_id)
                .ok_or_else(|| ApiError::NotFound(format!("scenario {scenario_id}")))?;
            let state = &mut scenario.state;
            let before = state.decisions.core(key).selected_option_id.clone();

            if key == DecisionKey::Channels {
                if let Some(primary_channels) = &request.primary_channels {
                    if primary_channels.len() > 2 && justification.trim().is_empty() {
                        return Err(ApiError::Validation {
                            message: "More than 2 primary channels requires override justification."
                                .to_string(),
                            details: json!({ "path": "/decisions/channels/primary_channels" }),
                        });
                    }
                    let channels = &mut state.decisions.channels;
                    channels.primary_channels =
                        primary_channels.iter().take(2).cloned().collect();
                    channels.primary = primary_channels.first().cloned().unwrap_or_default();
                    channels.secondary = primary_channels.get(1).cloned().unwrap_or_default();
                    if primary_channels.len() > 2 {
                        state.risks.high_risk_flags.push(Contradiction::new(
                            "V-CHAN-01",
                            Severity::High,
                            "Channel override accepted with justification.",
                            vec!["/decisions/channels/primary_channels".to_string()],
                        ));
                    }
                }
            }

            if request.is_custom {
                let core = state.decisions.core_mut(key);
                core.selected_option_id = "custom".to_string();
                core.custom_value = request.custom_value.clone();
                core.override_.is_custom = true;
                core.override_.justification = justification.clone();
                core.selection_mode = SelectionMode::UserSelected;

                let impacted: Vec<String> = impacted_decisions(key)
                    .into_iter()
                    .map(|d| d.as_str().to_string())
                    .collect();
                let mut flag = Contradiction::new(
                    "OVERRIDE-IMPACT",
                    Severity::High,
                    format!("Override on {key} impacts dependent decisions."),
                    vec![format!("/decisions/{key}")],
                );
                flag.extra
                    .insert("impacted_decisions".to_string(), json!(impacted));
                state.risks.high_risk_flags.push(flag);
                Self::decrease_dependent_confidence(state, key);
            } else {
                if let Some(selected) = &request.selected_option_id {
                    let core = state.decisions.core_mut(key);
                    core.selected_option_id = selected.clone();
                    core.selection_mode = SelectionMode::UserSelected;
                }
                let core = state.decisions.core_mut(key);
                core.override_.is_custom = false;
                core.override_.justification = justification.clone();
            }

            state.touch("runtime");
            scenario.updated_at = Utc::now();

            let after = state.decisions.core(key).selected_option_id.clone();
            let changed = request.is_custom || (after != before && !after.is_empty());
            let report = evaluate(state, ValidationGates::default());

            let decision_value = match key {
                DecisionKey::Icp => serde_json::to_value(&state.decisions.icp),
                DecisionKey::Positioning => serde_json::to_value(&state.decisions.positioning),
                DecisionKey::Pricing => serde_json::to_value(&state.decisions.pricing),
                DecisionKey::Channels => serde_json::to_value(&state.decisions.channels),
                DecisionKey::SalesMotion => serde_json::to_value(&state.decisions.sales_motion),
            }
            .map_err(|e| ApiError::Internal(e.to_string()))?;

            (decision_value, report, changed, state.clone())
        };

        // A changed selection cascades: rerun the dependent agents plus the
        // graph/validator tail on a fresh run.
        let rerun = if changed {
            let run_id = new_run_id();
            let record = RunRecord {
                id: run_id.clone(),
                scenario_id: scenario_id.to_string(),
                status: RunStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
                resumed_from_run_id: None,
                changed_decision: Some(key),
                next_agent_index: 0,
                last_checkpoint: None,
                completed_agents: Vec::new(),
                skipped_agents: Vec::new(),
                last_error: None,
                claim: WorkClaim::new(),
            };
            let mut state = state_for_rerun;
            state.meta.run_id = run_id.clone();
            let response = RunResponse {
                run_id: run_id.clone(),
                scenario_id: scenario_id.to_string(),
                status: RunStatus::Running,
                stream_url: format!("/runs/{run_id}/stream"),
            };
            let claim_ctx = PipelineContext {
                run_id: run_id.clone(),
                scenario_id: scenario_id.to_string(),
                registry: self.agents.clone(),
                checkpoints: self.checkpoints.clone(),
                events: self.events.clone(),
                budgets: self.budgets.clone(),
                claim: record.claim.clone(),
                changed_decision: Some(key),
                start_index: 0,
                resumed: false,
                resume_from_checkpoint: None,
                simulate_failure_at_agent: None,
            };
            self.inner.write().await.runs.insert(run_id, record);
            self.spawn_run_with_ctx(claim_ctx, state);
            info!(
                scenario_id,
                decision = %key,
                rerun_agent_owner = decision_agent(key),
                "decision override triggered partial rerun"
            );
            Some(response)
        } else {
            None
        };

        Ok(DecisionSelectResponse {
            scenario_id: scenario_id.to_string(),
            decision_key: key,
            decision: decision_value,
            validator: report,
            rerun,
        })
    }

    async fn complete_scenario(&self, scenario_id: &str) -> Result<CompleteResponse, ApiError> {
        let mut registry = self.inner.write().await;
        let scenario = registry
            .scenarios
            .get_mut(scenario_id)
            .ok_or_else(|| ApiError::NotFound(format!("scenario {scenario_id}")))?;

        let report = evaluate(&scenario.state, ValidationGates::completion());
        if report.blocking {
            return Err(ApiError::Blocked {
                message: "Scenario completion blocked by validator".to_string(),
                contradictions: report
                    .blocking_contradictions()
                    .into_iter()
                    .cloned()
                    .collect(),
            });
        }

        scenario.state.touch("runtime");
        scenario.updated_at = Utc::now();
        Ok(CompleteResponse {
            scenario_id: scenario_id.to_string(),
            status: "complete".to_string(),
        })
    }

    async fn compare_scenarios(
        &self,
        request: CompareRequest,
    ) -> Result<CompareResponse, ApiError> {
        let registry = self.inner.read().await;
        let left = registry
            .scenarios
            .get(&request.left_scenario_id)
            .ok_or_else(|| ApiError::NotFound(format!("scenario {}", request.left_scenario_id)))?;
        let right = registry
            .scenarios
            .get(&request.right_scenario_id)
            .ok_or_else(|| ApiError::NotFound(format!("scenario {}", request.right_scenario_id)))?;

        let mut decision_diff = serde_json::Map::new();
        for key in DecisionKey::ALL {
            let left_selected = &left.state.decisions.core(key).selected_option_id;
            let right_selected = &right.state.decisions.core(key).selected_option_id;
            if left_selected != right_selected {
                decision_diff.insert(
                    key.as_str().to_string(),
                    json!({ "left": left_selected, "right": right_selected }),
                );
            }
        }

        let confidence_delta =
            right.state.average_confidence() - left.state.average_confidence();
        let risk_delta = right.state.risks.contradictions.len() as i64
            - left.state.risks.contradictions.len() as i64;
        let patches = diff_states(&left.state, &right.state)
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        Ok(CompareResponse {
            left_scenario_id: request.left_scenario_id,
            right_scenario_id: request.right_scenario_id,
            decision_diff: Value::Object(decision_diff),
            confidence_delta: (confidence_delta * 1000.0).round() / 1000.0,
            risk_delta,
            patches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchgraph_core::state::{Constraints, Idea, IdeaCategory, IntakeAnswer, MetaRef};
    use launchgraph_stores::InMemoryCheckpointStore;
    use std::time::Duration;

    fn api() -> RuntimeApi {
        RuntimeApi::new(
            Arc::new(AgentRegistry::fixture(None)),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(RunEventBus::default()),
            RunBudgets::default(),
        )
    }

    fn create_request() -> ProjectCreateRequest {
        ProjectCreateRequest {
            project_name: "GTM for call assistant".to_string(),
            idea: Idea {
                name: "AI call assistant for B2B sales teams".to_string(),
                one_liner: "Never lose a follow-up".to_string(),
                problem: "Reps forget follow-ups".to_string(),
                target_region: "US".to_string(),
                category: IdeaCategory::B2bSaas,
                domain: String::new(),
            },
            constraints: Constraints {
                team_size: 2,
                timeline_weeks: 8,
                budget_usd_monthly: 1000.0,
                ..Constraints::default()
            },
            idempotency_key: None,
        }
    }

    fn intake_request() -> IntakeSubmitRequest {
        IntakeSubmitRequest {
            answers: REQUIRED_INTAKE_FIELDS
                .iter()
                .map(|field| IntakeAnswer {
                    question_id: field.to_string(),
                    answer_type: "text".to_string(),
                    value: json!(format!("answer for {field}")),
                    justification: None,
                    meta: MetaRef::default(),
                })
                .collect(),
        }
    }

    async fn wait_for_terminal(api: &RuntimeApi, run_id: &str) -> RunStatusResponse {
        for _ in 0..500 {
            let status = api.run_status(run_id).await.expect("status");
            if status.status != RunStatus::Running {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run {run_id} never reached a terminal state");
    }

    async fn completed_scenario(api: &RuntimeApi) -> String {
        let created = api.create_project(create_request()).await.expect("project");
        let scenario_id = created.scenario.id;
        api.submit_intake(&scenario_id, intake_request())
            .await
            .expect("intake");
        let run = api
            .start_run(&scenario_id, RunStartRequest::default())
            .await
            .expect("run");
        let status = wait_for_terminal(api, &run.run_id).await;
        assert_eq!(status.status, RunStatus::Completed);
        scenario_id
    }

    #[test]
    fn test_create_project_is_idempotent_by_key() {
        tokio_test::block_on(async {
            let api = api();
            let mut request = create_request();
            request.idempotency_key = Some("key-1".to_string());
            let first = api.create_project(request.clone()).await.expect("create");
            let second = api.create_project(request).await.expect("replay");
            assert_eq!(first.scenario.id, second.scenario.id);
            assert_eq!(first.project.id, second.project.id);
        });
    }

    #[test]
    fn test_run_with_empty_intake_is_refused_with_required_inputs() {
        tokio_test::block_on(async {
            let api = api();
            let created = api.create_project(create_request()).await.expect("project");
            let err = api
                .start_run(&created.scenario.id, RunStartRequest::default())
                .await
                .expect_err("must refuse");
            match err {
                ApiError::Validation { details, .. } => {
                    let missing = details["missing_requirements"]
                        .as_array()
                        .expect("missing list");
                    assert_eq!(missing.len(), REQUIRED_INTAKE_FIELDS.len());
                }
                other => panic!("expected validation error, got {other:?}"),
            }
            // No run was created, and the gaps are recorded as open questions.
            let view = api.get_scenario(&created.scenario.id).await.expect("view");
            let open = view.state.expect("state")["inputs"]["open_questions"]
                .as_array()
                .expect("open questions")
                .len();
            assert_eq!(open, REQUIRED_INTAKE_FIELDS.len());
        });
    }

    #[test]
    fn test_import_rejects_unknown_top_level_key_by_name() {
        tokio_test::block_on(async {
            let api = api();
            let created = api.create_project(create_request()).await.expect("project");
            let mut value = api
                .get_scenario(&created.scenario.id)
                .await
                .expect("view")
                .state
                .expect("state");
            value
                .as_object_mut()
                .unwrap()
                .insert("rogue_section".to_string(), json!({}));
            let err = api
                .import_scenario_state(&created.scenario.id, value)
                .await
                .expect_err("must reject");
            match err {
                ApiError::InvalidArgument(message) => {
                    assert!(message.contains("rogue_section"), "names the key: {message}");
                }
                other => panic!("expected invalid argument, got {other:?}"),
            }
        });
    }

    #[test]
    fn test_full_run_completes_and_persists_plan() {
        tokio_test::block_on(async {
            let api = api();
            let scenario_id = completed_scenario(&api).await;
            let view = api.get_scenario(&scenario_id).await.expect("view");
            let state = view.state.expect("state");
            for key in ["icp", "positioning", "pricing", "channels", "sales_motion"] {
                assert!(
                    !state["decisions"][key]["selected_option_id"]
                        .as_str()
                        .unwrap_or_default()
                        .is_empty(),
                    "{key} selected"
                );
            }
            assert!(state["graph"]["nodes"].as_array().expect("nodes").len() >= 20);
        });
    }

    #[test]
    fn test_event_subscription_replays_from_known_id() {
        tokio_test::block_on(async {
            let api = api();
            let created = api.create_project(create_request()).await.expect("project");
            let scenario_id = created.scenario.id;
            api.submit_intake(&scenario_id, intake_request())
                .await
                .expect("intake");
            let run = api
                .start_run(&scenario_id, RunStartRequest::default())
                .await
                .expect("run");
            wait_for_terminal(&api, &run.run_id).await;

            let (all, _) = api
                .subscribe_events(&run.run_id, None)
                .await
                .expect("subscribe");
            assert_eq!(all.first().map(|e| e.kind), Some(EventKind::RunStarted));
            assert_eq!(all.last().map(|e| e.kind), Some(EventKind::RunCompleted));

            let cursor = &all[2].event_id;
            let (tail, _) = api
                .subscribe_events(&run.run_id, Some(cursor))
                .await
                .expect("subscribe after");
            assert_eq!(tail.len(), all.len() - 3);
            assert_eq!(tail.first().map(|e| e.seq), Some(3));
        });
    }

    #[test]
    fn test_resume_after_simulated_failure() {
        tokio_test::block_on(async {
            let api = api();
            let created = api.create_project(create_request()).await.expect("project");
            let scenario_id = created.scenario.id;
            api.submit_intake(&scenario_id, intake_request())
                .await
                .expect("intake");

            let run = api
                .start_run(
                    &scenario_id,
                    RunStartRequest {
                        simulate_failure_at_agent: Some("channel_agent".to_string()),
                        ..RunStartRequest::default()
                    },
                )
                .await
                .expect("run");
            let failed = wait_for_terminal(&api, &run.run_id).await;
            assert_eq!(failed.status, RunStatus::Failed);

            let resumed = api.resume_run(&run.run_id).await.expect("resume");
            let done = wait_for_terminal(&api, &resumed.run_id).await;
            assert_eq!(done.status, RunStatus::Completed);
            assert_eq!(done.resumed_from_run_id.as_deref(), Some(run.run_id.as_str()));

            let (events, _) = api
                .subscribe_events(&resumed.run_id, None)
                .await
                .expect("subscribe");
            assert_eq!(events[0].kind, EventKind::RunResumed);
            assert_eq!(events[1].kind, EventKind::AgentStarted);
            assert_eq!(events[1].data["agent"], "channel_agent");
        });
    }

    #[test]
    fn test_resume_requires_failed_run() {
        tokio_test::block_on(async {
            let api = api();
            let scenario_id = completed_scenario(&api).await;
            let view = api.get_scenario(&scenario_id).await.expect("view");
            let run_id = view.state.expect("state")["meta"]["run_id"]
                .as_str()
                .expect("run id")
                .to_string();
            let err = api.resume_run(&run_id).await.expect_err("must refuse");
            assert!(matches!(err, ApiError::Conflict(_)));
        });
    }

    #[test]
    fn test_decision_override_cascades_into_partial_rerun() {
        tokio_test::block_on(async {
            let api = api();
            let scenario_id = completed_scenario(&api).await;

            let response = api
                .select_decision(
                    &scenario_id,
                    "icp",
                    DecisionSelectRequest {
                        selected_option_id: Some("icp_opt_2".to_string()),
                        justification: Some(
                            "SMB founders converted faster in the pilot cohort.".to_string(),
                        ),
                        ..DecisionSelectRequest::default()
                    },
                )
                .await
                .expect("select");

            let rerun = response.rerun.expect("cascading rerun");
            let done = wait_for_terminal(&api, &rerun.run_id).await;
            assert_eq!(done.status, RunStatus::Completed);

            let (events, _) = api
                .subscribe_events(&rerun.run_id, None)
                .await
                .expect("subscribe");
            let mut started: Vec<String> = events
                .iter()
                .filter(|e| e.kind == EventKind::AgentStarted)
                .filter_map(|e| e.data["agent"].as_str().map(str::to_string))
                .collect();
            started.sort();
            started.dedup();
            assert_eq!(
                started,
                vec![
                    "channel_agent",
                    "graph_builder",
                    "positioning_agent",
                    "pricing_agent",
                    "sales_motion_agent",
                    "validator_agent",
                ]
            );

            // The user's choice survives the rerun.
            let view = api.get_scenario(&scenario_id).await.expect("view");
            assert_eq!(
                view.state.expect("state")["decisions"]["icp"]["selected_option_id"],
                "icp_opt_2"
            );
        });
    }

    #[test]
    fn test_custom_override_without_justification_is_rejected() {
        tokio_test::block_on(async {
            let api = api();
            let scenario_id = completed_scenario(&api).await;
            let err = api
                .select_decision(
                    &scenario_id,
                    "pricing",
                    DecisionSelectRequest {
                        is_custom: true,
                        custom_value: Some(json!({"metric": "usage_based"})),
                        ..DecisionSelectRequest::default()
                    },
                )
                .await
                .expect_err("must reject");
            assert!(matches!(err, ApiError::Validation { .. }));
        });
    }

    #[test]
    fn test_completion_gates_on_critical_contradictions() {
        tokio_test::block_on(async {
            let api = api();
            let created = api.create_project(create_request()).await.expect("project");
            // Nothing decided yet: completion must be blocked.
            let err = api
                .complete_scenario(&created.scenario.id)
                .await
                .expect_err("must block");
            match err {
                ApiError::Blocked { contradictions, .. } => {
                    assert!(contradictions.iter().any(|c| c.rule_id == "V-ICP-01"));
                }
                other => panic!("expected blocked, got {other:?}"),
            }

            // After a clean run the gates open.
            let scenario_id = completed_scenario(&api).await;
            let response = api.complete_scenario(&scenario_id).await.expect("complete");
            assert_eq!(response.status, "complete");
        });
    }

    #[test]
    fn test_compare_scenarios_reports_decision_and_state_diff() {
        tokio_test::block_on(async {
            let api = api();
            let left = completed_scenario(&api).await;
            let right = completed_scenario(&api).await;
            api.select_decision(
                &right,
                "icp",
                DecisionSelectRequest {
                    selected_option_id: Some("icp_opt_2".to_string()),
                    justification: Some("Comparing against the SMB-first variant.".to_string()),
                    ..DecisionSelectRequest::default()
                },
            )
            .await
            .expect("select");

            let response = api
                .compare_scenarios(CompareRequest {
                    left_scenario_id: left.clone(),
                    right_scenario_id: right.clone(),
                })
                .await
                .expect("compare");
            assert!(response.decision_diff.get("icp").is_some());
            assert!(!response.patches.is_empty());
        });
    }
}
