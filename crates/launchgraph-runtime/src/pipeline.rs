//! The two-pass run pipeline.
//!
//! Pass 1 sweeps the static agent sequence; the reconciliation pass maps
//! validator contradictions back to responsible agents and re-executes them
//! until the finding set stabilizes or the round cap is hit. Every state
//! mutation is checkpointed before any event referring to it is published.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use launchgraph_agents::{Agent, AgentContext, AgentRegistry};
use launchgraph_core::deps::{hard_dependencies, impacted_agents, AGENT_SEQUENCE};
use launchgraph_core::event::EventKind;
use launchgraph_core::merge::{merge_agent_output, NodeChange};
use launchgraph_core::output::AgentOutput;
use launchgraph_core::state::{
    AgentRunStatus, AgentTiming, AgentTokenSpend, CanonicalState, DecisionKey, SelectionMode,
};
use launchgraph_core::store::CheckpointStore;
use launchgraph_core::validator::{apply_report, evaluate, responsible_agent, ValidationGates};
use launchgraph_stores::RunEventBus;

use crate::claim::WorkClaim;

/// Budgets and caps for one run.
#[derive(Debug, Clone)]
pub struct RunBudgets {
    pub agent_timeout: Duration,
    pub run_deadline: Duration,
    pub reconciliation_rounds: u32,
    pub token_budget: Option<u64>,
}

impl Default for RunBudgets {
    fn default() -> Self {
        Self {
            agent_timeout: Duration::from_secs(45),
            run_deadline: Duration::from_secs(600),
            reconciliation_rounds: 3,
            token_budget: None,
        }
    }
}

/// Why a run died.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    Agent,
    Deadline,
    Budget,
    Cancelled,
    Store,
}

impl FailureCause {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCause::Agent => "agent",
            FailureCause::Deadline => "deadline",
            FailureCause::Budget => "budget",
            FailureCause::Cancelled => "cancelled",
            FailureCause::Store => "store",
        }
    }
}

/// Run-level failure: carries the last state so the caller can persist it and
/// resume later.
#[derive(Debug, thiserror::Error)]
#[error("run failed ({}): {message}", cause.as_str())]
pub struct PipelineFailure {
    pub cause: FailureCause,
    pub message: String,
    pub state: CanonicalState,
    pub failed_agent: Option<String>,
    pub failed_index: usize,
    pub completed_agents: Vec<String>,
    pub skipped_agents: Vec<String>,
    pub last_checkpoint: Option<u64>,
}

#[derive(Debug)]
pub struct PipelineResult {
    pub state: CanonicalState,
    pub completed_agents: Vec<String>,
    pub skipped_agents: Vec<String>,
    pub blocking: bool,
    pub last_checkpoint: u64,
}

pub struct PipelineContext {
    pub run_id: String,
    pub scenario_id: String,
    pub registry: Arc<AgentRegistry>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub events: Arc<RunEventBus>,
    pub budgets: RunBudgets,
    pub claim: WorkClaim,
    pub changed_decision: Option<DecisionKey>,
    pub start_index: usize,
    pub resumed: bool,
    /// Checkpoint index the run was restored from, for `run_resumed`.
    pub resume_from_checkpoint: Option<u64>,
    /// Test hook: fail deterministically when this agent is reached.
    pub simulate_failure_at_agent: Option<String>,
}

struct Engine<'a> {
    ctx: &'a PipelineContext,
    deadline: Instant,
    completed: Vec<String>,
    skipped: Vec<String>,
    failed: BTreeSet<String>,
    last_checkpoint: Option<u64>,
}

enum StepOutcome {
    Completed(CanonicalState),
    AgentFailed(CanonicalState),
}

impl<'a> Engine<'a> {
    async fn publish(&self, kind: EventKind, data: serde_json::Value) {
        self.ctx
            .events
            .publish(&self.ctx.run_id, &self.ctx.scenario_id, kind, data)
            .await;
    }

    fn failure(
        &self,
        cause: FailureCause,
        message: impl Into<String>,
        state: CanonicalState,
        failed_agent: Option<&str>,
        failed_index: usize,
    ) -> Box<PipelineFailure> {
        Box::new(PipelineFailure {
            cause,
            message: message.into(),
            state,
            failed_agent: failed_agent.map(str::to_string),
            failed_index,
            completed_agents: self.completed.clone(),
            skipped_agents: self.skipped.clone(),
            last_checkpoint: self.last_checkpoint,
        })
    }

    /// Checkpoint fence: observes cancellation, then durably appends. No
    /// event referring to this state version is published before it returns.
    async fn fence(
        &mut self,
        state: &CanonicalState,
        at_agent: &str,
        index: usize,
    ) -> Result<u64, Box<PipelineFailure>> {
        if self.ctx.claim.is_released() {
            return Err(self.failure(
                FailureCause::Cancelled,
                "run cancelled by user",
                state.clone(),
                Some(at_agent),
                index,
            ));
        }
        match self.ctx.checkpoints.append(&self.ctx.run_id, state).await {
            Ok(checkpoint_index) => {
                self.last_checkpoint = Some(checkpoint_index);
                Ok(checkpoint_index)
            }
            Err(err) => Err(self.failure(
                FailureCause::Store,
                format!("checkpoint append failed: {err}"),
                state.clone(),
                Some(at_agent),
                index,
            )),
        }
    }

    /// Execute one agent slot: invoke, merge, auto-select, account, fence,
    /// emit. Agent-level failures are absorbed; run-level failures bubble.
    async fn run_agent_step(
        &mut self,
        state: CanonicalState,
        agent_name: &str,
        index: usize,
        pass: u32,
    ) -> Result<StepOutcome, Box<PipelineFailure>> {
        if self.deadline <= Instant::now() {
            return Err(self.failure(
                FailureCause::Deadline,
                "run deadline exceeded",
                state,
                Some(agent_name),
                index,
            ));
        }

        self.publish(
            EventKind::AgentStarted,
            json!({"agent": agent_name, "index": index, "pass": pass}),
        )
        .await;

        let started_at = Utc::now();
        let timer = Instant::now();

        if self
            .ctx
            .simulate_failure_at_agent
            .as_deref()
            .map(|target| target == agent_name)
            .unwrap_or(false)
        {
            let mut state = state;
            append_timing(&mut state, agent_name, started_at, timer, AgentRunStatus::Failed);
            return Err(self.failure(
                FailureCause::Agent,
                format!("simulated failure at {agent_name}"),
                state,
                Some(agent_name),
                index,
            ));
        }

        let Some(agent) = self.ctx.registry.get(agent_name) else {
            return Ok(self
                .absorb_agent_failure(state, agent_name, index, started_at, timer, "agent not registered")
                .await);
        };

        let agent_ctx = AgentContext::new(self.ctx.run_id.clone())
            .with_changed_decision(self.ctx.changed_decision);
        let produced =
            tokio::time::timeout(self.ctx.budgets.agent_timeout, produce(&agent, &state, &agent_ctx))
                .await;

        let output = match produced {
            Err(_) => {
                return Ok(self
                    .absorb_agent_failure(state, agent_name, index, started_at, timer, "agent timed out")
                    .await);
            }
            Ok(Err(err)) => {
                return Ok(self
                    .absorb_agent_failure(state, agent_name, index, started_at, timer, &err)
                    .await);
            }
            Ok(Ok(output)) => output,
        };

        let outcome = match merge_agent_output(&state, &output) {
            Ok(outcome) => outcome,
            Err(err) => {
                // Malformed output: nothing was applied, the agent slot fails.
                return Ok(self
                    .absorb_agent_failure(state, agent_name, index, started_at, timer, &err.to_string())
                    .await);
            }
        };

        let mut state = outcome.state;
        auto_select(&mut state, &output);
        apply_token_usage(&mut state, &output);
        append_timing(&mut state, agent_name, started_at, timer, AgentRunStatus::Completed);

        if let Some(cap) = self.ctx.budgets.token_budget {
            if state.telemetry.token_spend.total > cap {
                return Err(self.failure(
                    FailureCause::Budget,
                    format!(
                        "token budget exceeded: {} > {cap}",
                        state.telemetry.token_spend.total
                    ),
                    state,
                    Some(agent_name),
                    index,
                ));
            }
        }

        let checkpoint_index = self.fence(&state, agent_name, index).await?;

        self.publish(
            EventKind::StateCheckpointed,
            json!({
                "agent": agent_name,
                "index": index,
                "checkpoint_index": checkpoint_index,
                "updated_at": state.meta.updated_at,
            }),
        )
        .await;

        if !outcome.warnings.is_empty() {
            self.publish(
                EventKind::ValidatorWarning,
                json!({
                    "agent": agent_name,
                    "count": outcome.warnings.len(),
                    "warnings": outcome.warnings,
                }),
            )
            .await;
        }

        for change in &outcome.node_changes {
            match change {
                NodeChange::Created(node_id) => {
                    self.publish(EventKind::NodeCreated, json!({"node_id": node_id}))
                        .await;
                }
                NodeChange::Updated(node_id) => {
                    self.publish(EventKind::NodeUpdated, json!({"node_id": node_id}))
                        .await;
                }
            }
        }

        self.publish(
            EventKind::AgentProgress,
            json!({
                "agent": agent_name,
                "patch_count": output.patches.len(),
                "proposal_count": output.proposals.len(),
            }),
        )
        .await;

        self.completed.push(agent_name.to_string());
        self.publish(
            EventKind::AgentCompleted,
            json!({
                "agent": agent_name,
                "index": index,
                "pass": pass,
                "patch_count": output.patches.len(),
                "token_usage": output.token_usage,
            }),
        )
        .await;

        Ok(StepOutcome::Completed(state))
    }

    async fn absorb_agent_failure(
        &mut self,
        mut state: CanonicalState,
        agent_name: &str,
        index: usize,
        started_at: chrono::DateTime<Utc>,
        timer: Instant,
        error: &str,
    ) -> StepOutcome {
        warn!(agent = %agent_name, error, "agent failed");
        append_timing(&mut state, agent_name, started_at, timer, AgentRunStatus::Failed);
        self.failed.insert(agent_name.to_string());
        self.publish(
            EventKind::AgentFailed,
            json!({"agent": agent_name, "index": index, "error": error}),
        )
        .await;
        StepOutcome::AgentFailed(state)
    }
}

async fn produce(
    agent: &Arc<dyn Agent>,
    state: &CanonicalState,
    ctx: &AgentContext,
) -> Result<AgentOutput, String> {
    // Agents read a deep-copied snapshot; they can never touch the live state.
    let snapshot = state.clone();
    agent
        .produce(&snapshot, ctx)
        .await
        .map_err(|err| err.to_string())
}

/// Drive one run end to end.
pub async fn run_pipeline(
    mut state: CanonicalState,
    ctx: PipelineContext,
) -> Result<PipelineResult, Box<PipelineFailure>> {
    state.meta.run_id = ctx.run_id.clone();

    let mut engine = Engine {
        deadline: Instant::now() + ctx.budgets.run_deadline,
        completed: Vec::new(),
        skipped: Vec::new(),
        failed: BTreeSet::new(),
        last_checkpoint: ctx.resume_from_checkpoint,
        ctx: &ctx,
    };

    if ctx.resumed {
        engine
            .publish(
                EventKind::RunResumed,
                json!({
                    "run_id": ctx.run_id,
                    "start_index": ctx.start_index,
                    "checkpoint_index": ctx.resume_from_checkpoint,
                }),
            )
            .await;
    } else {
        engine
            .publish(
                EventKind::RunStarted,
                json!({"run_id": ctx.run_id, "status": "running"}),
            )
            .await;
    }

    let run_agents = impacted_agents(ctx.changed_decision);
    info!(
        run_id = %ctx.run_id,
        start_index = ctx.start_index,
        agents = run_agents.len(),
        resumed = ctx.resumed,
        "pipeline sweep started"
    );

    for (index, agent_name) in AGENT_SEQUENCE.iter().enumerate().skip(ctx.start_index) {
        if ctx.claim.is_released() {
            return Err(engine.failure(
                FailureCause::Cancelled,
                "run cancelled by user",
                state,
                Some(agent_name),
                index,
            ));
        }

        if !run_agents.contains(*agent_name) {
            let now = Utc::now();
            state.telemetry.agent_timings.push(AgentTiming {
                agent: agent_name.to_string(),
                started_at: now,
                ended_at: now,
                duration_ms: 0,
                status: AgentRunStatus::Skipped,
            });
            engine.skipped.push(agent_name.to_string());
            continue;
        }

        let failed_dependency = hard_dependencies(agent_name)
            .iter()
            .find(|dep| engine.failed.contains(**dep));
        if let Some(dependency) = failed_dependency {
            let now = Utc::now();
            state.telemetry.agent_timings.push(AgentTiming {
                agent: agent_name.to_string(),
                started_at: now,
                ended_at: now,
                duration_ms: 0,
                status: AgentRunStatus::Skipped,
            });
            engine.skipped.push(agent_name.to_string());
            engine
                .publish(
                    EventKind::AgentSkipped,
                    json!({
                        "agent": agent_name,
                        "index": index,
                        "reason": format!("hard dependency {dependency} failed"),
                    }),
                )
                .await;
            continue;
        }

        state = match engine.run_agent_step(state, agent_name, index, 1).await? {
            StepOutcome::Completed(state) => state,
            StepOutcome::AgentFailed(state) => state,
        };
    }

    // Reconciliation only applies to full sweeps; override reruns are already
    // scoped by the decision dependency graph.
    if ctx.changed_decision.is_none() {
        state = reconcile(state, &mut engine).await?;
    }

    let report = evaluate(&state, ValidationGates::default());
    apply_report(&mut state, &report);
    state.risks.unresolved_contradictions = report
        .blocking_contradictions()
        .into_iter()
        .cloned()
        .collect();

    let final_index = AGENT_SEQUENCE.len().saturating_sub(1);
    let checkpoint_index = engine.fence(&state, "validator_agent", final_index).await?;
    engine
        .publish(
            EventKind::StateCheckpointed,
            json!({
                "agent": "validator_agent",
                "phase": "final",
                "checkpoint_index": checkpoint_index,
                "updated_at": state.meta.updated_at,
            }),
        )
        .await;

    if report.blocking {
        engine
            .publish(
                EventKind::RunBlocked,
                json!({"reasons": state.risks.unresolved_contradictions}),
            )
            .await;
    } else {
        let node_ids: Vec<&str> = state.graph.nodes.iter().map(|n| n.id.as_str()).collect();
        engine
            .publish(EventKind::NodeUpdated, json!({"node_ids": node_ids}))
            .await;
        engine
            .publish(EventKind::RunCompleted, json!({"status": "completed"}))
            .await;
    }

    info!(
        run_id = %ctx.run_id,
        completed = engine.completed.len(),
        skipped = engine.skipped.len(),
        blocking = report.blocking,
        "pipeline finished"
    );

    Ok(PipelineResult {
        state,
        completed_agents: engine.completed,
        skipped_agents: engine.skipped,
        blocking: report.blocking,
        last_checkpoint: checkpoint_index,
    })
}

/// Pass 2: map blocking contradictions to responsible agents and re-execute
/// that subset (plus the always-run tail) in sequence order, until the
/// finding set stabilizes or the round cap is hit.
async fn reconcile(
    mut state: CanonicalState,
    engine: &mut Engine<'_>,
) -> Result<CanonicalState, Box<PipelineFailure>> {
    let mut previous_rule_ids: Option<Vec<String>> = None;

    for round in 1..=engine.ctx.budgets.reconciliation_rounds {
        let report = evaluate(&state, ValidationGates::default());
        apply_report(&mut state, &report);

        let rule_ids = report.blocking_rule_ids();
        if rule_ids.is_empty() {
            break;
        }
        if previous_rule_ids.as_ref() == Some(&rule_ids) {
            info!(round, rules = ?rule_ids, "contradictions stabilized; stopping reconciliation");
            break;
        }

        let mut rerun: BTreeSet<String> = report
            .blocking_contradictions()
            .iter()
            .flat_map(|c| c.paths.iter())
            .filter_map(|path| responsible_agent(path))
            .filter(|agent| engine.completed.iter().any(|done| done == agent))
            .map(str::to_string)
            .collect();
        for agent in launchgraph_core::deps::ALWAYS_RUN_AGENTS {
            rerun.insert(agent.to_string());
        }

        info!(round, rules = ?rule_ids, rerun = ?rerun, "reconciliation round started");
        previous_rule_ids = Some(rule_ids);

        for (index, agent_name) in AGENT_SEQUENCE.iter().enumerate() {
            if !rerun.contains(*agent_name) {
                continue;
            }
            state = match engine.run_agent_step(state, agent_name, index, round + 1).await? {
                StepOutcome::Completed(state) => state,
                StepOutcome::AgentFailed(state) => state,
            };
        }
    }

    Ok(state)
}

/// Auto-select the recommended option unless the user already chose.
/// The runtime is the sole writer of `selected_option_id`.
fn auto_select(state: &mut CanonicalState, output: &AgentOutput) {
    for proposal in &output.proposals {
        let core = state.decisions.core_mut(proposal.decision_key);
        if core.selected_option_id.is_empty() && !proposal.recommended_option_id.is_empty() {
            core.selected_option_id = proposal.recommended_option_id.clone();
            core.selection_mode = SelectionMode::AutoRecommended;
        }
    }
}

fn apply_token_usage(state: &mut CanonicalState, output: &AgentOutput) {
    let usage = &output.token_usage;
    if usage.total() == 0 && usage.model.is_empty() {
        return;
    }
    let spend = &mut state.telemetry.token_spend;
    spend.total += usage.total();
    spend.by_agent.push(AgentTokenSpend {
        agent: output.agent.clone(),
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        model: usage.model.clone(),
        execution_time_ms: output.execution_time_ms,
    });
}

fn append_timing(
    state: &mut CanonicalState,
    agent: &str,
    started_at: chrono::DateTime<Utc>,
    timer: Instant,
    status: AgentRunStatus,
) {
    state.telemetry.agent_timings.push(AgentTiming {
        agent: agent.to_string(),
        started_at,
        ended_at: Utc::now(),
        duration_ms: timer.elapsed().as_millis() as u64,
        status,
    });
}
