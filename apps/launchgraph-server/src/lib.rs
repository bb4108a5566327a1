//! HTTP/SSE surface for the Launchgraph runtime.
//!
//! Thin façade over [`launchgraph_api::RuntimeApi`]: verbs-and-nouns routes,
//! SSE event streaming with `Last-Event-ID` replay, and boot-time wiring of
//! the configured checkpoint backend and provider mode.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use launchgraph_agents::{AgentRegistry, ProviderClient, ProviderMode, ProviderSettings};
use launchgraph_api::{
    ApiError, ApiService, CompareRequest, DecisionSelectRequest, ErrorCode, IntakeSubmitRequest,
    ProjectCreateRequest, RunStartRequest, RuntimeApi,
};
use launchgraph_config::{load_config, ConfigError, LaunchgraphConfig};
use launchgraph_core::event::RunEvent;
use launchgraph_core::state::{
    validate_state_value, CanonicalState, Constraints, Idea, SCHEMA_VERSION,
};
use launchgraph_core::store::{CheckpointStore, StoreError};
use launchgraph_runtime::RunBudgets;
use launchgraph_stores::{
    InMemoryCheckpointStore, PostgresCheckpointStore, RedisCheckpointStore, RunEventBus,
};

/// Boot failures, mapped to process exit codes by the binary.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("schema migration mismatch: {0}")]
    Migration(String),

    #[error("server error: {0}")]
    Serve(String),
}

#[derive(Clone)]
struct AppState {
    api: Arc<RuntimeApi>,
}

pub async fn run_server(
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
) -> Result<(), BootError> {
    let config = load_config(&config_path)?;
    init_tracing(&config);
    schema_self_check()?;

    let api = Arc::new(build_api(&config).await?);
    let listen: SocketAddr = match listen_override {
        Some(addr) => addr,
        None => config
            .server
            .listen
            .parse()
            .map_err(|e| BootError::Config(ConfigError::Invalid(format!("server.listen: {e}"))))?,
    };

    let app = build_router(AppState { api });

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| BootError::Serve(e.to_string()))?;
    info!(%listen, "launchgraph-server listening");
    axum::serve(listener, app)
        .await
        .map_err(|e| BootError::Serve(e.to_string()))
}

fn init_tracing(config: &LaunchgraphConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.observability.log_level.clone()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// The embedded schema and the compiled-in state model must agree before any
/// checkpoint is written.
fn schema_self_check() -> Result<(), BootError> {
    let probe = CanonicalState::new("proj_boot", "scn_boot", Idea::default(), Constraints::default());
    if probe.meta.schema_version != SCHEMA_VERSION {
        return Err(BootError::Migration(format!(
            "state model reports schema {} but binary expects {}",
            probe.meta.schema_version, SCHEMA_VERSION
        )));
    }
    let value = probe
        .to_value()
        .map_err(|e| BootError::Migration(e.to_string()))?;
    validate_state_value(&value).map_err(|e| {
        BootError::Migration(format!("default state no longer matches embedded schema: {e}"))
    })?;
    Ok(())
}

async fn build_api(config: &LaunchgraphConfig) -> Result<RuntimeApi, BootError> {
    let checkpoints = build_checkpoint_store(config).await?;

    let provider_settings = ProviderSettings {
        mode: match config.providers.effective_mode().as_str() {
            "real" => ProviderMode::Real,
            _ => ProviderMode::Fixture,
        },
        fixture_root: config.providers.fixture_root.clone(),
        gemini_endpoint: config.providers.gemini_endpoint.clone(),
        gemini_api_key: std::env::var(&config.providers.gemini_api_key_env).ok(),
        perplexity_endpoint: config.providers.perplexity_endpoint.clone(),
        perplexity_api_key: std::env::var(&config.providers.perplexity_api_key_env).ok(),
        timeout_secs: config.providers.timeout_secs,
        retries: config.providers.retries,
    };
    let mode = provider_settings.mode;
    let client = Arc::new(
        ProviderClient::new(provider_settings)
            .map_err(|e| BootError::Serve(format!("provider client: {e}")))?,
    );
    let registry = match mode {
        ProviderMode::Real => AgentRegistry::provider(client),
        ProviderMode::Fixture => AgentRegistry::fixture(Some(client)),
    };

    let budgets = RunBudgets {
        agent_timeout: Duration::from_secs(config.runtime.agent_timeout_secs),
        run_deadline: Duration::from_secs(config.runtime.run_deadline_secs),
        reconciliation_rounds: config.runtime.reconciliation_rounds,
        token_budget: config.runtime.token_budget,
    };

    Ok(RuntimeApi::new(
        Arc::new(registry),
        checkpoints,
        Arc::new(RunEventBus::new(config.runtime.event_capacity)),
        budgets,
    ))
}

async fn build_checkpoint_store(
    config: &LaunchgraphConfig,
) -> Result<Arc<dyn CheckpointStore>, BootError> {
    let spec = &config.stores.checkpoint;
    match spec.backend.trim().to_ascii_lowercase().as_str() {
        "in_memory" | "memory" => Ok(Arc::new(InMemoryCheckpointStore::new())),
        "redis" => {
            let url = spec.connection_url.as_deref().ok_or_else(|| {
                BootError::Config(ConfigError::Invalid(
                    "stores.checkpoint.connection_url missing".to_string(),
                ))
            })?;
            let prefix = spec
                .key_prefix
                .clone()
                .unwrap_or_else(|| "launchgraph".to_string());
            Ok(Arc::new(RedisCheckpointStore::new(url, prefix)?))
        }
        "postgres" | "postgresql" | "pgsql" => {
            let url = spec.connection_url.as_deref().ok_or_else(|| {
                BootError::Config(ConfigError::Invalid(
                    "stores.checkpoint.connection_url missing".to_string(),
                ))
            })?;
            let prefix = spec
                .key_prefix
                .clone()
                .unwrap_or_else(|| "launchgraph".to_string());
            Ok(Arc::new(PostgresCheckpointStore::new(url, prefix).await?))
        }
        backend => Err(BootError::Config(ConfigError::Invalid(format!(
            "unsupported checkpoint backend '{backend}'"
        )))),
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/projects", post(create_project))
        .route("/scenarios/{id}", get(get_scenario))
        .route("/scenarios/{id}/state", patch(import_state))
        .route("/scenarios/{id}/intake", post(submit_intake))
        .route("/scenarios/{id}/runs", post(start_run))
        .route("/scenarios/{id}/decisions/{key}/select", post(select_decision))
        .route("/scenarios/{id}/complete", post(complete_scenario))
        .route("/scenarios/compare", post(compare_scenarios))
        .route("/runs/{id}", get(run_status).delete(cancel_run))
        .route("/runs/{id}/resume", post(resume_run))
        .route("/runs/{id}/stream", get(stream_events))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<serde_json::Value>)>;

async fn create_project(
    State(state): State<AppState>,
    Json(payload): Json<ProjectCreateRequest>,
) -> ApiResult<launchgraph_api::ProjectCreateResponse> {
    state
        .api
        .create_project(payload)
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn get_scenario(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<launchgraph_api::ScenarioView> {
    state
        .api
        .get_scenario(&id)
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn import_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<serde_json::Value> {
    state
        .api
        .import_scenario_state(&id, payload)
        .await
        .map(|()| Json(serde_json::json!({"scenario_id": id, "status": "imported"})))
        .map_err(map_api_error)
}

async fn submit_intake(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<IntakeSubmitRequest>,
) -> ApiResult<launchgraph_api::IntakeSubmitResponse> {
    state
        .api
        .submit_intake(&id, payload)
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn start_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<RunStartRequest>>,
) -> ApiResult<launchgraph_api::RunResponse> {
    let request = payload.map(|Json(p)| p).unwrap_or_default();
    state
        .api
        .start_run(&id, request)
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn resume_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<launchgraph_api::RunResponse> {
    state
        .api
        .resume_run(&id)
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<launchgraph_api::RunStatusResponse> {
    state
        .api
        .cancel_run(&id)
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn run_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<launchgraph_api::RunStatusResponse> {
    state
        .api
        .run_status(&id)
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn select_decision(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
    Json(payload): Json<DecisionSelectRequest>,
) -> ApiResult<launchgraph_api::DecisionSelectResponse> {
    state
        .api
        .select_decision(&id, &key, payload)
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn complete_scenario(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<launchgraph_api::CompleteResponse> {
    state
        .api
        .complete_scenario(&id)
        .await
        .map(Json)
        .map_err(map_api_error)
}

async fn compare_scenarios(
    State(state): State<AppState>,
    Json(payload): Json<CompareRequest>,
) -> ApiResult<launchgraph_api::CompareResponse> {
    state
        .api
        .compare_scenarios(payload)
        .await
        .map(Json)
        .map_err(map_api_error)
}

/// `GET /runs/{id}/stream` — replay from `Last-Event-ID` (or the journal
/// start), then live events. Each frame: `id:` / `event:` / `data:`.
async fn stream_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<
    Sse<impl futures_util::Stream<Item = Result<SseEvent, std::convert::Infallible>>>,
    (StatusCode, Json<serde_json::Value>),
> {
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let (replay, mut rx) = state
        .api
        .subscribe_events(&id, last_event_id.as_deref())
        .await
        .map_err(map_api_error)?;

    let run_id = id.clone();
    let event_stream = stream! {
        for event in replay {
            yield Ok(to_sse_frame(&event));
        }
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.run_id != run_id {
                        continue;
                    }
                    yield Ok(to_sse_frame(&event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(run_id = %run_id, skipped, "sse subscriber lagged; signalling replay");
                    yield Ok(SseEvent::default()
                        .event("lagged")
                        .data(format!("{{\"skipped\":{skipped}}}")));
                    continue;
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(event_stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keepalive"),
    ))
}

fn to_sse_frame(event: &RunEvent) -> SseEvent {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default()
        .id(event.event_id.clone())
        .event(event.kind.as_str())
        .data(payload)
}

fn map_api_error(err: ApiError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match err.code() {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict | ErrorCode::Blocked => StatusCode::CONFLICT,
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::Unprocessable => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = match &err {
        ApiError::Validation { message, details } => serde_json::json!({
            "code": "validation",
            "message": message,
            "details": details,
        }),
        ApiError::Blocked {
            message,
            contradictions,
        } => serde_json::json!({
            "code": "blocked",
            "message": message,
            "contradictions": contradictions,
        }),
        other => serde_json::json!({
            "code": match other.code() {
                ErrorCode::NotFound => "not_found",
                ErrorCode::Conflict => "conflict",
                ErrorCode::InvalidArgument => "invalid_argument",
                ErrorCode::Unprocessable => "validation",
                ErrorCode::Blocked => "blocked",
                ErrorCode::Internal => "internal",
            },
            "message": other.to_string(),
        }),
    };
    (status, Json(body))
}
