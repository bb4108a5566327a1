//! # Launchgraph Config
//!
//! Unified single-file configuration. One `launchgraph.yaml` configures the
//! server, providers, runtime budgets, store backends and observability.
//! Loaded once at boot and passed down as a handle; never re-read at call
//! sites.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchgraphConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub runtime: RuntimeTuning,
    #[serde(default)]
    pub stores: StoresConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for LaunchgraphConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            app: AppConfig::default(),
            providers: ProvidersConfig::default(),
            runtime: RuntimeTuning::default(),
            stores: StoresConfig::default(),
            server: ServerConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub environment: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            environment: default_env(),
        }
    }
}

fn default_app_name() -> String {
    "launchgraph".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

/// Fixture-vs-real provider selection plus endpoints and key env names.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// "fixture" (deterministic, default) or "real".
    #[serde(default = "default_provider_mode")]
    pub mode: String,
    /// Directory of recorded outputs keyed by agent + state fingerprint.
    #[serde(default)]
    pub fixture_root: Option<PathBuf>,
    #[serde(default = "default_gemini_endpoint")]
    pub gemini_endpoint: String,
    #[serde(default = "default_gemini_key_env")]
    pub gemini_api_key_env: String,
    #[serde(default = "default_perplexity_endpoint")]
    pub perplexity_endpoint: String,
    #[serde(default = "default_perplexity_key_env")]
    pub perplexity_api_key_env: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            mode: default_provider_mode(),
            fixture_root: None,
            gemini_endpoint: default_gemini_endpoint(),
            gemini_api_key_env: default_gemini_key_env(),
            perplexity_endpoint: default_perplexity_endpoint(),
            perplexity_api_key_env: default_perplexity_key_env(),
            timeout_secs: default_provider_timeout(),
            retries: default_retries(),
        }
    }
}

impl ProvidersConfig {
    /// Effective mode after the environment override.
    pub fn effective_mode(&self) -> String {
        match std::env::var("LAUNCHGRAPH_USE_REAL_PROVIDERS") {
            Ok(raw) => {
                let truthy = matches!(
                    raw.trim().to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                );
                if truthy {
                    "real".to_string()
                } else {
                    "fixture".to_string()
                }
            }
            Err(_) => self.mode.clone(),
        }
    }
}

fn default_provider_mode() -> String {
    "fixture".to_string()
}

fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        .to_string()
}

fn default_gemini_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}

fn default_perplexity_endpoint() -> String {
    "https://api.perplexity.ai/chat/completions".to_string()
}

fn default_perplexity_key_env() -> String {
    "PERPLEXITY_API_KEY".to_string()
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

/// Scheduler budgets and caps.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeTuning {
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,
    #[serde(default = "default_run_deadline")]
    pub run_deadline_secs: u64,
    #[serde(default = "default_reconciliation_rounds")]
    pub reconciliation_rounds: u32,
    /// Optional per-run token cap; absence means no cap.
    #[serde(default)]
    pub token_budget: Option<u64>,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for RuntimeTuning {
    fn default() -> Self {
        Self {
            agent_timeout_secs: default_agent_timeout(),
            run_deadline_secs: default_run_deadline(),
            reconciliation_rounds: default_reconciliation_rounds(),
            token_budget: None,
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_agent_timeout() -> u64 {
    45
}

fn default_run_deadline() -> u64 {
    600
}

fn default_reconciliation_rounds() -> u32 {
    3
}

fn default_event_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoresConfig {
    #[serde(default)]
    pub checkpoint: StoreSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSpec {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub connection_url: Option<String>,
    #[serde(default)]
    pub key_prefix: Option<String>,
}

impl Default for StoreSpec {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            connection_url: None,
            key_prefix: None,
        }
    }
}

fn default_backend() -> String {
    "in_memory".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load and validate the full configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<LaunchgraphConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: LaunchgraphConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &LaunchgraphConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }
    if config.app.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "app.name must not be empty".to_string(),
        ));
    }
    match config.providers.mode.as_str() {
        "fixture" | "real" => {}
        other => {
            return Err(ConfigError::Invalid(format!(
                "providers.mode must be 'fixture' or 'real', got '{other}'"
            )));
        }
    }
    if config.runtime.agent_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "runtime.agent_timeout_secs must be > 0".to_string(),
        ));
    }
    if config.runtime.run_deadline_secs == 0 {
        return Err(ConfigError::Invalid(
            "runtime.run_deadline_secs must be > 0".to_string(),
        ));
    }
    if config.runtime.reconciliation_rounds == 0 {
        return Err(ConfigError::Invalid(
            "runtime.reconciliation_rounds must be > 0".to_string(),
        ));
    }
    match config.stores.checkpoint.backend.trim().to_ascii_lowercase().as_str() {
        "in_memory" | "memory" => {}
        "redis" | "postgres" | "postgresql" | "pgsql" => {
            if config.stores.checkpoint.connection_url.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "stores.checkpoint.connection_url is required for backend '{}'",
                    config.stores.checkpoint.backend
                )));
            }
        }
        other => {
            return Err(ConfigError::Invalid(format!(
                "unsupported checkpoint backend '{other}'"
            )));
        }
    }
    Ok(())
}
