//! Provider client: real LLM/search calls with retry, plus the fixture
//! lookup that makes tests deterministic.
//!
//! Fixture responses are resolved from a local directory keyed by
//! `(agent_name, fingerprint(idea + constraints + intake))`, with an
//! `default.json` fallback per agent.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use launchgraph_core::output::AgentOutput;
use launchgraph_core::state::{validate_agent_output_value, CanonicalState};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(String),

    #[error("response error: {0}")]
    Response(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("missing api key: {0}")]
    MissingApiKey(String),

    #[error("fixture error: {0}")]
    Fixture(String),

    #[error("agent error: {0}")]
    Agent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderMode {
    #[default]
    Fixture,
    Real,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub mode: ProviderMode,
    pub fixture_root: Option<PathBuf>,
    pub gemini_endpoint: String,
    pub gemini_api_key: Option<String>,
    pub perplexity_endpoint: String,
    pub perplexity_api_key: Option<String>,
    pub timeout_secs: u64,
    pub retries: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            mode: ProviderMode::Fixture,
            fixture_root: None,
            gemini_endpoint:
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
                    .to_string(),
            gemini_api_key: None,
            perplexity_endpoint: "https://api.perplexity.ai/chat/completions".to_string(),
            perplexity_api_key: None,
            timeout_secs: 30,
            retries: 3,
        }
    }
}

/// Client for upstream LLM/search providers.
pub struct ProviderClient {
    http: reqwest::Client,
    settings: ProviderSettings,
}

impl ProviderClient {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Gemini-style JSON completion with exponential backoff.
    pub async fn gemini_json(&self, prompt: &str) -> Result<Value, ProviderError> {
        self.with_retry(|| self.gemini_once(prompt)).await
    }

    /// Perplexity-style (search-grounded) JSON completion with backoff.
    pub async fn perplexity_json(&self, prompt: &str) -> Result<Value, ProviderError> {
        self.with_retry(|| self.perplexity_once(prompt)).await
    }

    async fn with_retry<F, Fut>(&self, call: F) -> Result<Value, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Value, ProviderError>>,
    {
        let attempts = self.settings.retries.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(attempt, error = %err, "provider call failed");
                    last_err = Some(err);
                    if attempt + 1 < attempts {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ProviderError::Http("no attempts made".to_string())))
    }

    async fn gemini_once(&self, prompt: &str) -> Result<Value, ProviderError> {
        let key = self
            .settings
            .gemini_api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingApiKey("gemini".to_string()))?;
        let url = format!("{}?key={}", self.settings.gemini_endpoint, key);
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {"temperature": 0.2},
        });
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Response(format!("HTTP {status}: {text}")));
        }
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        let text = parsed["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| ProviderError::Response("missing candidates text".to_string()))?;
        parse_json_payload(text)
    }

    async fn perplexity_once(&self, prompt: &str) -> Result<Value, ProviderError> {
        let key = self
            .settings
            .perplexity_api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingApiKey("perplexity".to_string()))?;
        let body = json!({
            "model": "sonar-pro",
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.2,
        });
        let response = self
            .http
            .post(&self.settings.perplexity_endpoint)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Response(format!("HTTP {status}: {text}")));
        }
        let parsed: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::Response("missing choices".to_string()))?;
        parse_json_payload(content)
    }

    /// Resolve a recorded output for `(agent, fingerprint)` from the fixture
    /// directory, if one exists. `default.json` catches all fingerprints.
    pub fn fixture_output(
        &self,
        agent: &str,
        state: &CanonicalState,
    ) -> Result<Option<AgentOutput>, ProviderError> {
        let Some(root) = &self.settings.fixture_root else {
            return Ok(None);
        };
        let fingerprint = state_fingerprint(state)?;
        let candidates = [
            root.join(agent).join(format!("{fingerprint}.json")),
            root.join(agent).join("default.json"),
        ];
        for path in candidates {
            if !path.is_file() {
                continue;
            }
            debug!(agent, path = %path.display(), "loading fixture output");
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| ProviderError::Fixture(format!("{}: {e}", path.display())))?;
            let value: Value = serde_json::from_str(&raw)
                .map_err(|e| ProviderError::Fixture(format!("{}: {e}", path.display())))?;
            validate_agent_output_value(&value)
                .map_err(|e| ProviderError::Fixture(format!("{}: {e}", path.display())))?;
            let output: AgentOutput = serde_json::from_value(value)
                .map_err(|e| ProviderError::Serialization(e.to_string()))?;
            return Ok(Some(output));
        }
        Ok(None)
    }
}

fn parse_json_payload(text: &str) -> Result<Value, ProviderError> {
    let payload = extract_json(text)
        .ok_or_else(|| ProviderError::Response("output did not contain JSON".to_string()))?;
    serde_json::from_str(&payload).map_err(|e| ProviderError::Serialization(e.to_string()))
}

/// First 16 hex chars of sha256 over the canonical JSON of
/// `(idea, constraints, intake_answers)`.
pub fn state_fingerprint(state: &CanonicalState) -> Result<String, ProviderError> {
    let keyed = json!({
        "idea": state.idea,
        "constraints": state.constraints,
        "intake_answers": state.inputs.intake_answers,
    });
    let bytes = serde_json::to_vec(&keyed).map_err(|e| ProviderError::Serialization(e.to_string()))?;
    let digest = Sha256::digest(&bytes);
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{:02x}", byte));
    }
    Ok(out)
}

/// Extract the first balanced JSON object embedded in free text.
pub fn extract_json(text: &str) -> Option<String> {
    for (start, ch) in text.char_indices() {
        if ch != '{' {
            continue;
        }
        if let Some(end) = find_json_object_end(text, start) {
            let candidate = &text[start..=end];
            if serde_json::from_str::<Value>(candidate)
                .map(|v| v.is_object())
                .unwrap_or(false)
            {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

fn find_json_object_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text[start..].char_indices() {
        let abs = start + idx;
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    return None;
                }
                depth -= 1;
                if depth == 0 {
                    return Some(abs);
                }
            }
            _ => {}
        }
    }
    None
}
