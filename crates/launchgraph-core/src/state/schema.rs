//! Embedded JSON Schema contracts, compiled once per process.

use std::sync::OnceLock;

use jsonschema::{validator_for, Validator};
use serde_json::Value;

use crate::error::CoreError;

const STATE_SCHEMA: &str = include_str!("../../schemas/canonical_state.schema.json");
const AGENT_OUTPUT_SCHEMA: &str = include_str!("../../schemas/agent_output.schema.json");

static STATE_VALIDATOR: OnceLock<Result<Validator, String>> = OnceLock::new();
static AGENT_OUTPUT_VALIDATOR: OnceLock<Result<Validator, String>> = OnceLock::new();

fn compile(raw: &str) -> Result<Validator, String> {
    let schema: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    validator_for(&schema).map_err(|e| e.to_string())
}

fn state_validator() -> Result<&'static Validator, CoreError> {
    match STATE_VALIDATOR.get_or_init(|| compile(STATE_SCHEMA)) {
        Ok(validator) => Ok(validator),
        Err(message) => Err(CoreError::Schema(format!(
            "embedded canonical_state schema is invalid: {message}"
        ))),
    }
}

fn agent_output_validator() -> Result<&'static Validator, CoreError> {
    match AGENT_OUTPUT_VALIDATOR.get_or_init(|| compile(AGENT_OUTPUT_SCHEMA)) {
        Ok(validator) => Ok(validator),
        Err(message) => Err(CoreError::Schema(format!(
            "embedded agent_output schema is invalid: {message}"
        ))),
    }
}

fn check(validator: &Validator, instance: &Value) -> Result<(), CoreError> {
    if validator.is_valid(instance) {
        return Ok(());
    }
    let messages = validator
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(CoreError::Schema(messages.join("; ")))
}

/// Validate a JSON document against `canonical_state.schema.json`.
pub fn validate_state_value(instance: &Value) -> Result<(), CoreError> {
    check(state_validator()?, instance)
}

/// Validate a JSON document against `agent_output.schema.json`.
pub fn validate_agent_output_value(instance: &Value) -> Result<(), CoreError> {
    check(agent_output_validator()?, instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CanonicalState, Constraints, Idea};
    use serde_json::json;

    #[test]
    fn test_default_state_passes_schema() {
        let state = CanonicalState::new("proj_1", "scn_1", Idea::default(), Constraints::default());
        let value = state.to_value().expect("to_value");
        validate_state_value(&value).expect("schema valid");
    }

    #[test]
    fn test_schema_rejects_unknown_root_key() {
        let state = CanonicalState::new("proj_1", "scn_1", Idea::default(), Constraints::default());
        let mut value = state.to_value().expect("to_value");
        value
            .as_object_mut()
            .unwrap()
            .insert("extra".to_string(), json!(1));
        let err = validate_state_value(&value).expect_err("must fail");
        assert!(err.to_string().contains("extra"), "error names the key: {err}");
    }

    #[test]
    fn test_schema_rejects_bad_severity() {
        let state = CanonicalState::new("proj_1", "scn_1", Idea::default(), Constraints::default());
        let mut value = state.to_value().expect("to_value");
        value["risks"]["contradictions"] = json!([
            {"rule_id": "X", "severity": "catastrophic", "message": "nope"}
        ]);
        assert!(validate_state_value(&value).is_err());
    }

    #[test]
    fn test_agent_output_schema_accepts_minimal_output() {
        let value = json!({
            "agent": "icp_agent",
            "run_id": "run_1",
            "produced_at": "2026-01-01T00:00:00Z"
        });
        validate_agent_output_value(&value).expect("valid");
    }

    #[test]
    fn test_agent_output_schema_rejects_relative_patch_path() {
        let value = json!({
            "agent": "icp_agent",
            "run_id": "run_1",
            "produced_at": "2026-01-01T00:00:00Z",
            "patches": [{"op": "replace", "path": "decisions/icp", "value": 1}]
        });
        assert!(validate_agent_output_value(&value).is_err());
    }
}
