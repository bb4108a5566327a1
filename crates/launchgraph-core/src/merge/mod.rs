//! The deterministic merge engine.
//!
//! Folds one `AgentOutput` into the canonical state under six fixed rules:
//! section precedence, evidence dedup, decision ownership, source-less
//! evidence downgrade, confidence aggregation on conflicting writes, and node
//! upserts by stable id. The merge is a pure function of `(state, output)`;
//! it never mutates its inputs and either applies the whole output or none of
//! it.

mod evidence;

pub use evidence::{canonical_url, dedupe_sources};

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::output::{AgentOutput, NodeAction, PatchOp};
use crate::state::{
    apply_patch_value, resolve_pointer, split_pointer, CanonicalState, Contradiction, MetaRef,
    PointerError, Severity, SourceType,
};

/// Section application order. Later sections consume earlier ones.
const SECTION_ORDER: [&str; 6] = [
    "/evidence",
    "/decisions",
    "/pillars",
    "/graph",
    "/execution",
    "/telemetry",
];

/// Paths only the runtime may write.
const RUNTIME_OWNED_PREFIXES: [&str; 3] = ["/telemetry", "/meta", "/risks/contradictions"];

const CRITICAL_DECISION_PREFIXES: [&str; 4] = [
    "/decisions/icp",
    "/decisions/pricing",
    "/decisions/channels",
    "/decisions/sales_motion",
];

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("invalid patch: {0}")]
    Pointer(#[from] PointerError),

    #[error("merged state failed schema validation: {0}")]
    Schema(String),

    #[error("merge bookkeeping failure at {path}: {message}")]
    Internal { path: String, message: String },
}

/// Non-fatal issue observed while merging; surfaced as `validator_warning`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeWarning {
    pub code: String,
    pub message: String,
    pub path: String,
    pub agent: String,
}

/// Graph node identity change, for `node_created` / `node_updated` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeChange {
    Created(String),
    Updated(String),
}

#[derive(Debug)]
pub struct MergeOutcome {
    pub state: CanonicalState,
    pub warnings: Vec<MergeWarning>,
    pub node_changes: Vec<NodeChange>,
    /// Contradictions the merge itself raised (evidence conflicts).
    pub contradictions: Vec<Contradiction>,
}

enum Seen {
    Applied { value: Value, meta: MetaRef },
    Conflicted,
}

enum Prior {
    Clean,
    Conflicted,
    Conflict(Value, MetaRef),
}

/// Apply one agent output to the state. Returns the new state plus event
/// markers; the input state is untouched on any error.
pub fn merge_agent_output(
    state: &CanonicalState,
    output: &AgentOutput,
) -> Result<MergeOutcome, MergeError> {
    let mut doc = state
        .to_value()
        .map_err(|e| internal("/", e.to_string()))?;
    let mut warnings = Vec::new();
    let mut contradictions = Vec::new();

    let before_nodes = node_signatures(&doc);

    ingest_facts(&mut doc, output, &mut warnings)?;
    ingest_assumptions(&mut doc, output)?;
    apply_proposals(&mut doc, output)?;

    let pristine = doc.clone();

    let mut patches = output.patches.clone();
    patches.sort_by_key(|patch| section_rank(&patch.path));

    let mut seen: HashMap<String, Seen> = HashMap::new();

    for patch in &patches {
        let path = patch.path.as_str();

        if is_runtime_owned(path) {
            let code = if path.ends_with("/selected_option_id") {
                "decision_ownership_violation"
            } else {
                "section_ownership_violation"
            };
            push_telemetry_error(
                &mut doc,
                json!({
                    "component": "merge",
                    "code": code,
                    "path": path,
                    "agent": output.agent,
                    "message": "Path is runtime-owned; agent write rejected.",
                }),
            )?;
            warnings.push(MergeWarning {
                code: code.to_string(),
                message: "Runtime-owned path; agent write rejected.".to_string(),
                path: path.to_string(),
                agent: output.agent.clone(),
            });
            continue;
        }

        let mut meta = patch.meta.clone();
        if meta.source_type == SourceType::Evidence && meta.sources.is_empty() {
            meta.source_type = SourceType::Assumption;
            meta.confidence = meta.confidence.min(0.6);
            push_telemetry_error(
                &mut doc,
                json!({
                    "component": "merge",
                    "code": "evidence_without_sources",
                    "path": path,
                    "agent": output.agent,
                    "source_type": "assumption",
                    "confidence": meta.confidence,
                    "message": "Evidence claim without sources converted to assumption.",
                }),
            )?;
            warnings.push(MergeWarning {
                code: "evidence_without_sources".to_string(),
                message: "Evidence claim without sources converted to assumption.".to_string(),
                path: path.to_string(),
                agent: output.agent.clone(),
            });
            if is_critical_decision_path(path) {
                push_missing_proof(
                    &mut doc,
                    Contradiction::new(
                        "V-EVID-FACT-01",
                        Severity::High,
                        "Critical decision updated without evidence sources.",
                        vec![path.to_string()],
                    ),
                )?;
            }
        }

        if path.starts_with("/evidence/sources") {
            let existing = get_array(&doc, "/evidence/sources")?;
            let mut combined = existing;
            combined.extend(as_list(&patch.value));
            let merged = dedupe_sources(combined);
            set_path(&mut doc, "/evidence/sources", Value::Array(merged))?;
            continue;
        }

        if path.starts_with("/graph/nodes") {
            let existing = get_array(&doc, "/graph/nodes")?;
            let merged = upsert_nodes(existing, as_list(&patch.value));
            set_path(&mut doc, "/graph/nodes", Value::Array(merged))?;
            continue;
        }

        if path.starts_with("/graph/groups") {
            let existing = get_array(&doc, "/graph/groups")?;
            let merged = merge_groups(existing, as_list(&patch.value));
            set_path(&mut doc, "/graph/groups", Value::Array(merged))?;
            continue;
        }

        let prior = match seen.get(path) {
            Some(Seen::Conflicted) => Prior::Conflicted,
            Some(Seen::Applied { value, meta }) if *value != patch.value => {
                Prior::Conflict(value.clone(), meta.clone())
            }
            _ => Prior::Clean,
        };

        match prior {
            Prior::Conflicted => {
                push_candidate(&mut doc, path, &patch.value, &meta, &output.agent)?;
                continue;
            }
            Prior::Conflict(prev_value, prev_meta) => {
                match resolve_conflict(&prev_meta, &meta) {
                    ConflictResolution::KeepFirst => {}
                    ConflictResolution::TakeSecond => {
                        apply_patch_value(&mut doc, patch.op, path, Some(&patch.value))?;
                        seen.insert(
                            path.to_string(),
                            Seen::Applied {
                                value: patch.value.clone(),
                                meta,
                            },
                        );
                    }
                    ConflictResolution::EvidenceStandoff => {
                        // Neither candidate wins; restore the pre-output value
                        // and park both next to the contested path.
                        restore_original(&mut doc, &pristine, path)?;
                        push_candidate(&mut doc, path, &prev_value, &prev_meta, &output.agent)?;
                        push_candidate(&mut doc, path, &patch.value, &meta, &output.agent)?;
                        let contradiction = Contradiction::new(
                            "V-EVID-CONFLICT",
                            Severity::High,
                            "Conflicting evidence updates require user resolution.",
                            vec![path.to_string()],
                        )
                        .with_fix("Review both candidates and choose one.");
                        push_contradiction(&mut doc, contradiction.clone())?;
                        contradictions.push(contradiction);
                        seen.insert(path.to_string(), Seen::Conflicted);
                    }
                    ConflictResolution::SecondLosesArchived => {
                        push_archived_candidate(&mut doc, path, &patch.value, &meta, &output.agent)?;
                        // The surviving value is now assumption-grade too: cap
                        // its tracked confidence so later writes to this path
                        // compete against the downgraded meta.
                        let mut effective = prev_meta;
                        effective.source_type = SourceType::Assumption;
                        effective.confidence = effective.confidence.min(0.6);
                        seen.insert(
                            path.to_string(),
                            Seen::Applied {
                                value: prev_value,
                                meta: effective,
                            },
                        );
                    }
                    ConflictResolution::FirstLosesArchived => {
                        push_archived_candidate(&mut doc, path, &prev_value, &prev_meta, &output.agent)?;
                        apply_patch_value(&mut doc, patch.op, path, Some(&patch.value))?;
                        let mut effective = meta;
                        effective.source_type = SourceType::Assumption;
                        effective.confidence = effective.confidence.min(0.6);
                        seen.insert(
                            path.to_string(),
                            Seen::Applied {
                                value: patch.value.clone(),
                                meta: effective,
                            },
                        );
                    }
                }
                continue;
            }
            Prior::Clean => {}
        }

        apply_patch_value(&mut doc, patch.op, path, Some(&patch.value))?;
        seen.insert(
            path.to_string(),
            Seen::Applied {
                value: patch.value.clone(),
                meta,
            },
        );
    }

    apply_node_updates(&mut doc, output, &mut warnings)?;

    set_path(&mut doc, "/meta/updated_by", json!(output.agent))?;
    set_path(&mut doc, "/meta/updated_at", json!(Utc::now()))?;

    let node_changes = diff_node_signatures(&before_nodes, &doc);

    let state = CanonicalState::from_value(doc).map_err(|e| MergeError::Schema(e.to_string()))?;

    debug!(
        agent = %output.agent,
        patches = output.patches.len(),
        warnings = warnings.len(),
        node_changes = node_changes.len(),
        "agent output merged"
    );

    Ok(MergeOutcome {
        state,
        warnings,
        node_changes,
        contradictions,
    })
}

enum ConflictResolution {
    KeepFirst,
    TakeSecond,
    EvidenceStandoff,
    SecondLosesArchived,
    FirstLosesArchived,
}

fn resolve_conflict(first: &MetaRef, second: &MetaRef) -> ConflictResolution {
    let first_evidence = first.source_type == SourceType::Evidence;
    let second_evidence = second.source_type == SourceType::Evidence;

    match (first_evidence, second_evidence) {
        (true, false) => ConflictResolution::KeepFirst,
        (false, true) => ConflictResolution::TakeSecond,
        (true, true) => ConflictResolution::EvidenceStandoff,
        (false, false) => {
            if first.confidence >= second.confidence {
                ConflictResolution::SecondLosesArchived
            } else {
                ConflictResolution::FirstLosesArchived
            }
        }
    }
}

fn section_rank(path: &str) -> usize {
    SECTION_ORDER
        .iter()
        .position(|prefix| path.starts_with(prefix))
        .unwrap_or(SECTION_ORDER.len())
}

fn is_runtime_owned(path: &str) -> bool {
    if path.starts_with("/decisions/") && path.ends_with("/selected_option_id") {
        return true;
    }
    RUNTIME_OWNED_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

fn is_critical_decision_path(path: &str) -> bool {
    CRITICAL_DECISION_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn internal(path: &str, message: impl Into<String>) -> MergeError {
    MergeError::Internal {
        path: path.to_string(),
        message: message.into(),
    }
}

fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<(), MergeError> {
    apply_patch_value(doc, PatchOp::Replace, path, Some(&value))?;
    Ok(())
}

fn get_array(doc: &Value, path: &str) -> Result<Vec<Value>, MergeError> {
    match resolve_pointer(doc, path) {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(_) => Err(internal(path, "expected array")),
        None => Ok(Vec::new()),
    }
}

fn push_into_array(doc: &mut Value, path: &str, item: Value) -> Result<(), MergeError> {
    let mut items = get_array(doc, path)?;
    if !items.contains(&item) {
        items.push(item);
        set_path(doc, path, Value::Array(items))?;
    }
    Ok(())
}

fn push_telemetry_error(doc: &mut Value, error: Value) -> Result<(), MergeError> {
    push_into_array(doc, "/telemetry/errors", error)
}

fn push_missing_proof(doc: &mut Value, item: Contradiction) -> Result<(), MergeError> {
    let value =
        serde_json::to_value(&item).map_err(|e| internal("/risks/missing_proof", e.to_string()))?;
    push_into_array(doc, "/risks/missing_proof", value)
}

fn push_contradiction(doc: &mut Value, item: Contradiction) -> Result<(), MergeError> {
    let value = serde_json::to_value(&item)
        .map_err(|e| internal("/risks/contradictions", e.to_string()))?;
    push_into_array(doc, "/risks/contradictions", value)
}

fn restore_original(doc: &mut Value, pristine: &Value, path: &str) -> Result<(), MergeError> {
    match resolve_pointer(pristine, path) {
        Some(original) => {
            let original = original.clone();
            apply_patch_value(doc, PatchOp::Replace, path, Some(&original))?;
        }
        None => {
            apply_patch_value(doc, PatchOp::Remove, path, None)?;
        }
    }
    Ok(())
}

/// Nearest ancestor object of `path` hosts the `candidates`/`candidates_archive`
/// arrays, keeping losers addressable next to the path they fought over.
fn candidate_host_path(doc: &Value, path: &str) -> Result<String, MergeError> {
    let tokens = split_pointer(path)?;
    for take in (0..tokens.len()).rev() {
        let host = if take == 0 {
            String::new()
        } else {
            format!("/{}", tokens[..take].join("/"))
        };
        let target = if host.is_empty() {
            Some(doc)
        } else {
            resolve_pointer(doc, &host)
        };
        if matches!(target, Some(Value::Object(_))) {
            return Ok(host);
        }
    }
    Ok(String::new())
}

fn candidate_entry(path: &str, value: &Value, meta: &MetaRef, agent: &str) -> Value {
    json!({
        "path": path,
        "value": value,
        "meta": meta,
        "agent": agent,
    })
}

fn push_candidate(
    doc: &mut Value,
    path: &str,
    value: &Value,
    meta: &MetaRef,
    agent: &str,
) -> Result<(), MergeError> {
    let host = candidate_host_path(doc, path)?;
    push_into_array(
        doc,
        &format!("{host}/candidates"),
        candidate_entry(path, value, meta, agent),
    )
}

fn push_archived_candidate(
    doc: &mut Value,
    path: &str,
    value: &Value,
    meta: &MetaRef,
    agent: &str,
) -> Result<(), MergeError> {
    let host = candidate_host_path(doc, path)?;
    push_into_array(
        doc,
        &format!("{host}/candidates_archive"),
        candidate_entry(path, value, meta, agent),
    )
}

fn ingest_facts(
    doc: &mut Value,
    output: &AgentOutput,
    warnings: &mut Vec<MergeWarning>,
) -> Result<(), MergeError> {
    for fact in &output.facts {
        if fact.sources.is_empty() {
            push_telemetry_error(
                doc,
                json!({
                    "component": "merge",
                    "code": "fact_without_source",
                    "agent": output.agent,
                    "claim": fact.claim,
                    "source_type": "assumption",
                    "confidence": fact.confidence.min(0.6),
                }),
            )?;
            let mut item = Contradiction::new(
                "V-EVID-FACT-01",
                Severity::High,
                "Fact claim without source was downgraded to assumption.",
                vec!["/facts".to_string()],
            );
            item.extra
                .insert("claim".to_string(), json!(fact.claim.clone()));
            push_missing_proof(doc, item)?;
            warnings.push(MergeWarning {
                code: "fact_without_source".to_string(),
                message: "Fact claim without source was downgraded to assumption.".to_string(),
                path: "/facts".to_string(),
                agent: output.agent.clone(),
            });
        }
    }
    Ok(())
}

fn ingest_assumptions(doc: &mut Value, output: &AgentOutput) -> Result<(), MergeError> {
    for assumption in &output.assumptions {
        let experiment = json!({
            "hypothesis": assumption.statement,
            "validation": assumption.how_to_validate,
            "confidence": assumption.confidence,
        });
        push_into_array(doc, "/execution/experiments", experiment)?;
    }
    Ok(())
}

fn apply_proposals(doc: &mut Value, output: &AgentOutput) -> Result<(), MergeError> {
    for proposal in &output.proposals {
        let base = format!("/decisions/{}", proposal.decision_key.as_str());
        let options = serde_json::to_value(&proposal.options)
            .map_err(|e| internal(&base, e.to_string()))?;
        set_path(doc, &format!("{base}/options"), options)?;
        set_path(
            doc,
            &format!("{base}/recommended_option_id"),
            json!(proposal.recommended_option_id),
        )?;
    }
    Ok(())
}

const NODE_SIGNATURE_FIELDS: [&str; 8] = [
    "title",
    "pillar",
    "type",
    "content",
    "assumptions",
    "evidence_refs",
    "dependencies",
    "status",
];

fn node_signature(node: &Value) -> Value {
    let mut signature = Map::new();
    if let Value::Object(map) = node {
        for field in NODE_SIGNATURE_FIELDS {
            if let Some(value) = map.get(field) {
                signature.insert(field.to_string(), value.clone());
            }
        }
    }
    Value::Object(signature)
}

fn node_signatures(doc: &Value) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    if let Some(Value::Array(nodes)) = resolve_pointer(doc, "/graph/nodes") {
        for node in nodes {
            if let Some(id) = node.get("id").and_then(Value::as_str) {
                map.insert(id.to_string(), node_signature(node));
            }
        }
    }
    map
}

fn diff_node_signatures(before: &HashMap<String, Value>, doc: &Value) -> Vec<NodeChange> {
    let mut changes = Vec::new();
    if let Some(Value::Array(nodes)) = resolve_pointer(doc, "/graph/nodes") {
        for node in nodes {
            let Some(id) = node.get("id").and_then(Value::as_str) else {
                continue;
            };
            match before.get(id) {
                None => changes.push(NodeChange::Created(id.to_string())),
                Some(previous) if *previous != node_signature(node) => {
                    changes.push(NodeChange::Updated(id.to_string()));
                }
                Some(_) => {}
            }
        }
    }
    changes
}

/// Upsert incoming node objects into the existing list by id, preserving
/// `updated_at` when nothing meaningful changed so reruns read as mutations.
fn upsert_nodes(existing: Vec<Value>, incoming: Vec<Value>) -> Vec<Value> {
    let mut by_id: Vec<(String, Value)> = existing
        .into_iter()
        .filter_map(|node| {
            node.get("id")
                .and_then(Value::as_str)
                .map(|id| (id.to_string(), node.clone()))
        })
        .collect();

    for node in incoming {
        let Some(id) = node.get("id").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let mut node = node;
        if let Some((_, prior)) = by_id.iter().find(|(key, _)| *key == id) {
            if node_signature(prior) == node_signature(&node) {
                if let (Some(prior_at), Value::Object(map)) =
                    (prior.get("updated_at").cloned(), &mut node)
                {
                    map.insert("updated_at".to_string(), prior_at);
                }
            }
        }
        if let Some(slot) = by_id.iter_mut().find(|(key, _)| *key == id) {
            slot.1 = node;
        } else {
            by_id.push((id, node));
        }
    }

    by_id.sort_by(|(a, _), (b, _)| a.cmp(b));
    by_id.into_iter().map(|(_, node)| node).collect()
}

fn merge_groups(existing: Vec<Value>, incoming: Vec<Value>) -> Vec<Value> {
    let mut by_id: Vec<(String, Value)> = existing
        .into_iter()
        .filter_map(|group| {
            group
                .get("id")
                .and_then(Value::as_str)
                .map(|id| (id.to_string(), group.clone()))
        })
        .collect();

    for group in incoming {
        let Some(id) = group.get("id").and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let mut group = group;
        if let Value::Object(map) = &mut group {
            let node_ids = map
                .get("node_ids")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut deduped = Vec::new();
            for node_id in node_ids {
                if !deduped.contains(&node_id) {
                    deduped.push(node_id);
                }
            }
            map.insert("node_ids".to_string(), Value::Array(deduped));
        }
        if let Some(slot) = by_id.iter_mut().find(|(key, _)| *key == id) {
            slot.1 = group;
        } else {
            by_id.push((id, group));
        }
    }

    by_id.sort_by(|(a, _), (b, _)| a.cmp(b));
    by_id.into_iter().map(|(_, group)| group).collect()
}

fn apply_node_updates(
    doc: &mut Value,
    output: &AgentOutput,
    warnings: &mut Vec<MergeWarning>,
) -> Result<(), MergeError> {
    if output.node_updates.is_empty() {
        return Ok(());
    }

    let mut nodes = get_array(doc, "/graph/nodes")?;

    for update in &output.node_updates {
        let position = nodes
            .iter()
            .position(|node| node.get("id").and_then(Value::as_str) == Some(&update.node_id));

        match position {
            Some(index) => {
                let frozen = nodes[index].get("status").and_then(Value::as_str) == Some("final");
                if frozen && !update.override_ && update.action != NodeAction::Finalize {
                    warnings.push(MergeWarning {
                        code: "node_frozen".to_string(),
                        message: "Node is finalized; non-override update ignored.".to_string(),
                        path: format!("/graph/nodes/{}", update.node_id),
                        agent: output.agent.clone(),
                    });
                    continue;
                }
                merge_node_payload(&mut nodes[index], &update.payload);
                if update.action == NodeAction::Finalize {
                    if let Value::Object(map) = &mut nodes[index] {
                        map.insert("status".to_string(), json!("final"));
                    }
                }
            }
            None => {
                let mut node = blank_node(&update.node_id);
                merge_node_payload(&mut node, &update.payload);
                if update.action == NodeAction::Finalize {
                    if let Value::Object(map) = &mut node {
                        map.insert("status".to_string(), json!("final"));
                    }
                }
                nodes.push(node);
            }
        }
    }

    nodes.sort_by(|a, b| {
        let left = a.get("id").and_then(Value::as_str).unwrap_or_default();
        let right = b.get("id").and_then(Value::as_str).unwrap_or_default();
        left.cmp(right)
    });
    set_path(doc, "/graph/nodes", Value::Array(nodes))
}

fn blank_node(node_id: &str) -> Value {
    json!({
        "id": node_id,
        "title": "",
        "pillar": "",
        "type": "plan",
        "content": {},
        "assumptions": [],
        "confidence": 0.5,
        "evidence_refs": [],
        "dependencies": [],
        "status": "draft",
        "actions": [],
        "updated_at": Utc::now(),
    })
}

fn merge_node_payload(node: &mut Value, payload: &Value) {
    let (Value::Object(node_map), Value::Object(payload_map)) = (node, payload) else {
        return;
    };
    for (key, value) in payload_map {
        if key == "id" {
            continue;
        }
        node_map.insert(key.clone(), value.clone());
    }
    node_map.insert("updated_at".to_string(), json!(Utc::now()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{Patch, PatchMeta, Proposal, TokenUsage};
    use crate::state::{
        CanonicalState, Constraints, DecisionKey, DecisionOption, Idea, NodeStatus,
    };
    use chrono::Utc;

    fn base_state() -> CanonicalState {
        CanonicalState::new("proj_1", "scn_1", Idea::default(), Constraints::default())
    }

    fn output_with_patches(agent: &str, patches: Vec<Patch>) -> AgentOutput {
        AgentOutput {
            patches,
            ..AgentOutput::empty(agent, "run_1")
        }
    }

    fn normalized(state: &CanonicalState) -> Value {
        let mut value = state.to_value().expect("to_value");
        value["meta"]["updated_at"] = json!("normalized");
        value
    }

    #[test]
    fn test_selected_option_id_write_is_rejected() {
        let state = base_state();
        let output = output_with_patches(
            "pricing_agent",
            vec![Patch::replace(
                "/decisions/pricing/selected_option_id",
                json!("price_opt_1"),
                PatchMeta::inference(0.9),
            )],
        );
        let outcome = merge_agent_output(&state, &output).expect("merge");
        assert!(outcome
            .state
            .decisions
            .core(DecisionKey::Pricing)
            .selected_option_id
            .is_empty());
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.code == "decision_ownership_violation"));
        assert_eq!(outcome.state.telemetry.errors.len(), 1);
    }

    #[test]
    fn test_telemetry_write_is_rejected() {
        let state = base_state();
        let output = output_with_patches(
            "execution_agent",
            vec![Patch::replace(
                "/telemetry/token_spend/total",
                json!(999),
                PatchMeta::inference(0.9),
            )],
        );
        let outcome = merge_agent_output(&state, &output).expect("merge");
        assert_eq!(outcome.state.telemetry.token_spend.total, 0);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.code == "section_ownership_violation"));
    }

    #[test]
    fn test_sourceless_evidence_downgraded_to_capped_assumption() {
        let state = base_state();
        let output = output_with_patches(
            "pricing_agent",
            vec![Patch {
                op: PatchOp::Replace,
                path: "/decisions/pricing/metric".to_string(),
                value: json!("per_seat"),
                meta: PatchMeta::evidence(0.9, Vec::new()),
            }],
        );
        let outcome = merge_agent_output(&state, &output).expect("merge");
        assert_eq!(outcome.state.decisions.pricing.metric, "per_seat");
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.code == "evidence_without_sources"));
        let error = &outcome.state.telemetry.errors[0];
        assert_eq!(error["source_type"], "assumption");
        assert_eq!(error["confidence"], 0.6);
        // Critical decision path also lands in missing_proof.
        assert!(outcome
            .state
            .risks
            .missing_proof
            .iter()
            .any(|c| c.rule_id == "V-EVID-FACT-01"));
    }

    #[test]
    fn test_evidence_beats_inference_either_order() {
        let state = base_state();
        let evidence_patch = Patch {
            op: PatchOp::Replace,
            path: "/decisions/pricing/metric".to_string(),
            value: json!("per_seat"),
            meta: PatchMeta::evidence(0.6, vec!["https://example.com/pricing".to_string()]),
        };
        let inference_patch = Patch {
            op: PatchOp::Replace,
            path: "/decisions/pricing/metric".to_string(),
            value: json!("flat_rate"),
            meta: PatchMeta::inference(0.95),
        };

        for patches in [
            vec![evidence_patch.clone(), inference_patch.clone()],
            vec![inference_patch, evidence_patch],
        ] {
            let output = output_with_patches("pricing_agent", patches);
            let outcome = merge_agent_output(&state, &output).expect("merge");
            assert_eq!(outcome.state.decisions.pricing.metric, "per_seat");
        }
    }

    #[test]
    fn test_conflicting_evidence_goes_to_candidates_with_contradiction() {
        let state = base_state();
        let output = output_with_patches(
            "evidence_collector",
            vec![
                Patch {
                    op: PatchOp::Replace,
                    path: "/decisions/pricing/metric".to_string(),
                    value: json!("per_seat"),
                    meta: PatchMeta::evidence(0.8, vec!["https://a.example.com".to_string()]),
                },
                Patch {
                    op: PatchOp::Replace,
                    path: "/decisions/pricing/metric".to_string(),
                    value: json!("usage_based"),
                    meta: PatchMeta::evidence(0.7, vec!["https://b.example.com".to_string()]),
                },
            ],
        );
        let outcome = merge_agent_output(&state, &output).expect("merge");
        // No winner: the path keeps its pre-output value.
        assert_eq!(outcome.state.decisions.pricing.metric, "");
        assert_eq!(outcome.state.decisions.pricing.core.candidates.len(), 2);
        assert!(outcome
            .state
            .risks
            .contradictions
            .iter()
            .any(|c| c.rule_id == "V-EVID-CONFLICT" && c.severity == Severity::High));
        assert_eq!(outcome.contradictions.len(), 1);
    }

    #[test]
    fn test_inference_conflict_higher_confidence_wins_loser_archived() {
        let state = base_state();
        let output = output_with_patches(
            "channel_agent",
            vec![
                Patch {
                    op: PatchOp::Replace,
                    path: "/decisions/channels/primary".to_string(),
                    value: json!("linkedin_outbound"),
                    meta: PatchMeta::inference(0.5),
                },
                Patch {
                    op: PatchOp::Replace,
                    path: "/decisions/channels/primary".to_string(),
                    value: json!("founder_network"),
                    meta: PatchMeta::inference(0.8),
                },
            ],
        );
        let outcome = merge_agent_output(&state, &output).expect("merge");
        assert_eq!(outcome.state.decisions.channels.primary, "founder_network");
        let archive = &outcome.state.decisions.channels.core.candidates_archive;
        assert_eq!(archive.len(), 1);
        assert_eq!(archive[0].value, json!("linkedin_outbound"));
    }

    #[test]
    fn test_conflict_winner_competes_with_capped_confidence_afterwards() {
        let state = base_state();
        let write = |value: &str, confidence: f64| Patch {
            op: PatchOp::Replace,
            path: "/decisions/channels/primary".to_string(),
            value: json!(value),
            meta: PatchMeta::inference(confidence),
        };
        // After the first conflict the surviving value is assumption-grade
        // with confidence capped at 0.6, so a later 0.65 write beats it even
        // though the original winner came in at 0.8.
        let output = output_with_patches(
            "channel_agent",
            vec![
                write("linkedin_outbound", 0.8),
                write("founder_network", 0.5),
                write("seo", 0.65),
            ],
        );
        let outcome = merge_agent_output(&state, &output).expect("merge");
        assert_eq!(outcome.state.decisions.channels.primary, "seo");
        let archive = &outcome.state.decisions.channels.core.candidates_archive;
        assert_eq!(archive.len(), 2);
        assert!(archive.iter().any(|c| c.value == json!("founder_network")));
        assert!(archive.iter().any(|c| c.value == json!("linkedin_outbound")));
    }

    #[test]
    fn test_evidence_sources_deduped_on_insert() {
        let state = base_state();
        let output = output_with_patches(
            "evidence_collector",
            vec![Patch {
                op: PatchOp::Replace,
                path: "/evidence/sources".to_string(),
                value: json!([
                    {"id": "src_1", "url": "https://example.com/pricing", "snippets": ["a"], "quality_score": 0.5},
                    {"id": "src_2", "url": "https://example.com/pricing/", "snippets": ["b"], "quality_score": 0.9}
                ]),
                meta: PatchMeta::evidence(0.9, vec!["https://example.com/pricing".to_string()]),
            }],
        );
        let outcome = merge_agent_output(&state, &output).expect("merge");
        assert_eq!(outcome.state.evidence.sources.len(), 1);
        assert_eq!(outcome.state.evidence.sources[0].quality_score, 0.9);
        assert_eq!(outcome.state.evidence.sources[0].snippets, vec!["a", "b"]);
    }

    #[test]
    fn test_proposals_become_options_without_selection() {
        let state = base_state();
        let mut output = AgentOutput::empty("icp_agent", "run_1");
        output.proposals = vec![Proposal {
            decision_key: DecisionKey::Icp,
            options: vec![
                DecisionOption {
                    id: "icp_opt_1".to_string(),
                    title: "Mid-market sales teams".to_string(),
                    ..DecisionOption::default()
                },
                DecisionOption {
                    id: "icp_opt_2".to_string(),
                    title: "SMB founders".to_string(),
                    ..DecisionOption::default()
                },
            ],
            recommended_option_id: "icp_opt_1".to_string(),
            rationale: "Best evidence-backed fit.".to_string(),
            meta: None,
        }];
        let outcome = merge_agent_output(&state, &output).expect("merge");
        let core = outcome.state.decisions.core(DecisionKey::Icp);
        assert_eq!(core.options.len(), 2);
        assert_eq!(core.recommended_option_id, "icp_opt_1");
        assert!(core.selected_option_id.is_empty());
    }

    #[test]
    fn test_node_upsert_preserves_identity() {
        let state = base_state();
        let node = |summary: &str| {
            json!([{
                "id": "market.icp.summary",
                "title": "ICP Summary",
                "pillar": "customer",
                "type": "decision",
                "content": {"summary": summary},
                "assumptions": [],
                "confidence": 0.7,
                "evidence_refs": [],
                "dependencies": ["icp"],
                "status": "draft",
                "actions": ["edit", "rerun"],
                "updated_at": Utc::now(),
            }])
        };

        let first = output_with_patches(
            "graph_builder",
            vec![Patch::replace("/graph/nodes", node("v1"), PatchMeta::inference(0.7))],
        );
        let outcome1 = merge_agent_output(&state, &first).expect("merge");
        assert_eq!(
            outcome1.node_changes,
            vec![NodeChange::Created("market.icp.summary".to_string())]
        );

        let second = output_with_patches(
            "graph_builder",
            vec![Patch::replace("/graph/nodes", node("v2"), PatchMeta::inference(0.7))],
        );
        let outcome2 = merge_agent_output(&outcome1.state, &second).expect("merge");
        assert_eq!(outcome2.state.graph.nodes.len(), 1);
        assert_eq!(
            outcome2.node_changes,
            vec![NodeChange::Updated("market.icp.summary".to_string())]
        );
    }

    #[test]
    fn test_finalized_node_rejects_non_override_update() {
        let state = base_state();
        let mut output = AgentOutput::empty("graph_builder", "run_1");
        output.node_updates = vec![crate::output::NodeUpdate {
            node_id: "product.security_plan".to_string(),
            action: NodeAction::Finalize,
            payload: json!({"title": "Security Plan", "pillar": "product_tech"}),
            override_: false,
        }];
        let outcome = merge_agent_output(&state, &output).expect("merge");
        assert_eq!(
            outcome.state.graph.node("product.security_plan").unwrap().status,
            NodeStatus::Final
        );

        let mut blocked = AgentOutput::empty("graph_builder", "run_1");
        blocked.node_updates = vec![crate::output::NodeUpdate {
            node_id: "product.security_plan".to_string(),
            action: NodeAction::Update,
            payload: json!({"title": "Changed"}),
            override_: false,
        }];
        let outcome2 = merge_agent_output(&outcome.state, &blocked).expect("merge");
        assert_eq!(
            outcome2.state.graph.node("product.security_plan").unwrap().title,
            "Security Plan"
        );
        assert!(outcome2.warnings.iter().any(|w| w.code == "node_frozen"));

        let mut overridden = AgentOutput::empty("graph_builder", "run_1");
        overridden.node_updates = vec![crate::output::NodeUpdate {
            node_id: "product.security_plan".to_string(),
            action: NodeAction::Update,
            payload: json!({"title": "Changed"}),
            override_: true,
        }];
        let outcome3 = merge_agent_output(&outcome2.state, &overridden).expect("merge");
        assert_eq!(
            outcome3.state.graph.node("product.security_plan").unwrap().title,
            "Changed"
        );
    }

    #[test]
    fn test_assumptions_become_deduped_experiments() {
        let state = base_state();
        let mut output = AgentOutput::empty("evidence_collector", "run_1");
        output.assumptions = vec![
            crate::output::AssumptionRecord {
                statement: "Buyers will pay for follow-up automation".to_string(),
                how_to_validate: "Run 10 WTP interviews".to_string(),
                confidence: 0.5,
            },
            crate::output::AssumptionRecord {
                statement: "Buyers will pay for follow-up automation".to_string(),
                how_to_validate: "Run 10 WTP interviews".to_string(),
                confidence: 0.5,
            },
        ];
        let outcome = merge_agent_output(&state, &output).expect("merge");
        assert_eq!(outcome.state.execution.experiments.len(), 1);
    }

    #[test]
    fn test_malformed_patch_aborts_whole_output() {
        let state = base_state();
        let output = output_with_patches(
            "pricing_agent",
            vec![
                Patch::replace(
                    "/decisions/pricing/metric",
                    json!("per_seat"),
                    PatchMeta::inference(0.7),
                ),
                Patch {
                    op: PatchOp::Replace,
                    path: "/idea/name/deeper".to_string(),
                    value: json!(1),
                    meta: PatchMeta::inference(0.7),
                },
            ],
        );
        assert!(merge_agent_output(&state, &output).is_err());
        // Input state untouched.
        assert!(state.decisions.pricing.metric.is_empty());
    }

    #[test]
    fn test_merge_is_idempotent_modulo_timestamps() {
        let state = base_state();
        let mut output = output_with_patches(
            "pricing_agent",
            vec![
                Patch::replace(
                    "/decisions/pricing/metric",
                    json!("per_seat"),
                    PatchMeta::inference(0.72),
                ),
                Patch::replace(
                    "/evidence/sources",
                    json!([{"id": "src_1", "url": "https://example.com/pricing", "snippets": []}]),
                    PatchMeta::evidence(0.9, vec!["https://example.com/pricing".to_string()]),
                ),
            ],
        );
        output.token_usage = TokenUsage::default();
        let once = merge_agent_output(&state, &output).expect("merge once");
        let twice = merge_agent_output(&once.state, &output).expect("merge twice");
        // Node updated_at preservation plus dedup make the second apply a fixpoint.
        let mut a = normalized(&once.state);
        let mut b = normalized(&twice.state);
        strip_node_timestamps(&mut a);
        strip_node_timestamps(&mut b);
        assert_eq!(a, b);
    }

    fn strip_node_timestamps(value: &mut Value) {
        if let Some(nodes) = value["graph"]["nodes"].as_array_mut() {
            for node in nodes {
                if let Value::Object(map) = node {
                    map.remove("updated_at");
                }
            }
        }
    }
}
