//! Typed canonical state: eleven top-level sections, schema-validated on every
//! write. Sum types replace the original free-form string tags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Canonical state schema version. Bumped together with the embedded schema.
pub const SCHEMA_VERSION: &str = "2.0.0";

/// Provenance class of a leaf claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Evidence,
    Inference,
    #[default]
    Assumption,
}

/// Contradiction severity; governs gate behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Critical and high findings gate completion / force reruns.
    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

/// Sales motion variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Motion {
    #[default]
    Unset,
    Plg,
    OutboundLed,
    InboundLed,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceLevel {
    #[default]
    None,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdeaCategory {
    #[default]
    B2bSaas,
    B2bServices,
    B2c,
    Devtools,
    Marketplace,
    Other,
}

impl IdeaCategory {
    /// Categories where absent competitor evidence is a finding, not a feature.
    pub fn is_novel(self) -> bool {
        matches!(self, IdeaCategory::B2c)
    }

    pub fn is_b2b(self) -> bool {
        matches!(self, IdeaCategory::B2bSaas | IdeaCategory::B2bServices)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Draft,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Pillar,
    Decision,
    Evidence,
    #[default]
    Plan,
    Risk,
    Checklist,
    Asset,
}

/// How `selected_option_id` came to be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    Unset,
    AutoRecommended,
    UserSelected,
}

/// Terminal status of one agent slot in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    Completed,
    Failed,
    Skipped,
}

/// Provenance attached to every leaf claim and every patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaRef {
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_confidence() -> f64 {
    0.5
}

impl Default for MetaRef {
    fn default() -> Self {
        Self {
            source_type: SourceType::Assumption,
            confidence: default_confidence(),
            sources: Vec::new(),
            updated_by: None,
            updated_at: None,
        }
    }
}

impl MetaRef {
    pub fn inference(confidence: f64) -> Self {
        Self {
            source_type: SourceType::Inference,
            confidence,
            ..Self::default()
        }
    }

    pub fn evidence(confidence: f64, sources: Vec<String>) -> Self {
        Self {
            source_type: SourceType::Evidence,
            confidence,
            sources,
            ..Self::default()
        }
    }

    pub fn assumption(confidence: f64) -> Self {
        Self {
            source_type: SourceType::Assumption,
            confidence: confidence.min(0.6),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMeta {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub scenario_id: String,
    #[serde(default = "unset_string")]
    pub run_id: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "system_string")]
    pub updated_by: String,
}

fn unset_string() -> String {
    "unset".to_string()
}

fn system_string() -> String {
    "system".to_string()
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Idea {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub one_liner: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub target_region: String,
    #[serde(default)]
    pub category: IdeaCategory,
    #[serde(default)]
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default = "one")]
    pub team_size: u32,
    #[serde(default = "one")]
    pub timeline_weeks: u32,
    #[serde(default)]
    pub budget_usd_monthly: f64,
    #[serde(default)]
    pub compliance_level: ComplianceLevel,
}

fn one() -> u32 {
    1
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            team_size: 1,
            timeline_weeks: 1,
            budget_usd_monthly: 0.0,
            compliance_level: ComplianceLevel::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeAnswer {
    pub question_id: String,
    #[serde(default = "text_string")]
    pub answer_type: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    #[serde(default)]
    pub meta: MetaRef,
}

fn text_string() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenQuestion {
    pub field: String,
    pub question: String,
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inputs {
    #[serde(default)]
    pub intake_answers: Vec<IntakeAnswer>,
    #[serde(default)]
    pub open_questions: Vec<OpenQuestion>,
    #[serde(default)]
    pub clarification_responses: Vec<Value>,
}

impl Inputs {
    /// Question ids with a non-empty answer value.
    pub fn answered_fields(&self) -> Vec<String> {
        self.intake_answers
            .iter()
            .filter(|a| match &a.value {
                Value::String(s) => !s.trim().is_empty(),
                Value::Null => false,
                _ => true,
            })
            .map(|a| a.question_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSource {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippets: Vec<String>,
    #[serde(default)]
    pub quality_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default)]
    pub sources: Vec<EvidenceSource>,
    #[serde(default)]
    pub competitors: Vec<Value>,
    #[serde(default)]
    pub pricing_anchors: Vec<Value>,
    #[serde(default)]
    pub messaging_patterns: Vec<Value>,
    #[serde(default)]
    pub channel_signals: Vec<Value>,
    #[serde(default)]
    pub teardowns: Vec<Value>,
    #[serde(default)]
    pub weakness_map: Vec<Value>,
    #[serde(default)]
    pub positioning_map: Vec<Value>,
}

/// One proposed option on a decision. Agents may attach arbitrary detail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionOption {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionOverride {
    #[serde(default)]
    pub is_custom: bool,
    #[serde(default)]
    pub justification: String,
}

/// A value that lost (or tied) a merge conflict, kept addressable next to the
/// path it fought over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCandidate {
    pub path: String,
    pub value: Value,
    pub meta: MetaRef,
    pub agent: String,
}

/// Fields shared by all five decision slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionCore {
    #[serde(default)]
    pub selected_option_id: String,
    #[serde(default)]
    pub options: Vec<DecisionOption>,
    #[serde(default)]
    pub recommended_option_id: String,
    #[serde(rename = "override", default)]
    pub override_: DecisionOverride,
    #[serde(default)]
    pub selection_mode: SelectionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<ConflictCandidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates_archive: Vec<ConflictCandidate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IcpProfile {
    #[serde(default)]
    pub buyer_role: String,
    #[serde(default)]
    pub company_size: String,
    #[serde(default)]
    pub budget_owner: String,
    #[serde(default)]
    pub trigger_event: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IcpDecision {
    #[serde(flatten)]
    pub core: DecisionCore,
    #[serde(default)]
    pub profile: IcpProfile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositioningFrame {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub wedge: String,
    #[serde(default)]
    pub value_prop: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositioningDecision {
    #[serde(flatten)]
    pub core: DecisionCore,
    #[serde(default)]
    pub frame: PositioningFrame,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTier {
    pub name: String,
    pub price: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingDecision {
    #[serde(flatten)]
    pub core: DecisionCore,
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub tiers: Vec<PricingTier>,
    #[serde(default)]
    pub price_to_test: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsDecision {
    #[serde(flatten)]
    pub core: DecisionCore,
    #[serde(default)]
    pub primary: String,
    #[serde(default)]
    pub secondary: String,
    #[serde(default)]
    pub primary_channels: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SalesMotionDecision {
    #[serde(flatten)]
    pub core: DecisionCore,
    #[serde(default)]
    pub motion: Motion,
}

/// The five decision slots, by key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKey {
    Icp,
    Positioning,
    Pricing,
    Channels,
    SalesMotion,
}

impl DecisionKey {
    pub const ALL: [DecisionKey; 5] = [
        DecisionKey::Icp,
        DecisionKey::Positioning,
        DecisionKey::Pricing,
        DecisionKey::Channels,
        DecisionKey::SalesMotion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionKey::Icp => "icp",
            DecisionKey::Positioning => "positioning",
            DecisionKey::Pricing => "pricing",
            DecisionKey::Channels => "channels",
            DecisionKey::SalesMotion => "sales_motion",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "icp" => Some(DecisionKey::Icp),
            "positioning" => Some(DecisionKey::Positioning),
            "pricing" => Some(DecisionKey::Pricing),
            "channels" => Some(DecisionKey::Channels),
            "sales_motion" => Some(DecisionKey::SalesMotion),
            _ => None,
        }
    }
}

impl std::fmt::Display for DecisionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decisions {
    #[serde(default)]
    pub icp: IcpDecision,
    #[serde(default)]
    pub positioning: PositioningDecision,
    #[serde(default)]
    pub pricing: PricingDecision,
    #[serde(default)]
    pub channels: ChannelsDecision,
    #[serde(default)]
    pub sales_motion: SalesMotionDecision,
}

/// Borrowed view over one decision slot, independent of its extra fields.
pub enum Decision<'a> {
    Icp(&'a IcpDecision),
    Positioning(&'a PositioningDecision),
    Pricing(&'a PricingDecision),
    Channels(&'a ChannelsDecision),
    SalesMotion(&'a SalesMotionDecision),
}

impl Decisions {
    pub fn core(&self, key: DecisionKey) -> &DecisionCore {
        match key {
            DecisionKey::Icp => &self.icp.core,
            DecisionKey::Positioning => &self.positioning.core,
            DecisionKey::Pricing => &self.pricing.core,
            DecisionKey::Channels => &self.channels.core,
            DecisionKey::SalesMotion => &self.sales_motion.core,
        }
    }

    pub fn core_mut(&mut self, key: DecisionKey) -> &mut DecisionCore {
        match key {
            DecisionKey::Icp => &mut self.icp.core,
            DecisionKey::Positioning => &mut self.positioning.core,
            DecisionKey::Pricing => &mut self.pricing.core,
            DecisionKey::Channels => &mut self.channels.core,
            DecisionKey::SalesMotion => &mut self.sales_motion.core,
        }
    }

    pub fn get(&self, key: DecisionKey) -> Decision<'_> {
        match key {
            DecisionKey::Icp => Decision::Icp(&self.icp),
            DecisionKey::Positioning => Decision::Positioning(&self.positioning),
            DecisionKey::Pricing => Decision::Pricing(&self.pricing),
            DecisionKey::Channels => Decision::Channels(&self.channels),
            DecisionKey::SalesMotion => Decision::SalesMotion(&self.sales_motion),
        }
    }
}

/// Per-pillar summary plus whatever shape the pillar's agents contribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pillar {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pillars {
    #[serde(default)]
    pub market_intelligence: Pillar,
    #[serde(default)]
    pub customer: Pillar,
    #[serde(default)]
    pub positioning_pricing: Pillar,
    #[serde(default)]
    pub go_to_market: Pillar,
    #[serde(default)]
    pub product_tech: Pillar,
    #[serde(default)]
    pub execution: Pillar,
}

impl Pillars {
    pub const NAMES: [&'static str; 6] = [
        "market_intelligence",
        "customer",
        "positioning_pricing",
        "go_to_market",
        "product_tech",
        "execution",
    ];

    pub fn get(&self, name: &str) -> Option<&Pillar> {
        match name {
            "market_intelligence" => Some(&self.market_intelligence),
            "customer" => Some(&self.customer),
            "positioning_pricing" => Some(&self.positioning_pricing),
            "go_to_market" => Some(&self.go_to_market),
            "product_tech" => Some(&self.product_tech),
            "execution" => Some(&self.execution),
            _ => None,
        }
    }
}

/// Graph vertex with a stable dotted semantic id. Upserted, never duplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pillar: String,
    #[serde(rename = "type", default)]
    pub node_type: NodeType,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub actions: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphGroup {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub node_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    #[serde(default)]
    pub groups: Vec<GraphGroup>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }
}

/// A validator (or merge) finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contradiction {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_fix: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Contradiction {
    pub fn new(
        rule_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        paths: Vec<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            message: message.into(),
            paths,
            recommended_fix: None,
            extra: Map::new(),
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.recommended_fix = Some(fix.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Risks {
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    #[serde(default)]
    pub missing_proof: Vec<Contradiction>,
    #[serde(default)]
    pub high_risk_flags: Vec<Contradiction>,
    #[serde(default)]
    pub unresolved_contradictions: Vec<Contradiction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default = "unset_string")]
    pub chosen_track: String,
    #[serde(default)]
    pub next_actions: Vec<Value>,
    #[serde(default)]
    pub experiments: Vec<Value>,
    #[serde(default)]
    pub assets: Vec<Value>,
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        Self {
            chosen_track: unset_string(),
            next_actions: Vec::new(),
            experiments: Vec::new(),
            assets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTiming {
    pub agent: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: AgentRunStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentTokenSpend {
    pub agent: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenSpend {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub by_agent: Vec<AgentTokenSpend>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(default)]
    pub agent_timings: Vec<AgentTiming>,
    #[serde(default)]
    pub token_spend: TokenSpend,
    #[serde(default)]
    pub errors: Vec<Value>,
}

/// The single canonical document for one scenario at one checkpoint.
///
/// Unknown top-level keys are rejected at ingress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanonicalState {
    pub meta: StateMeta,
    #[serde(default)]
    pub idea: Idea,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub inputs: Inputs,
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(default)]
    pub decisions: Decisions,
    #[serde(default)]
    pub pillars: Pillars,
    #[serde(default)]
    pub graph: Graph,
    #[serde(default)]
    pub risks: Risks,
    #[serde(default)]
    pub execution: ExecutionPlan,
    #[serde(default)]
    pub telemetry: Telemetry,
}

const ROOT_KEYS: [&str; 11] = [
    "meta",
    "idea",
    "constraints",
    "inputs",
    "evidence",
    "decisions",
    "pillars",
    "graph",
    "risks",
    "execution",
    "telemetry",
];

impl CanonicalState {
    /// Fresh scenario state with default decision slots and empty pillars.
    pub fn new(project_id: &str, scenario_id: &str, idea: Idea, constraints: Constraints) -> Self {
        let now = Utc::now();
        Self {
            meta: StateMeta {
                project_id: project_id.to_string(),
                scenario_id: scenario_id.to_string(),
                run_id: unset_string(),
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: now,
                updated_at: now,
                updated_by: system_string(),
            },
            idea,
            constraints,
            inputs: Inputs::default(),
            evidence: Evidence::default(),
            decisions: Decisions::default(),
            pillars: Pillars::default(),
            graph: Graph {
                nodes: Vec::new(),
                edges: Vec::new(),
                groups: default_groups(),
            },
            risks: Risks::default(),
            execution: ExecutionPlan::default(),
            telemetry: Telemetry::default(),
        }
    }

    /// Project to the JSON wire form.
    pub fn to_value(&self) -> Result<Value, CoreError> {
        serde_json::to_value(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Ingest from the JSON wire form. Rejects unknown top-level keys by name
    /// and validates the full document against the embedded schema.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let object = value
            .as_object()
            .ok_or_else(|| CoreError::Schema("state must be an object".to_string()))?;
        for key in object.keys() {
            if !ROOT_KEYS.contains(&key.as_str()) {
                return Err(CoreError::UnknownStateKey(key.clone()));
            }
        }
        super::schema::validate_state_value(&value)?;
        serde_json::from_value(value).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Mark a write: bump `updated_at`, record the writer.
    pub fn touch(&mut self, updated_by: &str) {
        self.meta.updated_at = Utc::now();
        self.meta.updated_by = updated_by.to_string();
    }

    /// Short content hash of the canonical JSON form.
    pub fn state_hash(&self) -> Result<String, CoreError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| CoreError::Serialization(e.to_string()))?;
        let digest = Sha256::digest(&bytes);
        let mut out = String::with_capacity(32);
        for byte in digest.iter().take(16) {
            out.push_str(&format!("{:02x}", byte));
        }
        Ok(out)
    }

    /// Mean node confidence, used by scenario compare.
    pub fn average_confidence(&self) -> f64 {
        if self.graph.nodes.is_empty() {
            return 0.0;
        }
        let total: f64 = self.graph.nodes.iter().map(|n| n.confidence).sum();
        total / self.graph.nodes.len() as f64
    }
}

fn default_groups() -> Vec<GraphGroup> {
    [
        ("group.market_intelligence", "Market Intelligence"),
        ("group.customer", "Customer"),
        ("group.positioning_pricing", "Positioning & Pricing"),
        ("group.go_to_market", "Go-to-Market"),
        ("group.product_tech", "Product & Tech"),
        ("group.execution", "Execution"),
    ]
    .into_iter()
    .map(|(id, title)| GraphGroup {
        id: id.to_string(),
        title: title.to_string(),
        node_ids: Vec::new(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_state() -> CanonicalState {
        CanonicalState::new(
            "proj_1",
            "scn_1",
            Idea {
                name: "AI call assistant".to_string(),
                one_liner: "Never lose a follow-up".to_string(),
                problem: "Reps forget follow-ups".to_string(),
                target_region: "US".to_string(),
                category: IdeaCategory::B2bSaas,
                domain: String::new(),
            },
            Constraints {
                team_size: 2,
                timeline_weeks: 8,
                budget_usd_monthly: 1000.0,
                compliance_level: ComplianceLevel::None,
            },
        )
    }

    #[test]
    fn test_round_trip_through_value() {
        let state = sample_state();
        let value = state.to_value().expect("to_value");
        let back = CanonicalState::from_value(value).expect("from_value");
        assert_eq!(back.meta.scenario_id, "scn_1");
        assert_eq!(back.graph.groups.len(), 6);
    }

    #[test]
    fn test_unknown_top_level_key_is_named() {
        let mut value = sample_state().to_value().expect("to_value");
        value
            .as_object_mut()
            .unwrap()
            .insert("bogus_section".to_string(), json!({}));
        match CanonicalState::from_value(value) {
            Err(CoreError::UnknownStateKey(key)) => assert_eq!(key, "bogus_section"),
            other => panic!("expected unknown key rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_state_hash_is_stable_and_content_sensitive() {
        let state = sample_state();
        let h1 = state.state_hash().expect("hash");
        let h2 = state.state_hash().expect("hash");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 32);

        let mut changed = state.clone();
        changed.decisions.pricing.metric = "per_seat".to_string();
        assert_ne!(h1, changed.state_hash().expect("hash"));
    }

    #[test]
    fn test_decision_core_accessor_by_key() {
        let mut state = sample_state();
        state
            .decisions
            .core_mut(DecisionKey::Pricing)
            .selected_option_id = "price_opt_1".to_string();
        assert_eq!(
            state.decisions.core(DecisionKey::Pricing).selected_option_id,
            "price_opt_1"
        );
        assert!(state
            .decisions
            .core(DecisionKey::Icp)
            .selected_option_id
            .is_empty());
    }

    #[test]
    fn test_answered_fields_skips_blank_values() {
        let mut state = sample_state();
        state.inputs.intake_answers = vec![
            IntakeAnswer {
                question_id: "buyer_role".to_string(),
                answer_type: "text".to_string(),
                value: json!("Head of Sales"),
                justification: None,
                meta: MetaRef::default(),
            },
            IntakeAnswer {
                question_id: "trigger_event".to_string(),
                answer_type: "text".to_string(),
                value: json!("   "),
                justification: None,
                meta: MetaRef::default(),
            },
        ];
        assert_eq!(state.inputs.answered_fields(), vec!["buyer_role"]);
    }

    #[test]
    fn test_severity_blocking_classes() {
        assert!(Severity::Critical.is_blocking());
        assert!(Severity::High.is_blocking());
        assert!(!Severity::Medium.is_blocking());
        assert!(!Severity::Low.is_blocking());
    }
}
