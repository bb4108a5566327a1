//! The validator rule engine.
//!
//! A pure function over the canonical state: fourteen rules from a fixed
//! table, each with a stable rule id. Findings land in three buckets
//! (contradictions, missing proof, high-risk flags); critical and high
//! contradictions gate completion and drive reconciliation reruns.

use serde::{Deserialize, Serialize};

use crate::state::{CanonicalState, Contradiction, DecisionKey, Motion, Severity};

/// Which gates the caller is standing at. Plain runs evaluate with all gates
/// off; completion and export turn them on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationGates {
    pub finalize: bool,
    pub mark_complete: bool,
    pub export_final: bool,
}

impl ValidationGates {
    pub fn completion() -> Self {
        Self {
            finalize: true,
            mark_complete: true,
            export_final: false,
        }
    }

    pub fn final_export() -> Self {
        Self {
            finalize: true,
            mark_complete: false,
            export_final: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub contradictions: Vec<Contradiction>,
    pub missing_proof: Vec<Contradiction>,
    pub high_risk_flags: Vec<Contradiction>,
    pub blocking: bool,
}

impl ValidationReport {
    /// Contradictions severe enough to gate completion or force reruns.
    pub fn blocking_contradictions(&self) -> Vec<&Contradiction> {
        self.contradictions
            .iter()
            .filter(|c| c.severity.is_blocking())
            .collect()
    }

    /// Stable sorted rule-id set, used to detect reconciliation fixpoints.
    pub fn blocking_rule_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .blocking_contradictions()
            .iter()
            .map(|c| c.rule_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

const ENTERPRISE_SIZES: [&str; 2] = ["enterprise", "500+"];
const TINY_SIZES: [&str; 2] = ["1-10", "1-20"];
const MIN_OVERRIDE_JUSTIFICATION: usize = 20;

/// Evaluate all rules against the state. Never mutates; the runtime copies
/// the report into `risks.*` via [`apply_report`].
pub fn evaluate(state: &CanonicalState, gates: ValidationGates) -> ValidationReport {
    let mut report = ValidationReport::default();

    let decisions = &state.decisions;
    let pricing = &decisions.pricing;
    let icp = &decisions.icp;
    let motion = decisions.sales_motion.motion;

    if gates.finalize && icp.core.selected_option_id.is_empty() {
        report.contradictions.push(Contradiction::new(
            "V-ICP-01",
            Severity::Critical,
            "ICP selection is required before finalization.",
            vec!["/decisions/icp/selected_option_id".to_string()],
        ));
    }

    if gates.finalize && decisions.positioning.frame.value_prop.is_empty() {
        report.contradictions.push(Contradiction::new(
            "V-PROD-01",
            Severity::Critical,
            "Value proposition is missing.",
            vec!["/decisions/positioning/frame/value_prop".to_string()],
        ));
    }

    if pricing.metric.is_empty()
        && (!pricing.tiers.is_empty() || gates.finalize || gates.mark_complete)
    {
        report.contradictions.push(Contradiction::new(
            "V-PRICE-01",
            Severity::Critical,
            "Pricing metric is required before completion/export.",
            vec![
                "/decisions/pricing/metric".to_string(),
                "/decisions/pricing/tiers".to_string(),
            ],
        ));
    }

    if state.idea.category.is_b2b() && decisions.channels.primary_channels.len() > 2 {
        report.high_risk_flags.push(
            Contradiction::new(
                "V-CHAN-01",
                Severity::High,
                "Focus failure: keep at most one primary plus one secondary channel.",
                vec!["/decisions/channels/primary_channels".to_string()],
            )
            .with_fix("Reduce to one primary and one backup channel."),
        );
    }

    let profile = &icp.profile;
    if motion == Motion::Plg
        && (ENTERPRISE_SIZES.contains(&profile.company_size.as_str())
            || profile.budget_owner.contains("procurement"))
    {
        report.contradictions.push(
            Contradiction::new(
                "V-SALES-01",
                Severity::High,
                "PLG-only motion conflicts with enterprise/procurement ICP.",
                vec![
                    "/decisions/sales_motion/motion".to_string(),
                    "/decisions/icp/profile/company_size".to_string(),
                    "/decisions/icp/profile/budget_owner".to_string(),
                ],
            )
            .with_fix("Switch motion or add enterprise sales support plan."),
        );
    }

    if motion == Motion::OutboundLed
        && TINY_SIZES.contains(&profile.company_size.as_str())
        && pricing.price_to_test <= 99.0
    {
        report.contradictions.push(Contradiction::new(
            "V-SALES-02",
            Severity::Medium,
            "Outbound motion with low price on very small ICP may have poor unit economics.",
            vec![
                "/decisions/sales_motion/motion".to_string(),
                "/decisions/pricing/price_to_test".to_string(),
            ],
        ));
    }

    let has_wtp_proof = !state.evidence.pricing_anchors.is_empty();
    if pricing.price_to_test >= 500.0 && !has_wtp_proof {
        report.missing_proof.push(
            Contradiction::new(
                "V-PRICE-02",
                Severity::High,
                "Price-to-test is high without willingness-to-pay proof.",
                vec![
                    "/decisions/pricing/price_to_test".to_string(),
                    "/evidence/pricing_anchors".to_string(),
                ],
            )
            .with_fix("Run WTP interviews or collect paid pilot signals."),
        );
    }

    if state.constraints.compliance_level == crate::state::ComplianceLevel::High {
        let has_security_node = state.graph.node("product.security_plan").is_some();
        let has_security_summary = state
            .pillars
            .product_tech
            .extra
            .get("security_plan")
            .and_then(|v| v.as_str())
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if gates.finalize && !(has_security_node || has_security_summary) {
            report.contradictions.push(Contradiction::new(
                "V-TECH-01",
                Severity::Critical,
                "High compliance requires a security/data handling plan.",
                vec![
                    "/constraints/compliance_level".to_string(),
                    "/pillars/product_tech/security_plan".to_string(),
                ],
            ));
        }
    }

    if !state.idea.category.is_novel() && state.evidence.competitors.is_empty() {
        report.missing_proof.push(
            Contradiction::new(
                "V-EVID-01",
                Severity::High,
                "Competitor evidence is missing for non-novel category.",
                vec!["/evidence/competitors".to_string()],
            )
            .with_fix("Rerun evidence collection or confirm greenfield market."),
        );
    }

    if !pricing.metric.is_empty() && state.evidence.pricing_anchors.is_empty() {
        report.missing_proof.push(
            Contradiction::new(
                "V-EVID-02",
                Severity::High,
                "Pricing is decided without pricing anchors evidence.",
                vec![
                    "/evidence/pricing_anchors".to_string(),
                    "/decisions/pricing/metric".to_string(),
                ],
            )
            .with_fix("Collect competitor pricing anchors or run WTP experiment."),
        );
    }

    if gates.export_final && state.execution.chosen_track == "unset" {
        report.contradictions.push(
            Contradiction::new(
                "V-EXEC-01",
                Severity::High,
                "Execution track must be selected before final export.",
                vec!["/execution/chosen_track".to_string()],
            )
            .with_fix("Select a track or use draft export."),
        );
    }

    if gates.mark_complete && state.execution.next_actions.is_empty() {
        report.contradictions.push(Contradiction::new(
            "V-OPS-01",
            Severity::High,
            "Execution pillar is empty; scenario cannot be marked complete.",
            vec![
                "/execution/next_actions".to_string(),
                "/pillars/execution".to_string(),
            ],
        ));
    }

    let people_plan_empty = state
        .pillars
        .execution
        .extra
        .get("team_plan")
        .map(|plan| plan.is_null() || plan.as_object().map(|o| o.is_empty()).unwrap_or(false))
        .unwrap_or(true);
    if !pricing.metric.is_empty() && people_plan_empty {
        report.contradictions.push(Contradiction::new(
            "V-PEOPLE-01",
            Severity::Medium,
            "People and cash plan is under-defined relative to pricing decision.",
            vec![
                "/pillars/execution/team_plan".to_string(),
                "/decisions/pricing".to_string(),
            ],
        ));
    }

    for key in DecisionKey::ALL {
        let core = decisions.core(key);
        if core.override_.is_custom
            && core.override_.justification.trim().chars().count() < MIN_OVERRIDE_JUSTIFICATION
        {
            report.contradictions.push(Contradiction::new(
                "V-CONT-01",
                Severity::High,
                format!("Custom override on {key} requires a substantive justification."),
                vec![format!("/decisions/{key}/override/justification")],
            ));
        }
    }

    report.blocking = report
        .contradictions
        .iter()
        .any(|c| c.severity.is_blocking());
    report
}

/// Copy a report into `risks.*`. User-acknowledged `OVERRIDE-*` flags survive
/// revalidation; everything else is replaced.
pub fn apply_report(state: &mut CanonicalState, report: &ValidationReport) {
    let mut flags: Vec<Contradiction> = state
        .risks
        .high_risk_flags
        .iter()
        .filter(|flag| flag.rule_id.starts_with("OVERRIDE-"))
        .cloned()
        .collect();
    flags.extend(report.high_risk_flags.iter().cloned());

    state.risks.contradictions = report.contradictions.clone();
    state.risks.missing_proof = report.missing_proof.clone();
    state.risks.high_risk_flags = flags;
}

/// Static map from contradiction path prefixes to the agent that must rerun.
const PATH_RESPONSIBILITY: [(&str, &str); 11] = [
    ("/decisions/icp", "icp_agent"),
    ("/decisions/positioning", "positioning_agent"),
    ("/decisions/pricing", "pricing_agent"),
    ("/decisions/channels", "channel_agent"),
    ("/decisions/sales_motion", "sales_motion_agent"),
    ("/evidence", "evidence_collector"),
    ("/pillars/market_intelligence", "evidence_collector"),
    ("/pillars/customer", "icp_agent"),
    ("/pillars/positioning_pricing", "positioning_agent"),
    ("/pillars/go_to_market", "channel_agent"),
    ("/pillars/product_tech", "product_strategy_agent"),
];

/// Resolve the agent responsible for a contradiction path, if any.
pub fn responsible_agent(path: &str) -> Option<&'static str> {
    PATH_RESPONSIBILITY
        .iter()
        .find(|(prefix, _)| path.starts_with(prefix))
        .map(|(_, agent)| *agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        CanonicalState, ComplianceLevel, Constraints, Idea, IdeaCategory, PricingTier,
    };
    use serde_json::json;

    fn state_with(category: IdeaCategory) -> CanonicalState {
        CanonicalState::new(
            "proj_1",
            "scn_1",
            Idea {
                category,
                ..Idea::default()
            },
            Constraints::default(),
        )
    }

    #[test]
    fn test_clean_default_state_is_not_blocking() {
        let state = state_with(IdeaCategory::B2c);
        let report = evaluate(&state, ValidationGates::default());
        assert!(!report.blocking);
        assert!(report.contradictions.is_empty());
    }

    #[test]
    fn test_icp_required_at_finalize_only() {
        let state = state_with(IdeaCategory::B2bSaas);
        let plain = evaluate(&state, ValidationGates::default());
        assert!(!plain.contradictions.iter().any(|c| c.rule_id == "V-ICP-01"));

        let gated = evaluate(&state, ValidationGates::completion());
        let finding = gated
            .contradictions
            .iter()
            .find(|c| c.rule_id == "V-ICP-01")
            .expect("V-ICP-01");
        assert_eq!(finding.severity, Severity::Critical);
        assert!(gated.blocking);
    }

    #[test]
    fn test_tiers_without_metric_fires_even_ungated() {
        let mut state = state_with(IdeaCategory::B2bSaas);
        state.decisions.pricing.tiers = vec![PricingTier {
            name: "Starter".to_string(),
            price: 49.0,
            ..PricingTier::default()
        }];
        let report = evaluate(&state, ValidationGates::default());
        assert!(report.contradictions.iter().any(|c| c.rule_id == "V-PRICE-01"));
        assert!(report.blocking);
    }

    #[test]
    fn test_plg_enterprise_mismatch() {
        let mut state = state_with(IdeaCategory::B2bSaas);
        state.decisions.sales_motion.motion = Motion::Plg;
        state.decisions.icp.profile.company_size = "enterprise".to_string();
        let report = evaluate(&state, ValidationGates::default());
        let finding = report
            .contradictions
            .iter()
            .find(|c| c.rule_id == "V-SALES-01")
            .expect("V-SALES-01");
        assert_eq!(finding.severity, Severity::High);
        assert!(report.blocking);
    }

    #[test]
    fn test_plg_procurement_budget_owner_also_fires() {
        let mut state = state_with(IdeaCategory::B2bSaas);
        state.decisions.sales_motion.motion = Motion::Plg;
        state.decisions.icp.profile.budget_owner = "vp_procurement".to_string();
        let report = evaluate(&state, ValidationGates::default());
        assert!(report.contradictions.iter().any(|c| c.rule_id == "V-SALES-01"));
    }

    #[test]
    fn test_channel_overload_is_high_risk_flag_for_b2b_only() {
        let mut state = state_with(IdeaCategory::B2bSaas);
        state.decisions.channels.primary_channels = vec![
            "linkedin_outbound".to_string(),
            "seo".to_string(),
            "events".to_string(),
        ];
        let report = evaluate(&state, ValidationGates::default());
        assert!(report.high_risk_flags.iter().any(|c| c.rule_id == "V-CHAN-01"));
        // Flags alone never block.
        assert!(!report.blocking);

        let mut b2c = state_with(IdeaCategory::B2c);
        b2c.decisions.channels.primary_channels = state.decisions.channels.primary_channels.clone();
        let report = evaluate(&b2c, ValidationGates::default());
        assert!(!report.high_risk_flags.iter().any(|c| c.rule_id == "V-CHAN-01"));
    }

    #[test]
    fn test_high_price_without_anchors_is_missing_proof() {
        let mut state = state_with(IdeaCategory::B2bSaas);
        state.decisions.pricing.price_to_test = 750.0;
        let report = evaluate(&state, ValidationGates::default());
        assert!(report.missing_proof.iter().any(|c| c.rule_id == "V-PRICE-02"));

        state.evidence.pricing_anchors = vec![json!({"price": 99, "source_id": "src_1"})];
        let report = evaluate(&state, ValidationGates::default());
        assert!(!report.missing_proof.iter().any(|c| c.rule_id == "V-PRICE-02"));
    }

    #[test]
    fn test_high_compliance_without_security_plan_blocks_finalize() {
        let mut state = state_with(IdeaCategory::B2bSaas);
        state.constraints.compliance_level = ComplianceLevel::High;
        let report = evaluate(&state, ValidationGates::completion());
        assert!(report.contradictions.iter().any(|c| c.rule_id == "V-TECH-01"));

        // A security plan node clears the rule.
        state.graph.nodes.push(crate::state::GraphNode {
            id: "product.security_plan".to_string(),
            title: "Security Plan".to_string(),
            pillar: "product_tech".to_string(),
            node_type: crate::state::NodeType::Risk,
            content: json!({}),
            assumptions: vec![],
            confidence: 0.6,
            evidence_refs: vec![],
            dependencies: vec![],
            status: crate::state::NodeStatus::Draft,
            actions: vec![],
            updated_at: chrono::Utc::now(),
        });
        let report = evaluate(&state, ValidationGates::completion());
        assert!(!report.contradictions.iter().any(|c| c.rule_id == "V-TECH-01"));
    }

    #[test]
    fn test_missing_competitors_only_for_non_novel_categories() {
        let b2b = state_with(IdeaCategory::B2bSaas);
        let report = evaluate(&b2b, ValidationGates::default());
        assert!(report.missing_proof.iter().any(|c| c.rule_id == "V-EVID-01"));

        let b2c = state_with(IdeaCategory::B2c);
        let report = evaluate(&b2c, ValidationGates::default());
        assert!(!report.missing_proof.iter().any(|c| c.rule_id == "V-EVID-01"));
    }

    #[test]
    fn test_pricing_decided_without_anchors() {
        let mut state = state_with(IdeaCategory::B2bSaas);
        state.decisions.pricing.metric = "per_seat".to_string();
        let report = evaluate(&state, ValidationGates::default());
        assert!(report.missing_proof.iter().any(|c| c.rule_id == "V-EVID-02"));
    }

    #[test]
    fn test_short_override_justification_fires() {
        let mut state = state_with(IdeaCategory::B2bSaas);
        state.decisions.icp.core.override_.is_custom = true;
        state.decisions.icp.core.override_.justification = "because".to_string();
        let report = evaluate(&state, ValidationGates::default());
        assert!(report.contradictions.iter().any(|c| c.rule_id == "V-CONT-01"));

        state.decisions.icp.core.override_.justification =
            "Sales-led pilot feedback supports this segment.".to_string();
        let report = evaluate(&state, ValidationGates::default());
        assert!(!report.contradictions.iter().any(|c| c.rule_id == "V-CONT-01"));
    }

    #[test]
    fn test_apply_report_preserves_override_flags() {
        let mut state = state_with(IdeaCategory::B2bSaas);
        state.risks.high_risk_flags.push(Contradiction::new(
            "OVERRIDE-IMPACT",
            Severity::High,
            "Override on icp impacts dependent decisions.",
            vec!["/decisions/icp".to_string()],
        ));
        let report = evaluate(&state, ValidationGates::default());
        apply_report(&mut state, &report);
        assert!(state
            .risks
            .high_risk_flags
            .iter()
            .any(|c| c.rule_id == "OVERRIDE-IMPACT"));
    }

    #[test]
    fn test_responsible_agent_lookup() {
        assert_eq!(
            responsible_agent("/decisions/sales_motion/motion"),
            Some("sales_motion_agent")
        );
        assert_eq!(
            responsible_agent("/evidence/pricing_anchors"),
            Some("evidence_collector")
        );
        assert_eq!(responsible_agent("/constraints/compliance_level"), None);
    }

    #[test]
    fn test_blocking_rule_ids_sorted_unique() {
        let mut state = state_with(IdeaCategory::B2bSaas);
        state.decisions.sales_motion.motion = Motion::Plg;
        state.decisions.icp.profile.company_size = "enterprise".to_string();
        state.decisions.icp.core.override_.is_custom = true;
        let report = evaluate(&state, ValidationGates::default());
        let ids = report.blocking_rule_ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
