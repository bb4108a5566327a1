//! Fixture graph builder.
//!
//! Projects the decision and pillar state into the plan graph: six pillar
//! summary nodes plus detail nodes with stable dotted ids. On partial reruns
//! only nodes depending on an impacted decision are re-emitted, so untouched
//! nodes keep their identity and timestamps.

use std::collections::BTreeSet;

use chrono::Utc;
use serde_json::{json, Value};

use launchgraph_core::deps::impacted_decisions;
use launchgraph_core::output::{AgentOutput, Patch};
use launchgraph_core::state::{CanonicalState, MetaRef, Motion};

use crate::agent::AgentContext;

use super::base;

const PILLARS: [(&str, &str, &str); 6] = [
    ("pillar.market_intelligence", "market_intelligence", "Market Intelligence"),
    ("pillar.customer", "customer", "Customer"),
    ("pillar.positioning_pricing", "positioning_pricing", "Positioning & Pricing"),
    ("pillar.go_to_market", "go_to_market", "Go-to-Market"),
    ("pillar.product_tech", "product_tech", "Product & Tech"),
    ("pillar.execution", "execution", "Execution"),
];

struct NodeSpec {
    id: &'static str,
    title: &'static str,
    pillar: &'static str,
    node_type: &'static str,
    content: Value,
    dependencies: &'static [&'static str],
}

pub fn graph_output(state: &CanonicalState, ctx: &AgentContext) -> AgentOutput {
    let nodes = build_nodes(state, ctx);
    let groups = build_groups(&nodes);
    let edges = build_edges(&nodes);

    let mut output = base("graph_builder", "", ctx);
    output.patches = vec![
        Patch::replace("/graph/nodes", Value::Array(nodes), MetaRef::inference(0.7)),
        Patch::replace("/graph/groups", Value::Array(groups), MetaRef::inference(0.7)),
        Patch::replace("/graph/edges", Value::Array(edges), MetaRef::inference(0.7)),
    ];
    output
}

fn build_nodes(state: &CanonicalState, ctx: &AgentContext) -> Vec<Value> {
    let profile = &state.decisions.icp.profile;
    let frame = &state.decisions.positioning.frame;
    let pricing = &state.decisions.pricing;
    let channels = &state.decisions.channels;
    let motion = state.decisions.sales_motion.motion;
    let constraints = &state.constraints;

    let competitors = &state.evidence.competitors;
    let pricing_anchors = &state.evidence.pricing_anchors;
    let channel_signals = &state.evidence.channel_signals;
    let next_actions = &state.execution.next_actions;
    let experiments = &state.execution.experiments;

    let product = &state.pillars.product_tech;
    let product_summary = product.summary.clone();
    let security_plan = pillar_str(state, "product_tech", "security_plan");
    let mvp_features = pillar_array(state, "product_tech", "mvp_features");
    let roadmap_phases = pillar_array(state, "product_tech", "roadmap_phases");
    let team_plan = state
        .pillars
        .execution
        .extra
        .get("team_plan")
        .cloned()
        .unwrap_or_else(|| json!({}));

    let tier_summary = if pricing.tiers.is_empty() {
        "No tiers defined".to_string()
    } else {
        let names: Vec<String> = pricing
            .tiers
            .iter()
            .map(|t| format!("{} (${})", t.name, t.price))
            .collect();
        format!("Tiered pricing: {}", names.join(", "))
    };

    let icp_core = &state.decisions.icp.core;
    let icp_option_id = if icp_core.selected_option_id.is_empty() {
        &icp_core.recommended_option_id
    } else {
        &icp_core.selected_option_id
    };
    let icp_rationale = icp_core
        .options
        .iter()
        .find(|o| o.id == *icp_option_id)
        .map(|o| o.description.clone())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| "Best evidence-backed fit from current source set.".to_string());

    let motion_label = match motion {
        Motion::Unset => String::new(),
        Motion::Plg => "product led growth".to_string(),
        Motion::OutboundLed => "outbound led".to_string(),
        Motion::InboundLed => "inbound led".to_string(),
        Motion::Hybrid => "hybrid".to_string(),
    };

    let mut specs: Vec<NodeSpec> = PILLARS
        .iter()
        .map(|(id, name, title)| NodeSpec {
            id,
            title,
            pillar: name,
            node_type: "pillar",
            content: json!({}),
            dependencies: &[],
        })
        .collect();

    specs.extend([
        NodeSpec {
            id: "market.icp.summary",
            title: "ICP Summary",
            pillar: "customer",
            node_type: "decision",
            content: json!({
                "summary": if profile.buyer_role.is_empty() {
                    "ICP not yet defined.".to_string()
                } else {
                    format!(
                        "Target buyer: {} at {} companies, triggered by {}.",
                        profile.buyer_role, profile.company_size, profile.trigger_event
                    )
                },
                "buyer_role": profile.buyer_role,
                "company_size": profile.company_size,
                "budget_owner": profile.budget_owner,
                "trigger_event": profile.trigger_event,
                "rationale": icp_rationale,
            }),
            dependencies: &["icp"],
        },
        NodeSpec {
            id: "market.trigger.event",
            title: "Trigger Event",
            pillar: "customer",
            node_type: "evidence",
            content: json!({
                "summary": if profile.trigger_event.is_empty() {
                    "No trigger event identified.".to_string()
                } else {
                    format!("Key trigger: {}. Signals buyer readiness and urgency to act.", profile.trigger_event)
                },
                "trigger": profile.trigger_event,
                "why_it_matters": "Trigger events create urgency and budget allocation for new solutions.",
                "competitors_count": competitors.len(),
            }),
            dependencies: &["icp"],
        },
        NodeSpec {
            id: "positioning.wedge",
            title: "Positioning Wedge",
            pillar: "positioning_pricing",
            node_type: "decision",
            content: json!({
                "summary": if frame.wedge.is_empty() {
                    "Positioning not yet defined.".to_string()
                } else {
                    format!("Position as '{}' leading with '{}'. {}", frame.category, frame.wedge, frame.value_prop)
                },
                "category": frame.category,
                "wedge": frame.wedge,
                "value_prop": frame.value_prop,
                "pillar_summary": state.pillars.positioning_pricing.summary,
                "rationale": "Aligns with buyer pain from intake and evidence.",
            }),
            dependencies: &["positioning", "icp"],
        },
        NodeSpec {
            id: "pricing.metric",
            title: "Pricing Metric",
            pillar: "positioning_pricing",
            node_type: "decision",
            content: json!({
                "summary": if pricing.metric.is_empty() {
                    "Pricing metric not set.".to_string()
                } else {
                    format!(
                        "Recommended pricing model: {} at ${}/mo test point.",
                        pricing.metric.replace('_', " "),
                        pricing.price_to_test
                    )
                },
                "metric": pricing.metric,
                "price_to_test": pricing.price_to_test,
                "rationale": "Closest match to evidence anchors and competitor pricing.",
                "anchors": pricing_anchors.iter().take(3).collect::<Vec<_>>(),
            }),
            dependencies: &["pricing", "icp"],
        },
        NodeSpec {
            id: "pricing.tiers",
            title: "Pricing Tiers",
            pillar: "positioning_pricing",
            node_type: "plan",
            content: json!({
                "summary": tier_summary,
                "tiers": pricing.tiers,
            }),
            dependencies: &["pricing"],
        },
        NodeSpec {
            id: "channel.primary",
            title: "Primary Channel",
            pillar: "go_to_market",
            node_type: "decision",
            content: json!({
                "summary": if channels.primary.is_empty() {
                    "Primary channel not selected.".to_string()
                } else {
                    format!("Primary acquisition channel: {}.", channels.primary.replace('_', " "))
                },
                "channel": channels.primary,
                "channel_signals": channel_signals.iter().take(3).collect::<Vec<_>>(),
                "rationale": "Strongest signal from channel evidence set.",
            }),
            dependencies: &["channels"],
        },
        NodeSpec {
            id: "channel.secondary",
            title: "Secondary Channel",
            pillar: "go_to_market",
            node_type: "decision",
            content: json!({
                "summary": if channels.secondary.is_empty() {
                    "No secondary channel.".to_string()
                } else {
                    format!("Secondary channel: {} to diversify acquisition.", channels.secondary.replace('_', " "))
                },
                "channel": channels.secondary,
                "rationale": "Complements primary channel for broader reach.",
            }),
            dependencies: &["channels"],
        },
        NodeSpec {
            id: "sales.motion",
            title: "Sales Motion",
            pillar: "go_to_market",
            node_type: "decision",
            content: json!({
                "summary": if motion == Motion::Unset {
                    "Sales motion not decided.".to_string()
                } else {
                    format!("Sales approach: {motion_label}.")
                },
                "motion": motion,
                "pillar_summary": state.pillars.go_to_market.summary,
                "rationale": "Best fit for current ICP/channel combination.",
            }),
            dependencies: &["sales_motion", "channels", "icp"],
        },
        NodeSpec {
            id: "product.core_offer",
            title: "Core Offer",
            pillar: "product_tech",
            node_type: "plan",
            content: json!({
                "summary": if product_summary.is_empty() {
                    "Core product offer pending strategy agent.".to_string()
                } else {
                    product_summary.clone()
                },
                "mvp_features": mvp_features,
                "roadmap_phases": roadmap_phases,
            }),
            dependencies: &["positioning"],
        },
        NodeSpec {
            id: "product.onboarding",
            title: "Onboarding Flow",
            pillar: "product_tech",
            node_type: "plan",
            content: json!({
                "summary": "Guided onboarding: import calls, connect CRM, configure automations.",
                "steps": [
                    "Import existing calls or connect live source",
                    "Connect CRM (HubSpot/Salesforce)",
                    "Configure follow-up automation rules",
                    "Send first automated follow-up"
                ],
                "integration_targets": ["HubSpot", "Salesforce"],
            }),
            dependencies: &["product"],
        },
        NodeSpec {
            id: "product.integration",
            title: "Integration Plan",
            pillar: "product_tech",
            node_type: "plan",
            content: json!({
                "summary": "Priority integrations: HubSpot and Salesforce for CRM sync.",
                "targets": ["HubSpot", "Salesforce"],
                "priority": "HubSpot first (larger SMB install base), then Salesforce.",
            }),
            dependencies: &["product"],
        },
        NodeSpec {
            id: "product.security_plan",
            title: "Security Plan",
            pillar: "product_tech",
            node_type: "risk",
            content: json!({
                "summary": if security_plan.is_empty() {
                    format!("Compliance level: {:?}. Security plan pending.", constraints.compliance_level)
                } else {
                    format!("Security posture: {:?} compliance. {}", constraints.compliance_level, security_plan)
                },
                "plan": security_plan,
                "compliance_level": constraints.compliance_level,
            }),
            dependencies: &["tech"],
        },
        NodeSpec {
            id: "execution.validation_sprint",
            title: "Validation Sprint",
            pillar: "execution",
            node_type: "checklist",
            content: json!({
                "summary": "2-week validation sprint: interview buyers, test messaging, validate willingness to pay.",
                "description": action_title(next_actions, 0, "Interview 10 target buyers"),
                "owner": action_owner(next_actions, 0, "founder"),
                "timeline": "Week 1-2",
                "success_metric": "10+ buyer interviews completed with pain confirmation",
            }),
            dependencies: &["execution"],
        },
        NodeSpec {
            id: "execution.outbound_playbook",
            title: "Outbound Playbook",
            pillar: "execution",
            node_type: "asset",
            content: json!({
                "summary": "Send first 50 outbound messages to validate channel and messaging.",
                "description": action_title(next_actions, 1, "Send first 50 outbound messages"),
                "owner": action_owner(next_actions, 1, "founder"),
                "timeline": "Week 1",
                "success_metric": "5%+ reply rate on cold outbound",
            }),
            dependencies: &["execution", "channels"],
        },
        NodeSpec {
            id: "execution.landing_page",
            title: "Landing Page Sprint",
            pillar: "execution",
            node_type: "asset",
            content: json!({
                "summary": "Launch landing page with waitlist CTA to capture early demand signal.",
                "description": action_title(next_actions, 2, "Launch landing page with CTA"),
                "owner": action_owner(next_actions, 2, "marketing"),
                "timeline": "Week 2",
                "success_metric": "100+ waitlist signups in first 2 weeks",
            }),
            dependencies: &["execution"],
        },
        NodeSpec {
            id: "execution.pipeline",
            title: "Pipeline Review",
            pillar: "execution",
            node_type: "checklist",
            content: json!({
                "summary": "Track pipeline conversion from outbound to demo to trial to close.",
                "description": experiments
                    .first()
                    .and_then(|e| e.get("hypothesis"))
                    .and_then(Value::as_str)
                    .unwrap_or("Validate buyer willingness to pay."),
                "owner": "founder",
                "timeline": "Ongoing",
                "success_metric": experiments
                    .first()
                    .and_then(|e| e.get("metric"))
                    .and_then(Value::as_str)
                    .unwrap_or("Demo-to-trial conversion"),
            }),
            dependencies: &["execution", "pricing", "sales_motion"],
        },
        NodeSpec {
            id: "people.team_plan",
            title: "Team Plan",
            pillar: "execution",
            node_type: "plan",
            content: json!({
                "summary": team_plan
                    .get("summary")
                    .and_then(Value::as_str)
                    .unwrap_or("Lean team: founder-led execution, hire after PMF signal."),
                "team_size": constraints.team_size,
                "budget": constraints.budget_usd_monthly,
                "hiring_trigger": "After first 10 paying customers or $10k MRR",
            }),
            dependencies: &["execution"],
        },
        NodeSpec {
            id: "people.runway",
            title: "Runway Plan",
            pillar: "execution",
            node_type: "risk",
            content: json!({
                "summary": format!(
                    "Monthly budget: ${:.0}. Keep burn minimal until PMF.",
                    constraints.budget_usd_monthly
                ),
                "budget": constraints.budget_usd_monthly,
                "rationale": "Conserve runway until product-market fit is confirmed by conversion metrics.",
            }),
            dependencies: &["pricing", "execution"],
        },
        NodeSpec {
            id: "people.hiring",
            title: "Hiring Trigger",
            pillar: "execution",
            node_type: "checklist",
            content: json!({
                "summary": "Hire first SDR after 10 customers or when founder capacity is saturated.",
                "trigger": "After first 10 customers",
                "rationale": "Premature hiring burns runway without validated demand.",
            }),
            dependencies: &["execution"],
        },
        NodeSpec {
            id: "people.ops",
            title: "Ops Checklist",
            pillar: "execution",
            node_type: "checklist",
            content: json!({
                "summary": "Weekly ops cadence: metrics review, risk assessment, pipeline check.",
                "items": [
                    "Weekly metrics review",
                    "Risk register update",
                    "Pipeline health check",
                    "Customer feedback synthesis"
                ],
            }),
            dependencies: &["execution"],
        },
    ]);

    let impacted: BTreeSet<String> = match ctx.changed_decision {
        Some(changed) => {
            let mut tags: BTreeSet<String> = impacted_decisions(changed)
                .into_iter()
                .map(|d| d.as_str().to_string())
                .collect();
            tags.insert(changed.as_str().to_string());
            tags
        }
        None => BTreeSet::new(),
    };

    let has_competitors = !competitors.is_empty();
    let has_anchors = !pricing_anchors.is_empty();

    specs
        .into_iter()
        .filter(|spec| {
            if spec.node_type == "pillar" {
                return true;
            }
            if impacted.is_empty() {
                return true;
            }
            spec.dependencies.iter().any(|dep| impacted.contains(*dep))
        })
        .map(|spec| {
            json!({
                "id": spec.id,
                "title": spec.title,
                "pillar": spec.pillar,
                "type": spec.node_type,
                "content": spec.content,
                "assumptions": node_assumptions(spec.id, state),
                "confidence": if spec.id.contains("pricing") || spec.id.contains("sales") { 0.74 } else { 0.7 },
                "evidence_refs": node_evidence_refs(spec.id, has_competitors, has_anchors, pricing_anchors),
                "dependencies": spec.dependencies,
                "status": "draft",
                "actions": ["edit", "rerun"],
                "updated_at": Utc::now(),
            })
        })
        .collect()
}

fn node_assumptions(node_id: &str, state: &CanonicalState) -> Vec<String> {
    let profile = &state.decisions.icp.profile;
    let pricing = &state.decisions.pricing;
    let channels = &state.decisions.channels;
    let buyer = if profile.buyer_role.is_empty() {
        "buyer"
    } else {
        profile.buyer_role.as_str()
    };
    match node_id {
        "pricing.metric" if pricing.price_to_test > 0.0 => vec![format!(
            "Assumes {buyer} has budget authority for ${}/seat",
            pricing.price_to_test
        )],
        "pricing.tiers" => {
            vec!["Tier pricing assumes clear feature differentiation between plans".to_string()]
        }
        "channel.primary" if !channels.primary.is_empty() => vec![format!(
            "Assumes {} reaches {buyer} effectively",
            channels.primary.replace('_', " ")
        )],
        "sales.motion" => {
            vec!["Sales motion choice depends on ICP validation from buyer interviews".to_string()]
        }
        "people.runway" => vec![format!(
            "Budget of ${:.0}/mo assumes no paid acquisition spend",
            state.constraints.budget_usd_monthly
        )],
        _ => Vec::new(),
    }
}

fn node_evidence_refs(
    node_id: &str,
    has_competitors: bool,
    has_anchors: bool,
    anchors: &[Value],
) -> Vec<String> {
    let anchor_ids = |count: usize| -> Vec<String> {
        anchors
            .iter()
            .take(count)
            .map(|a| {
                a.get("source_id")
                    .and_then(Value::as_str)
                    .unwrap_or("src_pricing_1")
                    .to_string()
            })
            .collect()
    };
    match node_id {
        "market.icp.summary" | "market.trigger.event" | "channel.primary" if has_competitors => {
            vec!["src_comp_1".to_string()]
        }
        "positioning.wedge" if has_competitors => {
            vec!["src_comp_1".to_string(), "src_comp_2".to_string()]
        }
        "pricing.metric" if has_anchors => anchor_ids(2),
        "pricing.tiers" if has_anchors => anchor_ids(1),
        _ => Vec::new(),
    }
}

fn build_groups(nodes: &[Value]) -> Vec<Value> {
    PILLARS
        .iter()
        .map(|(_, name, title)| {
            let node_ids: Vec<&str> = nodes
                .iter()
                .filter(|n| n["pillar"] == *name)
                .filter_map(|n| n["id"].as_str())
                .collect();
            json!({
                "id": format!("group.{name}"),
                "title": title,
                "node_ids": node_ids,
            })
        })
        .collect()
}

fn build_edges(nodes: &[Value]) -> Vec<Value> {
    nodes
        .iter()
        .filter(|n| n["type"] != "pillar")
        .filter_map(|n| {
            let id = n["id"].as_str()?;
            let pillar = n["pillar"].as_str()?;
            Some(json!({
                "from": format!("pillar.{pillar}"),
                "to": id,
                "kind": "contains",
            }))
        })
        .collect()
}

fn action_title(actions: &[Value], index: usize, fallback: &str) -> String {
    actions
        .get(index)
        .and_then(|a| a.get("title"))
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

fn action_owner(actions: &[Value], index: usize, fallback: &str) -> String {
    actions
        .get(index)
        .and_then(|a| a.get("owner"))
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

fn pillar_str(state: &CanonicalState, pillar: &str, key: &str) -> String {
    state
        .pillars
        .get(pillar)
        .and_then(|p| p.extra.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn pillar_array(state: &CanonicalState, pillar: &str, key: &str) -> Vec<Value> {
    state
        .pillars
        .get(pillar)
        .and_then(|p| p.extra.get(key))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
