//! Evidence source canonicalization and dedup.
//!
//! Sources are identified by canonical URL: lowercased scheme/host, trailing
//! slash stripped, tracking query params dropped, fragment dropped. Duplicate
//! inserts union their snippets and keep the best quality score.

use serde_json::{Map, Value};
use url::Url;

const TRACKING_PARAMS: [&str; 6] = ["fbclid", "gclid", "ref", "mc_cid", "mc_eid", "igshid"];

fn is_tracking_param(name: &str) -> bool {
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name)
}

/// Canonical form of a source URL. Unparseable input falls back to a trimmed,
/// lowercased copy so dedup still has a stable key.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut parsed) = Url::parse(trimmed) else {
        return trimmed.to_ascii_lowercase();
    };

    parsed.set_fragment(None);
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(name, value)| {
                if value.is_empty() {
                    name.clone()
                } else {
                    format!("{name}={value}")
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }

    let mut out = parsed.to_string();
    if parsed.path() != "/" && parsed.query().is_none() && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Dedup a list of source objects by canonical URL, merging duplicates.
/// Output is sorted by normalized URL so repeated merges are stable.
pub fn dedupe_sources(sources: Vec<Value>) -> Vec<Value> {
    let mut by_url: Vec<(String, Map<String, Value>)> = Vec::new();

    for source in sources {
        let Value::Object(mut incoming) = source else {
            continue;
        };
        let Some(url) = incoming.get("url").and_then(Value::as_str) else {
            continue;
        };
        let normalized = canonical_url(url);
        incoming
            .entry("snippets".to_string())
            .or_insert_with(|| Value::Array(Vec::new()));

        if let Some((_, existing)) = by_url.iter_mut().find(|(key, _)| *key == normalized) {
            merge_snippets(existing, &incoming);
            merge_quality(existing, &incoming);
            fill_title(existing, &incoming);
        } else {
            incoming.insert(
                "normalized_url".to_string(),
                Value::String(normalized.clone()),
            );
            by_url.push((normalized, incoming));
        }
    }

    by_url.sort_by(|(a, _), (b, _)| a.cmp(b));
    by_url
        .into_iter()
        .map(|(_, map)| Value::Object(map))
        .collect()
}

fn merge_snippets(existing: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    let mut merged: Vec<Value> = existing
        .get("snippets")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    if let Some(new_snippets) = incoming.get("snippets").and_then(Value::as_array) {
        for snippet in new_snippets {
            if !merged.contains(snippet) {
                merged.push(snippet.clone());
            }
        }
    }
    existing.insert("snippets".to_string(), Value::Array(merged));
}

fn merge_quality(existing: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    let current = existing
        .get("quality_score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let candidate = incoming
        .get("quality_score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    if candidate > current {
        if let Some(score) = incoming.get("quality_score") {
            existing.insert("quality_score".to_string(), score.clone());
        }
    }
}

fn fill_title(existing: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    let missing = existing
        .get("title")
        .and_then(Value::as_str)
        .map(str::is_empty)
        .unwrap_or(true);
    if missing {
        if let Some(title) = incoming.get("title").and_then(Value::as_str) {
            if !title.is_empty() {
                existing.insert("title".to_string(), Value::String(title.to_string()));
            }
        }
    }
}
