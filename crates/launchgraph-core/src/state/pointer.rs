//! Minimal JSON Pointer resolution and patch application over
//! `serde_json::Value`.
//!
//! `add`/`replace` create missing intermediate containers so agents can write
//! into sections that start empty. `remove` on a missing member is a no-op.

use serde_json::Value;
use thiserror::Error;

use crate::output::PatchOp;

#[derive(Debug, Error)]
pub enum PointerError {
    #[error("pointer must start with '/': {0}")]
    MissingSlash(String),

    #[error("cannot patch the document root")]
    RootPatch,

    #[error("segment '{segment}' expects an array index in {path}")]
    BadIndex { path: String, segment: String },

    #[error("cannot traverse through scalar at '{segment}' in {path}")]
    ScalarTraversal { path: String, segment: String },
}

/// Split and unescape a JSON Pointer (`~1` → `/`, `~0` → `~`).
pub fn split_pointer(path: &str) -> Result<Vec<String>, PointerError> {
    if !path.starts_with('/') {
        return Err(PointerError::MissingSlash(path.to_string()));
    }
    Ok(path[1..]
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Resolve a pointer to a reference, if the full path exists.
pub fn resolve_pointer<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let tokens = split_pointer(path).ok()?;
    let mut current = root;
    for token in &tokens {
        current = match current {
            Value::Object(map) => map.get(token)?,
            Value::Array(items) => items.get(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Apply one patch operation in place.
pub fn apply_patch_value(
    root: &mut Value,
    op: PatchOp,
    path: &str,
    value: Option<&Value>,
) -> Result<(), PointerError> {
    let tokens = split_pointer(path)?;
    if tokens.is_empty() {
        return Err(PointerError::RootPatch);
    }

    let mut target = root;
    for token in &tokens[..tokens.len() - 1] {
        target = descend(target, token, path)?;
    }

    let leaf = &tokens[tokens.len() - 1];
    match op {
        PatchOp::Add | PatchOp::Replace => {
            let value = value.cloned().unwrap_or(Value::Null);
            match target {
                Value::Object(map) => {
                    map.insert(leaf.clone(), value);
                }
                Value::Array(items) => {
                    let index = parse_index(leaf, path)?;
                    while items.len() <= index {
                        items.push(Value::Null);
                    }
                    items[index] = value;
                }
                _ => {
                    return Err(PointerError::ScalarTraversal {
                        path: path.to_string(),
                        segment: leaf.clone(),
                    });
                }
            }
        }
        PatchOp::Remove => match target {
            Value::Object(map) => {
                map.remove(leaf);
            }
            Value::Array(items) => {
                let index = parse_index(leaf, path)?;
                if index < items.len() {
                    items.remove(index);
                }
            }
            _ => {
                return Err(PointerError::ScalarTraversal {
                    path: path.to_string(),
                    segment: leaf.clone(),
                });
            }
        },
    }
    Ok(())
}

fn descend<'a>(
    parent: &'a mut Value,
    token: &str,
    path: &str,
) -> Result<&'a mut Value, PointerError> {
    match parent {
        Value::Object(map) => Ok(map
            .entry(token.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()))),
        Value::Array(items) => {
            let index = parse_index(token, path)?;
            while items.len() <= index {
                items.push(Value::Object(serde_json::Map::new()));
            }
            Ok(&mut items[index])
        }
        _ => Err(PointerError::ScalarTraversal {
            path: path.to_string(),
            segment: token.to_string(),
        }),
    }
}

fn parse_index(token: &str, path: &str) -> Result<usize, PointerError> {
    token.parse::<usize>().map_err(|_| PointerError::BadIndex {
        path: path.to_string(),
        segment: token.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_pointer_unescapes() {
        let tokens = split_pointer("/a/b~1c/d~0e").expect("split");
        assert_eq!(tokens, vec!["a", "b/c", "d~e"]);
    }

    #[test]
    fn test_split_pointer_rejects_relative() {
        assert!(matches!(
            split_pointer("a/b"),
            Err(PointerError::MissingSlash(_))
        ));
    }

    #[test]
    fn test_replace_creates_intermediate_objects() {
        let mut doc = json!({});
        apply_patch_value(
            &mut doc,
            PatchOp::Replace,
            "/decisions/pricing/metric",
            Some(&json!("per_seat")),
        )
        .expect("apply");
        assert_eq!(doc["decisions"]["pricing"]["metric"], "per_seat");
    }

    #[test]
    fn test_add_extends_arrays_with_nulls() {
        let mut doc = json!({ "items": [] });
        apply_patch_value(&mut doc, PatchOp::Add, "/items/2", Some(&json!("x"))).expect("apply");
        assert_eq!(doc["items"], json!([null, null, "x"]));
    }

    #[test]
    fn test_remove_missing_member_is_noop() {
        let mut doc = json!({ "a": { "b": 1 } });
        apply_patch_value(&mut doc, PatchOp::Remove, "/a/missing", None).expect("apply");
        assert_eq!(doc, json!({ "a": { "b": 1 } }));
    }

    #[test]
    fn test_remove_array_element_shifts() {
        let mut doc = json!({ "a": [1, 2, 3] });
        apply_patch_value(&mut doc, PatchOp::Remove, "/a/1", None).expect("apply");
        assert_eq!(doc["a"], json!([1, 3]));
    }

    #[test]
    fn test_traversal_through_scalar_fails() {
        let mut doc = json!({ "a": 1 });
        let err = apply_patch_value(&mut doc, PatchOp::Replace, "/a/b", Some(&json!(2)))
            .expect_err("must fail");
        assert!(matches!(err, PointerError::ScalarTraversal { .. }));
    }

    #[test]
    fn test_root_patch_rejected() {
        let mut doc = json!({});
        assert!(matches!(
            apply_patch_value(&mut doc, PatchOp::Replace, "/", Some(&json!(1))),
            Err(PointerError::RootPatch)
        ));
    }

    #[test]
    fn test_resolve_pointer_reads_nested() {
        let doc = json!({ "a": { "b": [10, 20] } });
        assert_eq!(resolve_pointer(&doc, "/a/b/1"), Some(&json!(20)));
        assert_eq!(resolve_pointer(&doc, "/a/missing"), None);
    }
}
