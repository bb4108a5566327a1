//! Structural diff between two canonical states.
//!
//! Produces the patch list that transforms `a` into `b`; used by scenario
//! compare and the checkpoint store's `diff` operation. Objects recurse,
//! arrays are replaced wholesale (element identity across checkpoints is not
//! meaningful at this level).

use serde_json::Value;

use crate::error::CoreError;
use crate::output::{Patch, PatchMeta, PatchOp};
use crate::state::CanonicalState;

pub fn diff_states(a: &CanonicalState, b: &CanonicalState) -> Result<Vec<Patch>, CoreError> {
    let left = a.to_value()?;
    let right = b.to_value()?;
    let mut patches = Vec::new();
    diff_value(&left, &right, "", &mut patches);
    Ok(patches)
}

fn diff_value(left: &Value, right: &Value, path: &str, out: &mut Vec<Patch>) {
    match (left, right) {
        (Value::Object(lmap), Value::Object(rmap)) => {
            for (key, rvalue) in rmap {
                let child = format!("{}/{}", path, escape(key));
                match lmap.get(key) {
                    Some(lvalue) => diff_value(lvalue, rvalue, &child, out),
                    None => out.push(patch(PatchOp::Add, &child, Some(rvalue))),
                }
            }
            for key in lmap.keys() {
                if !rmap.contains_key(key) {
                    let child = format!("{}/{}", path, escape(key));
                    out.push(patch(PatchOp::Remove, &child, None));
                }
            }
        }
        _ => {
            if left != right {
                out.push(patch(PatchOp::Replace, path, Some(right)));
            }
        }
    }
}

fn patch(op: PatchOp, path: &str, value: Option<&Value>) -> Patch {
    Patch {
        op,
        path: path.to_string(),
        value: value.cloned().unwrap_or(Value::Null),
        meta: PatchMeta::default(),
    }
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{apply_patch_value, CanonicalState, Constraints, Idea};

    fn base() -> CanonicalState {
        CanonicalState::new("proj_1", "scn_1", Idea::default(), Constraints::default())
    }

    #[test]
    fn test_identical_states_diff_empty() {
        let a = base();
        let b = a.clone();
        assert!(diff_states(&a, &b).expect("diff").is_empty());
    }

    #[test]
    fn test_diff_applied_to_left_yields_right() {
        let a = base();
        let mut b = a.clone();
        b.decisions.pricing.metric = "per_seat".to_string();
        b.decisions.icp.core.selected_option_id = "icp_opt_1".to_string();
        b.execution.chosen_track = "validate_first".to_string();

        let patches = diff_states(&a, &b).expect("diff");
        assert!(!patches.is_empty());

        let mut value = a.to_value().expect("to_value");
        for p in &patches {
            apply_patch_value(&mut value, p.op, &p.path, Some(&p.value)).expect("apply");
        }
        assert_eq!(value, b.to_value().expect("to_value"));
    }

    #[test]
    fn test_diff_reports_dotted_paths() {
        let a = base();
        let mut b = a.clone();
        b.decisions.pricing.metric = "per_seat".to_string();
        let patches = diff_states(&a, &b).expect("diff");
        assert!(patches
            .iter()
            .any(|p| p.path == "/decisions/pricing/metric"));
    }
}
