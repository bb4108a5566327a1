//! Stable opaque identifiers.
//!
//! Prefixes are part of the wire contract; the hex tail is uninterpreted.

use uuid::Uuid;

fn opaque() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn new_project_id() -> String {
    format!("proj_{}", opaque())
}

pub fn new_scenario_id() -> String {
    format!("scn_{}", opaque())
}

pub fn new_run_id() -> String {
    format!("run_{}", opaque())
}

pub fn new_snapshot_id() -> String {
    format!("ss_{}", opaque())
}

pub fn new_event_id() -> String {
    format!("evt_{}", opaque())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_prefixes() {
        assert!(new_project_id().starts_with("proj_"));
        assert!(new_scenario_id().starts_with("scn_"));
        assert!(new_run_id().starts_with("run_"));
        assert!(new_snapshot_id().starts_with("ss_"));
        assert!(new_event_id().starts_with("evt_"));
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(new_run_id(), new_run_id());
    }
}
