//! Test: Step Group Entity - cloning and the absent-vs-empty encoding

use jobrunner::core::config::JobConfig;
use jobrunner::core::{ParallelStep, Step};

fn group_from_job(yaml: &str) -> ParallelStep {
    let config = JobConfig::from_yaml(yaml).unwrap();
    match config.steps.into_iter().next() {
        Some(Step::Parallel(group)) => group,
        other => panic!("Expected a parallel step, got {:?}", other),
    }
}

/// Cloning a group with 2 children and 1 output gives an independent copy
#[test]
fn test_clone_does_not_alias_children_or_outputs() {
    let original = group_from_job(
        r#"
name: "Job"
steps:
  - type: parallel
    id: checks
    outputs:
      Report: "${{ steps.unit.outputs.report }}"
    steps:
      - type: script
        id: unit
        run: cargo test
      - type: action
        id: audit
        uses: rustsec/audit-check@v1
"#,
    );

    let mut copy = original.clone();
    copy.steps_mut()[0].common_mut().continue_on_error = true;
    if let Step::Action(action) = &mut copy.steps_mut()[1] {
        action.uses = "other/action@v2".to_string();
    }
    copy.outputs_mut().insert("report", "changed".to_string());

    assert!(!original.steps()[0].continue_on_error());
    match &original.steps()[1] {
        Step::Action(action) => assert_eq!(action.uses, "rustsec/audit-check@v1"),
        other => panic!("Expected action step, got {:?}", other),
    }
    assert_eq!(
        original.outputs().get("REPORT").map(String::as_str),
        Some("${{ steps.unit.outputs.report }}")
    );
    assert_eq!(copy.outputs().get("Report").map(String::as_str), Some("changed"));
}

/// An empty group encodes with neither collection present
#[test]
fn test_empty_group_encodes_without_collections() {
    let mut config = JobConfig::from_yaml(
        r#"
name: "Job"
steps:
  - type: parallel
    id: nothing
    steps: []
    outputs: {}
"#,
    )
    .unwrap();
    config.prepare_for_serialization();

    let json = serde_json::to_value(&config).unwrap();
    let group = &json["steps"][0];
    assert_eq!(group["type"], "parallel");
    assert!(group.get("steps").is_none());
    assert!(group.get("outputs").is_none());

    let yaml = serde_yaml::to_string(&config).unwrap();
    assert!(!yaml.contains("outputs"));
}

/// A group with one child encodes the children, non-empty
#[test]
fn test_group_with_child_encodes_children() {
    let mut group = ParallelStep::new("one");
    group.steps_mut().push(Step::script("only", "true"));

    let json = serde_json::to_value(Step::Parallel(group)).unwrap();
    assert_eq!(json["steps"].as_array().map(Vec::len), Some(1));
    assert_eq!(json["steps"][0]["id"], "only");
    assert!(json.get("outputs").is_none());
}
