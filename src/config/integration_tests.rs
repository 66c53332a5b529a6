// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Config-to-graph integration: a YAML workspace loads, validates, builds
//! a graph, and schedules into the expected waves.

use std::fs;

use tempfile::TempDir;

use crate::config::{load_and_validate_config, validate_workspace, WorkspaceConfig};
use crate::errors::FailurePolicy;
use crate::model::TargetId;

const DIAMOND_YAML: &str = r#"
workspace: diamond
scheduler:
  max_workers: 2
  failure_policy: keep_going
targets:
  - id: "//pkg:d"
    options:
      command: [/bin/true]
  - id: "//pkg:b"
    deps: ["//pkg:d"]
  - id: "//pkg:c"
    deps: ["//pkg:d"]
  - id: "//pkg:a"
    deps: ["//pkg:b", "//pkg:c"]
"#;

#[test]
fn yaml_workspace_loads_validates_and_schedules() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sawmill.yaml");
    fs::write(&path, DIAMOND_YAML).unwrap();

    let config = load_and_validate_config(&path).unwrap();
    assert_eq!(config.workspace.as_deref(), Some("diamond"));
    assert_eq!(
        config.scheduler_options().failure_policy,
        FailurePolicy::KeepGoing
    );

    let graph = config.build_graph().unwrap();
    let waves = graph.wave_schedule().unwrap();
    let wave_names: Vec<Vec<String>> = waves
        .iter()
        .map(|w| {
            w.iter()
                .map(|&n| graph.node(n).target.id.name.clone())
                .collect()
        })
        .collect();
    assert_eq!(wave_names, vec![vec!["d"], vec!["b", "c"], vec!["a"]]);
}

#[test]
fn graph_construction_preserves_dependency_edges() {
    let config: WorkspaceConfig = serde_yaml::from_str(DIAMOND_YAML).unwrap();
    let graph = config.build_graph().unwrap();

    let a = graph.lookup(&TargetId::new("pkg", "a")).unwrap();
    let dep_names: Vec<String> = graph
        .dependencies(a)
        .map(|n| graph.node(n).target.id.name.clone())
        .collect();
    assert_eq!(dep_names.len(), 2);
    assert!(dep_names.contains(&"b".to_string()));
    assert!(dep_names.contains(&"c".to_string()));
}

#[test]
fn validation_failure_blocks_loading() {
    let yaml = r#"
targets:
  - id: "//pkg:a"
    deps: ["//pkg:a"]
"#;
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sawmill.yaml");
    fs::write(&path, yaml).unwrap();

    let err = load_and_validate_config(&path).unwrap_err();
    assert!(err.to_string().contains("Cyclic dependency"));

    // The raw loader still parses it; only validation rejects.
    let config: WorkspaceConfig = serde_yaml::from_str(yaml).unwrap();
    assert!(validate_workspace(&config).is_err());
}
