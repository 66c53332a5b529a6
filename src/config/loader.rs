// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheLimits, WeightedScorePolicy};
use crate::engine::SchedulerOptions;
use crate::errors::{BuildError, FailurePolicy, ParseError};
use crate::graph::DependencyGraph;
use crate::model::{Language, Target, TargetId, TargetKind};
use crate::steal::StealSettings;

/// Workspace configuration, loaded from `sawmill.yaml`.
///
/// # Example
/// ```yaml
/// workspace: demo
/// scheduler:
///   max_workers: 4
///   failure_policy: keep_going
/// cache:
///   max_entries: 4096
/// targets:
///   - id: "//lib:util"
///     type: library
///     language: c
///     sources: [lib/util.c]
///     options:
///       command: [cc, -c, lib/util.c, -o, lib/util.o]
///       outputs: [lib/util.o]
///   - id: "//app:main"
///     type: executable
///     deps: ["//lib:util"]
/// ```
#[derive(Debug, Deserialize)]
pub struct WorkspaceConfig {
    /// Display name; defaults to the directory name at the call site.
    #[serde(default)]
    pub workspace: Option<String>,
    /// Environment passed through to every child process. The core itself
    /// reads no environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Peer work-stealing; absent means disabled.
    #[serde(default)]
    pub steal: Option<StealSettings>,
    pub targets: Vec<TargetConfig>,
}

/// Cache namespace limits and eviction weights.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub dir: String,
    pub max_entries: usize,
    pub max_bytes: u64,
    pub w_age: f64,
    pub w_cold: f64,
    pub w_big: f64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let limits = CacheLimits::default();
        let weights = WeightedScorePolicy::default();
        Self {
            dir: ".sawmill/cache".to_string(),
            max_entries: limits.max_entries,
            max_bytes: limits.max_bytes,
            w_age: weights.w_age,
            w_cold: weights.w_cold,
            w_big: weights.w_big,
        }
    }
}

/// Scheduler tuning.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Worker count; defaults to the number of logical CPUs.
    pub max_workers: Option<usize>,
    pub actions_per_worker: usize,
    pub local_queue_cap: usize,
    pub failure_policy: FailurePolicy,
    pub max_retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub timeout_seconds: u64,
    pub kill_grace_seconds: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_workers: None,
            actions_per_worker: 1,
            local_queue_cap: 256,
            failure_policy: FailurePolicy::default(),
            max_retry_attempts: 2,
            retry_backoff_ms: 100,
            timeout_seconds: 300,
            kill_grace_seconds: 5,
        }
    }
}

/// One target definition.
#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    /// Canonical id, e.g. `"//lib/util:strings"`.
    pub id: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: TargetKind,
    #[serde(default = "default_language")]
    pub language: Language,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub deps: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    pub output: Option<String>,
    /// Adapter-specific options; opaque to the core.
    #[serde(default)]
    pub options: HashMap<String, serde_yaml::Value>,
}

fn default_kind() -> TargetKind {
    TargetKind::Custom
}

fn default_language() -> Language {
    Language::Custom
}

/// Load a workspace config from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<WorkspaceConfig, BuildError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let config: WorkspaceConfig = serde_yaml::from_str(&content)
        .map_err(|e| ParseError::new(path.to_string_lossy(), e.to_string()))?;
    Ok(config)
}

/// Load and validate: duplicate ids, unresolved deps, and cycles are all
/// collected and reported together.
pub fn load_and_validate_config<P: AsRef<Path>>(path: P) -> Result<WorkspaceConfig, BuildError> {
    let path = path.as_ref();
    let config = load_config(path)?;
    if let Err(errors) = crate::config::validate_workspace(&config) {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        return Err(ParseError::new(
            path.to_string_lossy(),
            format!("configuration validation failed:\n{}", messages.join("\n")),
        )
        .into());
    }
    Ok(config)
}

impl WorkspaceConfig {
    /// Convert target configs into core [`Target`] records.
    pub fn to_targets(&self) -> Result<Vec<Target>, BuildError> {
        self.targets.iter().map(TargetConfig::to_target).collect()
    }

    /// Build the dependency graph for this workspace.
    pub fn build_graph(&self) -> Result<DependencyGraph, BuildError> {
        let targets = self.to_targets()?;
        let mut graph = DependencyGraph::new();
        let edges: Vec<(TargetId, BTreeSet<TargetId>)> = targets
            .iter()
            .map(|t| (t.id.clone(), t.deps.clone()))
            .collect();
        for target in targets {
            graph.add_target(target)?;
        }
        for (id, deps) in edges {
            for dep in deps {
                graph.add_dependency(&id, &dep)?;
            }
        }
        Ok(graph)
    }

    pub fn cache_dir(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(&self.cache.dir)
    }

    pub fn cache_limits(&self) -> CacheLimits {
        CacheLimits {
            max_entries: self.cache.max_entries,
            max_bytes: self.cache.max_bytes,
        }
    }

    pub fn eviction_policy(&self) -> WeightedScorePolicy {
        WeightedScorePolicy {
            w_age: self.cache.w_age,
            w_cold: self.cache.w_cold,
            w_big: self.cache.w_big,
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            max_workers: self
                .scheduler
                .max_workers
                .unwrap_or_else(crate::engine::default_concurrency),
            actions_per_worker: self.scheduler.actions_per_worker,
            local_queue_cap: self.scheduler.local_queue_cap,
            failure_policy: self.scheduler.failure_policy,
            max_retry_attempts: self.scheduler.max_retry_attempts,
            retry_backoff_base: Duration::from_millis(self.scheduler.retry_backoff_ms),
            action_timeout: Duration::from_secs(self.scheduler.timeout_seconds),
            kill_grace: Duration::from_secs(self.scheduler.kill_grace_seconds),
            steal: self.steal.clone(),
        }
    }
}

impl TargetConfig {
    fn to_target(&self) -> Result<Target, BuildError> {
        let id: TargetId = self.id.parse()?;
        let deps: BTreeSet<TargetId> = self
            .deps
            .iter()
            .map(|d| d.parse::<TargetId>())
            .collect::<Result<_, _>>()?;

        let mut lang_config = BTreeMap::new();
        for (key, value) in &self.options {
            let json = serde_json::to_value(value).map_err(|e| {
                ParseError::new(self.id.clone(), format!("option '{}': {}", key, e))
            })?;
            lang_config.insert(key.clone(), json);
        }

        Ok(Target {
            id,
            kind: self.kind,
            language: self.language,
            sources: self.sources.clone(),
            deps,
            flags: self.flags.clone(),
            output_path: self.output.as_ref().map(PathBuf::from),
            lang_config,
        })
    }
}
