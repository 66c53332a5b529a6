// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Workspace configuration validation.
//!
//! Three stages, in an order that matters: id uniqueness first, then
//! reference resolution, then DFS cycle detection — the cycle walk needs a
//! structurally valid graph to traverse. All errors are collected rather
//! than returned one at a time, so a user fixing a config sees the whole
//! list at once.

use std::collections::{HashMap, HashSet};

use crate::config::WorkspaceConfig;
use crate::errors::ValidationError;
use crate::model::TargetId;

/// Validate a workspace's target set.
///
/// Returns every problem found; `Ok(())` means the config will build a
/// graph without structural errors.
pub fn validate_workspace(config: &WorkspaceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Stage 0: ids must parse at all before anything else means much.
    for target in &config.targets {
        if let Err(e) = target.id.parse::<TargetId>() {
            errors.push(ValidationError::InvalidTargetId {
                id: target.id.clone(),
                reason: e.reason,
            });
        }
        for dep in &target.deps {
            if let Err(e) = dep.parse::<TargetId>() {
                errors.push(ValidationError::InvalidTargetId {
                    id: dep.clone(),
                    reason: e.reason,
                });
            }
        }
    }

    // Stage 1: uniqueness.
    let mut seen = HashSet::new();
    for target in &config.targets {
        if !seen.insert(target.id.as_str()) {
            errors.push(ValidationError::DuplicateTargetId {
                id: target.id.clone(),
            });
        }
    }

    // Stage 2: every dependency resolves.
    for target in &config.targets {
        for dep in &target.deps {
            if !seen.contains(dep.as_str()) {
                errors.push(ValidationError::UnresolvedDependency {
                    target: target.id.clone(),
                    missing_dependency: dep.clone(),
                });
            }
        }
    }

    // Stage 3: cycle detection, only meaningful if references resolved.
    if errors.is_empty() {
        if let Some(cycle) = find_cycle(config) {
            errors.push(ValidationError::CyclicDependency { cycle });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// DFS with a recursion stack; returns the offending path when a back
/// edge is found.
fn find_cycle(config: &WorkspaceConfig) -> Option<Vec<String>> {
    let deps: HashMap<&str, Vec<&str>> = config
        .targets
        .iter()
        .map(|t| {
            (
                t.id.as_str(),
                t.deps.iter().map(String::as_str).collect::<Vec<_>>(),
            )
        })
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: Vec<&str> = Vec::new();
    let mut stacked: HashSet<&str> = HashSet::new();

    fn dfs<'a>(
        node: &'a str,
        deps: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut Vec<&'a str>,
        stacked: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(node);
        on_stack.push(node);
        stacked.insert(node);

        for &dep in deps.get(node).into_iter().flatten() {
            if stacked.contains(dep) {
                // Back edge: slice the stack from the repeat onward.
                let start = on_stack.iter().position(|&n| n == dep).unwrap_or(0);
                let mut cycle: Vec<String> =
                    on_stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
            if !visited.contains(dep) {
                if let Some(cycle) = dfs(dep, deps, visited, on_stack, stacked) {
                    return Some(cycle);
                }
            }
        }

        on_stack.pop();
        stacked.remove(node);
        None
    }

    for target in &config.targets {
        let id = target.id.as_str();
        if !visited.contains(id) {
            if let Some(cycle) = dfs(id, &deps, &mut visited, &mut on_stack, &mut stacked) {
                return Some(cycle);
            }
        }
    }
    None
}
