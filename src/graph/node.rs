// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Build nodes and their atomic status lifecycle.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use crate::model::Target;

/// Lifecycle status of a build node.
///
/// Transitions are monotonic: `Pending → Ready → Running → {Built, Cached,
/// Failed}`, plus `{Pending, Ready} → Skipped` when an upstream failure
/// makes the node unreachable. Terminal states never regress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BuildStatus {
    Pending = 0,
    Ready = 1,
    Running = 2,
    Built = 3,
    Cached = 4,
    Failed = 5,
    Skipped = 6,
}

impl BuildStatus {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Ready,
            2 => Self::Running,
            3 => Self::Built,
            4 => Self::Cached,
            5 => Self::Failed,
            6 => Self::Skipped,
            // Status bytes only ever come from BuildStatus values.
            _ => unreachable!("invalid status byte {}", value),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Built | Self::Cached | Self::Failed | Self::Skipped
        )
    }

    /// Whether the node's outputs are available to dependents.
    pub fn is_satisfied(self) -> bool {
        matches!(self, Self::Built | Self::Cached)
    }

    /// Legal forward transitions. Everything else is a lifecycle violation.
    pub(crate) fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Ready)
                | (Self::Pending, Self::Skipped)
                | (Self::Ready, Self::Running)
                | (Self::Ready, Self::Skipped)
                | (Self::Running, Self::Built)
                | (Self::Running, Self::Cached)
                | (Self::Running, Self::Failed)
        )
    }
}

/// Runtime wrapper around a [`Target`].
///
/// Nodes are created during graph construction and owned by exactly one
/// [`crate::graph::DependencyGraph`]. After construction the only mutable
/// data is the status byte and the retry counter, both atomic with
/// sequentially-consistent ordering, so the graph is freely shared across
/// worker threads for the lifetime of a scheduler run.
#[derive(Debug)]
pub struct BuildNode {
    pub target: Arc<Target>,
    status: AtomicU8,
    retry_attempts: AtomicU32,
    /// Indices of nodes this node depends on.
    pub(crate) dependencies: Vec<usize>,
    /// Indices of nodes that depend on this node.
    pub(crate) dependents: Vec<usize>,
}

// Empirical medians for monorepo build graphs; tuning only, not contract.
const EXPECTED_DEPS: usize = 8;
const EXPECTED_DEPENDENTS: usize = 4;

impl BuildNode {
    pub(crate) fn new(target: Target) -> Self {
        Self {
            target: Arc::new(target),
            status: AtomicU8::new(BuildStatus::Pending as u8),
            retry_attempts: AtomicU32::new(0),
            dependencies: Vec::with_capacity(EXPECTED_DEPS),
            dependents: Vec::with_capacity(EXPECTED_DEPENDENTS),
        }
    }

    pub fn status(&self) -> BuildStatus {
        BuildStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// Compare-and-swap the status. Returns `true` when this call performed
    /// the transition; a `false` return means another thread got there
    /// first and the caller must re-read.
    pub(crate) fn try_transition(&self, from: BuildStatus, to: BuildStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts.load(Ordering::SeqCst)
    }

    /// Bump the retry counter, returning the new attempt number.
    pub fn record_retry(&self) -> u32 {
        self.retry_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Language, TargetId, TargetKind};
    use std::collections::{BTreeMap, BTreeSet};

    fn node() -> BuildNode {
        BuildNode::new(Target {
            id: TargetId::new("pkg", "t"),
            kind: TargetKind::Library,
            language: Language::Custom,
            sources: vec![],
            deps: BTreeSet::new(),
            flags: vec![],
            output_path: None,
            lang_config: BTreeMap::new(),
        })
    }

    #[test]
    fn nodes_start_pending() {
        assert_eq!(node().status(), BuildStatus::Pending);
    }

    #[test]
    fn cas_transition_succeeds_once() {
        let n = node();
        assert!(n.try_transition(BuildStatus::Pending, BuildStatus::Ready));
        assert!(!n.try_transition(BuildStatus::Pending, BuildStatus::Ready));
        assert_eq!(n.status(), BuildStatus::Ready);
    }

    #[test]
    fn lifecycle_table_rejects_regression() {
        assert!(BuildStatus::Pending.can_transition_to(BuildStatus::Ready));
        assert!(BuildStatus::Running.can_transition_to(BuildStatus::Failed));
        assert!(!BuildStatus::Built.can_transition_to(BuildStatus::Running));
        assert!(!BuildStatus::Failed.can_transition_to(BuildStatus::Ready));
        assert!(!BuildStatus::Skipped.can_transition_to(BuildStatus::Pending));
        assert!(!BuildStatus::Running.can_transition_to(BuildStatus::Skipped));
    }
}
