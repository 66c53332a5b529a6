// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

use crate::graph::BuildStatus;
use crate::model::TargetId;

/// Structural violations of the dependency graph. All fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Adding the edge would have closed a directed cycle. The graph is
    /// unchanged; the check runs before the edge is inserted.
    CycleDetected {
        from: TargetId,
        to: TargetId,
    },
    /// A target with this id is already in the graph.
    DuplicateTarget {
        id: TargetId,
    },
    /// An operation referenced a target that was never added.
    NodeNotFound {
        id: TargetId,
    },
    /// A status transition violated the node lifecycle.
    InvalidTransition {
        id: TargetId,
        from: BuildStatus,
        to: BuildStatus,
    },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::CycleDetected { from, to } => {
                write!(
                    f,
                    "adding dependency {} -> {} would create a cycle",
                    from, to
                )
            }
            GraphError::DuplicateTarget { id } => {
                write!(f, "target '{}' is already defined", id)
            }
            GraphError::NodeNotFound { id } => {
                write!(f, "target '{}' is not in the graph", id)
            }
            GraphError::InvalidTransition { id, from, to } => {
                write!(
                    f,
                    "illegal status transition {:?} -> {:?} for target '{}'",
                    from, to, id
                )
            }
        }
    }
}

impl std::error::Error for GraphError {}
