// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::fmt;

/// Errors found while validating a workspace configuration.
///
/// Validation collects every problem it can find rather than stopping at
/// the first, so these surface as a `Vec` to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Two targets share an id.
    DuplicateTargetId {
        id: String,
    },
    /// A target id failed to parse.
    InvalidTargetId {
        id: String,
        reason: String,
    },
    /// A target depends on an id that is not defined in the workspace.
    UnresolvedDependency {
        target: String,
        missing_dependency: String,
    },
    /// A circular dependency was detected, with the offending path.
    CyclicDependency {
        cycle: Vec<String>,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::DuplicateTargetId { id } => {
                write!(f, "Duplicate target id: '{}'", id)
            }
            ValidationError::InvalidTargetId { id, reason } => {
                write!(f, "Invalid target id '{}': {}", id, reason)
            }
            ValidationError::UnresolvedDependency {
                target,
                missing_dependency,
            } => {
                write!(
                    f,
                    "Target '{}' depends on '{}' which does not exist",
                    target, missing_dependency
                )
            }
            ValidationError::CyclicDependency { cycle } => {
                write!(f, "Cyclic dependency detected: {}", cycle.join(" -> "))
            }
        }
    }
}

impl std::error::Error for ValidationError {}
