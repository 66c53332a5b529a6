// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for per-action execution events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// An action finished, in any terminal status.
///
/// # Log Level
/// `debug!` - High-volume progress event
pub struct ActionFinished<'a> {
    pub target: &'a str,
    pub status: &'a str,
    pub duration_ms: u64,
}

impl Display for ActionFinished<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Action '{}' finished: {} in {}ms",
            self.target, self.status, self.duration_ms
        )
    }
}

impl StructuredLog for ActionFinished<'_> {
    fn log(&self) {
        tracing::debug!(
            target_id = self.target,
            status = self.status,
            duration_ms = self.duration_ms,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "action",
            span_name = name,
            target_id = self.target,
            status = self.status,
        )
    }
}

/// An action failed with a classified cause.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct ActionFailed<'a> {
    pub target: &'a str,
    pub cause: &'a str,
    pub transient: bool,
}

impl Display for ActionFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Action '{}' failed: {}", self.target, self.cause)
    }
}

impl StructuredLog for ActionFailed<'_> {
    fn log(&self) {
        tracing::error!(
            target_id = self.target,
            cause = self.cause,
            transient = self.transient,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::error_span!(
            "action_failed",
            span_name = name,
            target_id = self.target,
            cause = self.cause,
        )
    }
}
