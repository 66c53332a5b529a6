// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for scheduler lifecycle and build outcome events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A build run started.
///
/// # Log Level
/// `info!` - Important operational event
pub struct BuildStarted {
    pub target_count: usize,
    pub workers: usize,
}

impl Display for BuildStarted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Starting build: {} targets on {} workers",
            self.target_count, self.workers
        )
    }
}

impl StructuredLog for BuildStarted {
    fn log(&self) {
        tracing::info!(
            target_count = self.target_count,
            workers = self.workers,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "build",
            span_name = name,
            target_count = self.target_count,
            workers = self.workers,
        )
    }
}

/// A build run finished, successfully or not.
///
/// # Log Level
/// `info!` - Important operational event
pub struct BuildCompleted {
    pub built: usize,
    pub cached: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: std::time::Duration,
}

impl Display for BuildCompleted {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Build completed in {:?}: {} built, {} cached, {} failed, {} skipped",
            self.duration, self.built, self.cached, self.failed, self.skipped
        )
    }
}

impl StructuredLog for BuildCompleted {
    fn log(&self) {
        tracing::info!(
            built = self.built,
            cached = self.cached,
            failed = self.failed,
            skipped = self.skipped,
            duration_ms = self.duration.as_millis() as u64,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "build_completed",
            span_name = name,
            built = self.built,
            cached = self.cached,
            failed = self.failed,
            skipped = self.skipped,
        )
    }
}

/// A transiently-failed action was re-queued with backoff.
///
/// # Log Level
/// `warn!` - Recoverable anomaly
pub struct RetryScheduled<'a> {
    pub target: &'a str,
    pub attempt: u32,
    pub delay_ms: u64,
}

impl Display for RetryScheduled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Retrying '{}' (attempt {}) after {}ms",
            self.target, self.attempt, self.delay_ms
        )
    }
}

impl StructuredLog for RetryScheduled<'_> {
    fn log(&self) {
        tracing::warn!(
            target_id = self.target,
            attempt = self.attempt,
            delay_ms = self.delay_ms,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "retry",
            span_name = name,
            target_id = self.target,
            attempt = self.attempt,
        )
    }
}

/// Downstream targets were skipped because an upstream target failed.
///
/// # Log Level
/// `warn!` - Expected consequence of a failure
pub struct DependentsSkipped<'a> {
    pub failed_target: &'a str,
    pub skipped: usize,
}

impl Display for DependentsSkipped<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Skipped {} dependents of failed target '{}'",
            self.skipped, self.failed_target
        )
    }
}

impl StructuredLog for DependentsSkipped<'_> {
    fn log(&self) {
        tracing::warn!(
            failed_target = self.failed_target,
            skipped = self.skipped,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!(
            "skip_dependents",
            span_name = name,
            failed_target = self.failed_target,
            skipped = self.skipped,
        )
    }
}
