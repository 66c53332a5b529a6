// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for peer-stealing events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A steal attempt resolved (hit, empty, or timeout).
///
/// # Log Level
/// `debug!` - High-volume balancing event
pub struct StealResolved<'a> {
    pub thief: &'a str,
    pub victim: &'a str,
    pub outcome: &'a str,
}

impl Display for StealResolved<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Steal {} -> {}: {}",
            self.thief, self.victim, self.outcome
        )
    }
}

impl StructuredLog for StealResolved<'_> {
    fn log(&self) {
        tracing::debug!(
            thief = self.thief,
            victim = self.victim,
            outcome = self.outcome,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "steal",
            span_name = name,
            thief = self.thief,
            victim = self.victim,
        )
    }
}

/// A peer stopped answering and was removed from rotation.
///
/// # Log Level
/// `warn!` - Degraded but recoverable
pub struct PeerMarkedDead<'a> {
    pub peer: &'a str,
    pub reason: &'a str,
}

impl Display for PeerMarkedDead<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Peer '{}' marked dead: {}", self.peer, self.reason)
    }
}

impl StructuredLog for PeerMarkedDead<'_> {
    fn log(&self) {
        tracing::warn!(peer = self.peer, reason = self.reason, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::warn_span!("peer_dead", span_name = name, peer = self.peer)
    }
}
