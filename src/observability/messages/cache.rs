// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for action-cache events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A cache namespace was opened and its persisted entries loaded.
///
/// # Log Level
/// `info!` - Once per build
pub struct CacheOpened<'a> {
    pub dir: &'a str,
    pub entries: usize,
    pub rejected: u64,
}

impl Display for CacheOpened<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Opened cache at {}: {} entries loaded, {} rejected",
            self.dir, self.entries, self.rejected
        )
    }
}

impl StructuredLog for CacheOpened<'_> {
    fn log(&self) {
        tracing::info!(
            dir = self.dir,
            entries = self.entries,
            rejected = self.rejected,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "cache_open",
            span_name = name,
            dir = self.dir,
            entries = self.entries,
        )
    }
}

/// In-memory cache state was persisted to disk.
///
/// # Log Level
/// `debug!` - Routine persistence event
pub struct CacheFlushed {
    pub entries: usize,
    pub bytes: u64,
}

impl Display for CacheFlushed {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Flushed cache: {} entries, {} bytes", self.entries, self.bytes)
    }
}

impl StructuredLog for CacheFlushed {
    fn log(&self) {
        tracing::debug!(entries = self.entries, bytes = self.bytes, "{}", self);
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!("cache_flush", span_name = name, entries = self.entries)
    }
}
