// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging and tracing.
//!
//! Each message type implements:
//!
//! * `Display` - human-readable output
//! * [`StructuredLog`] - machine-readable fields + span creation
//!
//! # Usage
//!
//! ```rust
//! use sawmill::observability::messages::{StructuredLog, engine::BuildStarted};
//!
//! BuildStarted {
//!     target_count: 5,
//!     workers: 4,
//! }
//! .log();
//! ```

pub mod cache;
pub mod engine;
pub mod steal;
pub mod worker;

use tracing::Span;

/// Messages that support structured logging and tracing.
///
/// `log()` emits the human-readable message together with its fields at the
/// level appropriate to the event. `span()` creates a `tracing::Span` with
/// the same fields as attributes for callers that want trace context.
pub trait StructuredLog {
    /// Emit a log event with structured fields.
    fn log(&self);

    /// Create a span with this message's fields as attributes.
    fn span(&self, name: &str) -> Span;
}
