// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! All diagnostic and operational logging goes through message types that
//! implement `Display` plus the `StructuredLog` trait. This keeps magic
//! strings out of the build path, gives every event machine-readable
//! fields, and leaves room for internationalization without code changes.
//!
//! Messages are organized by subsystem:
//! * `messages::engine` - scheduler lifecycle and build outcome events
//! * `messages::worker` - per-action execution events
//! * `messages::cache`  - cache open/flush/eviction events
//! * `messages::steal`  - peer-stealing events
//!
//! The library never installs a `tracing` subscriber; binaries do that.
//! A telemetry sink that fails must never affect the build outcome, so all
//! emission is fire-and-forget.

pub mod messages;
