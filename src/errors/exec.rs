// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Child-process failures.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The command ran and exited nonzero. Not transient; rerunning the
    /// same inputs would fail the same way.
    #[error("command exited with status {code}")]
    NonZeroExit { code: i32 },

    /// The wall-clock deadline elapsed; the process was terminated.
    #[error("command exceeded its {limit:?} deadline")]
    Timeout { limit: Duration },

    /// The process died from a signal.
    #[error("command terminated by signal {signal}")]
    Signaled { signal: i32 },

    /// The command could not be started at all.
    #[error("failed to spawn command: {message}")]
    Spawn { message: String },

    /// The build was cancelled while the command was in flight.
    #[error("command cancelled")]
    Cancelled,
}

/// Rejections from the argument and path safety validator. Always fatal.
#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("unsafe argument {arg:?}: {reason}")]
    UnsafeArgument { arg: String, reason: String },

    #[error("path {path:?} escapes the workspace root")]
    PathEscape { path: PathBuf },
}

/// How the scheduler reacts to a failed action.
///
/// `FailFast` cancels outstanding work, marks unstarted dependents skipped,
/// and surfaces the first failure. `KeepGoing` continues independent
/// branches and surfaces every failure at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    FailFast,
    KeepGoing,
}
