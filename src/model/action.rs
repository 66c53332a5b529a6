// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Action records: the unit of work exchanged between scheduler, workers,
//! and the cache.
//!
//! An [`ActionId`] addresses a cache slot; two ids with equal fields are the
//! same action. The `input_hash` component is the fingerprint over the
//! target id, its transitive dependency output hashes, its source
//! fingerprints, and canonical metadata (see [`crate::hash::input_hash`]).

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ParseError;
use crate::hash::Digest;
use crate::model::TargetId;

/// The kind of work an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Compile,
    Link,
    Test,
    Custom,
}

impl ActionType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Link => "link",
            Self::Test => "test",
            Self::Custom => "custom",
        }
    }
}

impl FromStr for ActionType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "compile" => Ok(Self::Compile),
            "link" => Ok(Self::Link),
            "test" => Ok(Self::Test),
            "custom" => Ok(Self::Custom),
            other => Err(ParseError::new(other, "unknown action type")),
        }
    }
}

/// Cache address of an action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId {
    pub target_id: TargetId,
    pub action_type: ActionType,
    pub sub_id: u32,
    pub input_hash: Digest,
}

impl ActionId {
    pub fn new(target_id: TargetId, action_type: ActionType, sub_id: u32, input_hash: Digest) -> Self {
        Self {
            target_id,
            action_type,
            sub_id,
            input_hash,
        }
    }
}

impl fmt::Display for ActionId {
    /// Canonical form `"<target_id>@<type>.<sub_id>+<hex input hash>"`.
    /// This is the string persisted into `entries.bin`, so it must stay
    /// byte-deterministic.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}.{}+{}",
            self.target_id,
            self.action_type.as_str(),
            self.sub_id,
            self.input_hash
        )
    }
}

impl FromStr for ActionId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| ParseError::new(s, reason);
        let (target, rest) = s
            .rsplit_once('@')
            .ok_or_else(|| malformed("expected '@' separator"))?;
        let (type_and_sub, hex) = rest
            .split_once('+')
            .ok_or_else(|| malformed("expected '+' before input hash"))?;
        let (ty, sub) = type_and_sub
            .split_once('.')
            .ok_or_else(|| malformed("expected '.' before sub id"))?;
        let target_id: TargetId = target.parse()?;
        let action_type: ActionType = ty.parse()?;
        let sub_id: u32 = sub
            .parse()
            .map_err(|_| malformed("sub id is not an integer"))?;
        let input_hash: Digest = hex.parse()?;
        Ok(Self {
            target_id,
            action_type,
            sub_id,
            input_hash,
        })
    }
}

/// The work unit the scheduler hands a worker.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub id: ActionId,
    pub target_id: TargetId,
    /// Ordered input files. Digests are zero until the worker resolves them
    /// through the fingerprint fast path.
    pub inputs: Vec<(PathBuf, Digest)>,
    /// Output hashes of direct dependencies, in dependency-id order.
    pub dep_hashes: Vec<Digest>,
    /// Array-form command; never passed through a shell.
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Declared output paths, workspace-relative.
    pub outputs: Vec<PathBuf>,
    /// Extra fingerprint-relevant key/value pairs.
    pub metadata: BTreeMap<String, String>,
    /// Scheduling priority; higher steals and dispatches first.
    pub priority: u32,
}

/// Terminal status of an action attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Success,
    /// Outputs were materialized from the action cache; no command ran.
    Cached,
    Error,
    Timeout,
    Cancelled,
}

/// Classified failure cause carried alongside an `Error` status so the
/// scheduler can decide whether a retry is worthwhile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    NonZeroExit(i32),
    Signaled(i32),
    Timeout,
    Io(String),
    Network(String),
    Security(String),
    Internal(String),
}

impl FailureKind {
    /// Transient failures are retried with backoff; the rest are final.
    /// Signals count as transient because the common senders (OOM killer,
    /// operator intervention) are resource conditions, not input errors.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Signaled(_) | Self::Io(_) | Self::Network(_)
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonZeroExit(code) => write!(f, "exited with status {}", code),
            Self::Signaled(sig) => write!(f, "terminated by signal {}", sig),
            Self::Timeout => write!(f, "timed out"),
            Self::Io(msg) => write!(f, "i/o failure: {}", msg),
            Self::Network(msg) => write!(f, "network failure: {}", msg),
            Self::Security(msg) => write!(f, "rejected by safety validator: {}", msg),
            Self::Internal(msg) => write!(f, "internal failure: {}", msg),
        }
    }
}

/// Child-process accounting captured after an action finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub max_rss_bytes: u64,
    pub user_time: Duration,
    pub system_time: Duration,
}

/// Outcome of a single action, published by workers through the result sink.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub id: ActionId,
    pub status: ActionStatus,
    pub outputs: Vec<(PathBuf, Digest)>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
    pub resource_usage: ResourceUsage,
    pub failure: Option<FailureKind>,
}

impl ActionResult {
    /// Combined digest over the sorted output hashes; this is what dependent
    /// actions mix into their own fingerprints.
    pub fn output_hash(&self) -> Digest {
        let mut hashes: Vec<&Digest> = self.outputs.iter().map(|(_, d)| d).collect();
        hashes.sort();
        let mut message = Vec::with_capacity(hashes.len() * 32);
        for digest in hashes {
            message.extend_from_slice(digest.as_bytes());
        }
        crate::hash::hash_bytes(&message)
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, ActionStatus::Success | ActionStatus::Cached)
    }
}
