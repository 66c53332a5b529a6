// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Target identity and target records.
//!
//! A [`TargetId`] is a fully-qualified build-target address
//! `(workspace, path, name)` with a canonical string form
//! `"[//workspace]//path:name"`. The `workspace` component is empty for the
//! current workspace. Equality, hashing, and ordering are structural, and the
//! string form round-trips through [`std::str::FromStr`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::errors::ParseError;

/// Fully-qualified identifier for a build target.
///
/// Ordering is structural over `(workspace, path, name)`, which gives the
/// deterministic tie-break order used by the graph and the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId {
    /// Workspace the target lives in; empty means the current workspace.
    pub workspace: String,
    /// Workspace-relative package path.
    pub path: String,
    /// Target name within the package.
    pub name: String,
}

impl TargetId {
    /// Build an id in the current workspace.
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workspace: String::new(),
            path: path.into(),
            name: name.into(),
        }
    }

    /// Build an id in an external workspace.
    pub fn in_workspace(
        workspace: impl Into<String>,
        path: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            path: path.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.workspace.is_empty() {
            write!(f, "//{}:{}", self.path, self.name)
        } else {
            write!(f, "//{}//{}:{}", self.workspace, self.path, self.name)
        }
    }
}

impl FromStr for TargetId {
    type Err = ParseError;

    /// Parse the canonical form `"[//workspace]//path:name"`.
    ///
    /// The leading `//` is mandatory. A second `//` separates an explicit
    /// workspace from the package path. The `:` separating path and name must
    /// appear exactly once in the trailing component and the name must be
    /// non-empty.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |reason: &str| ParseError::new(s, reason);

        let rest = s
            .strip_prefix("//")
            .ok_or_else(|| malformed("expected leading '//'"))?;

        let (workspace, rest) = match rest.split_once("//") {
            Some((ws, tail)) => {
                if ws.is_empty() {
                    return Err(malformed("workspace component is empty"));
                }
                if ws.contains(':') {
                    return Err(malformed("workspace component contains ':'"));
                }
                (ws.to_string(), tail)
            }
            None => (String::new(), rest),
        };

        let (path, name) = rest
            .split_once(':')
            .ok_or_else(|| malformed("expected ':' before target name"))?;
        if name.is_empty() {
            return Err(malformed("target name is empty"));
        }
        if name.contains(':') || name.contains('/') {
            return Err(malformed("target name contains ':' or '/'"));
        }
        if path.starts_with('/') || path.ends_with('/') {
            return Err(malformed("package path has a leading or trailing '/'"));
        }

        Ok(Self {
            workspace,
            path: path.to_string(),
            name: name.to_string(),
        })
    }
}

/// What a target produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Executable,
    Library,
    Test,
    Custom,
}

/// Source language of a target. Language-specific behavior lives in
/// adapters; the core only carries the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    C,
    Cpp,
    Rust,
    Go,
    Python,
    Javascript,
    Custom,
}

/// A declared build target: the graph's input record.
///
/// Only `sources`, `deps`, and whatever the planner records into action
/// metadata participate in the cache fingerprint; `flags`, `output_path`,
/// and `lang_config` do not alter cache identity on their own.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub kind: TargetKind,
    pub language: Language,
    /// Ordered workspace-relative source path patterns.
    pub sources: Vec<String>,
    pub deps: BTreeSet<TargetId>,
    pub flags: Vec<String>,
    pub output_path: Option<PathBuf>,
    /// Language-adapter configuration, opaque to the core.
    pub lang_config: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_current_workspace_id() {
        let id: TargetId = "//lib/util:strings".parse().unwrap();
        assert_eq!(id.workspace, "");
        assert_eq!(id.path, "lib/util");
        assert_eq!(id.name, "strings");
    }

    #[test]
    fn parse_external_workspace_id() {
        let id: TargetId = "//vendor//proto/gen:descriptors".parse().unwrap();
        assert_eq!(id.workspace, "vendor");
        assert_eq!(id.path, "proto/gen");
        assert_eq!(id.name, "descriptors");
    }

    #[test]
    fn parse_empty_package_path() {
        let id: TargetId = "//:root".parse().unwrap();
        assert_eq!(id.path, "");
        assert_eq!(id.name, "root");
    }

    #[test]
    fn display_round_trips() {
        for s in ["//a/b:c", "//ws//a/b:c", "//:top"] {
            let id: TargetId = s.parse().unwrap();
            assert_eq!(id.to_string(), s);
            let again: TargetId = id.to_string().parse().unwrap();
            assert_eq!(again, id);
        }
    }

    #[test]
    fn rejects_malformed_ids() {
        for s in [
            "",
            "lib:a",
            "//lib/util",
            "//lib/util:",
            "//lib:a:b",
            "////x:y",
            "///bad:name",
        ] {
            assert!(s.parse::<TargetId>().is_err(), "accepted {:?}", s);
        }
    }

    #[test]
    fn ordering_is_structural() {
        let a = TargetId::new("app", "main");
        let b = TargetId::new("lib", "core");
        let c = TargetId::in_workspace("vendor", "app", "main");
        assert!(a < b); // path compares first within a workspace
        assert!(a < c); // empty workspace sorts before named ones
    }
}
