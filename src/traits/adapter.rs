// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The language-adapter seam.
//!
//! Per-language toolchains live outside the core behind one capability
//! interface: build, list outputs, answer needs-rebuild. Language variants
//! are data ([`Target::lang_config`]), not subclasses. The core itself only
//! needs [`CommandAdapter`], which renders a target's configured command
//! into an [`ActionPlan`]; richer adapters plug in at the same seam.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::{BuildError, ParseError};
use crate::model::{ActionResult, ActionType, Target, TargetKind};

/// What an adapter needs a workspace to know to run one action.
#[derive(Debug, Clone)]
pub struct ActionPlan {
    /// Array-form command. Empty for pure aggregation targets, which
    /// succeed without running anything.
    pub command: Vec<String>,
    /// Declared outputs, workspace-relative.
    pub outputs: Vec<PathBuf>,
    /// Fingerprint-relevant metadata. The rendered command is recorded
    /// here: a target is only identical to its cached result if it would
    /// run the same command again.
    pub metadata: BTreeMap<String, String>,
    pub action_type: ActionType,
}

/// Capability interface implemented by per-language toolchains.
#[async_trait]
pub trait LanguageAdapter: Send + Sync {
    /// Execute the target end to end and report the result.
    async fn build(&self, target: &Target, workspace: &Path) -> Result<ActionResult, BuildError>;

    /// The outputs this target would produce.
    fn outputs(&self, target: &Target, workspace: &Path) -> Vec<PathBuf>;

    /// Whether the target must rebuild given the current workspace state.
    async fn needs_rebuild(&self, target: &Target, workspace: &Path) -> bool;
}

/// The built-in adapter: targets carry their command in `lang_config`.
///
/// Recognized keys:
/// * `command` — JSON array of strings; the argv to run.
/// * `outputs` — JSON array of strings; extra outputs besides
///   `output_path`.
/// * `env` — JSON object of strings; merged over the workspace
///   environment.
#[derive(Debug, Clone, Default)]
pub struct CommandAdapter;

impl CommandAdapter {
    /// Render a target into an [`ActionPlan`].
    pub fn plan(&self, target: &Target) -> Result<ActionPlan, BuildError> {
        let mut command = string_array(target, "command")?;
        if !command.is_empty() {
            command.extend(target.flags.iter().cloned());
        }

        let mut outputs: Vec<PathBuf> = Vec::new();
        if let Some(path) = &target.output_path {
            outputs.push(path.clone());
        }
        outputs.extend(string_array(target, "outputs")?.into_iter().map(PathBuf::from));

        let mut metadata = BTreeMap::new();
        if !command.is_empty() {
            // Unit separator keeps multi-word arguments unambiguous.
            metadata.insert("command".to_string(), command.join("\u{1f}"));
        }

        let action_type = match target.kind {
            TargetKind::Executable => ActionType::Link,
            TargetKind::Library => ActionType::Compile,
            TargetKind::Test => ActionType::Test,
            TargetKind::Custom => ActionType::Custom,
        };

        Ok(ActionPlan {
            command,
            outputs,
            metadata,
            action_type,
        })
    }

    /// Per-target environment overlay from `lang_config.env`.
    pub fn env(&self, target: &Target) -> Result<BTreeMap<String, String>, BuildError> {
        let mut env = BTreeMap::new();
        if let Some(value) = target.lang_config.get("env") {
            let object = value.as_object().ok_or_else(|| {
                ParseError::new(target.id.to_string(), "lang_config.env must be an object")
            })?;
            for (key, value) in object {
                let value = value.as_str().ok_or_else(|| {
                    ParseError::new(
                        target.id.to_string(),
                        format!("lang_config.env.{} must be a string", key),
                    )
                })?;
                env.insert(key.clone(), value.to_string());
            }
        }
        Ok(env)
    }
}

fn string_array(target: &Target, key: &str) -> Result<Vec<String>, BuildError> {
    let Some(value) = target.lang_config.get(key) else {
        return Ok(Vec::new());
    };
    let array = value.as_array().ok_or_else(|| {
        ParseError::new(
            target.id.to_string(),
            format!("lang_config.{} must be an array of strings", key),
        )
    })?;
    array
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                ParseError::new(
                    target.id.to_string(),
                    format!("lang_config.{} must be an array of strings", key),
                )
                .into()
            })
        })
        .collect()
}
