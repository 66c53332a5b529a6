// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Safety validation for command arguments and working directories.
//!
//! Commands run in array form with no shell, so metacharacters cannot be
//! *interpreted* — the validator exists to reject arguments that would only
//! make sense as shell injection attempts, plus path traversal that would
//! reach outside the workspace root. Rejections are [`SecurityError`]s and
//! always fatal.

use std::path::{Component, Path, PathBuf};

use crate::errors::SecurityError;

/// Bytes that have no business in a build-command argument.
const FORBIDDEN: &[char] = &[';', '&', '|', '`', '$', '<', '>', '\n', '\r', '\0'];

/// Validate a full argv. The command itself (argv[0]) is held to the same
/// rules as its arguments.
pub fn validate_args(args: &[String], workspace_root: &Path) -> Result<(), SecurityError> {
    if args.is_empty() {
        return Err(SecurityError::UnsafeArgument {
            arg: String::new(),
            reason: "empty command".to_string(),
        });
    }
    for arg in args {
        if let Some(bad) = arg.chars().find(|c| FORBIDDEN.contains(c)) {
            return Err(SecurityError::UnsafeArgument {
                arg: arg.clone(),
                reason: format!("contains forbidden character {:?}", bad),
            });
        }
        if arg.contains("..") && escapes_root(arg, workspace_root) {
            return Err(SecurityError::PathEscape {
                path: PathBuf::from(arg),
            });
        }
    }
    Ok(())
}

/// A `..`-carrying argument is treated as a workspace-relative path and
/// normalized lexically; if the normalization climbs above the root, the
/// argument escapes. Absolute paths are resolved as-is.
fn escapes_root(arg: &str, workspace_root: &Path) -> bool {
    let candidate = Path::new(arg);
    let full = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        workspace_root.join(candidate)
    };
    !normalize(&full).starts_with(normalize(workspace_root))
}

/// Lexical normalization: resolves `.` and `..` without touching the
/// filesystem, so validation works for paths that do not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(parts.last(), Some(Component::Normal(_))) {
                    parts.pop();
                } else {
                    parts.push(component);
                }
            }
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Resolve a requested working directory and verify it stays inside the
/// workspace root.
pub fn validate_workdir(workspace_root: &Path, dir: &Path) -> Result<PathBuf, SecurityError> {
    let full = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        workspace_root.join(dir)
    };
    let normalized = normalize(&full);
    if !normalized.starts_with(normalize(workspace_root)) {
        return Err(SecurityError::PathEscape {
            path: dir.to_path_buf(),
        });
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/work/repo")
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn plain_compile_command_passes() {
        let argv = args(&["cc", "-O2", "-Ilib/include", "-o", "out/main.o", "src/main.c"]);
        assert!(validate_args(&argv, &root()).is_ok());
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(validate_args(&[], &root()).is_err());
    }

    #[test]
    fn shell_metacharacters_are_rejected() {
        for bad in ["a;b", "a|b", "a&&b", "`id`", "$(id)", "a>b", "a<b"] {
            let argv = args(&["cc", bad]);
            assert!(
                matches!(
                    validate_args(&argv, &root()),
                    Err(SecurityError::UnsafeArgument { .. })
                ),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn newlines_and_nul_are_rejected() {
        for bad in ["a\nb", "a\rb", "a\0b"] {
            let argv = args(&["cc", bad]);
            assert!(validate_args(&argv, &root()).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn traversal_outside_the_root_is_rejected() {
        let argv = args(&["cat", "../../etc/passwd"]);
        assert!(matches!(
            validate_args(&argv, &root()),
            Err(SecurityError::PathEscape { .. })
        ));
    }

    #[test]
    fn traversal_that_stays_inside_the_root_is_fine() {
        let argv = args(&["cc", "src/../src/main.c"]);
        assert!(validate_args(&argv, &root()).is_ok());
    }

    #[test]
    fn workdir_containment() {
        assert_eq!(
            validate_workdir(&root(), Path::new("build/pkg")).unwrap(),
            PathBuf::from("/work/repo/build/pkg")
        );
        assert!(validate_workdir(&root(), Path::new("../outside")).is_err());
        assert!(validate_workdir(&root(), Path::new("/etc")).is_err());
    }
}
