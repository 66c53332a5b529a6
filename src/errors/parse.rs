// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

/// A malformed target id, config document, or cache entry.
///
/// Fatal to the affected item only; loaders keep going past it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to parse '{input}': {reason}")]
pub struct ParseError {
    pub input: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            reason: reason.into(),
        }
    }
}
