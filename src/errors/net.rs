// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

/// A peer steal exchange failed below the protocol level.
///
/// The caller marks the peer dead and moves on; network errors are never
/// retried against the same peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("peer '{peer}' unreachable: {message}")]
pub struct NetworkError {
    pub peer: String,
    pub message: String,
}

impl NetworkError {
    pub fn new(peer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            message: message.into(),
        }
    }
}
