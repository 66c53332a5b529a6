// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Cache subsystem errors.
//!
//! Every variant here is recoverable at the call site: the cache treats a
//! failed entry as a miss and the build falls back to executing the action.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// An entry in `entries.bin` could not be decoded.
    #[error("corrupt cache entry: {detail}")]
    CorruptEntry { detail: String },

    /// An entry decoded but its keyed signature did not verify.
    #[error("cache entry '{action_id}' failed integrity verification")]
    IntegrityFailed { action_id: String },

    /// The cache file or object store could not be read or written.
    #[error("cache i/o failed: {0}")]
    IoFailed(#[from] std::io::Error),
}
