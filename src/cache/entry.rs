// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Cache entries and their keyed-hash signatures.

use std::path::PathBuf;

use crate::hash::Digest;

/// Context string for deriving the workspace signing key. Changing it
/// invalidates every cache on disk, so it is versioned.
const KEY_CONTEXT: &str = "sawmill 2025-05 cache entry signing v1";

/// Workspace-scoped key for cache-entry signatures.
///
/// Derived from the workspace root path, so entries copied between
/// workspaces fail verification and are rebuilt rather than trusted.
#[derive(Clone)]
pub struct SigningKey([u8; 32]);

impl SigningKey {
    pub fn for_workspace(workspace_root: &str) -> Self {
        Self(blake3::derive_key(KEY_CONTEXT, workspace_root.as_bytes()))
    }

    fn sign(&self, message: &[u8]) -> [u8; 32] {
        *blake3::keyed_hash(&self.0, message).as_bytes()
    }

    /// Constant-time signature check: `blake3::Hash` equality compares in
    /// constant time, which keeps verification timing independent of where
    /// a forged signature first diverges.
    fn verify(&self, message: &[u8], signature: &[u8; 32]) -> bool {
        blake3::keyed_hash(&self.0, message) == blake3::Hash::from(*signature)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("SigningKey(..)")
    }
}

/// One declared output of a cached action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub hash: Digest,
    pub size: u64,
}

/// A persisted action result: the value side of the fingerprint → artifact
/// map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Canonical string form of the [`crate::model::ActionId`].
    pub action_id: String,
    pub outputs: Vec<OutputFile>,
    /// Combined digest over the sorted output hashes.
    pub output_hash: Digest,
    /// Nanoseconds since the unix epoch.
    pub created_at: i64,
    pub last_access: i64,
    pub hit_count: u64,
    pub size_bytes: u64,
    /// Keyed hash over the canonical serialization of the fields above.
    pub signature: [u8; 32],
}

impl CacheEntry {
    /// Byte-deterministic serialization of everything except the signature.
    /// This is both the signing message and the body persisted to disk, so
    /// sign/verify and encode/decode can never disagree about field order.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.action_id.len());
        put_str(&mut buf, &self.action_id);
        buf.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            put_str(&mut buf, &output.path.to_string_lossy());
            buf.extend_from_slice(output.hash.as_bytes());
            buf.extend_from_slice(&output.size.to_le_bytes());
        }
        buf.extend_from_slice(self.output_hash.as_bytes());
        buf.extend_from_slice(&self.created_at.to_le_bytes());
        buf.extend_from_slice(&self.last_access.to_le_bytes());
        buf.extend_from_slice(&self.hit_count.to_le_bytes());
        buf.extend_from_slice(&self.size_bytes.to_le_bytes());
        buf
    }

    /// Recompute the signature after mutating LRU metadata.
    pub fn resign(&mut self, key: &SigningKey) {
        self.signature = key.sign(&self.canonical_bytes());
    }

    pub fn verify(&self, key: &SigningKey) -> bool {
        key.verify(&self.canonical_bytes(), &self.signature)
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}
