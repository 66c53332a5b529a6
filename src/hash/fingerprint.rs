// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Action fingerprints and the per-session hash reuse table.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::content::{hash_file, metadata_probe};
use super::Digest;
use crate::model::TargetId;

/// Session-scoped file fingerprinter with the two-tier fast path.
///
/// The first fingerprint of a path pays for a full content hash. Subsequent
/// fingerprints recompute only the metadata probe; if it matches the stored
/// probe the cached content hash is reused without re-reading the file.
/// Bulk hashing happens outside the table lock.
pub struct FileHasher {
    known: Mutex<HashMap<PathBuf, (Digest, Digest)>>,
    content_recomputations: AtomicU64,
}

impl FileHasher {
    pub fn new() -> Self {
        Self {
            known: Mutex::new(HashMap::new()),
            content_recomputations: AtomicU64::new(0),
        }
    }

    /// Content fingerprint of `path`, reusing the stored hash when the
    /// metadata probe is unchanged.
    pub fn fingerprint(&self, path: &Path) -> std::io::Result<Digest> {
        let probe = metadata_probe(path)?;

        if let Some((stored_probe, stored_content)) =
            self.known.lock().expect("hasher lock poisoned").get(path)
        {
            if *stored_probe == probe {
                return Ok(*stored_content);
            }
        }

        let content = hash_file(path)?;
        self.content_recomputations.fetch_add(1, Ordering::Relaxed);
        self.known
            .lock()
            .expect("hasher lock poisoned")
            .insert(path.to_path_buf(), (probe, content));
        Ok(content)
    }

    /// Number of full content hashes computed so far. The incremental-build
    /// tests use this to assert that unchanged files are never re-read.
    pub fn content_recomputations(&self) -> u64 {
        self.content_recomputations.load(Ordering::Relaxed)
    }
}

impl Default for FileHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compose an action's `input_hash`.
///
/// `H(target_id ‖ sorted(dep_hashes) ‖ sorted(source_fingerprints) ‖
/// canonical(metadata))` with every component length-prefixed, so adjacent
/// fields can never alias each other. Byte-deterministic across processes
/// and platforms; the cache-key stability invariant rests on this function.
pub fn input_hash(
    target_id: &TargetId,
    dep_hashes: &[Digest],
    source_fingerprints: &[Digest],
    metadata: &BTreeMap<String, String>,
) -> Digest {
    let mut hasher = blake3::Hasher::new();

    let id = target_id.to_string();
    hasher.update(&(id.len() as u64).to_le_bytes());
    hasher.update(id.as_bytes());

    let mut deps: Vec<&Digest> = dep_hashes.iter().collect();
    deps.sort();
    hasher.update(&(deps.len() as u64).to_le_bytes());
    for digest in deps {
        hasher.update(digest.as_bytes());
    }

    let mut sources: Vec<&Digest> = source_fingerprints.iter().collect();
    sources.sort();
    hasher.update(&(sources.len() as u64).to_le_bytes());
    for digest in sources {
        hasher.update(digest.as_bytes());
    }

    // BTreeMap iteration is already key-sorted, which is the canonical order.
    hasher.update(&(metadata.len() as u64).to_le_bytes());
    for (key, value) in metadata {
        hasher.update(&(key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
        hasher.update(&(value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    }

    Digest(*hasher.finalize().as_bytes())
}
