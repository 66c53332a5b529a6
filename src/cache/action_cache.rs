// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The action cache: a fingerprint → artifact map with persistence,
//! integrity, eviction, and single-flight build deduplication.
//!
//! All map state sits behind one `std::sync::Mutex` with short critical
//! sections; hashing and disk I/O happen outside the lock. Entries persist
//! lazily: mutations set a dirty flag and [`ActionCache::flush`] writes the
//! whole namespace atomically (temp file + rename). Every persisted entry
//! carries a keyed-hash signature; entries that fail verification on load
//! are discarded and counted as misses.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::watch;

use crate::cache::codec::{decode_entries, encode_entries};
use crate::cache::entry::{CacheEntry, OutputFile, SigningKey};
use crate::cache::eviction::{EvictionCandidate, EvictionPolicy, WeightedScorePolicy};
use crate::cache::object_store::ObjectStore;
use crate::errors::CacheError;
use crate::hash::{input_hash, Digest};
use crate::model::{ActionId, ActionType, TargetId};
use crate::observability::messages::cache::{CacheFlushed, CacheOpened};
use crate::observability::messages::StructuredLog;

const ENTRIES_FILE: &str = "entries.bin";

/// Capacity bounds for one cache namespace.
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub max_entries: usize,
    pub max_bytes: u64,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: 65_536,
            max_bytes: 10 * 1024 * 1024 * 1024,
        }
    }
}

/// Operational counters, exposed for the CLI and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub integrity_rejects: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    dirty: bool,
    hits: u64,
    misses: u64,
    evictions: u64,
    integrity_rejects: u64,
}

/// Outcome of [`ActionCache::begin_flight`].
pub enum SingleFlight<'a> {
    /// This caller owns the build. Dropping the guard releases the slot and
    /// wakes every waiter, whether or not a `store` happened.
    Leader(FlightGuard<'a>),
    /// Another caller built (or failed) while we waited. Re-check the cache
    /// and, if it is still a miss, contend again.
    Waited,
}

pub struct FlightGuard<'a> {
    cache: &'a ActionCache,
    key: String,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // Removing the sender drops it, which resolves every waiting
        // receiver in begin_flight.
        self.cache
            .inflight
            .lock()
            .expect("inflight lock poisoned")
            .remove(&self.key);
    }
}

pub struct ActionCache {
    dir: PathBuf,
    key: SigningKey,
    limits: CacheLimits,
    policy: Box<dyn EvictionPolicy>,
    objects: ObjectStore,
    state: Mutex<CacheState>,
    inflight: Mutex<HashMap<String, watch::Sender<()>>>,
}

impl ActionCache {
    /// Open (or create) the cache namespace at `dir`, keyed to
    /// `workspace_root`. Entries whose signature does not verify under the
    /// workspace key are discarded and counted.
    pub fn open(
        dir: impl Into<PathBuf>,
        workspace_root: &str,
        limits: CacheLimits,
        policy: Option<Box<dyn EvictionPolicy>>,
    ) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let key = SigningKey::for_workspace(workspace_root);
        let objects = ObjectStore::new(dir.clone());

        let mut state = CacheState::default();
        let entries_path = dir.join(ENTRIES_FILE);
        if entries_path.is_file() {
            let bytes = fs::read(&entries_path)?;
            match decode_entries(&bytes) {
                Ok((entries, dropped)) => {
                    state.integrity_rejects += dropped as u64;
                    for entry in entries {
                        if entry.verify(&key) {
                            state.total_bytes += entry.size_bytes;
                            state.entries.insert(entry.action_id.clone(), entry);
                        } else {
                            state.integrity_rejects += 1;
                        }
                    }
                }
                Err(_) => {
                    // A header-level corruption costs the whole namespace;
                    // recover locally by starting empty.
                    state.integrity_rejects += 1;
                }
            }
        }

        CacheOpened {
            dir: &dir.to_string_lossy(),
            entries: state.entries.len(),
            rejected: state.integrity_rejects,
        }
        .log();

        Ok(Self {
            dir,
            key,
            limits,
            policy: policy.unwrap_or_else(|| Box::new(WeightedScorePolicy::default())),
            objects,
            state: Mutex::new(state),
            inflight: Mutex::new(HashMap::new()),
        })
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// O(1) lookup. A hit bumps `last_access` and `hit_count` and marks the
    /// cache dirty for the next flush.
    pub fn lookup(&self, action_id: &ActionId, now_ns: i64) -> Option<CacheEntry> {
        let key = action_id.to_string();
        let mut state = self.state.lock().expect("cache lock poisoned");
        match state.entries.get_mut(&key) {
            Some(entry) => {
                entry.last_access = now_ns;
                entry.hit_count += 1;
                let found = entry.clone();
                state.dirty = true;
                state.hits += 1;
                Some(found)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Insert an entry, evicting first if the insert would exceed a limit.
    ///
    /// Object files whose hash is no longer referenced by any surviving
    /// entry are deleted outside the lock.
    pub fn store(
        &self,
        action_id: &ActionId,
        outputs: Vec<OutputFile>,
        output_hash: Digest,
        now_ns: i64,
    ) -> Result<(), CacheError> {
        let size_bytes: u64 = outputs.iter().map(|o| o.size).sum();
        let mut entry = CacheEntry {
            action_id: action_id.to_string(),
            outputs,
            output_hash,
            created_at: now_ns,
            last_access: now_ns,
            hit_count: 0,
            size_bytes,
            signature: [0u8; 32],
        };
        entry.resign(&self.key);

        let orphaned: Vec<Digest> = {
            let mut state = self.state.lock().expect("cache lock poisoned");

            let replaced = state.entries.remove(&entry.action_id);
            if let Some(old) = &replaced {
                state.total_bytes -= old.size_bytes;
            }

            let excess_entries = (state.entries.len() + 1).saturating_sub(self.limits.max_entries);
            let excess_bytes =
                (state.total_bytes + size_bytes).saturating_sub(self.limits.max_bytes);

            let mut orphaned = Vec::new();
            if excess_entries > 0 || excess_bytes > 0 {
                let candidates: Vec<EvictionCandidate> = state
                    .entries
                    .values()
                    .map(|e| EvictionCandidate {
                        action_id: e.action_id.clone(),
                        output_hash: e.output_hash,
                        created_at: e.created_at,
                        last_access: e.last_access,
                        size_bytes: e.size_bytes,
                    })
                    .collect();
                let victims =
                    self.policy
                        .select_victims(&candidates, excess_entries, excess_bytes, now_ns);

                let mut evicted_hashes = Vec::new();
                for victim in victims {
                    if let Some(old) = state.entries.remove(&victim) {
                        state.total_bytes -= old.size_bytes;
                        state.evictions += 1;
                        evicted_hashes.extend(old.outputs.iter().map(|o| o.hash));
                    }
                }

                // Content addressing dedups artifacts across entries, so an
                // evicted hash is only an orphan if nothing else (including
                // the incoming entry) still references it.
                let mut referenced: HashSet<Digest> = state
                    .entries
                    .values()
                    .flat_map(|e| e.outputs.iter().map(|o| o.hash))
                    .collect();
                referenced.extend(entry.outputs.iter().map(|o| o.hash));
                orphaned = evicted_hashes
                    .into_iter()
                    .filter(|h| !referenced.contains(h))
                    .collect();
            }

            state.total_bytes += size_bytes;
            state.entries.insert(entry.action_id.clone(), entry);
            state.dirty = true;
            orphaned
        };

        for hash in orphaned {
            self.objects.remove(&hash)?;
        }
        Ok(())
    }

    /// Convenience composite: recompute the fingerprint and query.
    pub fn is_cached(
        &self,
        target_id: &TargetId,
        action_type: ActionType,
        source_fingerprints: &[Digest],
        dep_hashes: &[Digest],
        metadata: &BTreeMap<String, String>,
        now_ns: i64,
    ) -> bool {
        let fingerprint = input_hash(target_id, dep_hashes, source_fingerprints, metadata);
        let id = ActionId::new(target_id.clone(), action_type, 0, fingerprint);
        self.lookup(&id, now_ns).is_some()
    }

    /// Join the single-flight for `action_id`.
    ///
    /// The first caller becomes the leader and must build; concurrent
    /// callers block until the leader's guard drops, then re-check the
    /// cache. This is what makes concurrent `lookup`+`store` races execute
    /// the underlying action exactly once.
    pub async fn begin_flight(&self, action_id: &ActionId) -> SingleFlight<'_> {
        let key = action_id.to_string();
        let receiver = {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            match inflight.entry(key.clone()) {
                MapEntry::Vacant(slot) => {
                    let (tx, _rx) = watch::channel(());
                    slot.insert(tx);
                    None
                }
                MapEntry::Occupied(slot) => Some(slot.get().subscribe()),
            }
        };
        match receiver {
            None => SingleFlight::Leader(FlightGuard { cache: self, key }),
            Some(mut rx) => {
                // Resolves when the leader's guard drops the sender.
                let _ = rx.changed().await;
                SingleFlight::Waited
            }
        }
    }

    /// Persist in-memory state if anything changed since the last flush.
    ///
    /// Entries are re-signed (lookup bumps leave signatures stale in
    /// memory), sorted by action id for byte-determinism, and written to a
    /// temp file that is renamed over `entries.bin`.
    pub fn flush(&self) -> Result<(), CacheError> {
        let encoded = {
            let state = self.state.lock().expect("cache lock poisoned");
            if !state.dirty {
                return Ok(());
            }
            let mut entries: Vec<CacheEntry> = state.entries.values().cloned().collect();
            entries.sort_by(|a, b| a.action_id.cmp(&b.action_id));
            for entry in &mut entries {
                entry.resign(&self.key);
            }
            encode_entries(&entries)
        };

        let temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        fs::write(temp.path(), &encoded)?;
        temp.persist(self.dir.join(ENTRIES_FILE))
            .map_err(|e| CacheError::IoFailed(e.error))?;

        let mut state = self.state.lock().expect("cache lock poisoned");
        state.dirty = false;
        CacheFlushed {
            entries: state.entries.len(),
            bytes: state.total_bytes,
        }
        .log();
        Ok(())
    }

    /// Drop every entry and all on-disk state for this namespace.
    pub fn clear(&self) -> Result<(), CacheError> {
        {
            let mut state = self.state.lock().expect("cache lock poisoned");
            state.entries.clear();
            state.total_bytes = 0;
            state.dirty = false;
        }
        match fs::remove_file(self.dir.join(ENTRIES_FILE)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::IoFailed(e)),
        }
        self.objects.clear()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().expect("cache lock poisoned");
        CacheStats {
            entries: state.entries.len(),
            bytes: state.total_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            integrity_rejects: state.integrity_rejects,
        }
    }

    /// Path of the persisted entry file, for diagnostics and tests.
    pub fn entries_path(&self) -> PathBuf {
        self.dir.join(ENTRIES_FILE)
    }

    /// Workspace-relative directory of this namespace.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
