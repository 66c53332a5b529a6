// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Eviction policy for the action cache.
//!
//! A policy sees lightweight candidates and names victims; the cache
//! performs the actual removal. Policies must drive the cache to
//! `entries ≤ max_entries ∧ bytes ≤ max_bytes`, and beyond that the
//! selection rule is pluggable.

use crate::hash::Digest;

/// What a policy gets to know about an entry.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub action_id: String,
    pub output_hash: Digest,
    pub created_at: i64,
    pub last_access: i64,
    pub size_bytes: u64,
}

pub trait EvictionPolicy: Send + Sync {
    /// Pick victims so that removing them frees at least `excess_entries`
    /// entries and `excess_bytes` bytes. `now_ns` is supplied by the caller
    /// so policies stay clock-free and deterministic under test.
    fn select_victims(
        &self,
        candidates: &[EvictionCandidate],
        excess_entries: usize,
        excess_bytes: u64,
        now_ns: i64,
    ) -> Vec<String>;
}

/// The default policy: weighted score
/// `w_age·age + w_cold·time_since_access + w_big·size`.
///
/// With the default weights the coldness term dominates, so the behavior is
/// LRU with size as the secondary preference and age as a slow tiebreaker.
#[derive(Debug, Clone)]
pub struct WeightedScorePolicy {
    pub w_age: f64,
    pub w_cold: f64,
    pub w_big: f64,
}

impl Default for WeightedScorePolicy {
    fn default() -> Self {
        Self {
            w_age: 0.01,
            w_cold: 1.0,
            w_big: 0.1,
        }
    }
}

const NS_PER_SEC: f64 = 1_000_000_000.0;
const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

impl WeightedScorePolicy {
    fn score(&self, candidate: &EvictionCandidate, now_ns: i64) -> f64 {
        let age_secs = (now_ns - candidate.created_at).max(0) as f64 / NS_PER_SEC;
        let cold_secs = (now_ns - candidate.last_access).max(0) as f64 / NS_PER_SEC;
        let size_mib = candidate.size_bytes as f64 / BYTES_PER_MIB;
        self.w_age * age_secs + self.w_cold * cold_secs + self.w_big * size_mib
    }
}

impl EvictionPolicy for WeightedScorePolicy {
    fn select_victims(
        &self,
        candidates: &[EvictionCandidate],
        excess_entries: usize,
        excess_bytes: u64,
        now_ns: i64,
    ) -> Vec<String> {
        let mut scored: Vec<(f64, &EvictionCandidate)> = candidates
            .iter()
            .map(|c| (self.score(c, now_ns), c))
            .collect();
        // Highest score evicts first; break score ties on action id so the
        // victim set is deterministic.
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.action_id.cmp(&b.1.action_id))
        });

        let mut victims = Vec::new();
        let mut freed_entries = 0usize;
        let mut freed_bytes = 0u64;
        for (_, candidate) in scored {
            if freed_entries >= excess_entries && freed_bytes >= excess_bytes {
                break;
            }
            victims.push(candidate.action_id.clone());
            freed_entries += 1;
            freed_bytes += candidate.size_bytes;
        }
        victims
    }
}
