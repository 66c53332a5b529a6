// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Soft-state registry of stealable peers.
//!
//! The peer map is read-mostly: registration and death are rare, while
//! heartbeats and load reads are constant. Membership sits behind a brief
//! `RwLock`; the per-peer load fields are atomics so heartbeat updates and
//! strategy reads never take the map lock at all.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Identity of a stealable peer worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-peer soft state, refreshed by heartbeat.
#[derive(Debug)]
pub struct PeerState {
    queue_depth: AtomicUsize,
    /// Load factor in thousandths, so it fits an atomic integer.
    load_factor_millis: AtomicU32,
    last_heartbeat_ns: AtomicI64,
    alive: AtomicBool,
}

impl PeerState {
    fn new() -> Self {
        Self {
            queue_depth: AtomicUsize::new(0),
            load_factor_millis: AtomicU32::new(0),
            last_heartbeat_ns: AtomicI64::new(0),
            alive: AtomicBool::new(true),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::SeqCst)
    }

    pub fn load_factor(&self) -> f64 {
        self.load_factor_millis.load(Ordering::SeqCst) as f64 / 1000.0
    }

    pub fn last_heartbeat_ns(&self) -> i64 {
        self.last_heartbeat_ns.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// The set of live peers with their load state.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<PeerId, Arc<PeerState>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or revive) a peer.
    pub fn register(&self, id: PeerId) -> Arc<PeerState> {
        let mut peers = self.peers.write().expect("peer lock poisoned");
        let state = peers.entry(id).or_insert_with(|| Arc::new(PeerState::new()));
        state.alive.store(true, Ordering::SeqCst);
        Arc::clone(state)
    }

    pub fn remove(&self, id: &PeerId) {
        self.peers.write().expect("peer lock poisoned").remove(id);
    }

    /// Refresh a peer's soft state. Unknown peers are ignored; the caller
    /// races with removal and that is fine.
    pub fn heartbeat(&self, id: &PeerId, queue_depth: usize, load_factor: f64, now_ns: i64) {
        let peers = self.peers.read().expect("peer lock poisoned");
        if let Some(state) = peers.get(id) {
            state.queue_depth.store(queue_depth, Ordering::SeqCst);
            state
                .load_factor_millis
                .store((load_factor.clamp(0.0, 4_000_000.0) * 1000.0) as u32, Ordering::SeqCst);
            state.last_heartbeat_ns.store(now_ns, Ordering::SeqCst);
        }
    }

    /// Mark a peer dead after a network failure. Dead peers are skipped by
    /// victim selection until re-registered.
    pub fn mark_dead(&self, id: &PeerId) {
        let peers = self.peers.read().expect("peer lock poisoned");
        if let Some(state) = peers.get(id) {
            state.alive.store(false, Ordering::SeqCst);
        }
    }

    /// Live peers other than `exclude`, in id order for determinism.
    pub fn alive_peers(&self, exclude: &PeerId) -> Vec<(PeerId, Arc<PeerState>)> {
        let peers = self.peers.read().expect("peer lock poisoned");
        let mut alive: Vec<(PeerId, Arc<PeerState>)> = peers
            .iter()
            .filter(|(id, state)| *id != exclude && state.is_alive())
            .map(|(id, state)| (id.clone(), Arc::clone(state)))
            .collect();
        alive.sort_by(|a, b| a.0.cmp(&b.0));
        alive
    }

    pub fn len(&self) -> usize {
        self.peers.read().expect("peer lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
