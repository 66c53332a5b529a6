// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Victim selection strategies for peer stealing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use rand::Rng;
use serde::Deserialize;

use crate::steal::registry::{PeerId, PeerState};

/// A most-loaded steal aborts unless the victim has at least this much
/// queued; shallower queues drain before the stolen work would help.
pub const MIN_STEAL_DEPTH: usize = 4;

/// Rolling-window length for the adaptive strategy's success rate.
const ADAPTIVE_WINDOW: usize = 32;
/// At or above this success rate, adaptive trusts the most-loaded view.
const ADAPTIVE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VictimStrategy {
    /// Uniform over alive peers.
    Random,
    /// Minimum load factor.
    LeastLoaded,
    /// Maximum queue depth; aborts below [`MIN_STEAL_DEPTH`].
    MostLoaded,
    /// Sample two at random, pick the deeper queue.
    #[default]
    PowerOfTwo,
    /// Most-loaded while steals keep landing, power-of-two once they stop.
    Adaptive,
}

/// Shared success window backing [`VictimStrategy::Adaptive`].
#[derive(Debug, Default)]
pub struct AdaptiveState {
    window: Mutex<VecDeque<bool>>,
}

impl AdaptiveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, success: bool) {
        let mut window = self.window.lock().expect("adaptive lock poisoned");
        if window.len() == ADAPTIVE_WINDOW {
            window.pop_front();
        }
        window.push_back(success);
    }

    /// Fraction of recent attempts that landed. An empty window reads as
    /// successful so a fresh engine starts on the most-loaded arm.
    pub fn success_rate(&self) -> f64 {
        let window = self.window.lock().expect("adaptive lock poisoned");
        if window.is_empty() {
            return 1.0;
        }
        window.iter().filter(|s| **s).count() as f64 / window.len() as f64
    }
}

/// Pick a victim among `peers` (already filtered to alive, non-self).
pub fn select_victim<R: Rng>(
    strategy: VictimStrategy,
    peers: &[(PeerId, Arc<PeerState>)],
    adaptive: &AdaptiveState,
    rng: &mut R,
) -> Option<PeerId> {
    if peers.is_empty() {
        return None;
    }
    match strategy {
        VictimStrategy::Random => {
            let pick = rng.gen_range(0..peers.len());
            Some(peers[pick].0.clone())
        }
        VictimStrategy::LeastLoaded => peers
            .iter()
            .min_by(|a, b| {
                a.1.load_factor()
                    .partial_cmp(&b.1.load_factor())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(id, _)| id.clone()),
        VictimStrategy::MostLoaded => {
            let deepest = peers.iter().max_by_key(|(_, state)| state.queue_depth())?;
            if deepest.1.queue_depth() < MIN_STEAL_DEPTH {
                return None;
            }
            Some(deepest.0.clone())
        }
        VictimStrategy::PowerOfTwo => {
            let first = &peers[rng.gen_range(0..peers.len())];
            let second = &peers[rng.gen_range(0..peers.len())];
            let heavier = if second.1.queue_depth() > first.1.queue_depth() {
                second
            } else {
                first
            };
            Some(heavier.0.clone())
        }
        VictimStrategy::Adaptive => {
            let arm = if adaptive.success_rate() >= ADAPTIVE_THRESHOLD {
                VictimStrategy::MostLoaded
            } else {
                VictimStrategy::PowerOfTwo
            };
            select_victim(arm, peers, adaptive, rng)
        }
    }
}
