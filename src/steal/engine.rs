// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The peer steal exchange.
//!
//! A thief whose deque is empty asks a strategy-selected victim for one
//! queued request. The exchange itself is a trait so the transport is
//! injected: in a single process it is a direct pop from the victim's
//! deque head, across machines it would be a wire protocol — the engine
//! cannot tell the difference. Timeouts, retries with exponential backoff,
//! dead-peer bookkeeping, and the metrics feeding the adaptive strategy
//! all live here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;

use crate::engine::WorkDeque;
use crate::errors::NetworkError;
use crate::model::ActionRequest;
use crate::observability::messages::steal::{PeerMarkedDead, StealResolved};
use crate::observability::messages::StructuredLog;
use crate::steal::registry::{PeerId, PeerRegistry};
use crate::steal::strategy::{select_victim, AdaptiveState, VictimStrategy};

/// One steal request: thief asks victim for work at or above a priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealRequest {
    pub thief: PeerId,
    pub victim: PeerId,
    pub min_priority: u32,
}

/// The victim's answer; empty when nothing qualified.
#[derive(Debug)]
pub struct StealResponse {
    pub request: Option<ActionRequest>,
}

/// Transport for the request/response exchange.
#[async_trait]
pub trait StealTransport: Send + Sync {
    async fn steal(&self, request: StealRequest) -> Result<StealResponse, NetworkError>;
}

/// In-process transport: the "exchange" is an atomic pop from the victim's
/// deque head.
#[derive(Default)]
pub struct DequeTransport {
    deques: RwLock<HashMap<PeerId, Arc<WorkDeque>>>,
}

impl DequeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, peer: PeerId, deque: Arc<WorkDeque>) {
        self.deques
            .write()
            .expect("transport lock poisoned")
            .insert(peer, deque);
    }
}

#[async_trait]
impl StealTransport for DequeTransport {
    async fn steal(&self, request: StealRequest) -> Result<StealResponse, NetworkError> {
        let deque = {
            let deques = self.deques.read().expect("transport lock poisoned");
            deques.get(&request.victim).cloned()
        };
        match deque {
            Some(deque) => Ok(StealResponse {
                request: deque.steal_head(request.min_priority),
            }),
            None => Err(NetworkError::new(
                request.victim.to_string(),
                "victim is not attached to this transport",
            )),
        }
    }
}

/// Tunables for the steal engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StealSettings {
    pub strategy: VictimStrategy,
    /// Per-attempt response deadline.
    pub steal_timeout_ms: u64,
    pub max_retries: u32,
    /// Backoff between attempts is `backoff_base_ms · 2^attempt`.
    pub backoff_base_ms: u64,
}

impl Default for StealSettings {
    fn default() -> Self {
        Self {
            strategy: VictimStrategy::PowerOfTwo,
            steal_timeout_ms: 200,
            max_retries: 3,
            backoff_base_ms: 10,
        }
    }
}

/// Attempt counters; the adaptive strategy reads the success rate.
#[derive(Debug, Default)]
pub struct StealMetrics {
    pub attempts: AtomicU64,
    pub successes: AtomicU64,
    pub empty_responses: AtomicU64,
    pub timeouts: AtomicU64,
    pub network_errors: AtomicU64,
}

impl StealMetrics {
    pub fn success_rate(&self) -> f64 {
        let attempts = self.attempts.load(Ordering::SeqCst);
        if attempts == 0 {
            return 0.0;
        }
        self.successes.load(Ordering::SeqCst) as f64 / attempts as f64
    }
}

pub struct StealEngine {
    registry: Arc<PeerRegistry>,
    transport: Arc<dyn StealTransport>,
    settings: StealSettings,
    metrics: StealMetrics,
    adaptive: AdaptiveState,
    rng: AsyncMutex<StdRng>,
}

impl StealEngine {
    pub fn new(
        registry: Arc<PeerRegistry>,
        transport: Arc<dyn StealTransport>,
        settings: StealSettings,
    ) -> Self {
        Self {
            registry,
            transport,
            settings,
            metrics: StealMetrics::default(),
            adaptive: AdaptiveState::new(),
            rng: AsyncMutex::new(StdRng::from_entropy()),
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &StealMetrics {
        &self.metrics
    }

    /// Try to steal one request for `thief`.
    ///
    /// Each attempt selects a victim fresh, so a peer that died or drained
    /// during backoff is not retried. Returns `None` once attempts are
    /// exhausted or no victim qualifies.
    pub async fn try_steal(&self, thief: &PeerId, min_priority: u32) -> Option<ActionRequest> {
        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(
                    self.settings
                        .backoff_base_ms
                        .saturating_mul(1u64 << (attempt - 1).min(16)),
                );
                tokio::time::sleep(backoff).await;
            }

            let peers = self.registry.alive_peers(thief);
            let victim = {
                let mut rng = self.rng.lock().await;
                select_victim(self.settings.strategy, &peers, &self.adaptive, &mut *rng)
            };
            let Some(victim) = victim else {
                continue;
            };

            self.metrics.attempts.fetch_add(1, Ordering::SeqCst);
            let request = StealRequest {
                thief: thief.clone(),
                victim: victim.clone(),
                min_priority,
            };
            let deadline = Duration::from_millis(self.settings.steal_timeout_ms);

            match tokio::time::timeout(deadline, self.transport.steal(request)).await {
                Ok(Ok(response)) => match response.request {
                    Some(stolen) => {
                        self.metrics.successes.fetch_add(1, Ordering::SeqCst);
                        self.adaptive.record(true);
                        StealResolved {
                            thief: &thief.0,
                            victim: &victim.0,
                            outcome: "hit",
                        }
                        .log();
                        return Some(stolen);
                    }
                    None => {
                        self.metrics.empty_responses.fetch_add(1, Ordering::SeqCst);
                        self.adaptive.record(false);
                    }
                },
                Ok(Err(error)) => {
                    self.metrics.network_errors.fetch_add(1, Ordering::SeqCst);
                    self.adaptive.record(false);
                    self.registry.mark_dead(&victim);
                    PeerMarkedDead {
                        peer: &victim.0,
                        reason: &error.to_string(),
                    }
                    .log();
                }
                Err(_elapsed) => {
                    self.metrics.timeouts.fetch_add(1, Ordering::SeqCst);
                    self.adaptive.record(false);
                    StealResolved {
                        thief: &thief.0,
                        victim: &victim.0,
                        outcome: "timeout",
                    }
                    .log();
                }
            }
        }
        None
    }
}
