// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The fixed-size worker pool.
//!
//! Each worker owns one deque. Submitted requests are spread round-robin
//! across the deques (skipping deques at their configured cap while any
//! other has room); a worker prefers its own tail, then steals from
//! sibling heads, then (when enabled) asks the peer steal engine, and
//! finally parks until new work or shutdown. Cancellation drains the local
//! deque into `Cancelled` results so the scheduler's accounting always
//! balances.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::engine::deque::WorkDeque;
use crate::engine::worker::{self, WorkerContext};
use crate::model::ActionRequest;
use crate::steal::{DequeTransport, PeerId, PeerRegistry, StealEngine, StealSettings};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub workers: usize,
    /// Concurrent actions a single worker may have in flight.
    pub actions_per_worker: usize,
    /// Soft cap per deque; submission spills to other workers first and
    /// only overfills when every deque is at the cap.
    pub local_queue_cap: usize,
    /// Enable the peer steal engine with these settings.
    pub steal: Option<StealSettings>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            actions_per_worker: 1,
            local_queue_cap: 256,
            steal: None,
        }
    }
}

pub struct WorkerPool {
    deques: Vec<Arc<WorkDeque>>,
    wakers: Vec<Arc<Notify>>,
    shutdown: CancellationToken,
    next: AtomicUsize,
    local_queue_cap: usize,
    registry: Option<Arc<PeerRegistry>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `options.workers` worker tasks (at least one).
    pub fn start(ctx: Arc<WorkerContext>, options: PoolOptions) -> Arc<Self> {
        let workers = options.workers.max(1);
        let actions_per_worker = options.actions_per_worker.max(1);
        let deques: Vec<Arc<WorkDeque>> =
            (0..workers).map(|_| Arc::new(WorkDeque::new())).collect();
        let wakers: Vec<Arc<Notify>> = (0..workers).map(|_| Arc::new(Notify::new())).collect();

        let steal_engine = options.steal.map(|settings| {
            let registry = Arc::new(PeerRegistry::new());
            let transport = Arc::new(DequeTransport::new());
            for (index, deque) in deques.iter().enumerate() {
                let peer = PeerId::new(format!("worker-{}", index));
                registry.register(peer.clone());
                transport.attach(peer, Arc::clone(deque));
            }
            Arc::new(StealEngine::new(registry, transport, settings))
        });

        let pool = Arc::new(Self {
            deques,
            wakers,
            shutdown: CancellationToken::new(),
            next: AtomicUsize::new(0),
            local_queue_cap: options.local_queue_cap.max(1),
            registry: steal_engine.as_ref().map(|e| Arc::clone(e.registry())),
            handles: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let pool = Arc::clone(&pool);
            let ctx = Arc::clone(&ctx);
            let engine = steal_engine.clone();
            handles.push(tokio::spawn(worker_loop(
                pool,
                index,
                actions_per_worker,
                ctx,
                engine,
            )));
        }
        *pool.handles.lock().expect("handle lock poisoned") = handles;
        pool
    }

    /// Spread requests round-robin and wake everyone: idle workers may be
    /// able to steal even when their own deque stays empty.
    pub fn submit(&self, requests: Vec<ActionRequest>) {
        let worker_count = self.deques.len();
        for request in requests {
            let start = self.next.fetch_add(1, Ordering::Relaxed);
            // First deque under its cap wins; when everyone is full the
            // round-robin slot takes the overflow.
            let slot = (0..worker_count)
                .map(|offset| (start + offset) % worker_count)
                .find(|&i| self.deques[i].len() < self.local_queue_cap)
                .unwrap_or(start % worker_count);
            self.deques[slot].push(request);
        }
        for waker in &self.wakers {
            waker.notify_one();
        }
    }

    /// Total queued work across all deques.
    pub fn queued(&self) -> usize {
        self.deques.iter().map(|d| d.len()).sum()
    }

    /// Stop the workers and wait for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for waker in &self.wakers {
            waker.notify_one();
        }
        let handles = {
            let mut guard = self.handles.lock().expect("handle lock poisoned");
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    pool: Arc<WorkerPool>,
    index: usize,
    actions_per_worker: usize,
    ctx: Arc<WorkerContext>,
    steal_engine: Option<Arc<StealEngine>>,
) {
    let my_id = PeerId::new(format!("worker-{}", index));
    let my_deque = Arc::clone(&pool.deques[index]);
    let my_waker = Arc::clone(&pool.wakers[index]);
    let mut inflight: JoinSet<()> = JoinSet::new();

    loop {
        if ctx.cancel.is_cancelled() {
            // Account for everything still queued locally, let in-flight
            // actions resolve, then idle until shutdown (late retry
            // submissions may still trickle in).
            for request in my_deque.drain() {
                ctx.sink.publish(worker::cancelled_for(&request)).await;
            }
            if inflight.join_next().await.is_some() {
                continue;
            }
            tokio::select! {
                _ = my_waker.notified() => continue,
                _ = pool.shutdown.cancelled() => break,
            }
        }

        // Refill up to the per-worker cap: local tail first, then sibling
        // heads.
        while inflight.len() < actions_per_worker {
            let job = my_deque.pop().or_else(|| {
                pool.deques
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != index)
                    .find_map(|(_, deque)| deque.steal_head(0))
            });
            match job {
                Some(request) => spawn_action(&mut inflight, &ctx, request),
                None => break,
            }
        }

        heartbeat(&pool, index, &my_id);

        if inflight.is_empty() {
            // Nothing local anywhere; ask a peer before parking.
            if let Some(engine) = &steal_engine {
                if let Some(request) = engine.try_steal(&my_id, 0).await {
                    spawn_action(&mut inflight, &ctx, request);
                    continue;
                }
            }
            tokio::select! {
                _ = my_waker.notified() => {}
                _ = pool.shutdown.cancelled() => break,
                _ = ctx.cancel.cancelled() => {}
            }
        } else {
            tokio::select! {
                _ = inflight.join_next() => {}
                _ = my_waker.notified() => {}
                _ = ctx.cancel.cancelled() => {}
            }
        }
    }

    // Never abandon an in-flight action at shutdown.
    while inflight.join_next().await.is_some() {}
}

fn spawn_action(inflight: &mut JoinSet<()>, ctx: &Arc<WorkerContext>, request: ActionRequest) {
    let ctx = Arc::clone(ctx);
    inflight.spawn(async move {
        let result = worker::run_action(&ctx, request).await;
        ctx.sink.publish(result).await;
    });
}

fn heartbeat(pool: &WorkerPool, index: usize, id: &PeerId) {
    if let Some(registry) = &pool.registry {
        let depth = pool.deques[index].len();
        registry.heartbeat(id, depth, depth as f64, worker::unix_now_ns());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ActionCache, CacheLimits};
    use crate::hash::{Digest, FileHasher};
    use crate::model::{ActionId, ActionResult, ActionStatus, ActionType, TargetId};
    use crate::traits::{ActionExecutor, ChannelSink};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct NullExecutor;

    #[async_trait]
    impl ActionExecutor for NullExecutor {
        async fn execute(
            &self,
            _request: &ActionRequest,
            _workdir: &Path,
            _cancel: &CancellationToken,
        ) -> Result<crate::exec::CommandOutput, crate::errors::BuildError> {
            Ok(crate::exec::CommandOutput {
                exit_code: 0,
                stdout: Vec::new(),
                stderr: Vec::new(),
                duration: std::time::Duration::ZERO,
            })
        }
    }

    fn request(name: &str) -> ActionRequest {
        let target = TargetId::new("pkg", name);
        ActionRequest {
            id: ActionId::new(target.clone(), ActionType::Custom, 0, Digest::ZERO),
            target_id: target,
            inputs: vec![],
            dep_hashes: vec![],
            command: vec![],
            env: BTreeMap::new(),
            outputs: vec![],
            metadata: BTreeMap::new(),
            priority: 0,
        }
    }

    fn context(dir: &TempDir, tx: mpsc::Sender<ActionResult>) -> Arc<WorkerContext> {
        let root = dir.path().to_path_buf();
        Arc::new(WorkerContext {
            scratch_dir: root.join(".scratch"),
            cache: Arc::new(
                ActionCache::open(
                    root.join(".cache"),
                    &root.to_string_lossy(),
                    CacheLimits::default(),
                    None,
                )
                .unwrap(),
            ),
            hasher: Arc::new(FileHasher::new()),
            executor: Arc::new(NullExecutor),
            sink: Arc::new(ChannelSink::new(tx)),
            cancel: CancellationToken::new(),
            workspace_root: root,
        })
    }

    #[tokio::test]
    async fn pool_executes_submitted_requests() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let ctx = context(&dir, tx);
        let pool = WorkerPool::start(
            Arc::clone(&ctx),
            PoolOptions {
                workers: 4,
                ..PoolOptions::default()
            },
        );

        let batch: Vec<ActionRequest> = (0..16).map(|i| request(&format!("t{}", i))).collect();
        pool.submit(batch);

        let mut seen = Vec::new();
        for _ in 0..16 {
            let result = rx.recv().await.unwrap();
            assert_eq!(result.status, ActionStatus::Success);
            seen.push(result.id.target_id.name.clone());
        }
        seen.sort();
        let mut expected: Vec<String> = (0..16).map(|i| format!("t{}", i)).collect();
        expected.sort();
        assert_eq!(seen, expected);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn cancellation_drains_queued_work_as_cancelled() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let ctx = context(&dir, tx);

        // Cancel before the pool ever runs: every request must come back
        // Cancelled, none Success.
        ctx.cancel.cancel();
        let pool = WorkerPool::start(
            Arc::clone(&ctx),
            PoolOptions {
                workers: 2,
                ..PoolOptions::default()
            },
        );
        pool.submit((0..8).map(|i| request(&format!("t{}", i))).collect());

        for _ in 0..8 {
            let result = rx.recv().await.unwrap();
            assert_eq!(result.status, ActionStatus::Cancelled);
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn sibling_stealing_balances_a_lopsided_load() {
        // One worker's deque gets everything; with 4 workers the other
        // three must steal from its head for all work to finish.
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(128);
        let ctx = context(&dir, tx);
        let pool = WorkerPool::start(
            Arc::clone(&ctx),
            PoolOptions {
                workers: 4,
                ..PoolOptions::default()
            },
        );

        // Push directly into one deque, bypassing round-robin.
        for i in 0..32 {
            pool.deques[0].push(request(&format!("t{}", i)));
        }
        for waker in &pool.wakers {
            waker.notify_one();
        }

        for _ in 0..32 {
            let result = rx.recv().await.unwrap();
            assert_eq!(result.status, ActionStatus::Success);
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn queue_cap_spills_submissions_to_other_workers() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let ctx = context(&dir, tx);
        // Workers can't run anything yet: cancel nothing, but use a tiny
        // cap and verify spread before execution catches up.
        let pool = WorkerPool::start(
            Arc::clone(&ctx),
            PoolOptions {
                workers: 4,
                local_queue_cap: 2,
                ..PoolOptions::default()
            },
        );
        pool.submit((0..8).map(|i| request(&format!("t{}", i))).collect());

        for _ in 0..8 {
            let result = rx.recv().await.unwrap();
            assert_eq!(result.status, ActionStatus::Success);
        }
        pool.shutdown().await;
    }
}
