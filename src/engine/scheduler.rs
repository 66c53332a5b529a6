// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The wave-driving scheduler.
//!
//! The loop is the classic ready-set drive: claim every node whose
//! dependencies are satisfied, mark it running, hand its request to the
//! worker pool, and fold finished results back into node statuses until
//! the graph is terminal. Failure policy decides whether the first failure
//! cancels the run or independent branches keep going; transient failures
//! are re-queued with exponential backoff and jitter up to the retry
//! budget.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::ActionCache;
use crate::engine::backoff::retry_delay;
use crate::engine::pool::{PoolOptions, WorkerPool};
use crate::engine::worker::{plan_request, ProcessExecutor, WorkerContext};
use crate::errors::{BuildError, FailurePolicy};
use crate::graph::{BuildStatus, DependencyGraph, NodeId};
use crate::hash::{Digest, FileHasher};
use crate::model::{ActionRequest, ActionResult, ActionStatus, FailureKind, TargetId};
use crate::observability::messages::engine::{
    BuildCompleted, BuildStarted, DependentsSkipped, RetryScheduled,
};
use crate::observability::messages::worker::ActionFailed;
use crate::observability::messages::StructuredLog;
use crate::steal::StealSettings;
use crate::traits::{ActionExecutor, ChannelSink};

/// Default worker count: one per logical CPU, falling back to 4 when the
/// parallelism cannot be determined.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub max_workers: usize,
    /// Concurrent actions a single worker may have in flight.
    pub actions_per_worker: usize,
    /// Soft cap on each worker's local queue.
    pub local_queue_cap: usize,
    pub failure_policy: FailurePolicy,
    pub max_retry_attempts: u32,
    pub retry_backoff_base: Duration,
    /// Wall-clock deadline per external command.
    pub action_timeout: Duration,
    /// Grace between terminate and kill.
    pub kill_grace: Duration,
    pub steal: Option<StealSettings>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_workers: default_concurrency(),
            actions_per_worker: 1,
            local_queue_cap: 256,
            failure_policy: FailurePolicy::default(),
            max_retry_attempts: 2,
            retry_backoff_base: Duration::from_millis(100),
            action_timeout: Duration::from_secs(300),
            kill_grace: Duration::from_secs(5),
            steal: None,
        }
    }
}

/// Aggregated outcome of one scheduler run.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub built: Vec<TargetId>,
    pub cached: Vec<TargetId>,
    pub failed: Vec<(TargetId, String)>,
    pub skipped: Vec<TargetId>,
    pub duration: Duration,
}

impl BuildReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Scheduler {
    graph: Arc<DependencyGraph>,
    workspace_root: PathBuf,
    cache: Arc<ActionCache>,
    hasher: Arc<FileHasher>,
    env: BTreeMap<String, String>,
    options: SchedulerOptions,
    executor: Arc<dyn ActionExecutor>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        graph: Arc<DependencyGraph>,
        workspace_root: impl Into<PathBuf>,
        cache: Arc<ActionCache>,
        env: BTreeMap<String, String>,
        options: SchedulerOptions,
    ) -> Self {
        let workspace_root = workspace_root.into();
        let executor = Arc::new(ProcessExecutor {
            workspace_root: workspace_root.clone(),
            timeout: options.action_timeout,
            grace: options.kill_grace,
        });
        Self {
            graph,
            workspace_root,
            cache,
            hasher: Arc::new(FileHasher::new()),
            env,
            options,
            executor,
            cancel: CancellationToken::new(),
        }
    }

    /// Substitute the action executor; tests inject stubs here.
    pub fn with_executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Share a fingerprinter across runs so incremental builds reuse
    /// content hashes for files whose metadata probe is unchanged.
    pub fn with_hasher(mut self, hasher: Arc<FileHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Handle for cooperative cancellation from outside the run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The session fingerprinter; exposed so callers can observe hash
    /// reuse across incremental runs.
    pub fn hasher(&self) -> &Arc<FileHasher> {
        &self.hasher
    }

    /// Drive the graph to a terminal state and aggregate the outcome.
    pub async fn run(&self) -> Result<BuildReport, BuildError> {
        let started = Instant::now();

        // Also proves the graph acyclic before anything runs.
        let order = self.graph.topological_order()?;
        let ranks: HashMap<NodeId, u32> = order
            .iter()
            .enumerate()
            .map(|(rank, id)| (*id, rank as u32))
            .collect();

        BuildStarted {
            target_count: self.graph.len(),
            workers: self.options.max_workers,
        }
        .log();

        let (tx, mut rx) = mpsc::channel::<ActionResult>(self.graph.len().max(64));
        let ctx = Arc::new(WorkerContext {
            workspace_root: self.workspace_root.clone(),
            scratch_dir: self.workspace_root.join(".sawmill").join("scratch"),
            cache: Arc::clone(&self.cache),
            hasher: Arc::clone(&self.hasher),
            executor: Arc::clone(&self.executor),
            sink: Arc::new(ChannelSink::new(tx)),
            cancel: self.cancel.clone(),
        });
        let pool = WorkerPool::start(
            Arc::clone(&ctx),
            PoolOptions {
                workers: self.options.max_workers,
                actions_per_worker: self.options.actions_per_worker,
                local_queue_cap: self.options.local_queue_cap,
                steal: self.options.steal.clone(),
            },
        );

        let mut outstanding: HashMap<TargetId, NodeId> = HashMap::new();
        let mut dep_hash: HashMap<NodeId, Digest> = HashMap::new();
        let mut report = BuildReport::default();

        loop {
            if !self.cancel.is_cancelled() {
                let ready = self.graph.ready_nodes();
                if !ready.is_empty() {
                    let mut batch = Vec::with_capacity(ready.len());
                    for node_id in ready {
                        self.graph.mark(node_id, BuildStatus::Running)?;
                        let request = self.plan_node(node_id, &ranks, &dep_hash)?;
                        outstanding.insert(request.target_id.clone(), node_id);
                        batch.push(request);
                    }
                    pool.submit(batch);
                }
            }

            if outstanding.is_empty() {
                break;
            }
            let Some(result) = rx.recv().await else { break };
            let Some(node_id) = outstanding.remove(&result.id.target_id) else {
                continue;
            };

            match result.status {
                ActionStatus::Success => {
                    self.graph.mark(node_id, BuildStatus::Built)?;
                    dep_hash.insert(node_id, result.output_hash());
                    report.built.push(result.id.target_id.clone());
                }
                ActionStatus::Cached => {
                    self.graph.mark(node_id, BuildStatus::Cached)?;
                    dep_hash.insert(node_id, result.output_hash());
                    report.cached.push(result.id.target_id.clone());
                }
                ActionStatus::Cancelled => {
                    self.graph.mark(node_id, BuildStatus::Failed)?;
                    report
                        .failed
                        .push((result.id.target_id.clone(), "cancelled".to_string()));
                }
                ActionStatus::Error | ActionStatus::Timeout => {
                    let failure = result.failure.clone().unwrap_or(match result.status {
                        ActionStatus::Timeout => FailureKind::Timeout,
                        _ => FailureKind::Internal("unclassified failure".to_string()),
                    });
                    let node = self.graph.node(node_id);
                    let retryable = failure.is_transient()
                        && node.retry_attempts() < self.options.max_retry_attempts
                        && !self.cancel.is_cancelled();

                    if retryable {
                        let attempt = node.record_retry();
                        let delay = retry_delay(self.options.retry_backoff_base, attempt - 1);
                        RetryScheduled {
                            target: &result.id.target_id.to_string(),
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                        }
                        .log();
                        let request = self.plan_node(node_id, &ranks, &dep_hash)?;
                        outstanding.insert(request.target_id.clone(), node_id);
                        let pool = Arc::clone(&pool);
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            pool.submit(vec![request]);
                        });
                    } else {
                        self.graph.mark(node_id, BuildStatus::Failed)?;
                        let stderr_tail = String::from_utf8_lossy(&result.stderr)
                            .chars()
                            .take(512)
                            .collect::<String>();
                        let cause = if stderr_tail.is_empty() {
                            failure.to_string()
                        } else {
                            format!("{}: {}", failure, stderr_tail.trim_end())
                        };
                        ActionFailed {
                            target: &result.id.target_id.to_string(),
                            cause: &cause,
                            transient: failure.is_transient(),
                        }
                        .log();
                        report.failed.push((result.id.target_id.clone(), cause));

                        let skipped = self.skip_dependents(node_id, &mut report);
                        if skipped > 0 {
                            DependentsSkipped {
                                failed_target: &result.id.target_id.to_string(),
                                skipped,
                            }
                            .log();
                        }
                        if self.options.failure_policy == FailurePolicy::FailFast {
                            self.cancel.cancel();
                        }
                    }
                }
            }
        }

        // Whatever never became schedulable — cancelled run, or keep-going
        // with a failed upstream — is skipped, not silently dropped.
        for node_id in self.graph.node_ids() {
            let status = self.graph.node(node_id).status();
            if matches!(status, BuildStatus::Pending | BuildStatus::Ready)
                && self.graph.mark(node_id, BuildStatus::Skipped).is_ok()
            {
                report.skipped.push(self.graph.node(node_id).target.id.clone());
            }
        }

        pool.shutdown().await;
        self.cache.flush()?;
        report.duration = started.elapsed();

        BuildCompleted {
            built: report.built.len(),
            cached: report.cached.len(),
            failed: report.failed.len(),
            skipped: report.skipped.len(),
            duration: report.duration,
        }
        .log();
        Ok(report)
    }

    fn plan_node(
        &self,
        node_id: NodeId,
        ranks: &HashMap<NodeId, u32>,
        dep_hash: &HashMap<NodeId, Digest>,
    ) -> Result<ActionRequest, BuildError> {
        let node = self.graph.node(node_id);
        let mut dep_ids: Vec<NodeId> = self.graph.dependencies(node_id).collect();
        dep_ids.sort_by(|a, b| {
            self.graph
                .node(*a)
                .target
                .id
                .cmp(&self.graph.node(*b).target.id)
        });
        let dep_hashes: Vec<Digest> = dep_ids
            .iter()
            .map(|dep| dep_hash.get(dep).copied().unwrap_or(Digest::ZERO))
            .collect();
        plan_request(
            &node.target,
            &self.env,
            dep_hashes,
            ranks.get(&node_id).copied().unwrap_or(0),
        )
    }

    /// Transitively skip everything downstream of a failed node. Only
    /// unstarted nodes move; running or terminal nodes are left alone.
    fn skip_dependents(&self, from: NodeId, report: &mut BuildReport) -> usize {
        let mut stack: Vec<NodeId> = self.graph.dependents(from).collect();
        let mut count = 0;
        while let Some(node_id) = stack.pop() {
            let status = self.graph.node(node_id).status();
            if matches!(status, BuildStatus::Pending | BuildStatus::Ready)
                && self.graph.mark(node_id, BuildStatus::Skipped).is_ok()
            {
                report.skipped.push(self.graph.node(node_id).target.id.clone());
                count += 1;
                stack.extend(self.graph.dependents(node_id));
            }
        }
        count
    }
}
