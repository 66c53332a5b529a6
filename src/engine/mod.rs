// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod backoff;
mod deque;
mod pool;
mod scheduler;
mod worker;

#[cfg(test)]
mod integration_tests;

pub use backoff::retry_delay;
pub use deque::WorkDeque;
pub use pool::{PoolOptions, WorkerPool};
pub use scheduler::{default_concurrency, BuildReport, Scheduler, SchedulerOptions};
pub use worker::{
    plan_request, run_action, ProcessExecutor, WorkerContext, WorkspaceAdapter,
};
