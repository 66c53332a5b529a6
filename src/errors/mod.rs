// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod cache;
mod exec;
mod graph;
mod net;
mod parse;
mod validation;

pub use cache::CacheError;
pub use exec::{ExecutionError, FailurePolicy, SecurityError};
pub use graph::GraphError;
pub use net::NetworkError;
pub use parse::ParseError;
pub use validation::ValidationError;

use thiserror::Error;

/// Umbrella error for fallible core operations.
///
/// Every subsystem error converts into this via `#[from]`, so `?` carries
/// failures unchanged up to the scheduler's aggregator. The aggregator is
/// the only place that interprets them (per the configured failure policy);
/// nothing below it swallows an error.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}
