// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod dependency_graph;
mod node;

pub use dependency_graph::{DependencyGraph, NodeId};
pub use node::{BuildNode, BuildStatus};
