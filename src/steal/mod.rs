// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod engine;
mod registry;
mod strategy;

pub use engine::{
    DequeTransport, StealEngine, StealMetrics, StealRequest, StealResponse, StealSettings,
    StealTransport,
};
pub use registry::{PeerId, PeerRegistry, PeerState};
pub use strategy::{AdaptiveState, VictimStrategy, MIN_STEAL_DEPTH};
