// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod action_cache;
mod codec;
mod entry;
mod eviction;
mod object_store;

pub use action_cache::{ActionCache, CacheLimits, CacheStats, FlightGuard, SingleFlight};
pub use codec::{decode_entries, encode_entries};
pub use entry::{CacheEntry, OutputFile, SigningKey};
pub use eviction::{EvictionCandidate, EvictionPolicy, WeightedScorePolicy};
pub use object_store::ObjectStore;
