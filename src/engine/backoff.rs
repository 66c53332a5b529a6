// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Retry backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Cap on the exponent so a misconfigured retry budget cannot overflow.
const MAX_SHIFT: u32 = 16;

/// Delay before retry number `attempt` (zero-based): `base · 2^attempt`
/// plus a uniform jitter of up to one `base`, so colliding retries from
/// parallel failures spread out instead of stampeding.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let exponential = base.saturating_mul(1u32 << attempt.min(MAX_SHIFT));
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64);
    exponential + Duration::from_millis(jitter_ms)
}
