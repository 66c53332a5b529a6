// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Per-worker work deque.
//!
//! The owner pushes and pops at the tail; thieves — sibling workers and the
//! peer steal engine — take from the head, which keeps contention off the
//! owner's hot end. A mutex-guarded `VecDeque` implements the discipline;
//! the ends-and-ownership contract is what matters, not lock freedom.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::model::ActionRequest;

#[derive(Debug, Default)]
pub struct WorkDeque {
    inner: Mutex<VecDeque<ActionRequest>>,
}

impl WorkDeque {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner-side push to the tail.
    pub fn push(&self, request: ActionRequest) {
        self.inner
            .lock()
            .expect("deque lock poisoned")
            .push_back(request);
    }

    /// Owner-side pop from the tail (LIFO keeps the owner's working set
    /// warm).
    pub fn pop(&self) -> Option<ActionRequest> {
        self.inner.lock().expect("deque lock poisoned").pop_back()
    }

    /// Thief-side removal from the head. Only the head element is
    /// considered; if it does not meet `min_priority` the steal comes back
    /// empty rather than scanning the queue.
    pub fn steal_head(&self, min_priority: u32) -> Option<ActionRequest> {
        let mut inner = self.inner.lock().expect("deque lock poisoned");
        if inner.front()?.priority < min_priority {
            return None;
        }
        inner.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("deque lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owner-side drain, used when a cancelled worker must account for
    /// everything still queued.
    pub fn drain(&self) -> Vec<ActionRequest> {
        self.inner
            .lock()
            .expect("deque lock poisoned")
            .drain(..)
            .collect()
    }
}
