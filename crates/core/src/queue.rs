// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-instance event queue.
//!
//! FIFO, unbounded, no dedup; backpressure is the caller's job. Exactly
//! one consumer (the instance's turn loop) dequeues; producers may share
//! the queue via `clone()`. `dequeue` never blocks, which is what
//! guarantees no two turns for one instance run concurrently: the loop
//! polls explicitly and runs one turn to completion per dequeued event.

use crate::event::AgentEvent;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// FIFO buffer of pending input events for one agent instance.
#[derive(Clone, Default)]
pub struct AgentEventQueue {
    inner: Arc<Mutex<VecDeque<AgentEvent>>>,
}

impl AgentEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. Never blocks.
    pub fn enqueue(&self, event: AgentEvent) {
        self.inner.lock().push_back(event);
    }

    /// Take the oldest event, if any. Never blocks.
    pub fn dequeue(&self) -> Option<AgentEvent> {
        self.inner.lock().pop_front()
    }

    /// Immutable snapshot of the pending events, oldest first.
    pub fn peek(&self) -> Vec<AgentEvent> {
        self.inner.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
