// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::event::EventSource;

fn event(id: &str) -> AgentEvent {
    AgentEvent::message(id, EventSource::connector("cli"), "input", 0)
}

#[test]
fn fifo_order() {
    let queue = AgentEventQueue::new();
    queue.enqueue(event("e1"));
    queue.enqueue(event("e2"));
    queue.enqueue(event("e3"));

    assert_eq!(queue.dequeue().map(|e| e.id), Some("e1".into()));
    assert_eq!(queue.dequeue().map(|e| e.id), Some("e2".into()));
    assert_eq!(queue.dequeue().map(|e| e.id), Some("e3".into()));
}

#[test]
fn dequeue_on_empty_is_none() {
    let queue = AgentEventQueue::new();
    assert!(queue.dequeue().is_none());
}

#[test]
fn events_are_consumed_exactly_once() {
    let queue = AgentEventQueue::new();
    queue.enqueue(event("e1"));
    assert!(queue.dequeue().is_some());
    assert!(queue.dequeue().is_none());
}

#[test]
fn peek_is_a_snapshot() {
    let queue = AgentEventQueue::new();
    queue.enqueue(event("e1"));
    queue.enqueue(event("e2"));

    let snapshot = queue.peek();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].id, "e1");

    // Peeking consumed nothing.
    assert_eq!(queue.len(), 2);
}

#[test]
fn no_dedup() {
    let queue = AgentEventQueue::new();
    queue.enqueue(event("same"));
    queue.enqueue(event("same"));
    assert_eq!(queue.len(), 2);
}

#[test]
fn clones_share_the_buffer() {
    let queue = AgentEventQueue::new();
    let producer = queue.clone();
    producer.enqueue(event("e1"));
    assert_eq!(queue.dequeue().map(|e| e.id), Some("e1".into()));
}
