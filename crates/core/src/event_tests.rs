// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn message_event_shape() {
    let event = AgentEvent::message("evt-1", EventSource::connector("slack"), "list files", 10);
    assert_eq!(event.event_type, "message");
    assert_eq!(event.input.as_deref(), Some("list files"));
    assert_eq!(event.source.kind, EventSourceKind::Connector);
    assert_eq!(event.created_at_epoch_ms, 10);
    assert!(event.reply_to.is_none());
}

#[test]
fn reply_to_builder() {
    let event = AgentEvent::message("evt-2", EventSource::agent("planner"), "plan", 0)
        .with_reply_to("planner", "corr-1");
    let reply_to = event.reply_to.unwrap();
    assert_eq!(reply_to.target, "planner");
    assert_eq!(reply_to.correlation_id, "corr-1");
}

#[test]
fn serde_round_trip() {
    let event = AgentEvent::message("evt-3", EventSource::runtime(), "tick", 5)
        .with_trace_id("trace-9");
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "message");
    assert_eq!(value["trace_id"], "trace-9");
    // Optional empty fields stay off the wire.
    assert!(value.get("reply_to").is_none());
    assert!(value.get("metadata").is_none());

    let parsed: AgentEvent = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, event);
}

#[test]
fn log_summary_names_source() {
    let event = AgentEvent::message("evt-4", EventSource::connector("telegram"), "hi", 0);
    assert_eq!(event.log_summary(), "message id=evt-4 source=connector:telegram");
}
