// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn event_envelope_round_trip() {
    let mut payload = JsonObject::new();
    payload.insert("input".to_string(), json!("hello"));
    let message = IpcMessage::event("slack", "planner", payload);

    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["type"], "event");
    assert_eq!(value["from"], "slack");
    assert_eq!(value["to"], "planner");

    let parsed = IpcMessage::from_value(value).unwrap();
    assert_eq!(parsed, message);
}

#[test]
fn shutdown_payload_shape() {
    let message = IpcMessage::shutdown(
        "orchestrator",
        "planner",
        &ShutdownPayload {
            grace_period_ms: 30_000,
            reason: ShutdownReason::Restart,
        },
    );
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["type"], "shutdown");
    assert_eq!(value["payload"]["grace_period_ms"], 30_000);
    assert_eq!(value["payload"]["reason"], "restart");
}

#[test]
fn shutdown_ack_carries_instance_key() {
    let message = IpcMessage::shutdown_ack("planner", "orchestrator", "default");
    assert_eq!(message.kind, IpcKind::ShutdownAck);
    assert_eq!(message.payload_instance_key(), Some("default"));
}

#[test]
fn non_object_payload_is_rejected() {
    let raw = json!({
        "type": "event",
        "from": "a",
        "to": "b",
        "payload": "not-an-object",
    });
    assert!(matches!(
        IpcMessage::from_value(raw),
        Err(ProtocolError::PayloadNotAnObject)
    ));
}

#[test]
fn malformed_envelope_is_rejected() {
    let raw = json!({ "type": "launch", "from": "a" });
    assert!(matches!(
        IpcMessage::from_value(raw),
        Err(ProtocolError::Malformed(_))
    ));
}
