// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn defaults() {
    let policy = TurnPolicy::default();
    assert_eq!(policy.max_steps_per_turn, 32);
    assert!(policy.required_tools.is_empty());
    assert_eq!(policy.error_message_limit, DEFAULT_ERROR_MESSAGE_LIMIT);
    assert!(policy.step_timeout_ms.is_none());
    assert!(policy.turn_timeout_ms.is_none());
}

#[test]
fn builders() {
    let policy = TurnPolicy::default()
        .with_max_steps(3)
        .with_required_tools(["bash.exec"]);
    assert_eq!(policy.max_steps_per_turn, 3);
    assert_eq!(policy.required_tools, vec!["bash.exec".to_string()]);
}

#[test]
fn serde_round_trip() {
    let policy = TurnPolicy::default().with_required_tools(["a", "b"]);
    let json = serde_json::to_string(&policy).unwrap();
    let parsed: TurnPolicy = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, policy);
}
