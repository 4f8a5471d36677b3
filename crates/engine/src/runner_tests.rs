// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::instance::{AgentInstance, AgentInstanceConfig};
use crate::llm::LlmResult;
use crate::test_helpers::ScriptedLlm;
use hive_core::{FakeClock, SequentialIdGen, TurnPolicy};
use serde_json::json;

fn spawn_runner(llm: Arc<ScriptedLlm>) -> (ChannelIpcEndpoint, tokio::task::JoinHandle<()>) {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
    let idgen: Arc<dyn IdGen> = Arc::new(SequentialIdGen::new());
    let instance = AgentInstance::new(
        AgentInstanceConfig {
            agent_name: "planner".to_string(),
            instance_key: "default".to_string(),
            policy: TurnPolicy::default(),
        },
        llm,
        Arc::clone(&clock),
        Arc::clone(&idgen),
    );

    let (orchestrator_side, agent_side) = channel_endpoint_pair();
    let runner = AgentRunner::new(instance, agent_side, clock, idgen);
    let handle = tokio::spawn(runner.run());
    (orchestrator_side, handle)
}

async fn recv_payload(endpoint: &mut ChannelIpcEndpoint) -> (IpcKind, serde_json::Value) {
    let message = endpoint.recv().await.expect("message");
    (message.kind, message.payload)
}

fn event_message(payload: serde_json::Value) -> IpcMessage {
    IpcMessage {
        kind: IpcKind::Event,
        from: "orchestrator".to_string(),
        to: "planner".to_string(),
        payload,
    }
}

#[tokio::test]
async fn runner_announces_readiness() {
    let (mut orch, handle) = spawn_runner(ScriptedLlm::new());

    let (kind, payload) = recv_payload(&mut orch).await;
    assert_eq!(kind, IpcKind::Event);
    assert_eq!(payload["type"], "agent_ready");
    assert_eq!(payload["agent_name"], "planner");
    assert_eq!(payload["instance_key"], "default");

    handle.abort();
}

#[tokio::test]
async fn event_runs_turn_and_reports_status() {
    let llm = ScriptedLlm::new();
    llm.push(LlmResult::text_only("done"));
    let (mut orch, handle) = spawn_runner(llm);

    // agent_ready
    recv_payload(&mut orch).await;

    orch.send(event_message(json!({
        "id": "evt-1",
        "type": "message",
        "input": "hello",
        "source": {"kind": "connector", "name": "cli"},
    })));

    let (_, processing) = recv_payload(&mut orch).await;
    assert_eq!(processing["type"], "agent_status");
    assert_eq!(processing["status"], "processing");

    let (_, idle) = recv_payload(&mut orch).await;
    assert_eq!(idle["status"], "idle");

    handle.abort();
}

#[tokio::test]
async fn request_event_gets_correlated_response() {
    let llm = ScriptedLlm::new();
    llm.push(LlmResult::text_only("the answer"));
    let (mut orch, handle) = spawn_runner(llm);

    recv_payload(&mut orch).await; // agent_ready

    orch.send(event_message(json!({
        "id": "evt-1",
        "type": "request",
        "input": "question",
        "source": {"kind": "agent", "name": "asker"},
        "reply_to": {"target": "asker", "correlation_id": "corr-42"},
    })));

    // processing → response → idle
    recv_payload(&mut orch).await;
    let (_, response) = recv_payload(&mut orch).await;
    assert_eq!(response["type"], "response");
    assert_eq!(response["input"], "the answer");
    assert_eq!(response["metadata"]["in_reply_to"], "corr-42");
    let (_, idle) = recv_payload(&mut orch).await;
    assert_eq!(idle["status"], "idle");

    handle.abort();
}

#[tokio::test]
async fn malformed_event_payload_is_dropped() {
    let (mut orch, handle) = spawn_runner(ScriptedLlm::new());
    recv_payload(&mut orch).await; // agent_ready

    // Payload is not an object; dropped without any status traffic.
    orch.send(IpcMessage {
        kind: IpcKind::Event,
        from: "orchestrator".to_string(),
        to: "planner".to_string(),
        payload: json!("garbage"),
    });

    // A well-formed follow-up still works, proving the runner survived.
    orch.send(event_message(json!({
        "id": "evt-2",
        "type": "message",
        "input": "hi",
        "source": {"kind": "connector", "name": "cli"},
    })));
    let (_, payload) = recv_payload(&mut orch).await;
    assert_eq!(payload["type"], "agent_status");

    handle.abort();
}

#[tokio::test]
async fn shutdown_is_acked_and_runner_exits() {
    let (mut orch, handle) = spawn_runner(ScriptedLlm::new());
    recv_payload(&mut orch).await; // agent_ready

    orch.send(IpcMessage {
        kind: IpcKind::Shutdown,
        from: "orchestrator".to_string(),
        to: "planner".to_string(),
        payload: json!({"grace_period_ms": 1000, "reason": "orchestrator_shutdown"}),
    });

    let ack = orch.recv().await.expect("ack");
    assert_eq!(ack.kind, IpcKind::ShutdownAck);
    assert_eq!(ack.payload_instance_key(), Some("default"));

    // The runner task ends on its own.
    handle.await.expect("runner exits cleanly");
}

#[tokio::test]
async fn shutdown_after_event_acks_only_after_turn_finishes() {
    let llm = ScriptedLlm::new();
    llm.push(LlmResult::text_only("finished"));
    let (mut orch, handle) = spawn_runner(llm);
    recv_payload(&mut orch).await; // agent_ready

    orch.send(event_message(json!({
        "id": "evt-1",
        "type": "message",
        "input": "work",
        "source": {"kind": "connector", "name": "cli"},
    })));
    orch.send(IpcMessage {
        kind: IpcKind::Shutdown,
        from: "orchestrator".to_string(),
        to: "planner".to_string(),
        payload: json!({"grace_period_ms": 1000, "reason": "orchestrator_shutdown"}),
    });

    // The full turn's status traffic precedes the ack.
    let (_, processing) = recv_payload(&mut orch).await;
    assert_eq!(processing["status"], "processing");
    let (_, idle) = recv_payload(&mut orch).await;
    assert_eq!(idle["status"], "idle");

    let ack = orch.recv().await.expect("ack");
    assert_eq!(ack.kind, IpcKind::ShutdownAck);

    handle.await.expect("runner exits cleanly");
}
