// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::llm::LlmResult;
use crate::pipeline::{mutator_fn, PipelinePoint, Registration};
use crate::test_helpers::{echo_tool, ScriptedLlm};
use hive_core::{
    AgentEvent, EventSource, FakeClock, FinishReason, SequentialIdGen, ToolCall, ToolCatalogItem,
    ToolSource,
};
use serde_json::json;

fn instance_with(llm: Arc<ScriptedLlm>) -> Arc<AgentInstance> {
    AgentInstance::new(
        AgentInstanceConfig {
            agent_name: "planner".to_string(),
            instance_key: "default".to_string(),
            policy: TurnPolicy::default(),
        },
        llm,
        Arc::new(FakeClock::new()),
        Arc::new(SequentialIdGen::new()),
    )
}

fn event(id: &str, input: &str) -> AgentEvent {
    AgentEvent::message(id, EventSource::connector("cli"), input, 0)
}

#[tokio::test]
async fn process_next_returns_none_on_empty_queue() {
    let instance = instance_with(ScriptedLlm::new());
    assert!(instance.process_next().await.is_none());
}

#[tokio::test]
async fn events_process_in_enqueue_order() {
    let llm = ScriptedLlm::new();
    llm.push(LlmResult::text_only("first answer"));
    llm.push(LlmResult::text_only("second answer"));
    let instance = instance_with(llm);

    instance.enqueue(event("e1", "first"));
    instance.enqueue(event("e2", "second"));

    let first = instance.process_next().await.map(|o| o.turn.input_event.id);
    let second = instance.process_next().await.map(|o| o.turn.input_event.id);
    assert_eq!(first, Some("e1".into()));
    assert_eq!(second, Some("e2".into()));
}

#[tokio::test]
async fn conversation_accumulates_across_turns() {
    let llm = ScriptedLlm::new();
    llm.push(LlmResult::text_only("a"));
    llm.push(LlmResult::text_only("b"));
    let instance = instance_with(llm);

    instance.enqueue(event("e1", "one"));
    instance.process_next().await;
    instance.enqueue(event("e2", "two"));
    instance.process_next().await;

    // Two user + two assistant messages, all folded to base.
    let messages = instance.conversation_snapshot().await;
    assert_eq!(messages.len(), 4);
}

#[tokio::test]
async fn run_loop_drains_and_reports_outcomes() {
    let llm = ScriptedLlm::new();
    llm.push(LlmResult::text_only("ok"));
    let instance = instance_with(llm);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let worker = {
        let instance = Arc::clone(&instance);
        tokio::spawn(async move { instance.run_loop(tx).await })
    };

    instance.enqueue(event("e1", "ping"));
    let outcome = rx.recv().await;
    assert_eq!(
        outcome.map(|o| o.result.finish_reason),
        Some(FinishReason::TextResponse)
    );

    worker.abort();
}

#[tokio::test]
async fn extension_api_registers_tools_with_stamped_source() {
    let instance = instance_with(ScriptedLlm::new());
    instance.load_extension("my-ext", |api| {
        api.register_tool(ToolCatalogItem::new("ext.tool"), echo_tool());
    });

    let catalog = instance.tools().catalog();
    assert_eq!(catalog.len(), 1);
    assert_eq!(
        catalog[0].source,
        Some(ToolSource::Extension {
            extension_name: "my-ext".to_string()
        })
    );
}

#[tokio::test]
async fn extension_pipeline_registrations_take_effect() {
    let llm = ScriptedLlm::new();
    llm.push(LlmResult::with_tool_calls(vec![ToolCall::new(
        "call-1",
        "ext.tool",
        json!({}),
    )]));
    llm.push(LlmResult::text_only("done"));
    let instance = instance_with(llm);

    instance.load_extension("my-ext", |api| {
        api.register_tool(ToolCatalogItem::new("ext.tool"), echo_tool());
        api.register_mutator(
            PipelinePoint::TurnPre,
            mutator_fn(|ctx| Ok(ctx)),
            Registration::default().with_id("my-ext.noop"),
        )
        .unwrap();
    });

    instance.enqueue(event("e1", "use the tool"));
    let outcome = instance.process_next().await.map(|o| o.result.finish_reason);
    assert_eq!(outcome, Some(FinishReason::TextResponse));
}

#[tokio::test]
async fn registries_are_instance_scoped() {
    let a = instance_with(ScriptedLlm::new());
    let b = instance_with(ScriptedLlm::new());

    a.tools().register(ToolCatalogItem::new("only.a"), echo_tool());

    assert!(a.tools().contains("only.a"));
    assert!(!b.tools().contains("only.a"));
}

#[tokio::test]
async fn interrupt_terminates_next_turn() {
    let instance = instance_with(ScriptedLlm::new());
    instance.interrupt();
    instance.enqueue(event("e1", "hi"));

    let outcome = instance.process_next().await;
    assert_eq!(
        outcome.map(|o| o.turn.status),
        Some(hive_core::TurnStatus::Interrupted)
    );
}
