// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::llm::LlmResult;
use crate::pipeline::{mutator_fn, Registration};
use crate::test_helpers::{echo_tool, ScriptedLlm};
use hive_core::{EventSource, FakeClock, Role, SequentialIdGen, ToolCall, ToolCatalogItem};
use serde_json::json;

struct Fixture {
    runner: TurnRunner,
    llm: Arc<ScriptedLlm>,
    pipeline: Arc<PipelineRegistry>,
    tools: Arc<ToolRegistry>,
    clock: FakeClock,
}

fn fixture() -> Fixture {
    let pipeline = Arc::new(PipelineRegistry::new());
    let tools = Arc::new(ToolRegistry::new());
    let llm = ScriptedLlm::new();
    let clock = FakeClock::new();
    let runner = TurnRunner::new(
        Arc::clone(&pipeline),
        Arc::clone(&tools),
        llm.clone(),
        Arc::new(clock.clone()),
        Arc::new(SequentialIdGen::new()),
    );
    Fixture {
        runner,
        llm,
        pipeline,
        tools,
        clock,
    }
}

fn event(input: &str) -> AgentEvent {
    AgentEvent::message("evt-1", EventSource::connector("cli"), input, 0)
}

async fn run_turn(fixture: &Fixture, policy: &TurnPolicy, input: &str) -> (TurnOutcome, ConversationState) {
    let mut conversation = ConversationState::default();
    let interrupt = AtomicBool::new(false);
    let outcome = fixture
        .runner
        .run(
            "planner",
            "default",
            policy,
            &mut conversation,
            event(input),
            &interrupt,
        )
        .await;
    (outcome, conversation)
}

#[tokio::test]
async fn text_only_turn_completes_in_one_step() {
    let fixture = fixture();
    fixture.llm.push(LlmResult::text_only("hello back"));

    let (outcome, conversation) = run_turn(&fixture, &TurnPolicy::default(), "hello").await;

    assert_eq!(outcome.turn.status, TurnStatus::Completed);
    assert_eq!(outcome.result.finish_reason, FinishReason::TextResponse);
    assert_eq!(
        outcome
            .result
            .response_message
            .as_ref()
            .and_then(|m| m.text()),
        Some("hello back")
    );
    assert_eq!(outcome.turn.steps.len(), 1);

    // Events were folded to base at the turn boundary.
    assert!(conversation.events().is_empty());
    assert_eq!(conversation.base_messages().len(), 2); // user + assistant
}

#[tokio::test]
async fn tool_round_then_text_completes_with_two_steps() {
    let fixture = fixture();
    fixture
        .tools
        .register(ToolCatalogItem::new("bash.exec"), echo_tool());
    fixture.llm.push(LlmResult::with_tool_calls(vec![ToolCall::new(
        "call-1",
        "bash.exec",
        json!({"command": "ls"}),
    )]));
    fixture.llm.push(LlmResult::text_only("two files found"));

    let (outcome, conversation) = run_turn(&fixture, &TurnPolicy::default(), "list files").await;

    assert_eq!(outcome.turn.status, TurnStatus::Completed);
    assert_eq!(outcome.result.finish_reason, FinishReason::TextResponse);
    assert_eq!(outcome.turn.steps.len(), 2);

    // user, assistant(tool call), tool result, assistant(final).
    let roles: Vec<Role> = conversation
        .base_messages()
        .iter()
        .map(|m| m.data.role)
        .collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
}

#[tokio::test]
async fn step_limit_substitutes_synthesized_message() {
    let fixture = fixture();
    fixture
        .tools
        .register(ToolCatalogItem::new("loop.tool"), echo_tool());
    // The model never stops calling tools.
    for i in 0..4 {
        fixture.llm.push(LlmResult::with_tool_calls(vec![ToolCall::new(
            format!("call-{i}"),
            "loop.tool",
            json!({}),
        )]));
    }
    let policy = TurnPolicy::default().with_max_steps(3);

    let (outcome, _) = run_turn(&fixture, &policy, "go").await;

    assert_eq!(outcome.turn.status, TurnStatus::Completed);
    assert_eq!(outcome.result.finish_reason, FinishReason::MaxSteps);
    assert_eq!(outcome.turn.steps.len(), 3);
    let text = outcome
        .result
        .response_message
        .and_then(|m| m.text().map(str::to_string))
        .unwrap_or_default();
    assert!(text.contains("Step limit reached"));
    assert_eq!(
        outcome.turn.metadata.get("step_limit_reached"),
        Some(&json!(true))
    );
}

#[tokio::test]
async fn step_limit_names_missing_required_tools() {
    let fixture = fixture();
    fixture
        .tools
        .register(ToolCatalogItem::new("loop.tool"), echo_tool());
    for i in 0..3 {
        fixture.llm.push(LlmResult::with_tool_calls(vec![ToolCall::new(
            format!("call-{i}"),
            "loop.tool",
            json!({}),
        )]));
    }
    let policy = TurnPolicy::default()
        .with_max_steps(3)
        .with_required_tools(["bash.exec"]);

    let (outcome, _) = run_turn(&fixture, &policy, "go").await;

    let text = outcome
        .result
        .response_message
        .and_then(|m| m.text().map(str::to_string))
        .unwrap_or_default();
    assert!(text.contains("bash.exec"), "message must name the missing tool: {text}");
}

#[tokio::test]
async fn satisfied_required_tools_are_not_named() {
    let fixture = fixture();
    fixture
        .tools
        .register(ToolCatalogItem::new("bash.exec"), echo_tool());
    for i in 0..3 {
        fixture.llm.push(LlmResult::with_tool_calls(vec![ToolCall::new(
            format!("call-{i}"),
            "bash.exec",
            json!({}),
        )]));
    }
    let policy = TurnPolicy::default()
        .with_max_steps(3)
        .with_required_tools(["bash.exec"]);

    let (outcome, _) = run_turn(&fixture, &policy, "go").await;

    let text = outcome
        .result
        .response_message
        .and_then(|m| m.text().map(str::to_string))
        .unwrap_or_default();
    assert!(!text.contains("bash.exec"));
}

#[tokio::test]
async fn failing_step_fails_the_turn() {
    let fixture = fixture();
    fixture.llm.push_error("provider down");

    let (outcome, _) = run_turn(&fixture, &TurnPolicy::default(), "hi").await;

    assert_eq!(outcome.turn.status, TurnStatus::Failed);
    assert_eq!(outcome.result.finish_reason, FinishReason::Error);
    assert!(outcome.result.error.is_some());
    assert_eq!(outcome.turn.steps.len(), 1);
}

#[tokio::test]
async fn interrupt_flag_yields_interrupted_status() {
    let fixture = fixture();
    let mut conversation = ConversationState::default();
    let interrupt = AtomicBool::new(true);

    let outcome = fixture
        .runner
        .run(
            "planner",
            "default",
            &TurnPolicy::default(),
            &mut conversation,
            event("hi"),
            &interrupt,
        )
        .await;

    assert_eq!(outcome.turn.status, TurnStatus::Interrupted);
    assert!(outcome.turn.steps.is_empty());
}

#[tokio::test]
async fn expired_turn_deadline_interrupts_between_steps() {
    let fixture = fixture();
    fixture
        .tools
        .register(ToolCatalogItem::new("slow.tool"), echo_tool());
    let clock = fixture.clock.clone();
    fixture
        .pipeline
        .register_mutator(
            PipelinePoint::StepPost,
            mutator_fn(move |ctx| {
                clock.advance(std::time::Duration::from_millis(500));
                Ok(ctx)
            }),
            Registration::default(),
        )
        .unwrap();
    fixture.llm.push(LlmResult::with_tool_calls(vec![ToolCall::new(
        "call-1",
        "slow.tool",
        json!({}),
    )]));
    let policy = TurnPolicy {
        turn_timeout_ms: Some(200),
        ..TurnPolicy::default()
    };

    let (outcome, _) = run_turn(&fixture, &policy, "go").await;

    assert_eq!(outcome.turn.status, TurnStatus::Interrupted);
    assert_eq!(outcome.turn.steps.len(), 1);
}

#[tokio::test]
async fn turn_pre_mutator_failure_fails_the_turn_without_steps() {
    let fixture = fixture();
    fixture
        .pipeline
        .register_mutator(
            PipelinePoint::TurnPre,
            mutator_fn(|_| Err(crate::pipeline::HandlerError::from("bad extension"))),
            Registration::default(),
        )
        .unwrap();

    let (outcome, _) = run_turn(&fixture, &TurnPolicy::default(), "hi").await;

    assert_eq!(outcome.turn.status, TurnStatus::Failed);
    assert!(outcome.turn.steps.is_empty());
}

#[tokio::test]
async fn turn_post_runs_on_completion() {
    let fixture = fixture();
    fixture.llm.push(LlmResult::text_only("done"));
    let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    fixture
        .pipeline
        .register_mutator(
            PipelinePoint::TurnPost,
            mutator_fn(move |ctx| {
                flag.store(true, Ordering::SeqCst);
                Ok(ctx)
            }),
            Registration::default(),
        )
        .unwrap();

    let (outcome, _) = run_turn(&fixture, &TurnPolicy::default(), "hi").await;

    assert_eq!(outcome.turn.status, TurnStatus::Completed);
    assert!(ran.load(Ordering::SeqCst));
}
