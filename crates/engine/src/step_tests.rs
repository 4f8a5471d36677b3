// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::pipeline::{mutator_fn, Registration};
use crate::test_helpers::{echo_tool, failing_tool, ScriptedLlm};
use crate::tools::ToolRegistry;
use hive_core::{
    ConversationState, FakeClock, Role, SequentialIdGen, ToolCatalogItem, ToolResultStatus,
    TurnPolicy,
};
use serde_json::json;

struct Fixture {
    runner: StepRunner,
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
    let runner = StepRunner::new(
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

fn scope() -> ExecutionScope {
    ExecutionScope {
        agent_name: "planner".to_string(),
        instance_key: "default".to_string(),
        turn_id: TurnId::new("turn-1"),
        trace_id: "trace-1".to_string(),
    }
}

async fn run_step(fixture: &Fixture, policy: &TurnPolicy, conversation: &mut ConversationState) -> StepRun {
    let sink = EventSink::new();
    fixture
        .runner
        .run(&scope(), policy, 0, conversation, &sink, None)
        .await
}

#[tokio::test]
async fn text_only_step_completes_without_tools() {
    let fixture = fixture();
    fixture.llm.push(LlmResult::text_only("all done"));
    let mut conversation = ConversationState::default();

    let run = run_step(&fixture, &TurnPolicy::default(), &mut conversation).await;

    assert!(run.error.is_none());
    assert_eq!(run.step.status, StepStatus::Completed);
    assert!(run.step.tool_calls.is_empty());
    assert_eq!(
        run.step.llm_result.as_ref().map(|l| l.text.as_str()),
        Some("all done")
    );

    // The assistant message landed in the conversation.
    let messages = conversation.next_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data.role, Role::Assistant);
}

#[tokio::test]
async fn tool_round_executes_and_appends_results() {
    let fixture = fixture();
    fixture
        .tools
        .register(ToolCatalogItem::new("bash.exec"), echo_tool());
    fixture.llm.push(LlmResult::with_tool_calls(vec![ToolCall::new(
        "call-1",
        "bash.exec",
        json!({"command": "ls"}),
    )]));
    let mut conversation = ConversationState::default();

    let run = run_step(&fixture, &TurnPolicy::default(), &mut conversation).await;

    assert!(run.error.is_none());
    assert_eq!(run.step.tool_results.len(), 1);
    assert_eq!(run.step.tool_results[0].status, ToolResultStatus::Ok);

    // assistant(tool_calls) then tool result message.
    let messages = conversation.next_messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].data.role, Role::Assistant);
    assert_eq!(messages[1].data.role, Role::Tool);
    assert_eq!(messages[1].answered_tool_call_id(), Some("call-1"));
}

#[tokio::test]
async fn catalog_snapshot_is_stored_on_the_step() {
    let fixture = fixture();
    fixture
        .tools
        .register(ToolCatalogItem::new("bash.exec"), echo_tool());
    fixture.llm.push(LlmResult::text_only("ok"));
    let mut conversation = ConversationState::default();

    let run = run_step(&fixture, &TurnPolicy::default(), &mut conversation).await;
    let names: Vec<&str> = run.step.tool_catalog.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["bash.exec"]);

    // The model saw the same catalog.
    assert_eq!(fixture.llm.calls()[0].tool_names, vec!["bash.exec"]);
}

#[tokio::test]
async fn step_tools_mutator_can_restrict_the_catalog() {
    let fixture = fixture();
    fixture
        .tools
        .register(ToolCatalogItem::new("bash.exec"), echo_tool());
    fixture
        .tools
        .register(ToolCatalogItem::new("fs.delete"), echo_tool());
    fixture
        .pipeline
        .register_mutator(
            PipelinePoint::StepTools,
            mutator_fn(|mut ctx| {
                ctx.tool_catalog.retain(|item| item.name != "fs.delete");
                Ok(ctx)
            }),
            Registration::default(),
        )
        .unwrap();
    // The model calls the tool that was filtered out of the catalog.
    fixture.llm.push(LlmResult::with_tool_calls(vec![ToolCall::new(
        "call-1",
        "fs.delete",
        json!({}),
    )]));
    let mut conversation = ConversationState::default();

    let run = run_step(&fixture, &TurnPolicy::default(), &mut conversation).await;

    assert!(run.error.is_none());
    let result = &run.step.tool_results[0];
    assert_eq!(result.status, ToolResultStatus::Error);
    assert_eq!(
        result.error.as_ref().and_then(|e| e.code.as_deref()),
        Some("E_TOOL_NOT_IN_CATALOG")
    );
}

#[tokio::test]
async fn concurrent_tool_calls_all_yield_results() {
    let fixture = fixture();
    fixture
        .tools
        .register(ToolCatalogItem::new("echo"), echo_tool());
    fixture
        .tools
        .register(ToolCatalogItem::new("broken"), failing_tool("kaput"));
    fixture.llm.push(LlmResult::with_tool_calls(vec![
        ToolCall::new("call-1", "echo", json!({"n": 1})),
        ToolCall::new("call-2", "broken", json!({})),
        ToolCall::new("call-3", "echo", json!({"n": 3})),
    ]));
    let mut conversation = ConversationState::default();

    let run = run_step(&fixture, &TurnPolicy::default(), &mut conversation).await;

    assert!(run.error.is_none());
    assert_eq!(run.step.tool_results.len(), 3);

    // A failing sibling cancelled nothing; results key by call id.
    let by_id = |id: &str| {
        run.step
            .tool_results
            .iter()
            .find(|r| r.tool_call_id == *id)
            .map(|r| r.status)
    };
    assert_eq!(by_id("call-1"), Some(ToolResultStatus::Ok));
    assert_eq!(by_id("call-2"), Some(ToolResultStatus::Error));
    assert_eq!(by_id("call-3"), Some(ToolResultStatus::Ok));
}

#[tokio::test]
async fn pipeline_handler_error_fails_the_step() {
    let fixture = fixture();
    fixture
        .pipeline
        .register_mutator(
            PipelinePoint::StepBlocks,
            mutator_fn(|_| Err(crate::pipeline::HandlerError::from("extension bug"))),
            Registration::default(),
        )
        .unwrap();
    let mut conversation = ConversationState::default();

    let run = run_step(&fixture, &TurnPolicy::default(), &mut conversation).await;

    assert_eq!(run.step.status, StepStatus::Failed);
    assert!(matches!(run.error, Some(EngineError::Pipeline(_))));
}

#[tokio::test]
async fn llm_error_without_retry_fails_the_step() {
    let fixture = fixture();
    fixture.llm.push_error("rate limited");
    let mut conversation = ConversationState::default();

    let run = run_step(&fixture, &TurnPolicy::default(), &mut conversation).await;

    assert_eq!(run.step.status, StepStatus::Failed);
    assert!(matches!(run.error, Some(EngineError::Llm(_))));
}

#[tokio::test]
async fn llm_error_handler_can_retry() {
    let fixture = fixture();
    fixture
        .pipeline
        .register_mutator(
            PipelinePoint::StepLlmError,
            mutator_fn(|mut ctx| {
                if let Some(state) = ctx.llm_error.as_mut() {
                    state.should_retry = true;
                }
                Ok(ctx)
            }),
            Registration::default(),
        )
        .unwrap();
    fixture.llm.push_error("transient");
    fixture.llm.push(LlmResult::text_only("recovered"));
    let mut conversation = ConversationState::default();

    let run = run_step(&fixture, &TurnPolicy::default(), &mut conversation).await;

    assert!(run.error.is_none());
    assert_eq!(
        run.step.llm_result.map(|l| l.text),
        Some("recovered".to_string())
    );
    assert_eq!(fixture.llm.calls().len(), 2);
}

#[tokio::test]
async fn llm_call_middleware_can_short_circuit_the_provider() {
    struct Cached;

    #[async_trait]
    impl crate::pipeline::Middleware for Cached {
        async fn wrap(
            &self,
            _ctx: PointContext,
            _next: crate::pipeline::Next<'_>,
        ) -> crate::pipeline::HandlerResult<MiddlewareOutput> {
            Ok(MiddlewareOutput::Llm(LlmResult::text_only("from cache")))
        }
    }

    let fixture = fixture();
    fixture
        .pipeline
        .register_middleware(
            PipelinePoint::StepLlmCall,
            Arc::new(Cached),
            Registration::default(),
        )
        .unwrap();
    let mut conversation = ConversationState::default();

    let run = run_step(&fixture, &TurnPolicy::default(), &mut conversation).await;

    assert!(run.error.is_none());
    assert_eq!(
        run.step.llm_result.map(|l| l.text),
        Some("from cache".to_string())
    );
    // The provider never ran.
    assert!(fixture.llm.calls().is_empty());
}

#[tokio::test]
async fn expired_step_deadline_fails_between_phases() {
    let fixture = fixture();
    let clock = fixture.clock.clone();
    fixture
        .pipeline
        .register_mutator(
            PipelinePoint::StepPre,
            mutator_fn(move |ctx| {
                // Spend more than the step timeout inside the first phase.
                clock.advance(std::time::Duration::from_millis(100));
                Ok(ctx)
            }),
            Registration::default(),
        )
        .unwrap();
    let policy = TurnPolicy {
        step_timeout_ms: Some(50),
        ..TurnPolicy::default()
    };
    let mut conversation = ConversationState::default();

    let run = run_step(&fixture, &policy, &mut conversation).await;

    assert_eq!(run.step.status, StepStatus::Failed);
    assert!(matches!(run.error, Some(EngineError::StepTimeout { .. })));
    // The model was never called.
    assert!(fixture.llm.calls().is_empty());
}

#[tokio::test]
async fn config_mutator_overrides_take_effect_within_the_step() {
    let fixture = fixture();
    fixture
        .pipeline
        .register_mutator(
            PipelinePoint::StepConfig,
            mutator_fn(|mut ctx| {
                ctx.policy.model = "overridden-model".to_string();
                Ok(ctx)
            }),
            Registration::default(),
        )
        .unwrap();
    fixture.llm.push(LlmResult::text_only("ok"));
    let mut conversation = ConversationState::default();

    run_step(&fixture, &TurnPolicy::default(), &mut conversation).await;

    assert_eq!(fixture.llm.calls()[0].model, "overridden-model");
}
