// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turn execution.
//!
//! One turn per dequeued event. The bounded step loop stops on terminal
//! text with no tool calls, on the step limit (substituting a synthesized
//! response), or on an unrecoverable step failure. Events staged during
//! the turn are folded into the conversation base exactly once at the
//! turn boundary.

use crate::error::EngineError;
use crate::llm::LlmCaller;
use crate::pipeline::{EventSink, PipelinePoint, PipelineRegistry, PointContext};
use crate::step::{ExecutionScope, StepRunner};
use crate::tools::ToolRegistry;
use hive_core::{
    AgentEvent, Clock, ConversationState, FinishReason, IdGen, Message, MessageEvent, Turn,
    TurnId, TurnPolicy, TurnResult, TurnStatus,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A finished turn plus the result surfaced to the caller.
pub struct TurnOutcome {
    pub turn: Turn,
    pub result: TurnResult,
}

enum LoopExit {
    Completed(Message),
    MaxSteps(Message),
    Failed(String),
    Interrupted(String),
}

/// Drives turns: one per input event, one at a time.
pub struct TurnRunner {
    steps: StepRunner,
    pipeline: Arc<PipelineRegistry>,
    clock: Arc<dyn Clock>,
    idgen: Arc<dyn IdGen>,
}

impl TurnRunner {
    pub fn new(
        pipeline: Arc<PipelineRegistry>,
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn LlmCaller>,
        clock: Arc<dyn Clock>,
        idgen: Arc<dyn IdGen>,
    ) -> Self {
        let steps = StepRunner::new(
            Arc::clone(&pipeline),
            tools,
            llm,
            Arc::clone(&clock),
            Arc::clone(&idgen),
        );
        Self {
            steps,
            pipeline,
            clock,
            idgen,
        }
    }

    /// Run one turn to a terminal status. Never panics; failures land in
    /// the returned result.
    pub async fn run(
        &self,
        agent_name: &str,
        instance_key: &str,
        policy: &TurnPolicy,
        conversation: &mut ConversationState,
        event: AgentEvent,
        interrupt: &AtomicBool,
    ) -> TurnOutcome {
        let turn_id = TurnId::new(self.idgen.next("turn"));
        let trace_id = event
            .trace_id
            .clone()
            .unwrap_or_else(|| self.idgen.next("trace"));
        let mut turn = Turn::new(
            turn_id.clone(),
            agent_name,
            event.clone(),
            self.clock.epoch_ms(),
        );

        tracing::info!(
            turn_id = %turn_id,
            agent = agent_name,
            event = %event.log_summary(),
            "turn started"
        );

        let scope = ExecutionScope {
            agent_name: agent_name.to_string(),
            instance_key: instance_key.to_string(),
            turn_id: turn_id.clone(),
            trace_id: trace_id.clone(),
        };
        let sink = EventSink::new();
        let deadline = policy
            .turn_timeout_ms
            .map(|ms| self.clock.now() + Duration::from_millis(ms));

        turn.status = TurnStatus::Running;

        if let Some(input) = &event.input {
            conversation.emit(MessageEvent::Append {
                message: Message::user(self.idgen.next("msg"), input, self.clock.epoch_ms()),
            });
        }

        // turn.pre
        let pre_ctx = PointContext::new(
            scope.agent_name.clone(),
            scope.instance_key.clone(),
            turn_id.clone(),
            trace_id.clone(),
            policy.clone(),
            sink.clone(),
        );
        if let Err(error) = self.pipeline.run_mutators(PipelinePoint::TurnPre, pre_ctx).await {
            absorb(conversation, &sink);
            return self.finish(
                turn,
                conversation,
                LoopExit::Failed(EngineError::from(error).to_string()),
            );
        }
        absorb(conversation, &sink);

        let mut called_ok: HashSet<String> = HashSet::new();
        let mut last_text = String::new();

        let exit = loop {
            if turn.steps.len() >= policy.max_steps_per_turn {
                break self.step_limit_exit(policy, &called_ok, conversation, &mut turn);
            }

            if interrupt.swap(false, Ordering::SeqCst) {
                break LoopExit::Interrupted("turn interrupted".to_string());
            }

            if deadline_exceeded(&*self.clock, deadline) {
                break LoopExit::Interrupted("turn deadline exceeded".to_string());
            }

            let run = self
                .steps
                .run(
                    &scope,
                    policy,
                    turn.steps.len(),
                    conversation,
                    &sink,
                    deadline,
                )
                .await;

            for result in &run.step.tool_results {
                if result.is_ok() {
                    called_ok.insert(result.tool_name.clone());
                }
            }
            if let Some(llm) = &run.step.llm_result {
                if !llm.text.is_empty() {
                    last_text = llm.text.clone();
                }
            }

            let requested_tools = !run.step.tool_calls.is_empty();
            let error = run.error;
            turn.steps.push(run.step);

            if let Some(error) = error {
                if error.is_interruption() {
                    break LoopExit::Interrupted(error.to_string());
                }
                break LoopExit::Failed(error.to_string());
            }

            if !requested_tools {
                // Terminal text, no pending tool calls.
                let message = Message::assistant(
                    self.idgen.next("msg"),
                    format!("{}-final", turn_id),
                    last_text.clone(),
                    Vec::new(),
                    self.clock.epoch_ms(),
                );
                break LoopExit::Completed(message);
            }
        };

        // turn.post runs on the successful paths only.
        let exit = match exit {
            LoopExit::Completed(_) | LoopExit::MaxSteps(_) => {
                let post_ctx = PointContext::new(
                    scope.agent_name.clone(),
                    scope.instance_key.clone(),
                    turn_id.clone(),
                    trace_id,
                    policy.clone(),
                    sink.clone(),
                );
                match self
                    .pipeline
                    .run_mutators(PipelinePoint::TurnPost, post_ctx)
                    .await
                {
                    Ok(_) => {
                        absorb(conversation, &sink);
                        exit
                    }
                    Err(error) => {
                        absorb(conversation, &sink);
                        LoopExit::Failed(EngineError::from(error).to_string())
                    }
                }
            }
            other => other,
        };

        self.finish(turn, conversation, exit)
    }

    fn step_limit_exit(
        &self,
        policy: &TurnPolicy,
        called_ok: &HashSet<String>,
        conversation: &mut ConversationState,
        turn: &mut Turn,
    ) -> LoopExit {
        let missing: Vec<&str> = policy
            .required_tools
            .iter()
            .filter(|tool| !called_ok.contains(*tool))
            .map(String::as_str)
            .collect();

        let mut text = format!(
            "Step limit reached: stopped after {} steps without a final response.",
            policy.max_steps_per_turn
        );
        if !missing.is_empty() {
            text.push_str(&format!(
                " Required tools were never successfully called: {}.",
                missing.join(", ")
            ));
        }

        let message = Message::assistant(
            self.idgen.next("msg"),
            format!("{}-step-limit", turn.id),
            text,
            Vec::new(),
            self.clock.epoch_ms(),
        );
        conversation.emit(MessageEvent::Append {
            message: message.clone(),
        });
        turn.metadata
            .insert("step_limit_reached".to_string(), json!(true));
        LoopExit::MaxSteps(message)
    }

    fn finish(
        &self,
        mut turn: Turn,
        conversation: &mut ConversationState,
        exit: LoopExit,
    ) -> TurnOutcome {
        let result = match exit {
            LoopExit::Completed(message) => {
                turn.status = TurnStatus::Completed;
                TurnResult {
                    turn_id: turn.id.clone(),
                    finish_reason: FinishReason::TextResponse,
                    response_message: Some(message),
                    error: None,
                }
            }
            LoopExit::MaxSteps(message) => {
                turn.status = TurnStatus::Completed;
                TurnResult {
                    turn_id: turn.id.clone(),
                    finish_reason: FinishReason::MaxSteps,
                    response_message: Some(message),
                    error: None,
                }
            }
            LoopExit::Failed(message) => {
                turn.status = TurnStatus::Failed;
                TurnResult {
                    turn_id: turn.id.clone(),
                    finish_reason: FinishReason::Error,
                    response_message: None,
                    error: Some(message),
                }
            }
            LoopExit::Interrupted(message) => {
                turn.status = TurnStatus::Interrupted;
                TurnResult {
                    turn_id: turn.id.clone(),
                    finish_reason: FinishReason::Error,
                    response_message: None,
                    error: Some(message),
                }
            }
        };

        turn.completed_at_epoch_ms = Some(self.clock.epoch_ms());

        // The one fold per turn boundary.
        conversation.fold_events_to_base();

        tracing::info!(
            turn_id = %turn.id,
            status = %turn.status,
            steps = turn.steps.len(),
            finish_reason = %result.finish_reason,
            "turn finished"
        );

        TurnOutcome { turn, result }
    }
}

fn deadline_exceeded(clock: &dyn Clock, deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| clock.now() > d)
}

fn absorb(conversation: &mut ConversationState, sink: &EventSink) {
    for event in sink.drain() {
        conversation.emit(event);
    }
}

#[cfg(test)]
#[path = "turn_tests.rs"]
mod tests;
