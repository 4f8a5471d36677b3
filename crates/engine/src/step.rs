// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step execution.
//!
//! One step is one LLM call plus the tool round it requested, driven
//! through the pipeline points in a fixed phase order:
//! pre → config → tools → blocks → llmCall → toolExec → post.
//! Deadlines are checked between phases; all tool calls of one step run
//! concurrently and every one of them yields a result.

use crate::error::EngineError;
use crate::llm::{LlmCaller, LlmError, LlmResult};
use crate::pipeline::{
    CoreOperation, EventSink, HandlerError, HandlerResult, LlmErrorState, MiddlewareOutput,
    PipelineError, PipelinePoint, PipelineRegistry, PointContext,
};
use crate::tools::{not_in_catalog_result, ToolContext, ToolExecutionRequest, ToolExecutor, ToolRegistry};
use async_trait::async_trait;
use futures::future::join_all;
use hive_core::{
    Clock, ConversationState, IdGen, Message, MessageEvent, Step, StepStatus, ToolCall,
    ToolResult, TurnId, TurnPolicy,
};
use hive_core::turn::LlmResultSummary;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identity of the executing turn, fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct ExecutionScope {
    pub agent_name: String,
    pub instance_key: String,
    pub turn_id: TurnId,
    pub trace_id: String,
}

/// A finished step plus the error that terminated it, if any.
///
/// The step record is always returned; a failed step still lands in the
/// turn's history with its partial state.
pub struct StepRun {
    pub step: Step,
    pub error: Option<EngineError>,
}

/// Drives one step through the pipeline.
pub struct StepRunner {
    pipeline: Arc<PipelineRegistry>,
    tools: Arc<ToolRegistry>,
    executor: ToolExecutor,
    llm: Arc<dyn LlmCaller>,
    clock: Arc<dyn Clock>,
    idgen: Arc<dyn IdGen>,
}

impl StepRunner {
    pub fn new(
        pipeline: Arc<PipelineRegistry>,
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn LlmCaller>,
        clock: Arc<dyn Clock>,
        idgen: Arc<dyn IdGen>,
    ) -> Self {
        let executor = ToolExecutor::new(Arc::clone(&tools));
        Self {
            pipeline,
            tools,
            executor,
            llm,
            clock,
            idgen,
        }
    }

    /// Execute one step against the conversation.
    ///
    /// `sink` is the turn-wide event sink shared with pipeline contexts;
    /// staged events are folded into the conversation at phase boundaries.
    pub async fn run(
        &self,
        scope: &ExecutionScope,
        policy: &TurnPolicy,
        step_index: usize,
        conversation: &mut ConversationState,
        sink: &EventSink,
        turn_deadline: Option<Instant>,
    ) -> StepRun {
        let mut step = Step::new(
            self.idgen.next("step"),
            step_index,
            self.clock.epoch_ms(),
        );

        let step_deadline = policy
            .step_timeout_ms
            .map(|ms| self.clock.now() + Duration::from_millis(ms));
        let deadline = match (step_deadline, turn_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let outcome = self
            .run_phases(scope, policy, &mut step, conversation, sink, deadline)
            .await;

        step.completed_at_epoch_ms = Some(self.clock.epoch_ms());
        match outcome {
            Ok(()) => {
                step.status = StepStatus::Completed;
                StepRun { step, error: None }
            }
            Err(error) => {
                tracing::warn!(
                    turn_id = %scope.turn_id,
                    step_index,
                    error = %error,
                    "step failed"
                );
                step.status = StepStatus::Failed;
                step.metadata
                    .insert("error".to_string(), json!(error.to_string()));
                StepRun {
                    step,
                    error: Some(error),
                }
            }
        }
    }

    async fn run_phases(
        &self,
        scope: &ExecutionScope,
        policy: &TurnPolicy,
        step: &mut Step,
        conversation: &mut ConversationState,
        sink: &EventSink,
        deadline: Option<Instant>,
    ) -> Result<(), EngineError> {
        let mut ctx = PointContext::new(
            scope.agent_name.clone(),
            scope.instance_key.clone(),
            scope.turn_id.clone(),
            scope.trace_id.clone(),
            policy.clone(),
            sink.clone(),
        );
        ctx.step_index = step.index;

        // step.pre
        ctx = self.pipeline.run_mutators(PipelinePoint::StepPre, ctx).await?;
        absorb(conversation, sink);

        // step.config: the effective policy for this step is fixed here;
        // mutators apply live-config overrides.
        step.status = StepStatus::Config;
        self.check_deadline(deadline, step.index)?;
        ctx = self
            .pipeline
            .run_mutators(PipelinePoint::StepConfig, ctx)
            .await?;
        absorb(conversation, sink);
        let policy = ctx.policy.clone();

        // step.tools: rebuild the catalog from the registry, then let
        // handlers adjust it. Prior steps keep their own snapshots.
        step.status = StepStatus::Tools;
        self.check_deadline(deadline, step.index)?;
        ctx.tool_catalog = self.tools.catalog();
        ctx = self
            .pipeline
            .run_mutators(PipelinePoint::StepTools, ctx)
            .await?;
        absorb(conversation, sink);
        step.tool_catalog = ctx.tool_catalog.clone();

        // step.blocks: context assembly (compaction summaries etc.).
        step.status = StepStatus::Blocks;
        self.check_deadline(deadline, step.index)?;
        ctx = self
            .pipeline
            .run_mutators(PipelinePoint::StepBlocks, ctx)
            .await?;
        absorb(conversation, sink);
        step.blocks = ctx.blocks.clone();

        // step.llmCall: middleware onion around the provider call.
        step.status = StepStatus::LlmCall;
        self.check_deadline(deadline, step.index)?;
        ctx.llm_input = conversation.next_messages();
        let llm_result = self.call_model(&ctx).await?;
        absorb(conversation, sink);

        step.llm_result = Some(LlmResultSummary {
            text: llm_result.text(),
            finish_reason: llm_result.finish_reason.as_str().to_string(),
            total_tokens: llm_result.usage.total_tokens,
        });
        step.tool_calls = llm_result.tool_calls.clone();

        let text = llm_result.text();
        if !text.is_empty() || !step.tool_calls.is_empty() {
            conversation.emit(MessageEvent::Append {
                message: Message::assistant(
                    self.idgen.next("msg"),
                    step.id.as_str(),
                    text,
                    step.tool_calls.clone(),
                    self.clock.epoch_ms(),
                ),
            });
        }

        // toolExec: all calls of the step run concurrently; a sibling's
        // failure cancels nothing, and every call yields a result.
        if !step.tool_calls.is_empty() {
            step.status = StepStatus::ToolExec;
            self.check_deadline(deadline, step.index)?;

            let calls = step.tool_calls.clone();
            let outcomes = join_all(
                calls
                    .iter()
                    .map(|call| self.run_tool_call(&ctx, scope, &policy, call)),
            )
            .await;
            absorb(conversation, sink);

            let mut pipeline_failure: Option<PipelineError> = None;
            for outcome in outcomes {
                match outcome {
                    Ok(result) => {
                        conversation.emit(MessageEvent::Append {
                            message: Message::tool(
                                self.idgen.next("msg"),
                                result.tool_call_id.as_str(),
                                &result.tool_name,
                                result.output_value(),
                                self.clock.epoch_ms(),
                            ),
                        });
                        step.tool_results.push(result);
                    }
                    Err(error) => {
                        if pipeline_failure.is_none() {
                            pipeline_failure = Some(error);
                        }
                    }
                }
            }

            if let Some(error) = pipeline_failure {
                return Err(error.into());
            }
        }

        // step.post: finalization (e.g. auto-compaction triggers).
        step.status = StepStatus::Post;
        self.check_deadline(deadline, step.index)?;
        ctx.tool_call = None;
        ctx.tool_result = None;
        self.pipeline
            .run_mutators(PipelinePoint::StepPost, ctx)
            .await?;
        absorb(conversation, sink);

        Ok(())
    }

    /// Run the `step.llmCall` middleware around the provider; on failure,
    /// route through `step.llmError` for extension-driven retry.
    async fn call_model(&self, ctx: &PointContext) -> Result<LlmResult, EngineError> {
        let core = LlmCallCore {
            caller: self.llm.as_ref(),
        };

        let error = match self
            .pipeline
            .run_middleware(PipelinePoint::StepLlmCall, ctx.clone(), &core)
            .await
        {
            Ok(output) => return Ok(output.into_llm(PipelinePoint::StepLlmCall)?),
            Err(error) => error,
        };

        tracing::warn!(
            turn_id = %ctx.turn_id,
            step_index = ctx.step_index,
            error = %error,
            "llm call failed, routing through step.llmError"
        );

        let mut err_ctx = ctx.clone();
        err_ctx.llm_error = Some(LlmErrorState {
            message: error.to_string(),
            retry_count: 0,
            should_retry: false,
            retry_delay_ms: 0,
        });
        let err_ctx = self
            .pipeline
            .run_mutators(PipelinePoint::StepLlmError, err_ctx)
            .await?;

        let state = err_ctx.llm_error.clone().unwrap_or_default();
        if !state.should_retry {
            return Err(EngineError::Llm(LlmError::new(error.to_string())));
        }

        if state.retry_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(state.retry_delay_ms)).await;
        }

        // One retry against the provider, with the possibly rewritten input.
        let result = self
            .llm
            .call(
                &err_ctx.policy.model,
                &err_ctx.llm_input,
                &err_ctx.tool_catalog,
            )
            .await?;
        Ok(result)
    }

    /// toolCall.pre → catalog gate → toolCall.exec middleware →
    /// toolCall.post. Handler failures become error results; pipeline
    /// failures propagate as extension bugs.
    async fn run_tool_call(
        &self,
        base: &PointContext,
        scope: &ExecutionScope,
        policy: &TurnPolicy,
        call: &ToolCall,
    ) -> Result<ToolResult, PipelineError> {
        let mut ctx = base.clone();
        ctx.tool_call = Some(call.clone());
        ctx.tool_result = None;

        let mut ctx = self
            .pipeline
            .run_mutators(PipelinePoint::ToolCallPre, ctx)
            .await?;
        let call = ctx.tool_call.clone().unwrap_or_else(|| call.clone());

        let in_catalog = ctx.tool_catalog.iter().any(|item| item.name == call.name);
        let result = if !in_catalog {
            // Hard boundary: no handler and no middleware runs.
            not_in_catalog_result(&call)
        } else {
            let core = ToolExecCore {
                executor: &self.executor,
                context: ToolContext {
                    agent_name: scope.agent_name.clone(),
                    instance_key: scope.instance_key.clone(),
                    turn_id: scope.turn_id.clone(),
                    trace_id: scope.trace_id.clone(),
                    tool_call_id: call.id.clone(),
                },
                error_message_limit: policy.error_message_limit,
            };
            ctx.tool_call = Some(call.clone());
            self.pipeline
                .run_middleware(PipelinePoint::ToolCallExec, ctx.clone(), &core)
                .await?
                .into_tool(PipelinePoint::ToolCallExec)?
        };

        ctx.tool_result = Some(result.clone());
        let post_ctx = self
            .pipeline
            .run_mutators(PipelinePoint::ToolCallPost, ctx)
            .await?;
        Ok(post_ctx.tool_result.unwrap_or(result))
    }

    fn check_deadline(&self, deadline: Option<Instant>, index: usize) -> Result<(), EngineError> {
        match deadline {
            Some(deadline) if self.clock.now() > deadline => {
                Err(EngineError::StepTimeout { index })
            }
            _ => Ok(()),
        }
    }
}

fn absorb(conversation: &mut ConversationState, sink: &EventSink) {
    for event in sink.drain() {
        conversation.emit(event);
    }
}

struct LlmCallCore<'a> {
    caller: &'a dyn LlmCaller,
}

#[async_trait]
impl CoreOperation for LlmCallCore<'_> {
    async fn run(&self, ctx: PointContext) -> HandlerResult<MiddlewareOutput> {
        self.caller
            .call(&ctx.policy.model, &ctx.llm_input, &ctx.tool_catalog)
            .await
            .map(MiddlewareOutput::Llm)
            .map_err(|e| HandlerError(e.to_string()))
    }
}

struct ToolExecCore<'a> {
    executor: &'a ToolExecutor,
    context: ToolContext,
    error_message_limit: usize,
}

#[async_trait]
impl CoreOperation for ToolExecCore<'_> {
    async fn run(&self, ctx: PointContext) -> HandlerResult<MiddlewareOutput> {
        let Some(call) = ctx.tool_call.clone() else {
            return Err(HandlerError::from("toolCall.exec requires a tool call"));
        };
        let result = self
            .executor
            .execute(ToolExecutionRequest {
                call: &call,
                catalog: &ctx.tool_catalog,
                context: &self.context,
                error_message_limit: self.error_message_limit,
            })
            .await;
        Ok(MiddlewareOutput::Tool(result))
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
