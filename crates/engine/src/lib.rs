// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hive-engine: per-agent Turn/Step execution engine.
//!
//! Runs inside each agent process: drives one turn at a time through a
//! pipeline-intercepted step loop over an event-sourced conversation, with
//! catalog-gated tool dispatch and an injected LLM caller.

mod error;
mod instance;
mod llm;
mod pipeline;
mod runner;
mod step;
mod tools;
mod turn;

pub use error::EngineError;
pub use instance::{AgentInstance, AgentInstanceConfig, ExtensionApi, InstanceStatus};
pub use llm::{LlmCaller, LlmError, LlmFinishReason, LlmResult, LlmUsage};
pub use pipeline::{
    mutator_fn, CoreOperation, EventSink, HandlerError, HandlerResult, LlmErrorState, Middleware,
    MiddlewareOutput, Mutator, Next, PipelineError, PipelinePoint, PipelineRegistry, PointContext,
    Registration,
};
pub use runner::{channel_endpoint_pair, AgentRunner, ChannelIpcEndpoint, IpcEndpoint};
pub use step::{ExecutionScope, StepRun, StepRunner};
pub use tools::{
    ToolContext, ToolExecutionRequest, ToolExecutor, ToolHandler, ToolHandlerError, ToolRegistry,
};
pub use turn::{TurnOutcome, TurnRunner};

#[cfg(test)]
mod test_helpers;
