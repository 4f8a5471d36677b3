// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the execution engine.

use crate::llm::LlmError;
use crate::pipeline::PipelineError;
use thiserror::Error;

/// Errors that terminate a step or a turn.
///
/// Tool-handler failures never appear here; they are converted into
/// `ToolResult` errors and the turn continues.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A pipeline handler failed; treated as an extension bug.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The LLM provider failed and no `step.llmError` handler retried.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// A step exceeded `policy.step_timeout_ms` between phases.
    #[error("step {index} exceeded its deadline")]
    StepTimeout { index: usize },

    /// The turn exceeded `policy.turn_timeout_ms` between steps.
    #[error("turn exceeded its deadline")]
    TurnTimeout,

    /// The turn was cancelled externally.
    #[error("turn interrupted")]
    Interrupted,
}

impl EngineError {
    /// True when the turn should end as `interrupted` rather than `failed`.
    pub fn is_interruption(&self) -> bool {
        matches!(self, EngineError::TurnTimeout | EngineError::Interrupted)
    }
}
