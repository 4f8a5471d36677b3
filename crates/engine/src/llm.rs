// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Injected LLM caller interface.
//!
//! The provider wire format is an external concern; the engine depends only
//! on text blocks, tool calls, the finish reason, and token usage.

use async_trait::async_trait;
use hive_core::{Message, ToolCall, ToolCatalogItem};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmFinishReason {
    Stop,
    ToolCalls,
    Length,
}

impl LlmFinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmFinishReason::Stop => "stop",
            LlmFinishReason::ToolCalls => "tool_calls",
            LlmFinishReason::Length => "length",
        }
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One model response as the engine consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResult {
    pub text_blocks: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: LlmFinishReason,
    pub usage: LlmUsage,
}

impl LlmResult {
    /// Text blocks joined into one response string.
    pub fn text(&self) -> String {
        self.text_blocks.join("\n")
    }

    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text_blocks: vec![text.into()],
            tool_calls: Vec::new(),
            finish_reason: LlmFinishReason::Stop,
            usage: LlmUsage::default(),
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text_blocks: Vec::new(),
            tool_calls,
            finish_reason: LlmFinishReason::ToolCalls,
            usage: LlmUsage::default(),
        }
    }
}

/// Provider failure surfaced to the `step.llmError` pipeline point.
#[derive(Debug, Clone, Error)]
#[error("llm call failed: {message}")]
pub struct LlmError {
    pub message: String,
}

impl LlmError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The injected model caller.
#[async_trait]
pub trait LlmCaller: Send + Sync {
    async fn call(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolCatalogItem],
    ) -> Result<LlmResult, LlmError>;
}
