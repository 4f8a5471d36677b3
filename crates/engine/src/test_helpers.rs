// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fakes for engine tests.

use crate::llm::{LlmCaller, LlmError, LlmResult};
use crate::tools::{ToolContext, ToolHandler, ToolHandlerError};
use async_trait::async_trait;
use hive_core::{Message, ToolCatalogItem, TurnId};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub fn tool_context(call_id: &str) -> ToolContext {
    ToolContext {
        agent_name: "planner".to_string(),
        instance_key: "default".to_string(),
        turn_id: TurnId::new("turn-1"),
        trace_id: "trace-1".to_string(),
        tool_call_id: call_id.into(),
    }
}

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(
        &self,
        _ctx: &ToolContext,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolHandlerError> {
        Ok(args.clone())
    }
}

/// Tool handler that returns its arguments unchanged.
pub fn echo_tool() -> Arc<dyn ToolHandler> {
    Arc::new(EchoTool)
}

struct FailingTool {
    message: String,
}

#[async_trait]
impl ToolHandler for FailingTool {
    async fn call(
        &self,
        _ctx: &ToolContext,
        _args: &serde_json::Value,
    ) -> Result<serde_json::Value, ToolHandlerError> {
        Err(ToolHandlerError::new(self.message.clone()))
    }
}

/// Tool handler that always fails with the given message.
pub fn failing_tool(message: &str) -> Arc<dyn ToolHandler> {
    Arc::new(FailingTool {
        message: message.to_string(),
    })
}

/// Record of one call made against the scripted LLM.
#[derive(Debug, Clone)]
pub struct RecordedLlmCall {
    pub model: String,
    pub message_count: usize,
    pub tool_names: Vec<String>,
}

/// LLM caller that plays back a scripted sequence of responses.
///
/// Once the script is exhausted it answers with a plain "done" text
/// response so runaway loops terminate.
#[derive(Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<LlmResult, LlmError>>>,
    calls: Mutex<Vec<RecordedLlmCall>>,
}

impl ScriptedLlm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, result: LlmResult) {
        self.script.lock().push_back(Ok(result));
    }

    pub fn push_error(&self, message: &str) {
        self.script.lock().push_back(Err(LlmError::new(message)));
    }

    pub fn calls(&self) -> Vec<RecordedLlmCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LlmCaller for ScriptedLlm {
    async fn call(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolCatalogItem],
    ) -> Result<LlmResult, LlmError> {
        self.calls.lock().push(RecordedLlmCall {
            model: model.to_string(),
            message_count: messages.len(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });

        match self.script.lock().pop_front() {
            Some(result) => result,
            None => Ok(LlmResult::text_only("done")),
        }
    }
}
