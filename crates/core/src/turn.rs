// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turn and step records.
//!
//! A turn is one complete response cycle to an input event; a step is one
//! LLM-call-plus-tool-execution round within it. Both statuses progress
//! one-directionally and are terminal once they leave the active states.

use crate::event::AgentEvent;
use crate::message::{JsonObject, Message};
use crate::tool::{ToolCall, ToolCatalogItem, ToolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Unique identifier for a turn.
    pub struct TurnId;
}

crate::define_id! {
    /// Unique identifier for a step.
    pub struct StepId;
}

/// Lifecycle of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Interrupted,
}

impl TurnStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnStatus::Pending | TurnStatus::Running)
    }
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnStatus::Pending => write!(f, "pending"),
            TurnStatus::Running => write!(f, "running"),
            TurnStatus::Completed => write!(f, "completed"),
            TurnStatus::Failed => write!(f, "failed"),
            TurnStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Phase of a step. Progresses strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Config,
    Tools,
    Blocks,
    LlmCall,
    ToolExec,
    Post,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed)
    }
}

/// Context block assembled for the model call (e.g. compaction summaries).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl ContextBlock {
    pub fn new(block_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            block_type: block_type.into(),
            data,
        }
    }
}

/// Summary of one LLM call as the engine depends on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResultSummary {
    pub text: String,
    pub finish_reason: String,
    pub total_tokens: u64,
}

/// Record of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub index: usize,
    pub status: StepStatus,
    /// Immutable snapshot of the catalog exposed to the model this step.
    pub tool_catalog: Vec<ToolCatalogItem>,
    pub blocks: Vec<ContextBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_result: Option<LlmResultSummary>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub started_at_epoch_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_epoch_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "JsonObject::is_empty")]
    pub metadata: JsonObject,
}

impl Step {
    pub fn new(id: impl Into<StepId>, index: usize, epoch_ms: u64) -> Self {
        Self {
            id: id.into(),
            index,
            status: StepStatus::Pending,
            tool_catalog: Vec::new(),
            blocks: Vec::new(),
            llm_result: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            started_at_epoch_ms: epoch_ms,
            completed_at_epoch_ms: None,
            metadata: JsonObject::new(),
        }
    }
}

/// Record of one turn execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub agent_name: String,
    pub input_event: AgentEvent,
    pub steps: Vec<Step>,
    pub status: TurnStatus,
    pub started_at_epoch_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_epoch_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "JsonObject::is_empty")]
    pub metadata: JsonObject,
}

impl Turn {
    pub fn new(
        id: impl Into<TurnId>,
        agent_name: impl Into<String>,
        input_event: AgentEvent,
        epoch_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            agent_name: agent_name.into(),
            input_event,
            steps: Vec::new(),
            status: TurnStatus::Pending,
            started_at_epoch_ms: epoch_ms,
            completed_at_epoch_ms: None,
            metadata: JsonObject::new(),
        }
    }

    /// All tool results accumulated across the turn's steps.
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.steps.iter().flat_map(|s| s.tool_results.iter())
    }
}

/// Why a turn finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    TextResponse,
    MaxSteps,
    Error,
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinishReason::TextResponse => write!(f, "text_response"),
            FinishReason::MaxSteps => write!(f, "max_steps"),
            FinishReason::Error => write!(f, "error"),
        }
    }
}

/// Outcome surfaced to the caller when a turn reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub turn_id: TurnId,
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
#[path = "turn_tests.rs"]
mod tests;
