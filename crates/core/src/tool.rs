// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool call and result shapes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default cap applied to tool error messages before they reach the model.
pub const DEFAULT_ERROR_MESSAGE_LIMIT: usize = 1000;

crate::define_id! {
    /// Identifier the model assigned to one tool invocation.
    pub struct ToolCallId;
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        id: impl Into<ToolCallId>,
        name: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }
}

/// Outcome classification for a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResultStatus {
    Ok,
    Error,
    Pending,
}

impl fmt::Display for ToolResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolResultStatus::Ok => write!(f, "ok"),
            ToolResultStatus::Error => write!(f, "error"),
            ToolResultStatus::Pending => write!(f, "pending"),
        }
    }
}

/// Structured error attached to a failed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Result of one tool invocation, keyed by `tool_call_id`, never by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: ToolCallId,
    pub tool_name: String,
    pub status: ToolResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    /// Opaque resumption handle for `pending` results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, output: serde_json::Value) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolResultStatus::Ok,
            output: Some(output),
            error: None,
            handle: None,
        }
    }

    pub fn error(call: &ToolCall, error: ToolError) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolResultStatus::Error,
            output: None,
            error: Some(error),
            handle: None,
        }
    }

    pub fn pending(call: &ToolCall, handle: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            status: ToolResultStatus::Pending,
            output: None,
            error: None,
            handle: Some(handle.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ToolResultStatus::Ok
    }

    /// Provider-facing JSON for the tool-result message content.
    pub fn output_value(&self) -> serde_json::Value {
        if let Some(output) = &self.output {
            return output.clone();
        }
        if let Some(error) = &self.error {
            return serde_json::json!({
                "error": error.message,
                "code": error.code,
            });
        }
        serde_json::Value::Null
    }
}

/// Where a catalog entry came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSource {
    /// Declared statically in the agent configuration.
    Static,
    /// Registered at runtime by an extension.
    Extension { extension_name: String },
}

/// One entry of the per-step tool catalog exposed to the model.
///
/// The catalog is rebuilt every step; older steps keep immutable snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCatalogItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-schema object describing the accepted arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ToolSource>,
}

impl ToolCatalogItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: None,
            source: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_source(mut self, source: ToolSource) -> Self {
        self.source = Some(source);
        self
    }
}

/// Truncate an error message to `limit` characters, marking the cut.
pub fn truncate_error_message(message: &str, limit: usize) -> String {
    if message.len() <= limit {
        return message.to_string();
    }

    const SUFFIX: &str = "... (truncated)";
    if limit <= SUFFIX.len() {
        return message.chars().take(limit).collect();
    }

    let keep = limit - SUFFIX.len();
    let mut end = keep;
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &message[..end], SUFFIX)
}

#[cfg(test)]
#[path = "tool_tests.rs"]
mod tests;
