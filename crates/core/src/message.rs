// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conversation messages and message events.
//!
//! A `Message` is identity-immutable once created; only its metadata may be
//! mutated in place (e.g. compaction flags). History never mutates the base
//! list directly; all changes flow through `MessageEvent`s folded by
//! [`crate::conversation`].

use crate::define_id;
use crate::tool::ToolCall;
use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON object alias used for free-form metadata and payloads.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

define_id! {
    /// Unique identifier for a conversation message.
    pub struct MessageId;
}

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Role and content of a message as seen by the model provider.
///
/// `content` is provider-shaped JSON (plain text or block lists); the engine
/// treats it as opaque. Assistant messages additionally carry the tool calls
/// the model requested in that response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    pub role: Role,
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

/// Origin of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageSource {
    User,
    Assistant {
        step_id: String,
    },
    Tool {
        tool_call_id: String,
        tool_name: String,
    },
    System,
    Extension {
        extension_name: String,
    },
}

/// One conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub data: MessageData,
    #[serde(default, skip_serializing_if = "JsonObject::is_empty")]
    pub metadata: JsonObject,
    pub created_at_epoch_ms: u64,
    pub source: MessageSource,
}

impl Message {
    /// Build a user message with plain-text content.
    pub fn user(id: impl Into<MessageId>, text: impl Into<String>, epoch_ms: u64) -> Self {
        Self {
            id: id.into(),
            data: MessageData {
                role: Role::User,
                content: serde_json::Value::String(text.into()),
                tool_calls: Vec::new(),
            },
            metadata: JsonObject::new(),
            created_at_epoch_ms: epoch_ms,
            source: MessageSource::User,
        }
    }

    /// Build an assistant message for a step, with optional tool calls.
    pub fn assistant(
        id: impl Into<MessageId>,
        step_id: impl Into<String>,
        text: impl Into<String>,
        tool_calls: Vec<ToolCall>,
        epoch_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            data: MessageData {
                role: Role::Assistant,
                content: serde_json::Value::String(text.into()),
                tool_calls,
            },
            metadata: JsonObject::new(),
            created_at_epoch_ms: epoch_ms,
            source: MessageSource::Assistant {
                step_id: step_id.into(),
            },
        }
    }

    /// Build a tool-result message referencing the originating tool call.
    pub fn tool(
        id: impl Into<MessageId>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: serde_json::Value,
        epoch_ms: u64,
    ) -> Self {
        let tool_call_id = tool_call_id.into();
        let tool_name = tool_name.into();
        Self {
            id: id.into(),
            data: MessageData {
                role: Role::Tool,
                content: output,
                tool_calls: Vec::new(),
            },
            metadata: JsonObject::new(),
            created_at_epoch_ms: epoch_ms,
            source: MessageSource::Tool {
                tool_call_id,
                tool_name,
            },
        }
    }

    /// Build a system message.
    pub fn system(id: impl Into<MessageId>, text: impl Into<String>, epoch_ms: u64) -> Self {
        Self {
            id: id.into(),
            data: MessageData {
                role: Role::System,
                content: serde_json::Value::String(text.into()),
                tool_calls: Vec::new(),
            },
            metadata: JsonObject::new(),
            created_at_epoch_ms: epoch_ms,
            source: MessageSource::System,
        }
    }

    /// The tool-call id this message answers, if it is a tool-result message.
    pub fn answered_tool_call_id(&self) -> Option<&str> {
        match &self.source {
            MessageSource::Tool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// Plain-text view of the content, when the content is a string.
    pub fn text(&self) -> Option<&str> {
        self.data.content.as_str()
    }
}

/// Event describing one change to a conversation.
///
/// Serializes with `{"type": "append", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageEvent {
    /// Append a message to the tail.
    Append { message: Message },

    /// Replace the first message with a matching id.
    Replace {
        target_id: MessageId,
        message: Message,
    },

    /// Remove the first message with a matching id.
    Remove { target_id: MessageId },

    /// Discard the entire history, including prior events' effects.
    Truncate,
}

impl MessageEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MessageEvent::Append { .. } => "append",
            MessageEvent::Replace { .. } => "replace",
            MessageEvent::Remove { .. } => "remove",
            MessageEvent::Truncate => "truncate",
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
