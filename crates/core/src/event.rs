// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent input events.
//!
//! An `AgentEvent` is created by a connector, another agent, a tool, or the
//! runtime itself; it is immutable and consumed exactly once when the
//! instance dequeues it.

use crate::message::JsonObject;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Unique identifier for an agent event.
    pub struct AgentEventId;
}

/// Kind of component that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSourceKind {
    Connector,
    Agent,
    Tool,
    Runtime,
}

impl fmt::Display for EventSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSourceKind::Connector => write!(f, "connector"),
            EventSourceKind::Agent => write!(f, "agent"),
            EventSourceKind::Tool => write!(f, "tool"),
            EventSourceKind::Runtime => write!(f, "runtime"),
        }
    }
}

/// Producer of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub kind: EventSourceKind,
    pub name: String,
}

impl EventSource {
    pub fn new(kind: EventSourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn connector(name: impl Into<String>) -> Self {
        Self::new(EventSourceKind::Connector, name)
    }

    pub fn agent(name: impl Into<String>) -> Self {
        Self::new(EventSourceKind::Agent, name)
    }

    pub fn runtime() -> Self {
        Self::new(EventSourceKind::Runtime, "runtime")
    }
}

/// Reply channel for request-style events.
///
/// The responding agent sends an event whose `metadata.in_reply_to` carries
/// the correlation id; the orchestrator routes it back to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTo {
    pub target: String,
    pub correlation_id: String,
}

/// One unit of input routed to an agent instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: AgentEventId,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created_at_epoch_ms: u64,
    pub source: EventSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_key: Option<String>,
    #[serde(default, skip_serializing_if = "JsonObject::is_empty")]
    pub metadata: JsonObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyTo>,
}

impl AgentEvent {
    /// Build a plain message event carrying user input.
    pub fn message(
        id: impl Into<AgentEventId>,
        source: EventSource,
        input: impl Into<String>,
        epoch_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: "message".to_string(),
            created_at_epoch_ms: epoch_ms,
            source,
            trace_id: None,
            input: Some(input.into()),
            instance_key: None,
            metadata: JsonObject::new(),
            reply_to: None,
        }
    }

    pub fn with_reply_to(mut self, target: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        self.reply_to = Some(ReplyTo {
            target: target.into(),
            correlation_id: correlation_id.into(),
        });
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn log_summary(&self) -> String {
        format!(
            "{} id={} source={}:{}",
            self.event_type, self.id, self.source.kind, self.source.name
        )
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
