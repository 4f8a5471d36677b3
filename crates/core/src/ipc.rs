// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC envelope exchanged between the orchestrator and agent processes.
//!
//! Payloads must be JSON objects; anything else is dropped by the receiver
//! and logged, never surfaced as an error to the sender.

use crate::message::JsonObject;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of IPC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpcKind {
    Event,
    Shutdown,
    ShutdownAck,
}

/// Envelope for all orchestrator ↔ agent-process traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcMessage {
    #[serde(rename = "type")]
    pub kind: IpcKind,
    pub from: String,
    pub to: String,
    pub payload: serde_json::Value,
}

impl IpcMessage {
    pub fn event(from: impl Into<String>, to: impl Into<String>, payload: JsonObject) -> Self {
        Self {
            kind: IpcKind::Event,
            from: from.into(),
            to: to.into(),
            payload: serde_json::Value::Object(payload),
        }
    }

    pub fn shutdown(
        from: impl Into<String>,
        to: impl Into<String>,
        payload: &ShutdownPayload,
    ) -> Self {
        Self {
            kind: IpcKind::Shutdown,
            from: from.into(),
            to: to.into(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn shutdown_ack(
        from: impl Into<String>,
        to: impl Into<String>,
        instance_key: &str,
    ) -> Self {
        let mut payload = JsonObject::new();
        payload.insert(
            "instance_key".to_string(),
            serde_json::Value::String(instance_key.to_string()),
        );
        Self {
            kind: IpcKind::ShutdownAck,
            from: from.into(),
            to: to.into(),
            payload: serde_json::Value::Object(payload),
        }
    }

    /// The payload as an object, or `None` for malformed messages.
    pub fn payload_object(&self) -> Option<&JsonObject> {
        self.payload.as_object()
    }

    /// `instance_key` field of the payload, when present.
    pub fn payload_instance_key(&self) -> Option<&str> {
        self.payload_object()?.get("instance_key")?.as_str()
    }

    /// Parse an envelope from a raw JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ProtocolError> {
        let message: IpcMessage =
            serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if !message.payload.is_object() {
            return Err(ProtocolError::PayloadNotAnObject);
        }
        Ok(message)
    }
}

/// Why an agent process was asked to shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    OrchestratorShutdown,
    Restart,
    ConfigChange,
}

/// Payload of a `shutdown` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownPayload {
    pub grace_period_ms: u64,
    pub reason: ShutdownReason,
}

/// Wire-level protocol failures. Always handled by drop-and-log.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed IPC message: {0}")]
    Malformed(String),
    #[error("IPC payload is not a JSON object")]
    PayloadNotAnObject,
}

#[cfg(test)]
#[path = "ipc_tests.rs"]
mod tests;
