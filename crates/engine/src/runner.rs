// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-process runner: the IPC-facing side of an agent instance.
//!
//! The orchestrator talks to this over the process boundary. The runner
//! enqueues inbound events, runs turns serially, answers request-style
//! events through the orchestrator, and acknowledges shutdown only after
//! the in-flight turn has finished.

use crate::instance::{AgentInstance, InstanceStatus};
use crate::turn::TurnOutcome;
use async_trait::async_trait;
use hive_core::{AgentEvent, Clock, IdGen, IpcKind, IpcMessage, JsonObject, ReplyTo};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transport the runner speaks over. In production this is the child
/// process's IPC channel; tests use in-memory channel pairs.
#[async_trait]
pub trait IpcEndpoint: Send {
    /// Next inbound message, or `None` when the peer is gone.
    async fn recv(&mut self) -> Option<IpcMessage>;

    /// Fire-and-forget send; delivery failures are the peer's problem.
    fn send(&self, message: IpcMessage);
}

/// In-memory endpoint over unbounded channels.
pub struct ChannelIpcEndpoint {
    tx: mpsc::UnboundedSender<IpcMessage>,
    rx: mpsc::UnboundedReceiver<IpcMessage>,
}

impl ChannelIpcEndpoint {
    /// Build an endpoint from raw channel halves, for callers that manage
    /// the peer side themselves (e.g. an in-process spawner).
    pub fn new(
        tx: mpsc::UnboundedSender<IpcMessage>,
        rx: mpsc::UnboundedReceiver<IpcMessage>,
    ) -> Self {
        Self { tx, rx }
    }
}

#[async_trait]
impl IpcEndpoint for ChannelIpcEndpoint {
    async fn recv(&mut self) -> Option<IpcMessage> {
        self.rx.recv().await
    }

    fn send(&self, message: IpcMessage) {
        let _ = self.tx.send(message);
    }
}

/// Cross-wired endpoint pair: what one side sends, the other receives.
pub fn channel_endpoint_pair() -> (ChannelIpcEndpoint, ChannelIpcEndpoint) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        ChannelIpcEndpoint { tx: a_tx, rx: b_rx },
        ChannelIpcEndpoint { tx: b_tx, rx: a_rx },
    )
}

/// Drives one agent instance from an IPC endpoint.
pub struct AgentRunner<E: IpcEndpoint> {
    instance: Arc<AgentInstance>,
    endpoint: E,
    clock: Arc<dyn Clock>,
    idgen: Arc<dyn IdGen>,
}

impl<E: IpcEndpoint> AgentRunner<E> {
    pub fn new(
        instance: Arc<AgentInstance>,
        endpoint: E,
        clock: Arc<dyn Clock>,
        idgen: Arc<dyn IdGen>,
    ) -> Self {
        Self {
            instance,
            endpoint,
            clock,
            idgen,
        }
    }

    /// Run until shutdown or endpoint loss.
    pub async fn run(mut self) {
        self.send_runtime_event("agent_ready", JsonObject::new());
        tracing::info!(
            agent = %self.instance.agent_name(),
            instance_key = %self.instance.instance_key(),
            "agent runner ready"
        );

        loop {
            let Some(message) = self.endpoint.recv().await else {
                tracing::info!(
                    agent = %self.instance.agent_name(),
                    "ipc endpoint closed, runner exiting"
                );
                return;
            };

            match message.kind {
                IpcKind::Shutdown => {
                    // Turns only run between recv calls, so nothing is in
                    // flight here; events still queued are abandoned.
                    self.instance.set_status(InstanceStatus::Draining);
                    tracing::info!(
                        agent = %self.instance.agent_name(),
                        dropped_events = self.instance.queue().len(),
                        "shutdown received, acknowledging"
                    );
                    self.endpoint.send(IpcMessage::shutdown_ack(
                        self.instance.agent_name(),
                        "orchestrator",
                        self.instance.instance_key(),
                    ));
                    return;
                }
                IpcKind::ShutdownAck => {
                    // Only the orchestrator consumes acks.
                    tracing::warn!("unexpected shutdown_ack at agent process, dropping");
                }
                IpcKind::Event => {
                    self.handle_event(message).await;
                }
            }
        }
    }

    async fn handle_event(&mut self, message: IpcMessage) {
        let Some(payload) = message.payload_object() else {
            tracing::warn!(from = %message.from, "dropping IPC event with non-object payload");
            return;
        };

        let event: AgentEvent =
            match serde_json::from_value(serde_json::Value::Object(payload.clone())) {
                Ok(event) => event,
                Err(error) => {
                    tracing::warn!(
                        from = %message.from,
                        error = %error,
                        "dropping malformed agent event payload"
                    );
                    return;
                }
            };

        self.instance.enqueue(event);
        self.drain_queue().await;
    }

    async fn drain_queue(&mut self) {
        self.send_status("processing");
        while let Some(outcome) = self.instance.process_next().await {
            if let Some(reply_to) = outcome.turn.input_event.reply_to.clone() {
                self.send_response(&reply_to, &outcome);
            }
        }
        self.send_status("idle");
    }

    /// Route the turn's response back through the orchestrator, keyed by
    /// the request's correlation id.
    fn send_response(&self, reply_to: &ReplyTo, outcome: &TurnOutcome) {
        let text = outcome
            .result
            .response_message
            .as_ref()
            .and_then(|m| m.text().map(str::to_string))
            .or_else(|| outcome.result.error.clone())
            .unwrap_or_default();

        let mut payload = JsonObject::new();
        payload.insert("id".to_string(), json!(self.idgen.next("evt")));
        payload.insert("type".to_string(), json!("response"));
        payload.insert("input".to_string(), json!(text));
        payload.insert(
            "source".to_string(),
            json!({"kind": "agent", "name": self.instance.agent_name()}),
        );
        payload.insert(
            "metadata".to_string(),
            json!({"in_reply_to": reply_to.correlation_id}),
        );
        payload.insert(
            "instance_key".to_string(),
            json!(self.instance.instance_key()),
        );
        payload.insert(
            "created_at_epoch_ms".to_string(),
            json!(self.clock.epoch_ms()),
        );

        self.endpoint.send(IpcMessage::event(
            self.instance.agent_name(),
            "orchestrator",
            payload,
        ));
    }

    fn send_runtime_event(&self, event_type: &str, mut payload: JsonObject) {
        payload.insert("type".to_string(), json!(event_type));
        payload.insert(
            "agent_name".to_string(),
            json!(self.instance.agent_name()),
        );
        payload.insert(
            "instance_key".to_string(),
            json!(self.instance.instance_key()),
        );
        self.endpoint.send(IpcMessage::event(
            self.instance.agent_name(),
            "orchestrator",
            payload,
        ));
    }

    fn send_status(&self, status: &str) {
        let mut payload = JsonObject::new();
        payload.insert("status".to_string(), json!(status));
        self.send_runtime_event("agent_status", payload);
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
