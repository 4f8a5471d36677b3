// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent instance: one running conversational agent bound to an
//! instance key.
//!
//! Owns the event queue, the pipeline and tool registries, and the
//! conversation. Registries are scoped to the instance, never
//! module-level singletons, so concurrent instances in one process stay
//! isolated. Exactly one turn runs at a time: the single consumer polls
//! the queue and runs each dequeued event to completion.

use crate::llm::LlmCaller;
use crate::pipeline::{Middleware, Mutator, PipelineError, PipelinePoint, PipelineRegistry, Registration};
use crate::tools::{stamp_extension_source, ToolHandler, ToolRegistry};
use crate::turn::{TurnOutcome, TurnRunner};
use hive_core::{
    AgentEvent, AgentEventQueue, Clock, ConversationState, IdGen, Message, ToolCatalogItem,
    TurnPolicy,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// Coarse activity state, reported to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Idle,
    Processing,
    Draining,
}

/// Static identity and policy for one instance.
#[derive(Debug, Clone)]
pub struct AgentInstanceConfig {
    pub agent_name: String,
    pub instance_key: String,
    pub policy: TurnPolicy,
}

/// One running agent instance.
pub struct AgentInstance {
    config: AgentInstanceConfig,
    queue: AgentEventQueue,
    notify: Notify,
    pipeline: Arc<PipelineRegistry>,
    tools: Arc<ToolRegistry>,
    conversation: tokio::sync::Mutex<ConversationState>,
    runner: TurnRunner,
    interrupt: AtomicBool,
    status: parking_lot::Mutex<InstanceStatus>,
    policy: parking_lot::Mutex<TurnPolicy>,
}

impl AgentInstance {
    pub fn new(
        config: AgentInstanceConfig,
        llm: Arc<dyn LlmCaller>,
        clock: Arc<dyn Clock>,
        idgen: Arc<dyn IdGen>,
    ) -> Arc<Self> {
        let pipeline = Arc::new(PipelineRegistry::new());
        let tools = Arc::new(ToolRegistry::new());
        let runner = TurnRunner::new(
            Arc::clone(&pipeline),
            Arc::clone(&tools),
            llm,
            clock,
            idgen,
        );
        let policy = config.policy.clone();

        Arc::new(Self {
            config,
            queue: AgentEventQueue::new(),
            notify: Notify::new(),
            pipeline,
            tools,
            conversation: tokio::sync::Mutex::new(ConversationState::default()),
            runner,
            interrupt: AtomicBool::new(false),
            status: parking_lot::Mutex::new(InstanceStatus::Idle),
            policy: parking_lot::Mutex::new(policy),
        })
    }

    pub fn agent_name(&self) -> &str {
        &self.config.agent_name
    }

    pub fn instance_key(&self) -> &str {
        &self.config.instance_key
    }

    pub fn queue(&self) -> &AgentEventQueue {
        &self.queue
    }

    pub fn pipeline(&self) -> &Arc<PipelineRegistry> {
        &self.pipeline
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn status(&self) -> InstanceStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: InstanceStatus) {
        *self.status.lock() = status;
    }

    /// Swap the effective policy. Applied between turns, never mid-turn.
    pub fn set_policy(&self, policy: TurnPolicy) {
        *self.policy.lock() = policy;
    }

    pub fn policy(&self) -> TurnPolicy {
        self.policy.lock().clone()
    }

    /// Capability-scoped registration surface handed to an extension's
    /// `register` callback.
    pub fn extension_api(&self, extension_name: impl Into<String>) -> ExtensionApi {
        ExtensionApi {
            extension_name: extension_name.into(),
            pipeline: Arc::clone(&self.pipeline),
            tools: Arc::clone(&self.tools),
        }
    }

    /// Load one extension by invoking its registration callback.
    ///
    /// Module loading and sandboxing are external concerns; the engine
    /// only applies whatever the callback registers.
    pub fn load_extension<F>(&self, extension_name: &str, register: F)
    where
        F: FnOnce(&ExtensionApi),
    {
        let api = self.extension_api(extension_name);
        register(&api);
        tracing::debug!(
            agent = %self.config.agent_name,
            extension = extension_name,
            "extension registered"
        );
    }

    /// Producer side: append an event and wake the consumer.
    pub fn enqueue(&self, event: AgentEvent) {
        self.queue.enqueue(event);
        self.notify.notify_one();
    }

    /// Request cancellation of the current turn; checked between steps.
    pub fn interrupt(&self) {
        self.interrupt
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Wait until at least one event is queued.
    pub async fn wait_for_event(&self) {
        loop {
            if !self.queue.is_empty() {
                return;
            }
            self.notify.notified().await;
        }
    }

    /// Dequeue one event and run its turn to completion.
    ///
    /// Returns `None` when the queue is empty. The serial dequeue here is
    /// the ordering guarantee: no two turns for this instance overlap.
    pub async fn process_next(&self) -> Option<TurnOutcome> {
        let event = self.queue.dequeue()?;
        self.set_status(InstanceStatus::Processing);

        let policy = self.policy();
        let mut conversation = self.conversation.lock().await;
        let outcome = self
            .runner
            .run(
                &self.config.agent_name,
                &self.config.instance_key,
                &policy,
                &mut conversation,
                event,
                &self.interrupt,
            )
            .await;
        drop(conversation);

        self.set_status(InstanceStatus::Idle);
        Some(outcome)
    }

    /// Single-consumer loop: sleep until events arrive, then drain them
    /// one turn at a time, sending outcomes to `results`.
    pub async fn run_loop(&self, results: mpsc::UnboundedSender<TurnOutcome>) {
        loop {
            self.wait_for_event().await;
            while let Some(outcome) = self.process_next().await {
                if results.send(outcome).is_err() {
                    return;
                }
            }
        }
    }

    /// Projected conversation, for inspection.
    pub async fn conversation_snapshot(&self) -> Vec<Message> {
        self.conversation.lock().await.next_messages()
    }

    /// Replace the conversation base (e.g. from persisted history).
    pub async fn load_conversation(&self, messages: Vec<Message>) {
        self.conversation.lock().await.replace_base(messages);
    }
}

/// Registration surface exposed to extensions.
///
/// Deliberately narrow: an extension can register pipeline handlers and
/// tools, nothing else. Registrations land in the instance's point+id
/// keyed tables, so re-registering an id replaces instead of duplicating.
pub struct ExtensionApi {
    extension_name: String,
    pipeline: Arc<PipelineRegistry>,
    tools: Arc<ToolRegistry>,
}

impl ExtensionApi {
    pub fn extension_name(&self) -> &str {
        &self.extension_name
    }

    pub fn register_mutator(
        &self,
        point: PipelinePoint,
        handler: Arc<dyn Mutator>,
        options: Registration,
    ) -> Result<(), PipelineError> {
        self.pipeline.register_mutator(point, handler, options)
    }

    pub fn register_middleware(
        &self,
        point: PipelinePoint,
        handler: Arc<dyn Middleware>,
        options: Registration,
    ) -> Result<(), PipelineError> {
        self.pipeline.register_middleware(point, handler, options)
    }

    pub fn register_tool(&self, item: ToolCatalogItem, handler: Arc<dyn ToolHandler>) {
        let item = stamp_extension_source(item, &self.extension_name);
        self.tools.register(item, handler);
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
