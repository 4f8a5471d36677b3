// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline registry and executor.
//!
//! Fourteen named points. Twelve are mutator points: handlers run strictly
//! sequentially in `(priority asc, registration order asc)`, a stable
//! order that extensions rely on. Two (`step.llmCall`, `toolCall.exec`) are
//! middleware points: handlers compose into an onion around a core
//! operation, lower priority on the outside; a handler that never invokes
//! `next` short-circuits every inner layer and the core.

use crate::llm::LlmResult;
use hive_core::{
    ContextBlock, JsonObject, Message, MessageEvent, ToolCall, ToolCatalogItem, ToolResult,
    TurnId, TurnPolicy,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The fixed set of interception points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelinePoint {
    #[serde(rename = "turn.pre")]
    TurnPre,
    #[serde(rename = "turn.post")]
    TurnPost,
    #[serde(rename = "step.pre")]
    StepPre,
    #[serde(rename = "step.config")]
    StepConfig,
    #[serde(rename = "step.tools")]
    StepTools,
    #[serde(rename = "step.blocks")]
    StepBlocks,
    #[serde(rename = "step.llmCall")]
    StepLlmCall,
    #[serde(rename = "step.llmError")]
    StepLlmError,
    #[serde(rename = "step.post")]
    StepPost,
    #[serde(rename = "toolCall.pre")]
    ToolCallPre,
    #[serde(rename = "toolCall.exec")]
    ToolCallExec,
    #[serde(rename = "toolCall.post")]
    ToolCallPost,
    #[serde(rename = "workspace.repoAvailable")]
    WorkspaceRepoAvailable,
    #[serde(rename = "workspace.worktreeMounted")]
    WorkspaceWorktreeMounted,
}

impl PipelinePoint {
    pub const ALL: [PipelinePoint; 14] = [
        PipelinePoint::TurnPre,
        PipelinePoint::TurnPost,
        PipelinePoint::StepPre,
        PipelinePoint::StepConfig,
        PipelinePoint::StepTools,
        PipelinePoint::StepBlocks,
        PipelinePoint::StepLlmCall,
        PipelinePoint::StepLlmError,
        PipelinePoint::StepPost,
        PipelinePoint::ToolCallPre,
        PipelinePoint::ToolCallExec,
        PipelinePoint::ToolCallPost,
        PipelinePoint::WorkspaceRepoAvailable,
        PipelinePoint::WorkspaceWorktreeMounted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePoint::TurnPre => "turn.pre",
            PipelinePoint::TurnPost => "turn.post",
            PipelinePoint::StepPre => "step.pre",
            PipelinePoint::StepConfig => "step.config",
            PipelinePoint::StepTools => "step.tools",
            PipelinePoint::StepBlocks => "step.blocks",
            PipelinePoint::StepLlmCall => "step.llmCall",
            PipelinePoint::StepLlmError => "step.llmError",
            PipelinePoint::StepPost => "step.post",
            PipelinePoint::ToolCallPre => "toolCall.pre",
            PipelinePoint::ToolCallExec => "toolCall.exec",
            PipelinePoint::ToolCallPost => "toolCall.post",
            PipelinePoint::WorkspaceRepoAvailable => "workspace.repoAvailable",
            PipelinePoint::WorkspaceWorktreeMounted => "workspace.worktreeMounted",
        }
    }

    pub fn parse(value: &str) -> Option<PipelinePoint> {
        Self::ALL.iter().copied().find(|p| p.as_str() == value)
    }

    /// Middleware points wrap a core async operation via `next`.
    pub fn is_middleware(&self) -> bool {
        matches!(self, PipelinePoint::StepLlmCall | PipelinePoint::ToolCallExec)
    }

    /// Mutator points transform the context sequentially.
    pub fn is_mutator(&self) -> bool {
        !self.is_middleware()
    }
}

impl fmt::Display for PipelinePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Failure raised by a pipeline handler. Aborts the remaining chain.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Pipeline-level failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A handler (or the wrapped core operation) failed.
    #[error("pipeline handler failed at {point}: {message}")]
    Handler {
        point: PipelinePoint,
        message: String,
    },

    #[error("{point} is not a mutator point")]
    NotAMutatorPoint { point: PipelinePoint },

    #[error("{point} is not a middleware point")]
    NotAMiddlewarePoint { point: PipelinePoint },

    #[error("middleware at {point} produced a mismatched result kind")]
    ResultKindMismatch { point: PipelinePoint },
}

/// Retry state exposed at `step.llmError`.
#[derive(Debug, Clone, Default)]
pub struct LlmErrorState {
    pub message: String,
    pub retry_count: u32,
    pub should_retry: bool,
    pub retry_delay_ms: u64,
}

/// Write-through sink for message events emitted by handlers.
///
/// Contexts are cloned as they move through middleware layers and
/// concurrent tool calls; the sink keeps every clone funneling into one
/// buffer that the step runner drains into the conversation.
#[derive(Clone, Default, Debug)]
pub struct EventSink {
    inner: Arc<Mutex<Vec<MessageEvent>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: MessageEvent) {
        self.inner.lock().push(event);
    }

    /// Take everything emitted so far, leaving the sink empty.
    pub fn drain(&self) -> Vec<MessageEvent> {
        std::mem::take(&mut *self.inner.lock())
    }
}

/// Context threaded through handlers at one point.
///
/// Mutators receive it by value and return the transformed value; the
/// executor feeds each handler's output to the next.
#[derive(Clone, Debug)]
pub struct PointContext {
    pub agent_name: String,
    pub instance_key: String,
    pub turn_id: TurnId,
    pub trace_id: String,
    pub step_index: usize,
    /// Effective policy for the step; `step.config` mutators apply
    /// live-config overrides here.
    pub policy: TurnPolicy,
    pub tool_catalog: Vec<ToolCatalogItem>,
    pub blocks: Vec<ContextBlock>,
    pub llm_input: Vec<Message>,
    /// Set at the toolCall points.
    pub tool_call: Option<ToolCall>,
    /// Set at `toolCall.post`.
    pub tool_result: Option<ToolResult>,
    /// Set at `step.llmError`.
    pub llm_error: Option<LlmErrorState>,
    pub metadata: JsonObject,
    events: EventSink,
}

impl PointContext {
    pub fn new(
        agent_name: impl Into<String>,
        instance_key: impl Into<String>,
        turn_id: TurnId,
        trace_id: impl Into<String>,
        policy: TurnPolicy,
        events: EventSink,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            instance_key: instance_key.into(),
            turn_id,
            trace_id: trace_id.into(),
            step_index: 0,
            policy,
            tool_catalog: Vec::new(),
            blocks: Vec::new(),
            llm_input: Vec::new(),
            tool_call: None,
            tool_result: None,
            llm_error: None,
            metadata: JsonObject::new(),
            events,
        }
    }

    /// Stage a conversation change; the runner folds it at the next phase
    /// boundary.
    pub fn emit_message_event(&self, event: MessageEvent) {
        self.events.emit(event);
    }

    pub fn event_sink(&self) -> &EventSink {
        &self.events
    }
}

/// Result of a middleware chain: one of the two core operation outputs.
#[derive(Debug, Clone)]
pub enum MiddlewareOutput {
    Llm(LlmResult),
    Tool(ToolResult),
}

impl MiddlewareOutput {
    pub fn into_llm(self, point: PipelinePoint) -> Result<LlmResult, PipelineError> {
        match self {
            MiddlewareOutput::Llm(result) => Ok(result),
            MiddlewareOutput::Tool(_) => Err(PipelineError::ResultKindMismatch { point }),
        }
    }

    pub fn into_tool(self, point: PipelinePoint) -> Result<ToolResult, PipelineError> {
        match self {
            MiddlewareOutput::Tool(result) => Ok(result),
            MiddlewareOutput::Llm(_) => Err(PipelineError::ResultKindMismatch { point }),
        }
    }
}

/// Sequential context transformer.
#[async_trait]
pub trait Mutator: Send + Sync {
    async fn apply(&self, ctx: PointContext) -> HandlerResult<PointContext>;
}

/// Onion layer around a core operation.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn wrap(&self, ctx: PointContext, next: Next<'_>) -> HandlerResult<MiddlewareOutput>;
}

/// The operation a middleware chain wraps (the actual LLM call or tool
/// execution).
#[async_trait]
pub trait CoreOperation: Send + Sync {
    async fn run(&self, ctx: PointContext) -> HandlerResult<MiddlewareOutput>;
}

/// Continuation handed to each middleware layer.
///
/// `run` consumes the continuation: a layer can invoke it at most once, and
/// not invoking it skips all inner layers and the core operation.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    core: &'a dyn CoreOperation,
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: PointContext) -> HandlerResult<MiddlewareOutput> {
        match self.chain.split_first() {
            Some((layer, inner)) => {
                layer
                    .wrap(
                        ctx,
                        Next {
                            chain: inner,
                            core: self.core,
                        },
                    )
                    .await
            }
            None => self.core.run(ctx).await,
        }
    }
}

/// Registration options.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    /// Lower runs earlier (mutators) or further outside (middleware).
    pub priority: i32,
    /// Stable identity for live-config reload: re-registering an existing
    /// id replaces the handler in place.
    pub id: Option<String>,
}

impl Registration {
    pub fn priority(priority: i32) -> Self {
        Self {
            priority,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

struct MutatorEntry {
    id: Option<String>,
    priority: i32,
    order: u64,
    handler: Arc<dyn Mutator>,
}

struct MiddlewareEntry {
    id: Option<String>,
    priority: i32,
    order: u64,
    handler: Arc<dyn Middleware>,
}

#[derive(Default)]
struct RegistryInner {
    mutators: HashMap<PipelinePoint, Vec<MutatorEntry>>,
    middlewares: HashMap<PipelinePoint, Vec<MiddlewareEntry>>,
    next_order: u64,
}

/// Per-instance handler table for all fourteen points.
///
/// Scoped to one agent instance, never a module-level singleton, so
/// concurrent instances on one host stay isolated.
#[derive(Default)]
pub struct PipelineRegistry {
    inner: Mutex<RegistryInner>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mutator handler.
    pub fn register_mutator(
        &self,
        point: PipelinePoint,
        handler: Arc<dyn Mutator>,
        options: Registration,
    ) -> Result<(), PipelineError> {
        if !point.is_mutator() {
            return Err(PipelineError::NotAMutatorPoint { point });
        }

        let mut inner = self.inner.lock();
        let entries = inner.mutators.entry(point).or_default();
        if let Some(id) = &options.id {
            if let Some(existing) = entries.iter_mut().find(|e| e.id.as_deref() == Some(id)) {
                existing.handler = handler;
                existing.priority = options.priority;
                return Ok(());
            }
        }

        let order = inner.next_order;
        inner.next_order += 1;
        inner
            .mutators
            .entry(point)
            .or_default()
            .push(MutatorEntry {
                id: options.id,
                priority: options.priority,
                order,
                handler,
            });
        Ok(())
    }

    /// Register a middleware handler.
    pub fn register_middleware(
        &self,
        point: PipelinePoint,
        handler: Arc<dyn Middleware>,
        options: Registration,
    ) -> Result<(), PipelineError> {
        if !point.is_middleware() {
            return Err(PipelineError::NotAMiddlewarePoint { point });
        }

        let mut inner = self.inner.lock();
        let entries = inner.middlewares.entry(point).or_default();
        if let Some(id) = &options.id {
            if let Some(existing) = entries.iter_mut().find(|e| e.id.as_deref() == Some(id)) {
                existing.handler = handler;
                existing.priority = options.priority;
                return Ok(());
            }
        }

        let order = inner.next_order;
        inner.next_order += 1;
        inner
            .middlewares
            .entry(point)
            .or_default()
            .push(MiddlewareEntry {
                id: options.id,
                priority: options.priority,
                order,
                handler,
            });
        Ok(())
    }

    /// Number of handlers registered at a point.
    pub fn handler_count(&self, point: PipelinePoint) -> usize {
        let inner = self.inner.lock();
        if point.is_middleware() {
            inner.middlewares.get(&point).map_or(0, Vec::len)
        } else {
            inner.mutators.get(&point).map_or(0, Vec::len)
        }
    }

    /// Remove all handlers at a point.
    pub fn clear_point(&self, point: PipelinePoint) {
        let mut inner = self.inner.lock();
        inner.mutators.remove(&point);
        inner.middlewares.remove(&point);
    }

    fn sorted_mutators(&self, point: PipelinePoint) -> Vec<Arc<dyn Mutator>> {
        let inner = self.inner.lock();
        let Some(entries) = inner.mutators.get(&point) else {
            return Vec::new();
        };
        let mut sorted: Vec<(i32, u64, Arc<dyn Mutator>)> = entries
            .iter()
            .map(|e| (e.priority, e.order, Arc::clone(&e.handler)))
            .collect();
        sorted.sort_by_key(|(priority, order, _)| (*priority, *order));
        sorted.into_iter().map(|(_, _, h)| h).collect()
    }

    fn sorted_middlewares(&self, point: PipelinePoint) -> Vec<Arc<dyn Middleware>> {
        let inner = self.inner.lock();
        let Some(entries) = inner.middlewares.get(&point) else {
            return Vec::new();
        };
        let mut sorted: Vec<(i32, u64, Arc<dyn Middleware>)> = entries
            .iter()
            .map(|e| (e.priority, e.order, Arc::clone(&e.handler)))
            .collect();
        sorted.sort_by_key(|(priority, order, _)| (*priority, *order));
        sorted.into_iter().map(|(_, _, h)| h).collect()
    }

    /// Run the mutator chain at `point`, strictly sequentially.
    ///
    /// A handler error aborts the remainder and propagates.
    pub async fn run_mutators(
        &self,
        point: PipelinePoint,
        mut ctx: PointContext,
    ) -> Result<PointContext, PipelineError> {
        if !point.is_mutator() {
            return Err(PipelineError::NotAMutatorPoint { point });
        }

        for handler in self.sorted_mutators(point) {
            ctx = handler
                .apply(ctx)
                .await
                .map_err(|e| PipelineError::Handler {
                    point,
                    message: e.to_string(),
                })?;
        }
        Ok(ctx)
    }

    /// Run the middleware onion at `point` around `core`.
    ///
    /// Layers compose from the innermost core outward; ascending priority
    /// order places lower priorities on the outside.
    pub async fn run_middleware(
        &self,
        point: PipelinePoint,
        ctx: PointContext,
        core: &dyn CoreOperation,
    ) -> Result<MiddlewareOutput, PipelineError> {
        if !point.is_middleware() {
            return Err(PipelineError::NotAMiddlewarePoint { point });
        }

        let chain = self.sorted_middlewares(point);
        let next = Next {
            chain: &chain,
            core,
        };
        next.run(ctx).await.map_err(|e| PipelineError::Handler {
            point,
            message: e.to_string(),
        })
    }
}

struct FnMutator<F>(F);

#[async_trait]
impl<F> Mutator for FnMutator<F>
where
    F: Fn(PointContext) -> HandlerResult<PointContext> + Send + Sync,
{
    async fn apply(&self, ctx: PointContext) -> HandlerResult<PointContext> {
        (self.0)(ctx)
    }
}

/// Wrap a synchronous closure as a mutator handler.
pub fn mutator_fn<F>(f: F) -> Arc<dyn Mutator>
where
    F: Fn(PointContext) -> HandlerResult<PointContext> + Send + Sync + 'static,
{
    Arc::new(FnMutator(f))
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
