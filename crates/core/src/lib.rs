// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hive-core: data model for the Hive swarm runtime.
//!
//! Pure types shared by the per-agent execution engine and the host-side
//! orchestrator: identifiers, agent events, conversation messages and their
//! event-sourced state, tool call/result shapes, turn/step records, the
//! per-instance event queue, and the IPC envelope.

pub mod clock;
pub mod conversation;
pub mod event;
pub mod id;
pub mod ipc;
pub mod message;
pub mod policy;
pub mod queue;
pub mod tool;
pub mod turn;

pub use clock::{Clock, FakeClock, SystemClock};
pub use conversation::{
    expand_removal_set, fold, ConversationState, ConversationWarning, FoldOutcome,
};
pub use event::{AgentEvent, EventSource, EventSourceKind, ReplyTo};
pub use id::{IdGen, SequentialIdGen, ShortId, UuidIdGen};
pub use ipc::{IpcKind, IpcMessage, ProtocolError, ShutdownPayload, ShutdownReason};
pub use message::{JsonObject, Message, MessageData, MessageEvent, MessageId, MessageSource, Role};
pub use policy::TurnPolicy;
pub use queue::AgentEventQueue;
pub use tool::{
    truncate_error_message, ToolCall, ToolCallId, ToolCatalogItem, ToolError, ToolResult,
    ToolResultStatus, ToolSource, DEFAULT_ERROR_MESSAGE_LIMIT,
};
pub use turn::{
    ContextBlock, FinishReason, Step, StepStatus, Turn, TurnId, TurnResult, TurnStatus,
};
