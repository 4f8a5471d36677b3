// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-sourced conversation state.
//!
//! The history is a base message list plus a staged event list; the
//! projected view (`next_messages`) is always `fold(base, events)`,
//! recomputed rather than cached across new events. `fold_events_to_base`
//! is the only mutation of the base, intended once per turn boundary.

use crate::message::{Message, MessageEvent, MessageId, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Non-fatal anomaly observed while folding events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationWarning {
    pub code: String,
    pub message: String,
    pub event_index: usize,
    pub target_id: MessageId,
}

impl ConversationWarning {
    fn target_not_found(kind: &str, event_index: usize, target_id: &MessageId) -> Self {
        Self {
            code: "E_MESSAGE_TARGET_NOT_FOUND".to_string(),
            message: format!("{} target not found: {}", kind, target_id),
            event_index,
            target_id: target_id.clone(),
        }
    }
}

/// Result of folding an event list over a base.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldOutcome {
    pub messages: Vec<Message>,
    pub warnings: Vec<ConversationWarning>,
}

/// Pure fold of `events` over `base`.
///
/// Rules: `append` pushes to the tail; `replace` substitutes the FIRST
/// matching id only (absent id is a warning no-op, a second match is never
/// touched); `remove` filters the first matching id; `truncate` discards
/// everything accumulated so far; order-sensitive, the last one in the
/// list wins.
pub fn fold(base: &[Message], events: &[MessageEvent]) -> FoldOutcome {
    let mut current: Vec<Message> = base.to_vec();
    let mut warnings = Vec::new();

    for (event_index, event) in events.iter().enumerate() {
        match event {
            MessageEvent::Append { message } => {
                current.push(message.clone());
            }
            MessageEvent::Replace { target_id, message } => {
                match current.iter().position(|m| m.id == *target_id) {
                    Some(index) => current[index] = message.clone(),
                    None => warnings.push(ConversationWarning::target_not_found(
                        "replace",
                        event_index,
                        target_id,
                    )),
                }
            }
            MessageEvent::Remove { target_id } => {
                match current.iter().position(|m| m.id == *target_id) {
                    Some(index) => {
                        current.remove(index);
                    }
                    None => warnings.push(ConversationWarning::target_not_found(
                        "remove",
                        event_index,
                        target_id,
                    )),
                }
            }
            MessageEvent::Truncate => {
                current.clear();
            }
        }
    }

    FoldOutcome {
        messages: current,
        warnings,
    }
}

/// Expand a removal set to a transcript-integrity fixpoint.
///
/// A surviving tool-result message whose tool-call id does not resolve to
/// the nearest preceding surviving assistant message joins the set; repeat
/// until stable. Model providers reject transcripts with dangling
/// tool-result references, so trimming must never leave one behind.
pub fn expand_removal_set(messages: &[Message], seed: &HashSet<MessageId>) -> HashSet<MessageId> {
    let mut removal: HashSet<MessageId> = seed.clone();

    loop {
        let mut grew = false;
        let mut preceding_assistant: Option<&Message> = None;

        for message in messages {
            if removal.contains(&message.id) {
                continue;
            }

            if message.data.role == Role::Assistant {
                preceding_assistant = Some(message);
                continue;
            }

            let Some(call_id) = message.answered_tool_call_id() else {
                continue;
            };

            let resolved = preceding_assistant
                .map(|a| a.data.tool_calls.iter().any(|c| c.id == *call_id))
                .unwrap_or(false);

            if !resolved {
                removal.insert(message.id.clone());
                grew = true;
            }
        }

        if !grew {
            return removal;
        }
    }
}

/// Event-sourced conversation state owned by one turn execution at a time.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    base: Vec<Message>,
    events: Vec<MessageEvent>,
    warnings: Vec<ConversationWarning>,
}

impl ConversationState {
    pub fn new(base: Vec<Message>) -> Self {
        Self {
            base,
            events: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Base messages as committed at the last fold.
    pub fn base_messages(&self) -> &[Message] {
        &self.base
    }

    /// Events staged since the last fold.
    pub fn events(&self) -> &[MessageEvent] {
        &self.events
    }

    /// Warnings produced by the currently staged events.
    pub fn warnings(&self) -> &[ConversationWarning] {
        &self.warnings
    }

    /// Projected message list: `fold(base, events)`.
    pub fn next_messages(&self) -> Vec<Message> {
        fold(&self.base, &self.events).messages
    }

    /// Stage one event and refresh warnings.
    pub fn emit(&mut self, event: MessageEvent) {
        self.events.push(event);
        self.warnings = fold(&self.base, &self.events).warnings;
    }

    /// Stage one event and return the projected messages.
    pub fn apply(&mut self, event: MessageEvent) -> Vec<Message> {
        self.emit(event);
        self.next_messages()
    }

    /// Commit staged events into the base and clear them.
    ///
    /// Intended once per turn boundary; idempotent afterward since the
    /// event list is empty.
    pub fn fold_events_to_base(&mut self) {
        let outcome = fold(&self.base, &self.events);
        self.base = outcome.messages;
        self.events.clear();
        self.warnings.clear();
    }

    /// Reset the base (e.g. after loading persisted history), discarding
    /// staged events.
    pub fn replace_base(&mut self, messages: Vec<Message>) {
        self.base = messages;
        self.events.clear();
        self.warnings.clear();
    }

    /// Remove messages by id, expanding the set to the integrity fixpoint
    /// first. Returns the ids actually removed.
    pub fn remove_messages(&mut self, targets: &[MessageId]) -> Vec<MessageId> {
        let current = self.next_messages();
        let seed: HashSet<MessageId> = targets.iter().cloned().collect();
        let expanded = expand_removal_set(&current, &seed);

        // Emit removals in transcript order so the fold stays deterministic.
        let mut removed = Vec::new();
        for message in &current {
            if expanded.contains(&message.id) {
                removed.push(message.id.clone());
                self.emit(MessageEvent::Remove {
                    target_id: message.id.clone(),
                });
            }
        }
        removed
    }
}

#[cfg(test)]
#[path = "conversation_tests.rs"]
mod tests;
