// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turn execution policy.
//!
//! All knobs are configuration supplied by the (external) bundle loader;
//! the engine treats them as data and never hard-codes the limits.

use crate::tool::DEFAULT_ERROR_MESSAGE_LIMIT;
use serde::{Deserialize, Serialize};

/// Bounds and requirements applied to one turn execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnPolicy {
    /// Upper bound on steps per turn before the engine substitutes the
    /// step-limit response.
    pub max_steps_per_turn: usize,
    /// Tools that must be successfully called at least once before the turn
    /// ends; the step-limit message names the ones that never were.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_tools: Vec<String>,
    /// Deadline for one step, checked between phases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_ms: Option<u64>,
    /// Deadline for the whole turn, checked between steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_timeout_ms: Option<u64>,
    /// Cap on tool error messages forwarded to the model.
    pub error_message_limit: usize,
    /// Model identifier handed to the injected LLM caller.
    pub model: String,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self {
            max_steps_per_turn: 32,
            required_tools: Vec::new(),
            step_timeout_ms: None,
            turn_timeout_ms: None,
            error_message_limit: DEFAULT_ERROR_MESSAGE_LIMIT,
            model: "default".to_string(),
        }
    }
}

impl TurnPolicy {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps_per_turn = max_steps;
        self
    }

    pub fn with_required_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_tools = tools.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
