// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent process handle snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one supervised agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Spawning,
    Idle,
    Processing,
    Draining,
    Terminated,
    Crashed,
    CrashLoopBackOff,
}

impl ProcessStatus {
    /// Statuses eligible for respawn consideration during reconciliation.
    pub fn is_crashed(&self) -> bool {
        matches!(self, ProcessStatus::Crashed | ProcessStatus::CrashLoopBackOff)
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Spawning | ProcessStatus::Idle | ProcessStatus::Processing
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Spawning => write!(f, "spawning"),
            ProcessStatus::Idle => write!(f, "idle"),
            ProcessStatus::Processing => write!(f, "processing"),
            ProcessStatus::Draining => write!(f, "draining"),
            ProcessStatus::Terminated => write!(f, "terminated"),
            ProcessStatus::Crashed => write!(f, "crashed"),
            ProcessStatus::CrashLoopBackOff => write!(f, "crash_loop_back_off"),
        }
    }
}

/// Point-in-time view of one supervised process, as consumed by instance
/// reporting. The orchestrator owns the mutable state; handles are
/// snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProcessHandle {
    pub pid: u32,
    pub agent_name: String,
    pub instance_key: String,
    pub status: ProcessStatus,
    pub consecutive_crashes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_spawn_allowed_at_epoch_ms: Option<u64>,
}

#[cfg(test)]
#[path = "handle_tests.rs"]
mod tests;
