// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hive-orchestrator: host-side supervision of agent processes.
//!
//! One OS process per (agent name, instance key): spawn, IPC routing with
//! request/response correlation, graceful shutdown handshake, crash-loop
//! backoff, and periodic reconciliation of desired versus actual process
//! sets.

mod backoff;
mod config;
mod handle;
mod orchestrator;
mod process;

pub use backoff::BackoffPolicy;
pub use config::OrchestratorConfig;
pub use handle::{AgentProcessHandle, ProcessStatus};
pub use orchestrator::{
    Orchestrator, OrchestratorError, ReconcileAction, ReconciliationResult, ShutdownOptions,
    TerminateAction,
};
pub use process::{ExitStatus, ProcessLink, ProcessSpawner, Signal, SpawnError, SpawnedProcess};

#[cfg(feature = "test-support")]
pub use process::fake::{FakeProcessHandle, FakeSpawner};
