// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator configuration.
//!
//! Desired agents and connectors come from the resolved swarm config (the
//! bundle loader is an external collaborator); timing knobs are plain data
//! so deployments can tune them without code changes.

use crate::backoff::BackoffPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub swarm_name: String,
    /// Agents that must have a live process; reconciliation enforces this.
    pub desired_agents: Vec<String>,
    /// Connector processes supervised alongside the agents.
    #[serde(default)]
    pub desired_connectors: Vec<String>,
    pub reconcile_interval_ms: u64,
    pub default_grace_period_ms: u64,
    pub backoff: BackoffPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            swarm_name: "default".to_string(),
            desired_agents: Vec::new(),
            desired_connectors: Vec::new(),
            reconcile_interval_ms: 5_000,
            default_grace_period_ms: 30_000,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn named(swarm_name: impl Into<String>) -> Self {
        Self {
            swarm_name: swarm_name.into(),
            ..Self::default()
        }
    }

    pub fn with_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.desired_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_connectors<I, S>(mut self, connectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.desired_connectors = connectors.into_iter().map(Into::into).collect();
        self
    }
}
