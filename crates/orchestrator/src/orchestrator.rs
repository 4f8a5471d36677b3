// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The orchestrator: spawn, route, reconcile, back off, shut down.
//!
//! Single owner of all process state. Crashes are absorbed into backoff
//! bookkeeping and never propagate; reconciliation runs on a timer and
//! synchronously after exits; graceful shutdown is a request/ack handshake
//! with a grace-period fallback to a hard kill.

use crate::backoff::BackoffPolicy;
use crate::config::OrchestratorConfig;
use crate::handle::{AgentProcessHandle, ProcessStatus};
use crate::process::{ExitStatus, ProcessLink, ProcessSpawner, Signal, SpawnError};
use hive_core::{Clock, IpcKind, IpcMessage, JsonObject, ShutdownPayload, ShutdownReason};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("unknown agent instance {agent_name}:{instance_key}")]
    UnknownInstance {
        agent_name: String,
        instance_key: String,
    },
}

/// One planned or executed spawn/respawn during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileAction {
    pub agent_name: String,
    pub instance_key: String,
}

/// One termination decided by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminateAction {
    pub name: String,
    pub reason: String,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub to_spawn: Vec<ReconcileAction>,
    pub to_terminate: Vec<TerminateAction>,
    pub to_respawn: Vec<ReconcileAction>,
}

/// Options for one graceful shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownOptions {
    pub grace_period_ms: Option<u64>,
    pub reason: ShutdownReason,
}

impl Default for ShutdownOptions {
    fn default() -> Self {
        Self {
            grace_period_ms: None,
            reason: ShutdownReason::OrchestratorShutdown,
        }
    }
}

struct ShutdownState {
    seq: u64,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

struct AgentState {
    pid: u32,
    agent_name: String,
    instance_key: String,
    status: ProcessStatus,
    consecutive_crashes: u32,
    next_spawn_allowed_at_epoch_ms: Option<u64>,
    link: Option<Arc<dyn ProcessLink>>,
    generation: u64,
    shutdown: Option<ShutdownState>,
}

impl AgentState {
    fn new(agent_name: &str, instance_key: &str) -> Self {
        Self {
            pid: 0,
            agent_name: agent_name.to_string(),
            instance_key: instance_key.to_string(),
            status: ProcessStatus::Spawning,
            consecutive_crashes: 0,
            next_spawn_allowed_at_epoch_ms: None,
            link: None,
            generation: 0,
            shutdown: None,
        }
    }

    fn snapshot(&self) -> AgentProcessHandle {
        AgentProcessHandle {
            pid: self.pid,
            agent_name: self.agent_name.clone(),
            instance_key: self.instance_key.clone(),
            status: self.status,
            consecutive_crashes: self.consecutive_crashes,
            next_spawn_allowed_at_epoch_ms: self.next_spawn_allowed_at_epoch_ms,
        }
    }
}

struct ConnectorState {
    pid: u32,
    link: Option<Arc<dyn ProcessLink>>,
    generation: u64,
}

/// Pending inter-agent request, keyed by correlation id. Responses route
/// back through this table instead of carrying continuations on the wire.
struct PendingRequest {
    requester: String,
    requester_instance_key: String,
    call_chain: Vec<String>,
}

struct Inner<C: Clock> {
    config: OrchestratorConfig,
    spawner: Box<dyn ProcessSpawner>,
    clock: C,
    agents: Mutex<HashMap<String, AgentState>>,
    connectors: Mutex<HashMap<String, ConnectorState>>,
    pending_requests: Mutex<HashMap<String, PendingRequest>>,
    shutting_down: AtomicBool,
    seq: AtomicU64,
}

/// Supervises one process per (agent name, instance key).
pub struct Orchestrator<C: Clock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for Orchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn agent_key(agent_name: &str, instance_key: &str) -> String {
    format!("{}:{}", agent_name, instance_key)
}

impl<C: Clock + 'static> Orchestrator<C> {
    pub fn new(config: OrchestratorConfig, spawner: Box<dyn ProcessSpawner>, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                spawner,
                clock,
                agents: Mutex::new(HashMap::new()),
                connectors: Mutex::new(HashMap::new()),
                pending_requests: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
                seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn swarm_name(&self) -> &str {
        &self.inner.config.swarm_name
    }

    fn backoff(&self) -> &BackoffPolicy {
        &self.inner.config.backoff
    }

    fn next_seq(&self) -> u64 {
        self.inner.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    // -- spawning ---------------------------------------------------------

    /// Ensure a live process for the pair and return its handle snapshot.
    /// Spawn failures surface synchronously.
    pub fn spawn(
        &self,
        agent_name: &str,
        instance_key: &str,
    ) -> Result<AgentProcessHandle, OrchestratorError> {
        let key = agent_key(agent_name, instance_key);
        let mut agents = self.inner.agents.lock();

        if let Some(state) = agents.get_mut(&key) {
            if state.link.is_none() {
                self.spawn_into(state)?;
            }
            return Ok(state.snapshot());
        }

        let mut state = AgentState::new(agent_name, instance_key);
        self.spawn_into(&mut state)?;
        let snapshot = state.snapshot();
        agents.insert(key, state);
        Ok(snapshot)
    }

    fn spawn_into(&self, state: &mut AgentState) -> Result<(), SpawnError> {
        let spawned = self
            .inner
            .spawner
            .spawn_agent(&state.agent_name, &state.instance_key)?;
        let generation = self.next_seq();

        state.pid = spawned.pid;
        state.link = Some(Arc::clone(&spawned.link));
        state.status = ProcessStatus::Spawning;
        state.next_spawn_allowed_at_epoch_ms = None;
        state.generation = generation;

        tracing::info!(
            swarm = %self.inner.config.swarm_name,
            agent = %state.agent_name,
            instance_key = %state.instance_key,
            pid = spawned.pid,
            "agent process spawned"
        );

        self.pump_agent(
            state.agent_name.clone(),
            state.instance_key.clone(),
            generation,
            spawned.messages,
            spawned.exit,
        );
        Ok(())
    }

    fn pump_agent(
        &self,
        agent_name: String,
        instance_key: String,
        generation: u64,
        mut messages: mpsc::UnboundedReceiver<IpcMessage>,
        exit: oneshot::Receiver<ExitStatus>,
    ) {
        let router = self.clone();
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                router.route(message);
            }
        });

        let watcher = self.clone();
        tokio::spawn(async move {
            let status = exit.await.unwrap_or(ExitStatus { code: None });
            watcher.on_agent_exit(&agent_name, &instance_key, generation, status);
            // Crashes and shutdowns trigger a synchronous reconciliation on
            // top of the periodic one.
            watcher.reconcile().await;
        });
    }

    fn on_agent_exit(
        &self,
        agent_name: &str,
        instance_key: &str,
        generation: u64,
        status: ExitStatus,
    ) {
        let mut agents = self.inner.agents.lock();
        let Some(state) = agents.get_mut(&agent_key(agent_name, instance_key)) else {
            return;
        };
        if state.generation != generation {
            // Exit of an already-replaced process.
            return;
        }

        state.link = None;

        let planned = matches!(
            state.status,
            ProcessStatus::Draining | ProcessStatus::Terminated
        );
        if planned || status.clean() {
            state.status = ProcessStatus::Terminated;
            state.consecutive_crashes = 0;
            state.next_spawn_allowed_at_epoch_ms = None;
            // A drained process that exited before acking still completes
            // the handshake.
            if let Some(shutdown) = state.shutdown.take() {
                let _ = shutdown.done_tx.send(true);
            }
            return;
        }

        state.consecutive_crashes += 1;
        tracing::warn!(
            agent = %state.agent_name,
            instance_key = %state.instance_key,
            exit_code = ?status.code,
            consecutive_crashes = state.consecutive_crashes,
            "agent process crashed"
        );

        if self.backoff().is_crash_looping(state.consecutive_crashes) {
            state.status = ProcessStatus::CrashLoopBackOff;
            state.next_spawn_allowed_at_epoch_ms = None;
            tracing::warn!(
                agent = %state.agent_name,
                instance_key = %state.instance_key,
                consecutive_crashes = state.consecutive_crashes,
                crash_threshold = self.backoff().crash_threshold,
                "crash loop backoff, automatic respawn halted"
            );
        } else {
            let backoff_ms = self.backoff().backoff_ms(state.consecutive_crashes);
            state.status = ProcessStatus::Crashed;
            state.next_spawn_allowed_at_epoch_ms =
                Some(self.inner.clock.epoch_ms() + backoff_ms);
        }
    }

    // -- reconciliation ---------------------------------------------------

    /// Diff desired against actual and act on the difference.
    pub async fn reconcile(&self) -> ReconciliationResult {
        let mut result = ReconciliationResult::default();
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return result;
        }

        // Desired agents with no state at all get a fresh default instance.
        for agent_name in self.inner.config.desired_agents.clone() {
            if self.has_state_for_agent(&agent_name) {
                continue;
            }
            match self.spawn(&agent_name, "default") {
                Ok(_) => result.to_spawn.push(ReconcileAction {
                    agent_name,
                    instance_key: "default".to_string(),
                }),
                Err(error) => {
                    tracing::error!(agent = %agent_name, error = %error, "reconcile spawn failed");
                }
            }
        }

        self.reconcile_connectors(&mut result);

        // Undesired instances drain gracefully; crashed ones past their
        // backoff window respawn.
        let keys: Vec<String> = self.inner.agents.lock().keys().cloned().collect();
        for key in keys {
            let Some((agent_name, instance_key, status, next_allowed)) = ({
                let agents = self.inner.agents.lock();
                agents.get(&key).map(|s| {
                    (
                        s.agent_name.clone(),
                        s.instance_key.clone(),
                        s.status,
                        s.next_spawn_allowed_at_epoch_ms,
                    )
                })
            }) else {
                continue;
            };

            if !self.inner.config.desired_agents.contains(&agent_name) {
                result.to_terminate.push(TerminateAction {
                    name: agent_name.clone(),
                    reason: "not_in_desired_state".to_string(),
                });
                self.shutdown(
                    &agent_name,
                    &instance_key,
                    ShutdownOptions {
                        grace_period_ms: None,
                        reason: ShutdownReason::ConfigChange,
                    },
                )
                .await;
                self.inner.agents.lock().remove(&key);
                continue;
            }

            if status == ProcessStatus::Crashed {
                let window_open = next_allowed
                    .map(|at| self.inner.clock.epoch_ms() >= at)
                    .unwrap_or(true);
                if !window_open {
                    continue;
                }

                let respawned = {
                    let mut agents = self.inner.agents.lock();
                    match agents.get_mut(&key) {
                        Some(state) => self.spawn_into(state).is_ok(),
                        None => false,
                    }
                };
                if respawned {
                    result.to_respawn.push(ReconcileAction {
                        agent_name,
                        instance_key,
                    });
                }
            }
            // CrashLoopBackOff stays down until an explicit restart().
        }

        result
    }

    fn reconcile_connectors(&self, result: &mut ReconciliationResult) {
        for name in self.inner.config.desired_connectors.clone() {
            let needs_spawn = {
                let connectors = self.inner.connectors.lock();
                connectors.get(&name).map_or(true, |c| c.link.is_none())
            };
            if needs_spawn {
                if let Err(error) = self.spawn_connector(&name) {
                    tracing::error!(connector = %name, error = %error, "connector spawn failed");
                }
            }
        }

        let undesired: Vec<String> = {
            let connectors = self.inner.connectors.lock();
            connectors
                .keys()
                .filter(|name| !self.inner.config.desired_connectors.contains(*name))
                .cloned()
                .collect()
        };
        for name in undesired {
            result.to_terminate.push(TerminateAction {
                name: name.clone(),
                reason: "connector_not_in_desired_state".to_string(),
            });
            let mut connectors = self.inner.connectors.lock();
            if let Some(state) = connectors.remove(&name) {
                if let Some(link) = state.link {
                    link.kill(Signal::Term);
                }
            }
        }
    }

    fn spawn_connector(&self, name: &str) -> Result<(), SpawnError> {
        let spawned = self.inner.spawner.spawn_connector(name)?;
        let generation = self.next_seq();

        {
            let mut connectors = self.inner.connectors.lock();
            connectors.insert(
                name.to_string(),
                ConnectorState {
                    pid: spawned.pid,
                    link: Some(Arc::clone(&spawned.link)),
                    generation,
                },
            );
        }
        tracing::info!(connector = name, pid = spawned.pid, "connector process spawned");

        let router = self.clone();
        let mut messages = spawned.messages;
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                router.route(message);
            }
        });

        let watcher = self.clone();
        let name = name.to_string();
        let exit = spawned.exit;
        tokio::spawn(async move {
            let _ = exit.await;
            let mut connectors = watcher.inner.connectors.lock();
            if let Some(state) = connectors.get_mut(&name) {
                if state.generation == generation {
                    state.link = None;
                }
            }
        });
        Ok(())
    }

    fn has_state_for_agent(&self, agent_name: &str) -> bool {
        self.inner
            .agents
            .lock()
            .values()
            .any(|s| s.agent_name == agent_name)
    }

    /// Reconcile forever on the configured interval.
    pub async fn run_reconcile_loop(&self) {
        let mut interval = tokio::time::interval(Duration::from_millis(
            self.inner.config.reconcile_interval_ms.max(1),
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                return;
            }
            self.reconcile().await;
        }
    }

    // -- restart / shutdown ----------------------------------------------

    /// Gracefully stop all instances of an agent, clear crash tracking,
    /// and spawn them again. The only way out of crash-loop backoff.
    pub async fn restart(&self, agent_name: &str) {
        let keys: Vec<(String, String)> = {
            let agents = self.inner.agents.lock();
            agents
                .values()
                .filter(|s| s.agent_name == agent_name)
                .map(|s| (s.agent_name.clone(), s.instance_key.clone()))
                .collect()
        };

        for (name, instance_key) in keys {
            self.shutdown(
                &name,
                &instance_key,
                ShutdownOptions {
                    grace_period_ms: None,
                    reason: ShutdownReason::Restart,
                },
            )
            .await;

            let mut agents = self.inner.agents.lock();
            if let Some(state) = agents.get_mut(&agent_key(&name, &instance_key)) {
                state.consecutive_crashes = 0;
                state.next_spawn_allowed_at_epoch_ms = None;
                if let Err(error) = self.spawn_into(state) {
                    tracing::error!(agent = %name, error = %error, "restart spawn failed");
                }
            }
        }
    }

    /// Graceful shutdown handshake for one instance.
    ///
    /// Resolves exactly once: on a matching `shutdown_ack`, or on grace
    /// expiry followed by a hard kill. Concurrent calls for one handle
    /// share the same completion.
    pub async fn shutdown(
        &self,
        agent_name: &str,
        instance_key: &str,
        options: ShutdownOptions,
    ) {
        let key = agent_key(agent_name, instance_key);
        let grace_ms = options
            .grace_period_ms
            .unwrap_or(self.inner.config.default_grace_period_ms);

        let mut done_rx = {
            let mut agents = self.inner.agents.lock();
            let Some(state) = agents.get_mut(&key) else {
                return;
            };

            if state.link.is_none() {
                state.status = ProcessStatus::Terminated;
                state.consecutive_crashes = 0;
                state.next_spawn_allowed_at_epoch_ms = None;
                return;
            }

            if let Some(shutdown) = &state.shutdown {
                // Join the in-flight handshake.
                shutdown.done_rx.clone()
            } else {
                let seq = self.next_seq();
                let (done_tx, done_rx) = watch::channel(false);

                state.status = ProcessStatus::Draining;
                if let Some(link) = &state.link {
                    link.send(IpcMessage::shutdown(
                        "orchestrator",
                        &state.agent_name,
                        &ShutdownPayload {
                            grace_period_ms: grace_ms,
                            reason: options.reason,
                        },
                    ));
                }
                state.shutdown = Some(ShutdownState {
                    seq,
                    done_tx,
                    done_rx: done_rx.clone(),
                });

                let enforcer = self.clone();
                let timer_key = key.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(grace_ms)).await;
                    if enforcer.finalize_shutdown(&timer_key, seq, true) {
                        tracing::warn!(
                            instance = %timer_key,
                            grace_ms,
                            "shutdown grace period expired, killed"
                        );
                    }
                });

                done_rx
            }
        };

        loop {
            if *done_rx.borrow_and_update() {
                return;
            }
            if done_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Complete a pending handshake. Returns false if it was already
    /// settled (or superseded), so ack and grace-timer paths can race
    /// safely: only one of them wins.
    fn finalize_shutdown(&self, key: &str, seq: u64, forced: bool) -> bool {
        let mut agents = self.inner.agents.lock();
        let Some(state) = agents.get_mut(key) else {
            return false;
        };
        let Some(shutdown) = &state.shutdown else {
            return false;
        };
        if shutdown.seq != seq {
            return false;
        }

        let shutdown = match state.shutdown.take() {
            Some(shutdown) => shutdown,
            None => return false,
        };

        if let Some(link) = state.link.take() {
            link.kill(if forced { Signal::Kill } else { Signal::Term });
        }
        state.status = ProcessStatus::Terminated;
        state.consecutive_crashes = 0;
        state.next_spawn_allowed_at_epoch_ms = None;
        let _ = shutdown.done_tx.send(true);
        true
    }

    /// Stop everything: reconciliation, all agents, all connectors.
    pub async fn shutdown_all(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let keys: Vec<(String, String)> = {
            let agents = self.inner.agents.lock();
            agents
                .values()
                .map(|s| (s.agent_name.clone(), s.instance_key.clone()))
                .collect()
        };
        for (agent_name, instance_key) in keys {
            self.shutdown(&agent_name, &instance_key, ShutdownOptions::default())
                .await;
        }

        let mut connectors = self.inner.connectors.lock();
        for (_, state) in connectors.drain() {
            if let Some(link) = state.link {
                link.kill(Signal::Term);
            }
        }
        tracing::info!(swarm = %self.inner.config.swarm_name, "orchestrator shutdown complete");
    }

    // -- inspection -------------------------------------------------------

    pub fn handle(&self, agent_name: &str, instance_key: &str) -> Option<AgentProcessHandle> {
        self.inner
            .agents
            .lock()
            .get(&agent_key(agent_name, instance_key))
            .map(AgentState::snapshot)
    }

    pub fn handles(&self) -> Vec<AgentProcessHandle> {
        self.inner
            .agents
            .lock()
            .values()
            .map(AgentState::snapshot)
            .collect()
    }

    /// Send a message to a live instance.
    pub fn send(
        &self,
        agent_name: &str,
        instance_key: &str,
        message: IpcMessage,
    ) -> Result<(), OrchestratorError> {
        let agents = self.inner.agents.lock();
        let link = agents
            .get(&agent_key(agent_name, instance_key))
            .and_then(|s| s.link.clone());
        match link {
            Some(link) => {
                link.send(message);
                Ok(())
            }
            None => Err(OrchestratorError::UnknownInstance {
                agent_name: agent_name.to_string(),
                instance_key: instance_key.to_string(),
            }),
        }
    }

    // -- routing ----------------------------------------------------------

    /// Dispatch one IPC message. Malformed payloads and unknown targets
    /// are dropped and logged, never errors.
    pub fn route(&self, message: IpcMessage) {
        match message.kind {
            IpcKind::ShutdownAck => self.handle_shutdown_ack(&message),
            IpcKind::Shutdown => {
                tracing::warn!(from = %message.from, "unexpected shutdown message at orchestrator");
            }
            IpcKind::Event => self.route_event(message),
        }
    }

    fn handle_shutdown_ack(&self, message: &IpcMessage) {
        let key = match message.payload_instance_key() {
            Some(instance_key) => Some(agent_key(&message.from, instance_key)),
            None => {
                // Fall back to the unique draining instance of the sender.
                let agents = self.inner.agents.lock();
                let mut draining = agents.values().filter(|s| {
                    s.agent_name == message.from && s.status == ProcessStatus::Draining
                });
                match (draining.next(), draining.next()) {
                    (Some(state), None) => {
                        Some(agent_key(&state.agent_name, &state.instance_key))
                    }
                    _ => None,
                }
            }
        };

        let Some(key) = key else {
            tracing::warn!(from = %message.from, "shutdown_ack with no matching instance, dropped");
            return;
        };

        let seq = {
            let agents = self.inner.agents.lock();
            agents
                .get(&key)
                .and_then(|s| s.shutdown.as_ref())
                .map(|s| s.seq)
        };
        if let Some(seq) = seq {
            if self.finalize_shutdown(&key, seq, false) {
                tracing::info!(instance = %key, "shutdown acknowledged");
            }
        }
    }

    fn route_event(&self, message: IpcMessage) {
        let Some(payload) = message.payload_object().cloned() else {
            tracing::warn!(from = %message.from, "dropping IPC event with non-object payload");
            return;
        };

        // Responses to earlier requests route via the pending table.
        if let Some(in_reply_to) = payload
            .get("metadata")
            .and_then(|m| m.get("in_reply_to"))
            .and_then(|v| v.as_str())
        {
            self.route_response(&message, payload.clone(), in_reply_to);
            return;
        }

        // Requests register a pending entry and get cycle-checked.
        if let Some((target_hint, correlation_id)) = extract_reply_to(&payload) {
            self.route_request(&message, payload, target_hint, correlation_id);
            return;
        }

        if message.to == "orchestrator" {
            self.handle_local_event(&message, &payload);
            return;
        }

        // Fire-and-forget delivery.
        let instance_key = payload_instance_key(&payload);
        self.deliver(&message.to, &instance_key, message.clone());
    }

    fn route_request(
        &self,
        message: &IpcMessage,
        mut payload: JsonObject,
        reply_target: String,
        correlation_id: String,
    ) {
        let target = if message.to != "orchestrator" {
            message.to.clone()
        } else {
            match payload.get("target").and_then(|v| v.as_str()) {
                Some(target) => target.to_string(),
                None => {
                    tracing::warn!(from = %message.from, "request with no resolvable target, dropped");
                    return;
                }
            }
        };

        let mut call_chain = extract_call_chain(&payload);
        call_chain.push(message.from.clone());

        if call_chain.iter().any(|hop| *hop == target) {
            let mut chain = call_chain.clone();
            chain.push(target.clone());
            self.send_error_response(
                &reply_target,
                &correlation_id,
                &message.from,
                "CIRCULAR_CALL_DETECTED",
                &format!("Circular call detected: {}", chain.join(" -> ")),
            );
            return;
        }

        let requester_instance_key = self.find_instance_key_for_agent(&reply_target);
        self.inner.pending_requests.lock().insert(
            correlation_id,
            PendingRequest {
                requester: reply_target,
                requester_instance_key,
                call_chain: call_chain.clone(),
            },
        );

        payload.insert("call_chain".to_string(), json!(call_chain));
        let instance_key = payload_instance_key(&payload);
        let forwarded = IpcMessage {
            kind: IpcKind::Event,
            from: message.from.clone(),
            to: target.clone(),
            payload: serde_json::Value::Object(payload),
        };
        self.deliver(&target, &instance_key, forwarded);
    }

    fn route_response(&self, message: &IpcMessage, payload: JsonObject, in_reply_to: &str) {
        let pending = self.inner.pending_requests.lock().remove(in_reply_to);

        if let Some(pending) = pending {
            let forwarded = IpcMessage {
                kind: IpcKind::Event,
                from: message.from.clone(),
                to: pending.requester.clone(),
                payload: serde_json::Value::Object(payload),
            };
            self.deliver(&pending.requester, &pending.requester_instance_key, forwarded);
            return;
        }

        // No pending entry: fall back to an explicit reply target, then to
        // the addressed recipient.
        if let Some((target, _)) = extract_reply_to(&payload) {
            let instance_key = payload_instance_key(&payload);
            let forwarded = IpcMessage {
                kind: IpcKind::Event,
                from: message.from.clone(),
                to: target.clone(),
                payload: serde_json::Value::Object(payload),
            };
            self.deliver(&target, &instance_key, forwarded);
            return;
        }

        if message.to != "orchestrator" {
            let instance_key = payload_instance_key(&payload);
            self.deliver(&message.to.clone(), &instance_key, message.clone());
            return;
        }

        tracing::debug!(in_reply_to, "response with no pending request, dropped");
    }

    fn handle_local_event(&self, message: &IpcMessage, payload: &JsonObject) {
        let event_type = payload.get("type").and_then(|v| v.as_str()).unwrap_or("");
        let instance_key = payload_instance_key(payload);

        match event_type {
            "agent_ready" => {
                self.update_status(&message.from, &instance_key, ProcessStatus::Idle);
            }
            "agent_status" => {
                let status = match payload.get("status").and_then(|v| v.as_str()) {
                    Some("processing") => ProcessStatus::Processing,
                    Some("idle") => ProcessStatus::Idle,
                    _ => return,
                };
                self.update_status(&message.from, &instance_key, status);
            }
            "spawn_request" => {
                let Some(target) = payload.get("target").and_then(|v| v.as_str()) else {
                    return;
                };
                let key = payload
                    .get("instance_key")
                    .and_then(|v| v.as_str())
                    .unwrap_or("default");
                if let Err(error) = self.spawn(target, key) {
                    tracing::error!(target, error = %error, "spawn_request failed");
                }
            }
            other => {
                tracing::debug!(from = %message.from, event_type = other, "unhandled orchestrator event");
            }
        }
    }

    fn update_status(&self, agent_name: &str, instance_key: &str, status: ProcessStatus) {
        let mut agents = self.inner.agents.lock();
        if let Some(state) = agents.get_mut(&agent_key(agent_name, instance_key)) {
            // Never let status chatter override a drain or crash record.
            if state.status.is_live() {
                state.status = status;
            }
        }
    }

    fn deliver(&self, target: &str, instance_key: &str, message: IpcMessage) {
        let key = agent_key(target, instance_key);
        let link = {
            let agents = self.inner.agents.lock();
            agents
                .get(&key)
                .or_else(|| agents.values().find(|s| s.agent_name == target))
                .and_then(|s| s.link.clone())
        };

        if let Some(link) = link {
            link.send(message);
            return;
        }

        // A desired agent without a live process gets spawned on demand.
        if self.inner.config.desired_agents.iter().any(|a| a == target) {
            match self.spawn(target, instance_key) {
                Ok(_) => {
                    let agents = self.inner.agents.lock();
                    if let Some(link) = agents.get(&key).and_then(|s| s.link.clone()) {
                        link.send(message);
                    }
                }
                Err(error) => {
                    tracing::error!(target, error = %error, "on-demand spawn for delivery failed");
                }
            }
            return;
        }

        tracing::warn!(target, "message for unknown target, dropped");
    }

    fn send_error_response(
        &self,
        requester: &str,
        correlation_id: &str,
        from: &str,
        code: &str,
        error_message: &str,
    ) {
        let mut payload = JsonObject::new();
        payload.insert(
            "id".to_string(),
            json!(format!("err-{}", uuid::Uuid::new_v4())),
        );
        payload.insert("type".to_string(), json!("error_response"));
        payload.insert("source".to_string(), json!({"kind": "agent", "name": from}));
        payload.insert(
            "metadata".to_string(),
            json!({
                "in_reply_to": correlation_id,
                "error_code": code,
                "error_message": error_message,
            }),
        );

        let instance_key = self.find_instance_key_for_agent(requester);
        let message = IpcMessage::event("orchestrator", requester, payload);
        self.deliver(requester, &instance_key, message);
    }

    fn find_instance_key_for_agent(&self, agent_name: &str) -> String {
        self.inner
            .agents
            .lock()
            .values()
            .find(|s| s.agent_name == agent_name)
            .map(|s| s.instance_key.clone())
            .unwrap_or_else(|| "default".to_string())
    }
}

fn payload_instance_key(payload: &JsonObject) -> String {
    payload
        .get("instance_key")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("default")
        .to_string()
}

fn extract_reply_to(payload: &JsonObject) -> Option<(String, String)> {
    let reply_to = payload.get("reply_to")?.as_object()?;
    let target = reply_to.get("target")?.as_str()?;
    let correlation_id = reply_to.get("correlation_id")?.as_str()?;
    Some((target.to_string(), correlation_id.to_string()))
}

fn extract_call_chain(payload: &JsonObject) -> Vec<String> {
    payload
        .get("call_chain")
        .and_then(|v| v.as_array())
        .map(|chain| {
            chain
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
