// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-handle contract.
//!
//! Actual OS process creation is an external collaborator; the
//! orchestrator only depends on this narrow surface: a way to send and
//! kill, plus streams of inbound messages and the eventual exit.

use hive_core::IpcMessage;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Termination signal. `Term` asks politely, `Kill` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code; `None` when the process died to a signal.
    pub code: Option<i32>,
}

impl ExitStatus {
    pub fn clean(&self) -> bool {
        self.code == Some(0)
    }
}

/// Spawn failures surface synchronously to the caller.
#[derive(Debug, Clone, Error)]
#[error("failed to spawn '{name}': {message}")]
pub struct SpawnError {
    pub name: String,
    pub message: String,
}

impl SpawnError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Outbound half of a managed child process.
pub trait ProcessLink: Send + Sync {
    /// Fire-and-forget send; a dead peer just drops the message.
    fn send(&self, message: IpcMessage);

    fn kill(&self, signal: Signal);
}

/// A freshly spawned child: identity, outbound link, and the inbound
/// message/exit streams the orchestrator pumps from its own tasks.
pub struct SpawnedProcess {
    pub pid: u32,
    pub link: Arc<dyn ProcessLink>,
    pub messages: mpsc::UnboundedReceiver<IpcMessage>,
    pub exit: oneshot::Receiver<ExitStatus>,
}

/// The external spawner contract.
pub trait ProcessSpawner: Send + Sync {
    fn spawn_agent(
        &self,
        agent_name: &str,
        instance_key: &str,
    ) -> Result<SpawnedProcess, SpawnError>;

    fn spawn_connector(&self, name: &str) -> Result<SpawnedProcess, SpawnError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! Scriptable fake processes for deterministic orchestration tests.

    use super::*;
    use parking_lot::Mutex;

    struct FakeLink {
        sent: Arc<Mutex<Vec<IpcMessage>>>,
        kills: Arc<Mutex<Vec<Signal>>>,
    }

    impl ProcessLink for FakeLink {
        fn send(&self, message: IpcMessage) {
            self.sent.lock().push(message);
        }

        fn kill(&self, signal: Signal) {
            self.kills.lock().push(signal);
        }
    }

    /// Test-side control over one fake child process.
    #[derive(Clone)]
    pub struct FakeProcessHandle {
        pub pid: u32,
        pub agent_name: String,
        pub instance_key: String,
        sent: Arc<Mutex<Vec<IpcMessage>>>,
        kills: Arc<Mutex<Vec<Signal>>>,
        message_tx: mpsc::UnboundedSender<IpcMessage>,
        exit_tx: Arc<Mutex<Option<oneshot::Sender<ExitStatus>>>>,
    }

    impl FakeProcessHandle {
        /// Messages the orchestrator sent to this process.
        pub fn sent(&self) -> Vec<IpcMessage> {
            self.sent.lock().clone()
        }

        /// Signals the orchestrator delivered.
        pub fn kills(&self) -> Vec<Signal> {
            self.kills.lock().clone()
        }

        /// Deliver a message from the process to the orchestrator.
        pub fn deliver(&self, message: IpcMessage) {
            let _ = self.message_tx.send(message);
        }

        /// Acknowledge a pending shutdown request.
        pub fn ack_shutdown(&self) {
            self.deliver(IpcMessage::shutdown_ack(
                &self.agent_name,
                "orchestrator",
                &self.instance_key,
            ));
        }

        /// Terminate the fake process with the given exit code.
        pub fn exit(&self, code: Option<i32>) {
            if let Some(tx) = self.exit_tx.lock().take() {
                let _ = tx.send(ExitStatus { code });
            }
        }
    }

    #[derive(Default)]
    struct FakeSpawnerState {
        handles: Vec<FakeProcessHandle>,
        spawn_error: Option<String>,
        next_pid: u32,
    }

    /// Records spawns and hands back controllable fake processes.
    #[derive(Clone, Default)]
    pub struct FakeSpawner {
        state: Arc<Mutex<FakeSpawnerState>>,
    }

    impl FakeSpawner {
        pub fn new() -> Self {
            Self::default()
        }

        /// All processes spawned so far, oldest first.
        pub fn handles(&self) -> Vec<FakeProcessHandle> {
            self.state.lock().handles.clone()
        }

        /// Latest process for an agent/instance pair.
        pub fn handle_for(&self, agent_name: &str, instance_key: &str) -> Option<FakeProcessHandle> {
            self.state
                .lock()
                .handles
                .iter()
                .rev()
                .find(|h| h.agent_name == agent_name && h.instance_key == instance_key)
                .cloned()
        }

        pub fn spawn_count(&self) -> usize {
            self.state.lock().handles.len()
        }

        /// Fail the next spawn with this message.
        pub fn set_spawn_error(&self, message: &str) {
            self.state.lock().spawn_error = Some(message.to_string());
        }

        fn spawn(&self, agent_name: &str, instance_key: &str) -> Result<SpawnedProcess, SpawnError> {
            let mut state = self.state.lock();
            if let Some(message) = state.spawn_error.take() {
                return Err(SpawnError::new(agent_name, message));
            }

            state.next_pid += 1;
            let pid = state.next_pid;

            let sent = Arc::new(Mutex::new(Vec::new()));
            let kills = Arc::new(Mutex::new(Vec::new()));
            let (message_tx, messages) = mpsc::unbounded_channel();
            let (exit_tx, exit) = oneshot::channel();

            let handle = FakeProcessHandle {
                pid,
                agent_name: agent_name.to_string(),
                instance_key: instance_key.to_string(),
                sent: Arc::clone(&sent),
                kills: Arc::clone(&kills),
                message_tx,
                exit_tx: Arc::new(Mutex::new(Some(exit_tx))),
            };
            state.handles.push(handle);

            Ok(SpawnedProcess {
                pid,
                link: Arc::new(FakeLink { sent, kills }),
                messages,
                exit,
            })
        }
    }

    impl ProcessSpawner for FakeSpawner {
        fn spawn_agent(
            &self,
            agent_name: &str,
            instance_key: &str,
        ) -> Result<SpawnedProcess, SpawnError> {
            self.spawn(agent_name, instance_key)
        }

        fn spawn_connector(&self, name: &str) -> Result<SpawnedProcess, SpawnError> {
            self.spawn(name, "connector")
        }
    }
}
