//! Async driver: feeds one machine from an inbox on a single tokio task.
//!
//! # Architecture
//!
//! ```text
//! transport / clients → inbox (mpsc) ─┐
//! election deadline ──────────────────┼→ driver loop → RaftMachine::handle
//! heartbeat interval (leader only) ───┘        ↓
//!                                     outbox (mpsc) ← MachineOutput
//!                                     NodeStatus (RwLock) ← status after each message
//! ```
//!
//! Every message for the group passes through the one task, which gives the
//! single total order the machine requires.
//!
//! # Shutdown
//! The loop exits when either:
//! - Shutdown signal is received
//! - All inbox senders are dropped
//! - The machine reports a fatal error (returned from [`NodeHandle::join`])

use crate::config::RaftConfig;
use crate::error::{RaftError, Result};
use crate::log::RaftLog;
use crate::machine::{MachineOutput, NodeStatus, RaftMachine};
use crate::message::{MessageKind, RaftMessage};
use crate::state::ReadableRaftState;
use crate::types::Role;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

/// Handle to a running node.
pub struct NodeHandle {
    inbox: mpsc::Sender<RaftMessage>,
    status: Arc<RwLock<NodeStatus>>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl NodeHandle {
    /// Queue a message for the node.
    pub async fn send(&self, message: RaftMessage) -> Result<()> {
        self.inbox
            .send(message)
            .await
            .map_err(|_| RaftError::ChannelClosed)
    }

    /// A sender for transports that deliver into this node.
    pub fn inbox(&self) -> mpsc::Sender<RaftMessage> {
        self.inbox.clone()
    }

    /// Latest published status.
    pub fn status(&self) -> NodeStatus {
        self.status.read().clone()
    }

    /// Signal the loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for the loop to exit.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = ?e, "Driver task panicked or was cancelled");
                Err(RaftError::ChannelClosed)
            }
        }
    }
}

/// Spawn a driver task for `machine`.
///
/// Outputs that carry anything are published to `outbox`. Fails if `config`
/// does not validate.
pub fn spawn_node<L>(
    machine: RaftMachine<L>,
    config: &RaftConfig,
    outbox: mpsc::Sender<MachineOutput>,
) -> Result<NodeHandle>
where
    L: RaftLog + Send + 'static,
{
    config
        .validate()
        .map_err(|reason| RaftError::Config { reason })?;

    let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let status = Arc::new(RwLock::new(machine.status()));

    let task = tokio::spawn(driver_loop(
        machine,
        config.clone(),
        inbox_rx,
        outbox,
        status.clone(),
        shutdown_rx,
    ));

    Ok(NodeHandle {
        inbox: inbox_tx,
        status,
        shutdown_tx,
        task,
    })
}

async fn driver_loop<L: RaftLog>(
    mut machine: RaftMachine<L>,
    config: RaftConfig,
    mut inbox: mpsc::Receiver<RaftMessage>,
    outbox: mpsc::Sender<MachineOutput>,
    status: Arc<RwLock<NodeStatus>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let myself = machine.state().myself().clone();
    let election_deadline = time::sleep(config.random_election_timeout());
    tokio::pin!(election_deadline);
    let mut heartbeat = time::interval(config.heartbeat_interval);

    tracing::info!(member = %myself, "Driver started");

    loop {
        let message = tokio::select! {
            received = inbox.recv() => {
                match received {
                    Some(message) => message,
                    None => {
                        tracing::debug!(member = %myself, "Inbox closed, exiting driver loop");
                        break;
                    }
                }
            }
            _ = &mut election_deadline => {
                election_deadline
                    .as_mut()
                    .reset(Instant::now() + config.random_election_timeout());
                RaftMessage::new(myself.clone(), MessageKind::ElectionTimeout)
            }
            _ = heartbeat.tick() => {
                if machine.role() != Role::Leader {
                    continue;
                }
                RaftMessage::new(myself.clone(), MessageKind::HeartbeatTimeout)
            }
            _ = shutdown_rx.recv() => {
                tracing::info!(member = %myself, "Driver shutting down");
                break;
            }
        };

        let output = machine.handle(message)?;
        *status.write() = machine.status();

        if output.renew_election_timeout {
            election_deadline
                .as_mut()
                .reset(Instant::now() + config.random_election_timeout());
        }

        if !output.is_empty() && outbox.send(output).await.is_err() {
            tracing::debug!(member = %myself, "Outbox closed, exiting driver loop");
            return Err(RaftError::ChannelClosed);
        }
    }

    Ok(())
}
