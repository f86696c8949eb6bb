//! raft-core: the Raft consensus core of a replicated cluster.
//!
//! Role state machine with:
//! - Leader election with randomized timeouts, and an optional pre-vote phase
//! - Log matching, conflict truncation and follower catch-up
//! - Quorum commit restricted to entries of the current term
//! - Heartbeat-driven commit propagation and leader step-down
//! - Admin-driven log pruning
//! - VizEvent observability integration
//!
//! # Shape
//!
//! Role handlers are pure: `roles::handle(role, &message, &state)` returns an
//! [`Outcome`] describing every change, and [`RaftState::update`] applies it.
//! [`RaftMachine`] ties the two together, and [`driver::spawn_node`] runs a
//! machine on a tokio task with election and heartbeat timers.
//!
//! ```text
//! RaftMessage → roles::{follower,candidate,leader}::handle → Outcome
//!                                                               ↓
//!                        RaftState::update ← fields, then LogCommands
//!                                                               ↓
//!                 MachineOutput { messages, ship_commands } → transport / shipper
//! ```
//!
//! Based on the Raft paper (Ongaro & Ousterhout, 2014) with pre-voting from
//! Ongaro's thesis.

pub mod appending;
pub mod config;
pub mod driver;
pub mod election;
pub mod error;
pub mod heart;
pub mod log;
pub mod machine;
pub mod message;
pub mod outcome;
pub mod quorum;
pub mod roles;
pub mod state;
pub mod types;
pub mod voting;

pub use config::RaftConfig;
pub use driver::{spawn_node, NodeHandle};
pub use error::{RaftError, Result};
pub use log::{InMemoryRaftLog, RaftLog, ReadableLog};
pub use machine::{MachineOutput, NodeStatus, RaftMachine};
pub use message::{Directed, MessageKind, RaftMessage};
pub use outcome::{LogCommand, Outcome, ShipCommand};
pub use state::{RaftState, RaftStateBuilder, ReadableRaftState};
pub use types::*;
