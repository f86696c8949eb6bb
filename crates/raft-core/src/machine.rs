//! Raft machine: runs the role handler for the current role and applies the
//! outcome.
//!
//! # Application order
//!
//! ```text
//! roles::handle(role, message, state) → Outcome   (pure; fatal errors stop here)
//!     ↓
//! RaftState::update(&outcome)                     (fields, then log commands)
//!     ↓
//! role = outcome.role()                           (transition)
//!     ↓
//! MachineOutput { messages, ship_commands, .. }   (for transport / log shipper)
//! ```

use crate::error::Result;
use crate::log::{RaftLog, ReadableLog};
use crate::message::{Directed, RaftMessage};
use crate::outcome::ShipCommand;
use crate::roles;
use crate::state::{RaftState, ReadableRaftState};
use crate::types::*;
use raft_observe::{obs_count, obs_gauge, Meter, RaftEvt, RaftKind, VizEvent};
use std::sync::Arc;

/// Everything the caller must dispatch after one message was applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineOutput {
    /// Messages for the transport
    pub messages: Vec<Directed>,

    /// Commands for the log shipper
    pub ship_commands: Vec<ShipCommand>,

    /// Reset the election timer
    pub renew_election_timeout: bool,

    /// Our log is too far behind the leader's; a snapshot must be fetched
    pub needs_fresh_snapshot: bool,
}

impl MachineOutput {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
            && self.ship_commands.is_empty()
            && !self.renew_election_timeout
            && !self.needs_fresh_snapshot
    }
}

/// Point-in-time view of a member, for callers and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub myself: MemberId,
    pub role: Role,
    pub term: Term,
    pub leader: Option<MemberId>,
    pub commit_index: LogIndex,
    pub append_index: LogIndex,
}

/// A member's role and state, advanced one message at a time.
///
/// Not thread-safe by itself: exactly one message is handled at a time
/// (the driver feeds it from a single task).
pub struct RaftMachine<L: RaftLog> {
    role: Role,
    state: RaftState<L>,
    shard_id: u32,
    meter: Arc<dyn Meter>,
}

impl<L: RaftLog> RaftMachine<L> {
    /// New machine starting as follower.
    pub fn new(state: RaftState<L>, shard_id: u32, meter: Arc<dyn Meter>) -> Self {
        Self {
            role: Role::Follower,
            state,
            shard_id,
            meter,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> &RaftState<L> {
        &self.state
    }

    /// Mutable state access for membership changes and snapshot installs.
    pub fn state_mut(&mut self) -> &mut RaftState<L> {
        &mut self.state
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            myself: self.state.myself().clone(),
            role: self.role,
            term: self.state.term(),
            leader: self.state.leader().cloned(),
            commit_index: self.state.commit_index(),
            append_index: self.state.log().append_index(),
        }
    }

    /// Handle one message and apply the outcome.
    ///
    /// On a handler error, or when the log cannot take the outcome, nothing
    /// is applied and the role is unchanged (see [`RaftState::update`]).
    /// Fatal errors ([`RaftError::is_fatal`](crate::RaftError::is_fatal))
    /// mean this member must stop.
    pub fn handle(&mut self, message: RaftMessage) -> Result<MachineOutput> {
        let kind = message.kind.name();
        let outcome = match roles::handle(self.role, &message, &self.state) {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_fatal() {
                    tracing::error!(
                        member = %self.state.myself(),
                        role = %self.role,
                        term = %self.state.term(),
                        message = kind,
                        error = %e,
                        "Fatal protocol violation"
                    );
                }
                return Err(e);
            }
        };

        let previous_role = self.role;
        let previous_term = self.state.term();
        let previous_commit = self.state.commit_index();
        let was_pre_election = self.state.is_pre_election();

        self.state.update(&outcome)?;
        self.role = outcome.role();

        obs_count!(self.meter, "raft_messages_handled", &[], 1);

        if previous_role != self.role {
            tracing::info!(
                member = %self.state.myself(),
                from = %previous_role,
                to = %self.role,
                term = %self.state.term(),
                "Role transition"
            );
        }

        let myself = self.state.myself();
        let tag = member_tag(myself);
        if self.state.term() > previous_term && self.state.voted_for() == Some(myself) {
            self.emit(RaftKind::ElectionStarted { node: tag });
        }
        if outcome.is_pre_election() && !was_pre_election {
            self.emit(RaftKind::PreElectionStarted { node: tag });
        }
        if outcome.is_elected_leader() {
            obs_count!(self.meter, "raft_leader_elections", &[], 1);
            self.emit(RaftKind::LeaderElected { node: tag });
        }
        if outcome.stepping_down().is_some() {
            self.emit(RaftKind::StepDown { node: tag });
        }
        if self.state.commit_index() > previous_commit {
            obs_gauge!(self.meter, "raft_commit_index", &[], self.state.commit_index().as_i64());
            self.emit(RaftKind::CommitAdvanced {
                index: self.state.commit_index().as_i64(),
            });
        }
        if outcome.needs_fresh_snapshot() {
            self.emit(RaftKind::SnapshotRequired { node: tag });
        }

        let renew_election_timeout = outcome.needs_renewed_election_timeout();
        let needs_fresh_snapshot = outcome.needs_fresh_snapshot();
        let (messages, ship_commands) = outcome.into_dispatch();

        Ok(MachineOutput {
            messages,
            ship_commands,
            renew_election_timeout,
            needs_fresh_snapshot,
        })
    }

    fn emit(&self, kind: RaftKind) {
        self.meter.emit(VizEvent::Raft(RaftEvt {
            shard: self.shard_id,
            term: self.state.term().as_i64(),
            kind,
        }));
    }
}

/// Numeric tag for a member in observability events.
fn member_tag(member: &MemberId) -> u32 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    member.as_str().hash(&mut hasher);
    hasher.finish() as u32
}
