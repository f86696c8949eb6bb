//! Outcome of handling one message.
//!
//! An [`Outcome`] starts as a copy of the relevant parts of the state view and
//! collects every change a handler decides on: the next term/vote/leader/commit
//! values, log commands for storage, messages for the transport and ship
//! commands for the log shipper. Handlers never touch state directly; the
//! caller applies the outcome.
//!
//! # Application order
//!
//! ```text
//! term / vote / leader / commit fields
//!     ↓
//! log commands (in order)
//!     ↓
//! role transition
//!     ↓
//! outgoing messages + ship commands
//! ```

use crate::error::{RaftError, Result};
use crate::log::{RaftLog, ReadableLog};
use crate::message::Directed;
use crate::state::{FollowerStates, ReadableRaftState};
use crate::types::*;
use std::collections::BTreeSet;

/// A change to the local log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogCommand {
    /// Append one entry at `index` (must be the next index).
    Append { index: LogIndex, entry: LogEntry },

    /// Append `entries`; the first lands at `base_index + offset`.
    ///
    /// `base_index` is where the originating batch started and `offset` how
    /// many of its leading entries were already present.
    BatchAppend {
        base_index: LogIndex,
        offset: usize,
        entries: Vec<LogEntry>,
    },

    /// Delete every entry at or after `from_index`.
    Truncate { from_index: LogIndex },

    /// Discard entries up to and including `up_to`.
    Prune { up_to: LogIndex },
}

impl LogCommand {
    /// Apply this command to a log.
    pub fn apply_to<L: RaftLog + ?Sized>(&self, log: &mut L) -> Result<()> {
        match self {
            LogCommand::Append { index, entry } => {
                expect_next(log, *index)?;
                log.append(std::slice::from_ref(entry))?;
            }
            LogCommand::BatchAppend {
                base_index,
                offset,
                entries,
            } => {
                expect_next(log, base_index.plus(*offset))?;
                log.append(entries)?;
            }
            LogCommand::Truncate { from_index } => log.truncate(*from_index)?,
            LogCommand::Prune { up_to } => {
                log.prune(*up_to)?;
            }
        }
        Ok(())
    }
}

/// Check that `commands` apply cleanly, in order, to `log` as it stands.
///
/// Tracks the append and prev indices the commands would produce without
/// touching the log: appends must be contiguous and truncation must stay above
/// the compaction point.
pub fn check_log_commands<L: ReadableLog + ?Sized>(
    log: &L,
    commands: &[LogCommand],
) -> Result<()> {
    let mut prev_index = log.prev_index();
    let mut append_index = log.append_index();

    for command in commands {
        match command {
            LogCommand::Append { index, .. } => {
                check_next(append_index, *index)?;
                append_index = *index;
            }
            LogCommand::BatchAppend {
                base_index,
                offset,
                entries,
            } => {
                check_next(append_index, base_index.plus(*offset))?;
                append_index = append_index.plus(entries.len());
            }
            LogCommand::Truncate { from_index } => {
                if *from_index <= prev_index {
                    return Err(RaftError::IndexBeforeLog {
                        index: *from_index,
                        prev_index,
                    });
                }
                if *from_index <= append_index {
                    append_index = from_index.prev();
                }
            }
            LogCommand::Prune { up_to } => {
                prev_index = prev_index.max((*up_to).min(append_index));
            }
        }
    }
    Ok(())
}

fn expect_next<L: RaftLog + ?Sized>(log: &L, index: LogIndex) -> Result<()> {
    check_next(log.append_index(), index)
}

fn check_next(append_index: LogIndex, index: LogIndex) -> Result<()> {
    let expected = append_index.next();
    if index != expected {
        return Err(RaftError::NonContiguousAppend {
            expected,
            actual: index,
        });
    }
    Ok(())
}

/// Instruction for the log shipper (replication pacing collaborator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipCommand {
    /// The leader appended entries after (`prev_log_index`, `prev_log_term`).
    NewEntries {
        prev_log_index: LogIndex,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
    },

    /// `target` matches the leader's log up to `new_index`.
    MatchProgress { target: MemberId, new_index: LogIndex },

    /// `target` rejected an append; resume from its reported append index.
    MismatchProgress {
        target: MemberId,
        last_remote_append_index: LogIndex,
    },

    /// The commit index moved.
    CommitUpdated,
}

/// Accumulated result of handling one message.
#[derive(Debug, Clone)]
pub struct Outcome {
    role: Role,
    term: Term,
    leader: Option<MemberId>,
    leader_commit: LogIndex,
    voted_for: Option<MemberId>,
    commit_index: LogIndex,

    renew_election_timeout: bool,
    needs_fresh_snapshot: bool,
    is_pre_election: bool,
    elected_leader: bool,
    stepping_down: Option<Term>,

    votes_for_me: BTreeSet<MemberId>,
    pre_votes_for_me: BTreeSet<MemberId>,
    heartbeat_responses: BTreeSet<MemberId>,
    last_log_index_before_becoming_leader: LogIndex,
    follower_states: FollowerStates,

    log_commands: Vec<LogCommand>,
    outgoing_messages: Vec<Directed>,
    ship_commands: Vec<ShipCommand>,
}

impl Outcome {
    /// Seed an outcome from the state view for a member currently in `role`.
    ///
    /// Role-scoped accumulators only carry over while they are meaningful:
    /// votes for a candidate, pre-votes during a follower's pre-election,
    /// heartbeat responses and follower progress for a leader.
    pub fn new<S: ReadableRaftState + ?Sized>(role: Role, state: &S) -> Self {
        let is_leader = role == Role::Leader;
        Self {
            role,
            term: state.term(),
            leader: state.leader().cloned(),
            leader_commit: state.leader_commit(),
            voted_for: state.voted_for().cloned(),
            commit_index: state.commit_index(),
            renew_election_timeout: false,
            needs_fresh_snapshot: false,
            is_pre_election: state.is_pre_election(),
            elected_leader: false,
            stepping_down: None,
            votes_for_me: if role == Role::Candidate {
                state.votes_for_me().clone()
            } else {
                BTreeSet::new()
            },
            pre_votes_for_me: if role == Role::Follower && state.is_pre_election() {
                state.pre_votes_for_me().clone()
            } else {
                BTreeSet::new()
            },
            heartbeat_responses: if is_leader {
                state.heartbeat_responses().clone()
            } else {
                BTreeSet::new()
            },
            last_log_index_before_becoming_leader: state.last_log_index_before_becoming_leader(),
            follower_states: if is_leader {
                state.follower_states().clone()
            } else {
                FollowerStates::new()
            },
            log_commands: Vec::new(),
            outgoing_messages: Vec::new(),
            ship_commands: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn term(&self) -> Term {
        self.term
    }

    pub fn leader(&self) -> Option<&MemberId> {
        self.leader.as_ref()
    }

    pub fn leader_commit(&self) -> LogIndex {
        self.leader_commit
    }

    pub fn voted_for(&self) -> Option<&MemberId> {
        self.voted_for.as_ref()
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn needs_renewed_election_timeout(&self) -> bool {
        self.renew_election_timeout
    }

    pub fn needs_fresh_snapshot(&self) -> bool {
        self.needs_fresh_snapshot
    }

    pub fn is_pre_election(&self) -> bool {
        self.is_pre_election
    }

    /// True if this outcome makes the member leader.
    pub fn is_elected_leader(&self) -> bool {
        self.elected_leader
    }

    /// The term in which the leader stepped down, if it did.
    pub fn stepping_down(&self) -> Option<Term> {
        self.stepping_down
    }

    pub fn votes_for_me(&self) -> &BTreeSet<MemberId> {
        &self.votes_for_me
    }

    pub fn pre_votes_for_me(&self) -> &BTreeSet<MemberId> {
        &self.pre_votes_for_me
    }

    pub fn heartbeat_responses(&self) -> &BTreeSet<MemberId> {
        &self.heartbeat_responses
    }

    pub fn last_log_index_before_becoming_leader(&self) -> LogIndex {
        self.last_log_index_before_becoming_leader
    }

    pub fn follower_states(&self) -> &FollowerStates {
        &self.follower_states
    }

    pub fn log_commands(&self) -> &[LogCommand] {
        &self.log_commands
    }

    pub fn outgoing_messages(&self) -> &[Directed] {
        &self.outgoing_messages
    }

    pub fn ship_commands(&self) -> &[ShipCommand] {
        &self.ship_commands
    }

    /// Split into the parts dispatched after the state is written.
    pub fn into_dispatch(self) -> (Vec<Directed>, Vec<ShipCommand>) {
        (self.outgoing_messages, self.ship_commands)
    }

    pub(crate) fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    /// Adopt a term. Terms never go backwards; a higher term clears the vote.
    pub(crate) fn set_next_term(&mut self, term: Term) {
        debug_assert!(term >= self.term, "term must not decrease");
        if term > self.term {
            self.term = term;
            self.voted_for = None;
        }
    }

    pub(crate) fn set_leader(&mut self, leader: Option<MemberId>) {
        self.leader = leader;
    }

    pub(crate) fn set_leader_commit(&mut self, leader_commit: LogIndex) {
        self.leader_commit = leader_commit;
    }

    pub(crate) fn set_voted_for(&mut self, voted_for: Option<MemberId>) {
        self.voted_for = voted_for;
    }

    /// Raise the commit index (never lowers it).
    pub(crate) fn set_commit_index(&mut self, commit_index: LogIndex) {
        if commit_index > self.commit_index {
            self.commit_index = commit_index;
        }
    }

    pub(crate) fn renew_election_timeout(&mut self) {
        self.renew_election_timeout = true;
    }

    pub(crate) fn mark_need_for_fresh_snapshot(&mut self) {
        self.needs_fresh_snapshot = true;
    }

    pub(crate) fn set_pre_election(&mut self, is_pre_election: bool) {
        self.is_pre_election = is_pre_election;
    }

    pub(crate) fn elected_leader(&mut self) {
        self.elected_leader = true;
    }

    pub(crate) fn step_down(&mut self) {
        self.stepping_down = Some(self.term);
        self.role = Role::Follower;
        self.leader = None;
    }

    pub(crate) fn add_vote_for_me(&mut self, voter: MemberId) {
        self.votes_for_me.insert(voter);
    }

    pub(crate) fn clear_votes_for_me(&mut self) {
        self.votes_for_me.clear();
    }

    pub(crate) fn add_pre_vote_for_me(&mut self, voter: MemberId) {
        self.pre_votes_for_me.insert(voter);
    }

    pub(crate) fn clear_pre_votes_for_me(&mut self) {
        self.pre_votes_for_me.clear();
    }

    pub(crate) fn add_heartbeat_response(&mut self, from: MemberId) {
        self.heartbeat_responses.insert(from);
    }

    pub(crate) fn clear_heartbeat_responses(&mut self) {
        self.heartbeat_responses.clear();
    }

    pub(crate) fn set_last_log_index_before_becoming_leader(&mut self, index: LogIndex) {
        self.last_log_index_before_becoming_leader = index;
    }

    pub(crate) fn follower_states_mut(&mut self) -> &mut FollowerStates {
        &mut self.follower_states
    }

    pub(crate) fn add_log_command(&mut self, command: LogCommand) {
        self.log_commands.push(command);
    }

    pub(crate) fn add_outgoing_message(&mut self, message: Directed) {
        self.outgoing_messages.push(message);
    }

    pub(crate) fn add_ship_command(&mut self, command: ShipCommand) {
        self.ship_commands.push(command);
    }
}
