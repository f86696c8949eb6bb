//! Raft state: the read view handlers see and the concrete state that
//! outcomes are applied to.
//!
//! # Persistent State (survives crashes)
//!
//! - `term`: Latest term this member has seen
//! - `voted_for`: Candidate that received the vote in the current term
//! - `log`: Log entries (behind [`RaftLog`])
//!
//! # Volatile State (all members)
//!
//! - `commit_index`: Index of highest log entry known to be committed
//! - `leader` / `leader_commit`: Current leader and its advertised commit
//! - `votes_for_me` / `pre_votes_for_me`: Election accumulators
//!
//! # Volatile State (leaders only)
//!
//! - `follower_states`: For each follower, index of highest entry known to be replicated
//! - `heartbeat_responses`: Members that acknowledged a heartbeat since the last election timeout
//! - `last_log_index_before_becoming_leader`: Log tail at accession (pre-barrier)

use crate::config::RaftConfig;
use crate::error::Result;
use crate::log::{InMemoryRaftLog, RaftLog, ReadableLog};
use crate::outcome::{check_log_commands, Outcome};
use crate::types::*;
use std::collections::{BTreeMap, BTreeSet};

/// Replication progress of one follower, as seen by the leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowerState {
    /// Highest index known to match the leader's log
    pub match_index: LogIndex,
}

impl Default for FollowerState {
    fn default() -> Self {
        Self {
            match_index: LogIndex::NONE,
        }
    }
}

/// Leader-side progress table (`MemberId -> match index`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowerStates {
    states: BTreeMap<MemberId, FollowerState>,
}

impl FollowerStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress for `member` (`match_index == NONE` if untracked).
    pub fn get(&self, member: &MemberId) -> FollowerState {
        self.states.get(member).copied().unwrap_or_default()
    }

    /// Record a successful append response.
    ///
    /// The match index only moves forward. Returns true if it increased.
    pub fn on_success_response(&mut self, member: &MemberId, match_index: LogIndex) -> bool {
        let state = self.states.entry(member.clone()).or_default();
        if match_index > state.match_index {
            state.match_index = match_index;
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemberId, &FollowerState)> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

/// Read-only view of a member's Raft state, as handed to role handlers.
pub trait ReadableRaftState {
    fn myself(&self) -> &MemberId;

    /// Members whose votes and acknowledgements count towards a quorum.
    fn voting_members(&self) -> &BTreeSet<MemberId>;

    /// Members the leader replicates to (may include non-voting learners).
    fn replication_members(&self) -> &BTreeSet<MemberId>;

    fn term(&self) -> Term;

    fn leader(&self) -> Option<&MemberId>;

    fn leader_commit(&self) -> LogIndex;

    fn voted_for(&self) -> Option<&MemberId>;

    fn votes_for_me(&self) -> &BTreeSet<MemberId>;

    fn pre_votes_for_me(&self) -> &BTreeSet<MemberId>;

    fn heartbeat_responses(&self) -> &BTreeSet<MemberId>;

    fn last_log_index_before_becoming_leader(&self) -> LogIndex;

    fn follower_states(&self) -> &FollowerStates;

    fn entry_log(&self) -> &dyn ReadableLog;

    fn commit_index(&self) -> LogIndex;

    fn supports_pre_voting(&self) -> bool;

    fn is_pre_election(&self) -> bool;

    fn refuses_to_be_leader(&self) -> bool;
}

/// Concrete Raft state over a log `L`.
#[derive(Debug, Clone)]
pub struct RaftState<L = InMemoryRaftLog> {
    myself: MemberId,
    voting_members: BTreeSet<MemberId>,
    replication_members: BTreeSet<MemberId>,

    term: Term,
    voted_for: Option<MemberId>,
    leader: Option<MemberId>,
    leader_commit: LogIndex,
    commit_index: LogIndex,

    votes_for_me: BTreeSet<MemberId>,
    pre_votes_for_me: BTreeSet<MemberId>,
    heartbeat_responses: BTreeSet<MemberId>,
    last_log_index_before_becoming_leader: LogIndex,
    follower_states: FollowerStates,

    supports_pre_voting: bool,
    refuses_to_be_leader: bool,
    is_pre_election: bool,

    log: L,
}

impl<L: RaftLog> RaftState<L> {
    /// Apply an outcome: fields first, then log commands in order.
    ///
    /// Role-scoped accumulators are dropped when the next role no longer
    /// uses them.
    ///
    /// The log commands are checked against the log before any field is
    /// written, so an outcome the log cannot take leaves the state untouched.
    /// If the log itself then fails a command, the fields are restored; the
    /// commands already applied stay in the log.
    pub fn update(&mut self, outcome: &Outcome) -> Result<()> {
        check_log_commands(&self.log, outcome.log_commands())?;

        let saved = AppliedFields::capture(self);
        self.apply_fields(outcome);

        for command in outcome.log_commands() {
            if let Err(e) = command.apply_to(&mut self.log) {
                saved.restore(self);
                return Err(e);
            }
        }

        Ok(())
    }

    fn apply_fields(&mut self, outcome: &Outcome) {
        let next_role = outcome.role();

        self.term = outcome.term();
        self.voted_for = outcome.voted_for().cloned();
        self.leader = outcome.leader().cloned();
        self.leader_commit = outcome.leader_commit();
        self.commit_index = self.commit_index.max(outcome.commit_index());
        self.is_pre_election = outcome.is_pre_election();
        self.last_log_index_before_becoming_leader =
            outcome.last_log_index_before_becoming_leader();

        if next_role == Role::Candidate {
            self.votes_for_me = outcome.votes_for_me().clone();
        } else {
            self.votes_for_me.clear();
        }

        if next_role == Role::Follower && outcome.is_pre_election() {
            self.pre_votes_for_me = outcome.pre_votes_for_me().clone();
        } else {
            self.pre_votes_for_me.clear();
        }

        if next_role == Role::Leader {
            self.heartbeat_responses = outcome.heartbeat_responses().clone();
            self.follower_states = outcome.follower_states().clone();
        } else {
            self.heartbeat_responses.clear();
            self.follower_states.clear();
        }
    }

    /// Replace the membership sets (membership provider hook).
    pub fn set_members(
        &mut self,
        voting_members: BTreeSet<MemberId>,
        replication_members: BTreeSet<MemberId>,
    ) {
        self.voting_members = voting_members;
        self.replication_members = replication_members;
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }
}

/// The fields [`RaftState::update`] writes, kept to undo a failed update.
struct AppliedFields {
    term: Term,
    voted_for: Option<MemberId>,
    leader: Option<MemberId>,
    leader_commit: LogIndex,
    commit_index: LogIndex,
    is_pre_election: bool,
    last_log_index_before_becoming_leader: LogIndex,
    votes_for_me: BTreeSet<MemberId>,
    pre_votes_for_me: BTreeSet<MemberId>,
    heartbeat_responses: BTreeSet<MemberId>,
    follower_states: FollowerStates,
}

impl AppliedFields {
    fn capture<L>(state: &RaftState<L>) -> Self {
        Self {
            term: state.term,
            voted_for: state.voted_for.clone(),
            leader: state.leader.clone(),
            leader_commit: state.leader_commit,
            commit_index: state.commit_index,
            is_pre_election: state.is_pre_election,
            last_log_index_before_becoming_leader: state.last_log_index_before_becoming_leader,
            votes_for_me: state.votes_for_me.clone(),
            pre_votes_for_me: state.pre_votes_for_me.clone(),
            heartbeat_responses: state.heartbeat_responses.clone(),
            follower_states: state.follower_states.clone(),
        }
    }

    fn restore<L>(self, state: &mut RaftState<L>) {
        state.term = self.term;
        state.voted_for = self.voted_for;
        state.leader = self.leader;
        state.leader_commit = self.leader_commit;
        state.commit_index = self.commit_index;
        state.is_pre_election = self.is_pre_election;
        state.last_log_index_before_becoming_leader = self.last_log_index_before_becoming_leader;
        state.votes_for_me = self.votes_for_me;
        state.pre_votes_for_me = self.pre_votes_for_me;
        state.heartbeat_responses = self.heartbeat_responses;
        state.follower_states = self.follower_states;
    }
}

impl<L: RaftLog> ReadableRaftState for RaftState<L> {
    fn myself(&self) -> &MemberId {
        &self.myself
    }

    fn voting_members(&self) -> &BTreeSet<MemberId> {
        &self.voting_members
    }

    fn replication_members(&self) -> &BTreeSet<MemberId> {
        &self.replication_members
    }

    fn term(&self) -> Term {
        self.term
    }

    fn leader(&self) -> Option<&MemberId> {
        self.leader.as_ref()
    }

    fn leader_commit(&self) -> LogIndex {
        self.leader_commit
    }

    fn voted_for(&self) -> Option<&MemberId> {
        self.voted_for.as_ref()
    }

    fn votes_for_me(&self) -> &BTreeSet<MemberId> {
        &self.votes_for_me
    }

    fn pre_votes_for_me(&self) -> &BTreeSet<MemberId> {
        &self.pre_votes_for_me
    }

    fn heartbeat_responses(&self) -> &BTreeSet<MemberId> {
        &self.heartbeat_responses
    }

    fn last_log_index_before_becoming_leader(&self) -> LogIndex {
        self.last_log_index_before_becoming_leader
    }

    fn follower_states(&self) -> &FollowerStates {
        &self.follower_states
    }

    fn entry_log(&self) -> &dyn ReadableLog {
        &self.log
    }

    fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    fn supports_pre_voting(&self) -> bool {
        self.supports_pre_voting
    }

    fn is_pre_election(&self) -> bool {
        self.is_pre_election
    }

    fn refuses_to_be_leader(&self) -> bool {
        self.refuses_to_be_leader
    }
}

/// Builder for [`RaftState`], used at bootstrap and heavily in tests.
///
/// Voting and replication members default to `{myself}`; replication members
/// default to the voting members when only those are given.
#[derive(Debug, Clone)]
pub struct RaftStateBuilder {
    myself: MemberId,
    voting_members: BTreeSet<MemberId>,
    replication_members: Option<BTreeSet<MemberId>>,
    term: Term,
    voted_for: Option<MemberId>,
    leader: Option<MemberId>,
    leader_commit: LogIndex,
    commit_index: LogIndex,
    votes_for_me: BTreeSet<MemberId>,
    pre_votes_for_me: BTreeSet<MemberId>,
    heartbeat_responses: BTreeSet<MemberId>,
    last_log_index_before_becoming_leader: LogIndex,
    follower_states: FollowerStates,
    supports_pre_voting: bool,
    refuses_to_be_leader: bool,
    is_pre_election: bool,
    log: InMemoryRaftLog,
}

fn member_set(ids: &[&str]) -> BTreeSet<MemberId> {
    ids.iter().map(|id| MemberId::new(*id)).collect()
}

impl RaftStateBuilder {
    pub fn new(myself: MemberId) -> Self {
        let mut voting_members = BTreeSet::new();
        voting_members.insert(myself.clone());
        Self {
            myself,
            voting_members,
            replication_members: None,
            term: Term::ZERO,
            voted_for: None,
            leader: None,
            leader_commit: LogIndex::NONE,
            commit_index: LogIndex::NONE,
            votes_for_me: BTreeSet::new(),
            pre_votes_for_me: BTreeSet::new(),
            heartbeat_responses: BTreeSet::new(),
            last_log_index_before_becoming_leader: LogIndex::NONE,
            follower_states: FollowerStates::new(),
            supports_pre_voting: false,
            refuses_to_be_leader: false,
            is_pre_election: false,
            log: InMemoryRaftLog::new(),
        }
    }

    /// Builder seeded with the protocol flags of a config.
    pub fn from_config(myself: MemberId, config: &RaftConfig) -> Self {
        Self::new(myself)
            .supports_pre_voting(config.supports_pre_voting)
            .refuses_to_be_leader(config.refuses_to_be_leader)
    }

    pub fn voting_members(mut self, members: &[&str]) -> Self {
        self.voting_members = member_set(members);
        self
    }

    pub fn voting_member_set(mut self, members: BTreeSet<MemberId>) -> Self {
        self.voting_members = members;
        self
    }

    pub fn replication_members(mut self, members: &[&str]) -> Self {
        self.replication_members = Some(member_set(members));
        self
    }

    pub fn term(mut self, term: Term) -> Self {
        self.term = term;
        self
    }

    pub fn voted_for(mut self, candidate: MemberId) -> Self {
        self.voted_for = Some(candidate);
        self
    }

    pub fn leader(mut self, leader: MemberId) -> Self {
        self.leader = Some(leader);
        self
    }

    pub fn leader_commit(mut self, leader_commit: LogIndex) -> Self {
        self.leader_commit = leader_commit;
        self
    }

    pub fn commit_index(mut self, commit_index: LogIndex) -> Self {
        self.commit_index = commit_index;
        self
    }

    pub fn votes_for_me(mut self, voters: &[&str]) -> Self {
        self.votes_for_me = member_set(voters);
        self
    }

    pub fn pre_votes_for_me(mut self, voters: &[&str]) -> Self {
        self.pre_votes_for_me = member_set(voters);
        self
    }

    pub fn heartbeat_responses(mut self, responders: &[&str]) -> Self {
        self.heartbeat_responses = member_set(responders);
        self
    }

    pub fn last_log_index_before_becoming_leader(mut self, index: LogIndex) -> Self {
        self.last_log_index_before_becoming_leader = index;
        self
    }

    /// Seed leader-side progress for `member`.
    pub fn follower_match(mut self, member: &str, match_index: LogIndex) -> Self {
        self.follower_states
            .on_success_response(&MemberId::new(member), match_index);
        self
    }

    pub fn supports_pre_voting(mut self, supports: bool) -> Self {
        self.supports_pre_voting = supports;
        self
    }

    pub fn refuses_to_be_leader(mut self, refuses: bool) -> Self {
        self.refuses_to_be_leader = refuses;
        self
    }

    pub fn is_pre_election(mut self, is_pre_election: bool) -> Self {
        self.is_pre_election = is_pre_election;
        self
    }

    pub fn entry_log(mut self, log: InMemoryRaftLog) -> Self {
        self.log = log;
        self
    }

    pub fn build(mut self) -> RaftState<InMemoryRaftLog> {
        let log = std::mem::take(&mut self.log);
        self.build_with_log(log)
    }

    /// Build over a caller-supplied log implementation.
    pub fn build_with_log<L: RaftLog>(self, log: L) -> RaftState<L> {
        let replication_members = self
            .replication_members
            .unwrap_or_else(|| self.voting_members.clone());
        RaftState {
            myself: self.myself,
            voting_members: self.voting_members,
            replication_members,
            term: self.term,
            voted_for: self.voted_for,
            leader: self.leader,
            leader_commit: self.leader_commit,
            commit_index: self.commit_index,
            votes_for_me: self.votes_for_me,
            pre_votes_for_me: self.pre_votes_for_me,
            heartbeat_responses: self.heartbeat_responses,
            last_log_index_before_becoming_leader: self.last_log_index_before_becoming_leader,
            follower_states: self.follower_states,
            supports_pre_voting: self.supports_pre_voting,
            refuses_to_be_leader: self.refuses_to_be_leader,
            is_pre_election: self.is_pre_election,
            log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RaftError;
    use crate::outcome::LogCommand;

    #[test]
    fn test_follower_match_never_regresses() {
        let mut states = FollowerStates::new();
        let f1 = MemberId::new("f1");

        assert!(states.on_success_response(&f1, LogIndex(4)));
        assert!(!states.on_success_response(&f1, LogIndex(2)));
        assert_eq!(states.get(&f1).match_index, LogIndex(4));
        assert_eq!(states.get(&MemberId::new("f2")).match_index, LogIndex::NONE);
    }

    #[test]
    fn test_builder_defaults() {
        let state = RaftStateBuilder::new(MemberId::new("n0"))
            .voting_members(&["n0", "n1", "n2"])
            .build();

        assert_eq!(state.term(), Term::ZERO);
        assert_eq!(state.commit_index(), LogIndex::NONE);
        assert_eq!(state.replication_members(), state.voting_members());
        assert_eq!(state.entry_log().append_index(), LogIndex::NONE);
        assert!(!state.supports_pre_voting());
    }

    #[test]
    fn test_update_applies_fields_and_log_commands() {
        let mut state = RaftStateBuilder::new(MemberId::new("n0"))
            .voting_members(&["n0", "n1"])
            .build();

        let mut outcome = Outcome::new(Role::Follower, &state);
        outcome.set_next_term(Term(2));
        outcome.set_leader(Some(MemberId::new("n1")));
        outcome.add_log_command(LogCommand::Append {
            index: LogIndex(0),
            entry: LogEntry::new(Term(2), ReplicatedContent::NewLeaderBarrier),
        });
        outcome.set_commit_index(LogIndex(0));

        state.update(&outcome).unwrap();

        assert_eq!(state.term(), Term(2));
        assert_eq!(state.leader(), Some(&MemberId::new("n1")));
        assert_eq!(state.commit_index(), LogIndex(0));
        assert_eq!(state.log().append_index(), LogIndex(0));
    }

    #[test]
    fn test_update_drops_leader_progress_on_step_down() {
        let mut state = RaftStateBuilder::new(MemberId::new("n0"))
            .voting_members(&["n0", "n1", "n2"])
            .follower_match("n1", LogIndex(3))
            .heartbeat_responses(&["n1"])
            .build();

        let mut outcome = Outcome::new(Role::Leader, &state);
        outcome.step_down();
        state.update(&outcome).unwrap();

        assert!(state.follower_states().is_empty());
        assert!(state.heartbeat_responses().is_empty());
        assert_eq!(state.leader(), None);
    }

    #[test]
    fn test_rejected_log_commands_leave_state_untouched() {
        let mut state = RaftStateBuilder::new(MemberId::new("n0"))
            .voting_members(&["n0", "n1"])
            .term(Term(1))
            .build();
        let mut outcome = Outcome::new(Role::Follower, &state);
        outcome.set_next_term(Term(2));
        outcome.set_leader(Some(MemberId::new("n1")));
        outcome.add_log_command(LogCommand::Append {
            index: LogIndex(3),
            entry: LogEntry::new(Term(2), ReplicatedContent::data("x")),
        });

        let err = state.update(&outcome).unwrap_err();

        assert!(matches!(err, RaftError::NonContiguousAppend { .. }));
        assert_eq!(state.term(), Term(1));
        assert_eq!(state.leader(), None);
        assert_eq!(state.log().append_index(), LogIndex::NONE);
    }

    /// Log that refuses every append, like a full disk.
    struct FullDiskLog(InMemoryRaftLog);

    impl ReadableLog for FullDiskLog {
        fn append_index(&self) -> LogIndex {
            self.0.append_index()
        }

        fn prev_index(&self) -> LogIndex {
            self.0.prev_index()
        }

        fn read_entry_term(&self, index: LogIndex) -> Result<Term> {
            self.0.read_entry_term(index)
        }
    }

    impl RaftLog for FullDiskLog {
        fn append(&mut self, _entries: &[LogEntry]) -> Result<LogIndex> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left").into())
        }

        fn truncate(&mut self, from_index: LogIndex) -> Result<()> {
            self.0.truncate(from_index)
        }

        fn prune(&mut self, up_to: LogIndex) -> Result<LogIndex> {
            self.0.prune(up_to)
        }

        fn skip(&mut self, index: LogIndex, term: Term) -> Result<LogIndex> {
            self.0.skip(index, term)
        }

        fn read_entry(&self, index: LogIndex) -> Result<Option<LogEntry>> {
            self.0.read_entry(index)
        }
    }

    #[test]
    fn test_log_failure_restores_fields() {
        let mut state = RaftStateBuilder::new(MemberId::new("n0"))
            .voting_members(&["n0", "n1", "n2"])
            .term(Term(3))
            .leader(MemberId::new("n0"))
            .follower_match("n1", LogIndex(0))
            .heartbeat_responses(&["n1"])
            .build_with_log(FullDiskLog(InMemoryRaftLog::with_terms(&[3])));

        let mut outcome = Outcome::new(Role::Leader, &state);
        outcome.step_down();
        outcome.set_next_term(Term(4));
        outcome.add_log_command(LogCommand::Append {
            index: LogIndex(1),
            entry: LogEntry::new(Term(4), ReplicatedContent::data("x")),
        });

        let err = state.update(&outcome).unwrap_err();

        assert!(matches!(err, RaftError::Io { .. }));
        assert_eq!(state.term(), Term(3));
        assert_eq!(state.leader(), Some(&MemberId::new("n0")));
        assert_eq!(state.follower_states().get(&MemberId::new("n1")).match_index, LogIndex(0));
        assert!(state.heartbeat_responses().contains(&MemberId::new("n1")));
    }
}
