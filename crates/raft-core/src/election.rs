//! Election initiation and leader accession.
//!
//! Per Raft §5.2 (Leader Election):
//! - A candidate increments its term, votes for itself and requests votes
//!   from every other voting member
//! - A pre-election polls the same members at the current term first, so
//!   a partitioned member cannot disrupt the group by bumping terms
//! - A candidate with a quorum of votes accedes to leadership
//!
//! Only voting members may start elections. An attempt from anywhere else
//! is reported as [`ElectionStart::NotVotingMember`], distinct from an
//! election that started and was later lost.

use crate::appending;
use crate::error::Result;
use crate::message::{Directed, Heartbeat, MessageKind, VoteRequest};
use crate::outcome::Outcome;
use crate::state::ReadableRaftState;
use crate::types::*;

/// Result of an attempt to start an election or pre-election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionStart {
    /// Requests were sent
    Started,

    /// This member is not in the current voting set; nothing was sent
    NotVotingMember,
}

impl ElectionStart {
    pub fn is_started(self) -> bool {
        self == ElectionStart::Started
    }
}

/// Start a real election: bump the term, vote for self and request votes.
pub(crate) fn start_real_election<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
) -> Result<ElectionStart> {
    let myself = state.myself();
    if !state.voting_members().contains(myself) {
        tracing::info!(
            member = %myself,
            members = ?state.voting_members(),
            "Election attempted but not started, not a voting member"
        );
        return Ok(ElectionStart::NotVotingMember);
    }

    outcome.set_next_term(outcome.term().next());
    let request = vote_request(state, outcome.term())?;

    for member in state.voting_members().iter().filter(|m| *m != myself) {
        outcome.add_outgoing_message(Directed::new(
            member.clone(),
            myself.clone(),
            MessageKind::VoteRequest(request.clone()),
        ));
    }

    outcome.set_voted_for(Some(myself.clone()));
    outcome.clear_votes_for_me();
    outcome.add_vote_for_me(myself.clone());

    tracing::info!(member = %myself, term = %outcome.term(), "Election started");
    Ok(ElectionStart::Started)
}

/// Start a pre-election: poll the voting members at the current term.
pub(crate) fn start_pre_election<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
) -> Result<ElectionStart> {
    let myself = state.myself();
    if !state.voting_members().contains(myself) {
        tracing::info!(
            member = %myself,
            members = ?state.voting_members(),
            "Pre-election attempted but not started, not a voting member"
        );
        return Ok(ElectionStart::NotVotingMember);
    }

    let request = vote_request(state, outcome.term())?;

    for member in state.voting_members().iter().filter(|m| *m != myself) {
        outcome.add_outgoing_message(Directed::new(
            member.clone(),
            myself.clone(),
            MessageKind::PreVoteRequest(request.clone()),
        ));
    }

    outcome.clear_pre_votes_for_me();
    outcome.add_pre_vote_for_me(myself.clone());

    tracing::debug!(member = %myself, term = %outcome.term(), "Pre-election started");
    Ok(ElectionStart::Started)
}

/// Become leader in the outcome's term.
///
/// Appends the leadership barrier, sends initial heartbeats to every
/// replication member and records the pre-barrier log tail.
pub(crate) fn become_leader<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
) -> Result<()> {
    let myself = state.myself();
    let log = state.entry_log();
    let term = outcome.term();
    let last_log_index_before = log.append_index();

    outcome.set_leader(Some(myself.clone()));
    outcome.set_pre_election(false);
    outcome.set_last_log_index_before_becoming_leader(last_log_index_before);
    appending::append_new_entry(state, outcome, ReplicatedContent::NewLeaderBarrier)?;

    let heartbeat = Heartbeat {
        leader_term: term,
        commit_index: state.commit_index(),
        commit_index_term: log.read_entry_term(state.commit_index())?,
    };
    for member in state.replication_members().iter().filter(|m| *m != myself) {
        outcome.add_outgoing_message(Directed::new(
            member.clone(),
            myself.clone(),
            MessageKind::Heartbeat(heartbeat),
        ));
    }

    outcome.elected_leader();
    outcome.renew_election_timeout();
    outcome.set_role(Role::Leader);

    tracing::info!(member = %myself, term = %term, "Moving to LEADER state");
    Ok(())
}

fn vote_request<S: ReadableRaftState + ?Sized>(state: &S, term: Term) -> Result<VoteRequest> {
    let log = state.entry_log();
    let last_log_index = log.append_index();
    Ok(VoteRequest {
        term,
        candidate: state.myself().clone(),
        last_log_index,
        last_log_term: log.read_entry_term(last_log_index)?,
    })
}
