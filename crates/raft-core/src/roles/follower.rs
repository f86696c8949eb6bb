//! Follower role.
//!
//! Followers accept entries and heartbeats from the leader, vote, and start
//! (pre-)elections when their election timer fires. What a timeout or a
//! pre-vote request does depends on the member's policy flags; the choice is
//! made once per message by [`ElectionTimeoutPolicy`] and [`PreVotePolicy`].

use crate::appending;
use crate::election;
use crate::error::Result;
use crate::heart;
use crate::message::{LogCompactionInfo, MessageKind, RaftMessage, VoteResponse};
use crate::outcome::Outcome;
use crate::quorum::is_quorum;
use crate::state::ReadableRaftState;
use crate::types::{MemberId, Role};
use crate::voting;

/// What a follower does when its election timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionTimeoutPolicy {
    /// Refuses leadership and has no pre-voting: nothing to do.
    Ignore,

    /// Refuses leadership: only enter pre-election so pre-votes from others
    /// are evaluated.
    MarkPreElection,

    /// Poll the group before standing for election.
    PreElection,

    /// Stand for election directly.
    RealElection,
}

impl ElectionTimeoutPolicy {
    pub fn for_state<S: ReadableRaftState + ?Sized>(state: &S) -> Self {
        match (state.refuses_to_be_leader(), state.supports_pre_voting()) {
            (true, false) => ElectionTimeoutPolicy::Ignore,
            (true, true) => ElectionTimeoutPolicy::MarkPreElection,
            (false, true) => ElectionTimeoutPolicy::PreElection,
            (false, false) => ElectionTimeoutPolicy::RealElection,
        }
    }
}

/// How a follower answers a pre-vote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreVotePolicy {
    /// No answer.
    Ignore,

    /// Run the voting test and answer.
    Evaluate,

    /// Always answer with a refusal.
    Decline,
}

impl PreVotePolicy {
    /// Only members that lost contact with the leader themselves (that is,
    /// are in a pre-election) evaluate pre-votes.
    pub fn for_state<S: ReadableRaftState + ?Sized>(state: &S) -> Self {
        if !state.supports_pre_voting() {
            PreVotePolicy::Ignore
        } else if state.is_pre_election() {
            PreVotePolicy::Evaluate
        } else if state.refuses_to_be_leader() {
            PreVotePolicy::Decline
        } else {
            PreVotePolicy::Ignore
        }
    }
}

/// Handle `message` as a follower.
pub fn handle<S: ReadableRaftState + ?Sized>(message: &RaftMessage, state: &S) -> Result<Outcome> {
    let mut outcome = Outcome::new(Role::Follower, state);
    let from = &message.from;

    match &message.kind {
        MessageKind::Heartbeat(heartbeat) => heart::beat(state, &mut outcome, from, heartbeat)?,

        MessageKind::AppendEntriesRequest(request) => {
            appending::handle_append_entries_request(state, &mut outcome, from, request)?
        }

        MessageKind::VoteRequest(request) => {
            voting::handle_vote_request(state, &mut outcome, from, request)?
        }

        MessageKind::PreVoteRequest(request) => match PreVotePolicy::for_state(state) {
            PreVotePolicy::Ignore => {}
            PreVotePolicy::Evaluate => {
                voting::handle_pre_vote_request(state, &mut outcome, from, request)?
            }
            PreVotePolicy::Decline => voting::decline_pre_vote_request(state, &mut outcome, from),
        },

        MessageKind::PreVoteResponse(response) => {
            handle_pre_vote_response(state, &mut outcome, from, response)?
        }

        MessageKind::LogCompactionInfo(info) => {
            handle_log_compaction_info(state, &mut outcome, info)
        }

        MessageKind::ElectionTimeout => handle_election_timeout(state, &mut outcome)?,

        MessageKind::PruneRequest { prune_index } => super::prune(&mut outcome, *prune_index),

        MessageKind::VoteResponse(_)
        | MessageKind::AppendEntriesResponse(_)
        | MessageKind::HeartbeatResponse
        | MessageKind::NewEntryRequest(_)
        | MessageKind::BatchRequest(_)
        | MessageKind::HeartbeatTimeout => {}
    }

    Ok(outcome)
}

fn handle_election_timeout<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
) -> Result<()> {
    match ElectionTimeoutPolicy::for_state(state) {
        ElectionTimeoutPolicy::Ignore => {}
        ElectionTimeoutPolicy::MarkPreElection => outcome.set_pre_election(true),
        ElectionTimeoutPolicy::PreElection => {
            if election::start_pre_election(state, outcome)?.is_started() {
                outcome.set_pre_election(true);
                if is_quorum(state.voting_members(), outcome.pre_votes_for_me()) {
                    outcome.set_pre_election(false);
                    stand_for_election(state, outcome)?;
                }
            }
        }
        ElectionTimeoutPolicy::RealElection => stand_for_election(state, outcome)?,
    }
    Ok(())
}

fn handle_pre_vote_response<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    from: &MemberId,
    response: &VoteResponse,
) -> Result<()> {
    if !state.supports_pre_voting() || !state.is_pre_election() || state.refuses_to_be_leader() {
        return Ok(());
    }

    if response.term > state.term() {
        outcome.set_next_term(response.term);
        outcome.set_pre_election(false);
        tracing::info!(
            term = %response.term,
            "Aborting pre-election after receiving pre-vote response from a later term"
        );
        return Ok(());
    }
    if response.term < state.term() || !response.vote_granted {
        return Ok(());
    }

    outcome.add_pre_vote_for_me(from.clone());
    if is_quorum(state.voting_members(), outcome.pre_votes_for_me()) {
        outcome.renew_election_timeout();
        outcome.set_pre_election(false);
        tracing::info!(
            votes = outcome.pre_votes_for_me().len(),
            "Pre-election succeeded"
        );
        stand_for_election(state, outcome)?;
    }
    Ok(())
}

/// Start a real election and move to candidate (or straight to leader when
/// this member alone is a quorum).
fn stand_for_election<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
) -> Result<()> {
    if election::start_real_election(state, outcome)?.is_started() {
        outcome.set_role(Role::Candidate);
        tracing::info!(term = %outcome.term(), "Moving to CANDIDATE state");
        if is_quorum(state.voting_members(), outcome.votes_for_me()) {
            election::become_leader(state, outcome)?;
        }
    }
    Ok(())
}

fn handle_log_compaction_info<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    info: &LogCompactionInfo,
) {
    if info.leader_term < state.term() {
        return;
    }

    let append_index = state.entry_log().append_index();
    if append_index.is_none() || info.prev_index > append_index {
        tracing::info!(
            leader_prev_index = %info.prev_index,
            append_index = %append_index,
            "Leader log compacted past our tail, fresh snapshot needed"
        );
        outcome.mark_need_for_fresh_snapshot();
    }
}
