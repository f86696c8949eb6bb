//! Candidate role.
//!
//! A candidate collects votes for its term. Any sign of a legitimate leader
//! or a later term sends it back to follower; a quorum of votes makes it
//! leader.

use crate::appending;
use crate::election;
use crate::error::Result;
use crate::heart;
use crate::message::{MessageKind, RaftMessage, VoteResponse};
use crate::outcome::Outcome;
use crate::quorum::is_quorum;
use crate::state::ReadableRaftState;
use crate::types::{MemberId, Role};
use crate::voting;

/// Handle `message` as a candidate.
pub fn handle<S: ReadableRaftState + ?Sized>(message: &RaftMessage, state: &S) -> Result<Outcome> {
    let mut outcome = Outcome::new(Role::Candidate, state);
    let from = &message.from;

    match &message.kind {
        MessageKind::Heartbeat(heartbeat) => {
            if heartbeat.leader_term >= state.term() {
                outcome.set_role(Role::Follower);
                tracing::info!(
                    leader = %from,
                    term = %heartbeat.leader_term,
                    "Moving to FOLLOWER state after receiving heartbeat"
                );
                heart::beat(state, &mut outcome, from, heartbeat)?;
            }
        }

        MessageKind::AppendEntriesRequest(request) => {
            if request.leader_term >= state.term() {
                outcome.set_role(Role::Follower);
                tracing::info!(
                    leader = %from,
                    term = %request.leader_term,
                    "Moving to FOLLOWER state after receiving append request"
                );
            }
            appending::handle_append_entries_request(state, &mut outcome, from, request)?;
        }

        MessageKind::VoteRequest(request) => {
            if request.term > state.term() {
                outcome.clear_votes_for_me();
                outcome.set_role(Role::Follower);
                tracing::info!(
                    term = %request.term,
                    "Moving to FOLLOWER state after receiving vote request from a later term"
                );
                voting::handle_vote_request(state, &mut outcome, from, request)?;
            } else {
                voting::decline_vote_request(state, &mut outcome, from);
            }
        }

        MessageKind::VoteResponse(response) => {
            handle_vote_response(state, &mut outcome, from, response)?
        }

        MessageKind::PreVoteRequest(request) => {
            if state.supports_pre_voting() {
                if request.term > state.term() {
                    outcome.clear_votes_for_me();
                    outcome.set_next_term(request.term);
                    outcome.set_role(Role::Follower);
                    tracing::info!(
                        term = %request.term,
                        "Moving to FOLLOWER state after a pre-vote request from a later term"
                    );
                }
                voting::decline_pre_vote_request(state, &mut outcome, from);
            }
        }

        MessageKind::ElectionTimeout => {
            if election::start_real_election(state, &mut outcome)?.is_started() {
                tracing::info!(
                    term = %outcome.term(),
                    "Failed to get elected, starting a new election"
                );
                if is_quorum(state.voting_members(), outcome.votes_for_me()) {
                    election::become_leader(state, &mut outcome)?;
                }
            } else {
                outcome.set_role(Role::Follower);
                tracing::info!("Moving to FOLLOWER state, no longer a voting member");
            }
        }

        MessageKind::PruneRequest { prune_index } => super::prune(&mut outcome, *prune_index),

        MessageKind::PreVoteResponse(_)
        | MessageKind::AppendEntriesResponse(_)
        | MessageKind::HeartbeatResponse
        | MessageKind::LogCompactionInfo(_)
        | MessageKind::NewEntryRequest(_)
        | MessageKind::BatchRequest(_)
        | MessageKind::HeartbeatTimeout => {}
    }

    Ok(outcome)
}

fn handle_vote_response<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    from: &MemberId,
    response: &VoteResponse,
) -> Result<()> {
    if response.term > state.term() {
        outcome.set_next_term(response.term);
        outcome.clear_votes_for_me();
        outcome.set_role(Role::Follower);
        tracing::info!(
            term = %response.term,
            "Moving to FOLLOWER state after receiving vote response from a later term"
        );
        return Ok(());
    }
    if response.term < state.term() || !response.vote_granted {
        return Ok(());
    }

    outcome.add_vote_for_me(from.clone());
    if is_quorum(state.voting_members(), outcome.votes_for_me()) {
        election::become_leader(state, outcome)?;
    }
    Ok(())
}
