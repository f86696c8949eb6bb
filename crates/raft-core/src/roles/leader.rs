//! Leader role.
//!
//! The leader appends client content, tracks follower progress from append
//! responses and advances the commit index once a quorum holds an entry of
//! its own term. It steps down on any later term, or when an election
//! timeout passes without heartbeat acknowledgements from a quorum.
//!
//! # Commit Rule (Raft §5.4.2)
//!
//! Only entries from the current term are committed by counting replicas.
//! Earlier entries commit indirectly once a later current-term entry does.

use crate::appending;
use crate::error::{RaftError, Result};
use crate::heart;
use crate::message::{
    AppendEntriesResponse, Directed, Heartbeat, LogCompactionInfo, MessageKind, RaftMessage,
};
use crate::outcome::{Outcome, ShipCommand};
use crate::quorum::{is_quorum, quorum_match_index};
use crate::state::ReadableRaftState;
use crate::types::{LogIndex, MemberId, Role};
use crate::voting;

/// Handle `message` as the leader.
pub fn handle<S: ReadableRaftState + ?Sized>(message: &RaftMessage, state: &S) -> Result<Outcome> {
    let mut outcome = Outcome::new(Role::Leader, state);
    let from = &message.from;

    match &message.kind {
        MessageKind::Heartbeat(heartbeat) => {
            if heartbeat.leader_term >= state.term() {
                step_down(&mut outcome, "heartbeat from another leader");
                heart::beat(state, &mut outcome, from, heartbeat)?;
            }
        }

        MessageKind::AppendEntriesRequest(request) => {
            if request.leader_term == state.term() {
                return Err(RaftError::DualLeader {
                    term: state.term(),
                    from: from.clone(),
                });
            }
            if request.leader_term > state.term() {
                step_down(&mut outcome, "append request from a later term");
            }
            appending::handle_append_entries_request(state, &mut outcome, from, request)?;
        }

        MessageKind::VoteRequest(request) => {
            if request.term > state.term() {
                step_down(&mut outcome, "vote request from a later term");
                voting::handle_vote_request(state, &mut outcome, from, request)?;
            } else {
                voting::decline_vote_request(state, &mut outcome, from);
            }
        }

        MessageKind::PreVoteRequest(request) => {
            if state.supports_pre_voting() {
                if request.term > state.term() {
                    step_down(&mut outcome, "pre-vote request from a later term");
                    voting::handle_pre_vote_request(state, &mut outcome, from, request)?;
                } else {
                    voting::decline_pre_vote_request(state, &mut outcome, from);
                }
            }
        }

        MessageKind::AppendEntriesResponse(response) => {
            handle_append_entries_response(state, &mut outcome, from, response)?
        }

        MessageKind::HeartbeatResponse => outcome.add_heartbeat_response(from.clone()),

        MessageKind::ElectionTimeout => {
            let mut responders = outcome.heartbeat_responses().clone();
            responders.insert(state.myself().clone());
            if !is_quorum(state.voting_members(), &responders) {
                step_down(&mut outcome, "no heartbeat responses from a quorum");
            }
            outcome.clear_heartbeat_responses();
        }

        MessageKind::HeartbeatTimeout => send_heartbeats(state, &mut outcome)?,

        MessageKind::NewEntryRequest(content) => {
            appending::append_new_entry(state, &mut outcome, content.clone())?
        }

        MessageKind::BatchRequest(contents) => {
            appending::append_new_entries(state, &mut outcome, contents.clone())?
        }

        MessageKind::PruneRequest { prune_index } => super::prune(&mut outcome, *prune_index),

        MessageKind::VoteResponse(_)
        | MessageKind::PreVoteResponse(_)
        | MessageKind::LogCompactionInfo(_) => {}
    }

    Ok(outcome)
}

/// Step down to follower, keeping a record of the term we led.
fn step_down(outcome: &mut Outcome, reason: &str) {
    tracing::info!(term = %outcome.term(), reason, "Stepping down from LEADER state");
    outcome.step_down();
}

fn handle_append_entries_response<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    from: &MemberId,
    response: &AppendEntriesResponse,
) -> Result<()> {
    if response.term < state.term() {
        return Ok(());
    }
    if response.term > state.term() {
        step_down(outcome, "append response from a later term");
        outcome.set_next_term(response.term);
        return Ok(());
    }

    let log = state.entry_log();

    if !response.success {
        if response.append_index > LogIndex::NONE && response.append_index >= log.prev_index() {
            outcome.add_ship_command(ShipCommand::MismatchProgress {
                target: from.clone(),
                last_remote_append_index: response.append_index,
            });
        } else {
            let info = LogCompactionInfo {
                leader_term: state.term(),
                prev_index: log.prev_index(),
            };
            outcome.add_outgoing_message(Directed::new(
                from.clone(),
                state.myself().clone(),
                MessageKind::LogCompactionInfo(info),
            ));
        }
        return Ok(());
    }

    let progressed = outcome
        .follower_states_mut()
        .on_success_response(from, response.match_index);
    outcome.add_ship_command(ShipCommand::MatchProgress {
        target: from.clone(),
        new_index: response.match_index,
    });

    if !progressed || log.read_entry_term(response.match_index)? != state.term() {
        return Ok(());
    }

    let quorum_index = quorum_match_index(
        state.voting_members(),
        state.myself(),
        log.append_index(),
        outcome.follower_states(),
    );
    if quorum_index > state.commit_index() && log.read_entry_term(quorum_index)? == state.term() {
        outcome.set_commit_index(quorum_index);
        outcome.set_leader_commit(quorum_index);
        outcome.add_ship_command(ShipCommand::CommitUpdated);
        tracing::debug!(commit_index = %quorum_index, "Commit index advanced");
    }
    Ok(())
}

fn send_heartbeats<S: ReadableRaftState + ?Sized>(state: &S, outcome: &mut Outcome) -> Result<()> {
    let commit_index = state.commit_index();
    let heartbeat = Heartbeat {
        leader_term: state.term(),
        commit_index,
        commit_index_term: state.entry_log().read_entry_term(commit_index)?,
    };

    let myself = state.myself();
    for member in state.replication_members().iter().filter(|m| *m != myself) {
        outcome.add_outgoing_message(Directed::new(
            member.clone(),
            myself.clone(),
            MessageKind::Heartbeat(heartbeat),
        ));
    }
    Ok(())
}
