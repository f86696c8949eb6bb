//! Log matching, truncation and append.
//!
//! Per Raft §5.3 (Log Replication):
//! - A follower accepts entries only after the entry preceding them matches
//!   the leader's history (Log Matching Property)
//! - The first conflicting entry and everything after it is truncated
//! - Committed entries are never truncated; an attempt is a fatal error

use crate::error::{RaftError, Result};
use crate::log::ReadableLog;
use crate::message::{AppendEntriesRequest, AppendEntriesResponse, Directed, MessageKind};
use crate::outcome::{LogCommand, Outcome, ShipCommand};
use crate::state::ReadableRaftState;
use crate::types::*;

/// True if the local log agrees with the leader about `(prev_log_index, prev_log_term)`.
///
/// Compacted history (at or below the log's prev index) is assumed consistent.
pub fn history_matches(
    log: &dyn ReadableLog,
    prev_log_index: LogIndex,
    prev_log_term: Term,
) -> Result<bool> {
    Ok(prev_log_index.is_none()
        || prev_log_index <= log.prev_index()
        || log.read_entry_term(prev_log_index)? == prev_log_term)
}

/// Handle an AppendEntries request from a leader.
pub(crate) fn handle_append_entries_request<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    from: &MemberId,
    request: &AppendEntriesRequest,
) -> Result<()> {
    let log = state.entry_log();

    if request.leader_term < state.term() {
        let response = AppendEntriesResponse {
            term: state.term(),
            success: false,
            match_index: LogIndex::NONE,
            append_index: log.append_index(),
        };
        reply(state, outcome, from, response);
        return Ok(());
    }

    outcome.set_pre_election(false);
    outcome.set_next_term(request.leader_term);
    outcome.set_leader(Some(from.clone()));
    outcome.set_leader_commit(request.leader_commit);
    outcome.renew_election_timeout();

    if !history_matches(log, request.prev_log_index, request.prev_log_term)? {
        tracing::debug!(
            prev_log_index = %request.prev_log_index,
            prev_log_term = %request.prev_log_term,
            "Log history mismatch"
        );
        let response = AppendEntriesResponse {
            term: request.leader_term,
            success: false,
            match_index: LogIndex::NONE,
            append_index: log.append_index(),
        };
        reply(state, outcome, from, response);
        return Ok(());
    }

    let base_index = request.prev_log_index.next();
    let mut offset = 0;

    // Skip entries we already hold; truncate at the first conflict
    while offset < request.entries.len() {
        let log_index = base_index.plus(offset);
        if log_index > log.append_index() {
            // Everything from here on is new
            break;
        }
        if log_index < log.prev_index() {
            offset += 1;
            continue;
        }

        let log_term = log.read_entry_term(log_index)?;
        let entry_term = request.entries[offset].term;
        if entry_term != log_term {
            if log_index <= state.commit_index() {
                return Err(RaftError::TruncateCommitted {
                    index: log_index,
                    term: log_term,
                    commit_index: state.commit_index(),
                });
            }
            outcome.add_log_command(LogCommand::Truncate {
                from_index: log_index,
            });
            break;
        }
        offset += 1;
    }

    if offset < request.entries.len() {
        outcome.add_log_command(LogCommand::BatchAppend {
            base_index,
            offset,
            entries: request.entries[offset..].to_vec(),
        });
    }

    let end_index = request.prev_log_index.plus(request.entries.len());
    let new_commit = request.leader_commit.min(end_index);
    if new_commit > state.commit_index() {
        outcome.set_commit_index(new_commit);
    }

    let response = AppendEntriesResponse {
        term: request.leader_term,
        success: true,
        match_index: end_index,
        append_index: end_index,
    };
    reply(state, outcome, from, response);
    Ok(())
}

/// Leader-side append of one client-submitted content.
pub(crate) fn append_new_entry<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    content: ReplicatedContent,
) -> Result<()> {
    append_new_entries(state, outcome, vec![content])
}

/// Leader-side append of a batch of client-submitted contents.
///
/// Entries are stamped with the current term. The preceding entry's term
/// is the current term when it was appended during this leadership,
/// otherwise whatever the log holds for it.
pub(crate) fn append_new_entries<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    contents: Vec<ReplicatedContent>,
) -> Result<()> {
    if contents.is_empty() {
        return Ok(());
    }

    let log = state.entry_log();
    let term = outcome.term();
    let prev_log_index = log.append_index();
    let prev_log_term = if prev_log_index.is_none() {
        Term::NONE
    } else if prev_log_index > outcome.last_log_index_before_becoming_leader() {
        term
    } else {
        log.read_entry_term(prev_log_index)?
    };

    let entries: Vec<LogEntry> = contents
        .into_iter()
        .map(|content| LogEntry::new(term, content))
        .collect();

    outcome.add_ship_command(ShipCommand::NewEntries {
        prev_log_index,
        prev_log_term,
        entries: entries.clone(),
    });

    let first_index = prev_log_index.next();
    let last_index = prev_log_index.plus(entries.len());
    let command = if entries.len() == 1 {
        let mut entries = entries;
        LogCommand::Append {
            index: first_index,
            entry: entries.remove(0),
        }
    } else {
        LogCommand::BatchAppend {
            base_index: first_index,
            offset: 0,
            entries,
        }
    };
    outcome.add_log_command(command);

    // A sole voter's own log is a quorum; no append response will ever arrive
    let voters = state.voting_members();
    if voters.len() == 1 && voters.contains(state.myself()) {
        outcome.set_commit_index(last_index);
        outcome.set_leader_commit(last_index);
        outcome.add_ship_command(ShipCommand::CommitUpdated);
    }
    Ok(())
}

fn reply<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    to: &MemberId,
    response: AppendEntriesResponse,
) {
    outcome.add_outgoing_message(Directed::new(
        to.clone(),
        state.myself().clone(),
        MessageKind::AppendEntriesResponse(response),
    ));
}
