//! Heartbeat acceptance and commit propagation.

use crate::appending::history_matches;
use crate::error::Result;
use crate::message::{Directed, Heartbeat, MessageKind};
use crate::outcome::Outcome;
use crate::state::ReadableRaftState;
use crate::types::MemberId;

/// Accept a heartbeat from `from`.
///
/// Stale heartbeats are ignored. The commit index only advances when the
/// leader's commit position matches local history, and never past the local
/// append index.
pub(crate) fn beat<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    from: &MemberId,
    heartbeat: &Heartbeat,
) -> Result<()> {
    if heartbeat.leader_term < state.term() {
        return Ok(());
    }

    outcome.set_pre_election(false);
    outcome.set_next_term(heartbeat.leader_term);
    outcome.set_leader(Some(from.clone()));
    outcome.set_leader_commit(heartbeat.commit_index);
    outcome.renew_election_timeout();
    outcome.add_outgoing_message(Directed::new(
        from.clone(),
        state.myself().clone(),
        MessageKind::HeartbeatResponse,
    ));

    let log = state.entry_log();
    if !history_matches(log, heartbeat.commit_index, heartbeat.commit_index_term)? {
        return Ok(());
    }

    let new_commit = heartbeat.commit_index.min(log.append_index());
    if new_commit > state.commit_index() {
        outcome.set_commit_index(new_commit);
    }
    Ok(())
}
