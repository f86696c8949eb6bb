//! Vote and pre-vote granting.
//!
//! Per Raft §5.2 and §5.4.1 a voter grants at most one vote per term, and
//! only to a candidate whose log is at least as up-to-date as its own.
//! Pre-votes use the same test but leave no trace: no recorded vote, no
//! timer reset.

use crate::error::Result;
use crate::log::ReadableLog;
use crate::message::{Directed, MessageKind, VoteRequest, VoteResponse};
use crate::outcome::Outcome;
use crate::state::ReadableRaftState;
use crate::types::{LogIndex, MemberId, Term};

/// The voter's side of a vote decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoterContext {
    /// Voter's term after adopting any greater request term
    pub term: Term,

    /// Term of the voter's last log entry
    pub last_log_term: Term,

    /// Voter's append index
    pub last_log_index: LogIndex,

    /// Voter already committed its vote to a different candidate this term
    pub committed_to_another: bool,
}

impl VoterContext {
    /// Context for a voter at `term` with log `log`.
    pub fn from_log(term: Term, log: &dyn ReadableLog, committed_to_another: bool) -> Result<Self> {
        let last_log_index = log.append_index();
        Ok(Self {
            term,
            last_log_term: log.read_entry_term(last_log_index)?,
            last_log_index,
            committed_to_another,
        })
    }
}

/// Check if candidate's log is at least as up-to-date as ours.
///
/// Per Raft §5.4.1 (Election restriction):
/// If the logs have last entries with different terms, then the log
/// with the later term is more up-to-date. If the logs end with the same
/// term, then whichever log is longer is more up-to-date.
pub fn is_log_up_to_date(
    candidate_last_term: Term,
    candidate_last_index: LogIndex,
    our_last_term: Term,
    our_last_index: LogIndex,
) -> bool {
    candidate_last_term > our_last_term
        || (candidate_last_term == our_last_term && candidate_last_index >= our_last_index)
}

/// Decide whether to grant `request`.
pub fn should_vote_for(context: &VoterContext, request: &VoteRequest) -> bool {
    if request.term < context.term {
        return false;
    }

    let requester_log_ok = is_log_up_to_date(
        request.last_log_term,
        request.last_log_index,
        context.last_log_term,
        context.last_log_index,
    );

    let voted_for_another_in_same_term =
        request.term == context.term && context.committed_to_another;

    requester_log_ok && !voted_for_another_in_same_term
}

/// Handle a real vote request.
///
/// A greater request term is adopted first (clearing any standing vote).
/// Granting records the vote and renews the voter's election timeout.
pub(crate) fn handle_vote_request<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    from: &MemberId,
    request: &VoteRequest,
) -> Result<()> {
    if request.term > outcome.term() {
        outcome.set_next_term(request.term);
    }

    let committed_to_another = outcome
        .voted_for()
        .map_or(false, |voted_for| voted_for != &request.candidate);
    let context = VoterContext::from_log(outcome.term(), state.entry_log(), committed_to_another)?;

    let granted = should_vote_for(&context, request);
    if granted {
        outcome.set_voted_for(Some(request.candidate.clone()));
        outcome.renew_election_timeout();
    }

    tracing::debug!(
        candidate = %request.candidate,
        term = %request.term,
        granted,
        "Vote request"
    );

    respond(state, outcome, from, granted, false);
    Ok(())
}

/// Handle a pre-vote request: same eligibility test, no recorded vote and
/// no timer reset.
pub(crate) fn handle_pre_vote_request<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    from: &MemberId,
    request: &VoteRequest,
) -> Result<()> {
    if request.term > outcome.term() {
        outcome.set_next_term(request.term);
    }

    let context = VoterContext::from_log(outcome.term(), state.entry_log(), false)?;
    let granted = should_vote_for(&context, request);

    respond(state, outcome, from, granted, true);
    Ok(())
}

/// Answer a pre-vote request with a refusal.
pub(crate) fn decline_pre_vote_request<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    from: &MemberId,
) {
    respond(state, outcome, from, false, true);
}

/// Answer a real vote request with a refusal at the current term.
pub(crate) fn decline_vote_request<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    from: &MemberId,
) {
    respond(state, outcome, from, false, false);
}

fn respond<S: ReadableRaftState + ?Sized>(
    state: &S,
    outcome: &mut Outcome,
    to: &MemberId,
    vote_granted: bool,
    pre_vote: bool,
) {
    let response = VoteResponse {
        term: outcome.term(),
        vote_granted,
    };
    let kind = if pre_vote {
        MessageKind::PreVoteResponse(response)
    } else {
        MessageKind::VoteResponse(response)
    };
    outcome.add_outgoing_message(Directed::new(to.clone(), state.myself().clone(), kind));
}
