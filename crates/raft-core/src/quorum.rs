//! Majority arithmetic.
//!
//! A quorum is a strict majority of the voting members, counting self. A
//! single-member group is its own quorum.

use crate::state::FollowerStates;
use crate::types::{LogIndex, MemberId};
use std::collections::BTreeSet;

/// Smallest number of responders forming a majority of `member_count`.
pub fn quorum_size(member_count: usize) -> usize {
    member_count / 2 + 1
}

/// True iff the responders that are also `members` (self included) form a
/// quorum of `members`.
///
/// Responders outside `members`, such as learners, are not counted.
pub fn is_quorum(members: &BTreeSet<MemberId>, responders: &BTreeSet<MemberId>) -> bool {
    responders.intersection(members).count() >= quorum_size(members.len())
}

/// Highest index `N` such that a majority of `voting_members` have a match
/// index `>= N`.
///
/// The leader (`myself`) counts with `own_append_index`; voting members with
/// no recorded progress count as `NONE`. Returns `NONE` if no index is
/// replicated on a majority.
pub fn quorum_match_index(
    voting_members: &BTreeSet<MemberId>,
    myself: &MemberId,
    own_append_index: LogIndex,
    follower_states: &FollowerStates,
) -> LogIndex {
    if voting_members.is_empty() {
        return LogIndex::NONE;
    }

    let mut match_indices: Vec<LogIndex> = voting_members
        .iter()
        .map(|member| {
            if member == myself {
                own_append_index
            } else {
                follower_states.get(member).match_index
            }
        })
        .collect();

    // Sort descending; the quorum-th highest value is matched by a majority
    match_indices.sort_by(|a, b| b.cmp(a));
    match_indices[quorum_size(match_indices.len()) - 1]
}
