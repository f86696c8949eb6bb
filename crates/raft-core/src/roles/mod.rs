//! Per-role message handlers.
//!
//! Each role is a pure function `(message, state) -> Result<Outcome>` that
//! matches exhaustively over [`MessageKind`](crate::message::MessageKind).
//! The caller applies the outcome; handlers never mutate state.

pub mod candidate;
pub mod follower;
pub mod leader;

use crate::error::Result;
use crate::message::RaftMessage;
use crate::outcome::{LogCommand, Outcome};
use crate::state::ReadableRaftState;
use crate::types::{LogIndex, Role};

/// Handle `message` for a member currently in `role`.
pub fn handle<S: ReadableRaftState + ?Sized>(
    role: Role,
    message: &RaftMessage,
    state: &S,
) -> Result<Outcome> {
    match role {
        Role::Follower => follower::handle(message, state),
        Role::Candidate => candidate::handle(message, state),
        Role::Leader => leader::handle(message, state),
    }
}

/// Admin pruning is the same in every role.
fn prune(outcome: &mut Outcome, prune_index: LogIndex) {
    outcome.add_log_command(LogCommand::Prune {
        up_to: prune_index,
    });
}
