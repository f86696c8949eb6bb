//! Raft error types.

use thiserror::Error;

use crate::types::{LogIndex, MemberId, Term};

/// Raft errors.
#[derive(Error, Debug)]
pub enum RaftError {
    /// A follower was asked to truncate history it already considers committed.
    #[error(
        "Cannot truncate entry at index {index} with term {term} when commit index is at {commit_index}"
    )]
    TruncateCommitted {
        index: LogIndex,
        term: Term,
        commit_index: LogIndex,
    },

    /// A leader received AppendEntries from another leader in its own term.
    #[error("Two leaders in the same term {term} (append request from {from})")]
    DualLeader { term: Term, from: MemberId },

    /// Log append did not continue directly from the current tail.
    #[error("Non-contiguous append (expected index {expected}, got {actual})")]
    NonContiguousAppend { expected: LogIndex, actual: LogIndex },

    /// Operation targets history that has already been compacted away.
    #[error("Index {index} is before the start of the log (prev index {prev_index})")]
    IndexBeforeLog {
        index: LogIndex,
        prev_index: LogIndex,
    },

    /// Configuration error (invalid Raft config).
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Driver inbox or outbox is gone.
    #[error("Channel closed")]
    ChannelClosed,

    /// I/O error surfaced by a log collaborator.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl RaftError {
    /// Protocol invariant violations. Never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RaftError::TruncateCommitted { .. } | RaftError::DualLeader { .. }
        )
    }
}

/// Raft result type.
pub type Result<T> = std::result::Result<T, RaftError>;
