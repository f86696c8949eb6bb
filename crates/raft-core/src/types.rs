//! Core Raft types: Term, Index, Member identity, Log Entries, Roles.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raft term number (monotonically non-decreasing).
///
/// Terms establish logical clocks in Raft. Each term has at most one leader.
/// `Term::NONE` (-1) is what the log reports for an index it holds no term for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term(pub i64);

impl Term {
    pub const NONE: Term = Term(-1);
    pub const ZERO: Term = Term(0);

    pub fn next(self) -> Term {
        Term(self.0 + 1)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Log index (0-indexed, -1 is the sentinel for "no entry").
///
/// An empty log has an append index of `LogIndex::NONE`; the first entry
/// ever appended lands at index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogIndex(pub i64);

impl LogIndex {
    pub const NONE: LogIndex = LogIndex(-1);
    pub const ZERO: LogIndex = LogIndex(0);

    pub fn next(self) -> LogIndex {
        LogIndex(self.0 + 1)
    }

    pub fn prev(self) -> LogIndex {
        LogIndex(self.0 - 1)
    }

    /// Index `n` positions after this one.
    pub fn plus(self, n: usize) -> LogIndex {
        LogIndex(self.0 + n as i64)
    }

    pub fn is_none(self) -> bool {
        self.0 < 0
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.0)
    }
}

/// Member identifier (unique across the Raft group).
///
/// Opaque to the core; only compared for equality and ordered for
/// deterministic fan-out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        MemberId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content replicated through the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicatedContent {
    /// Opaque command bytes (interpreted by the state machine).
    Data(Bytes),

    /// No-op appended by a new leader so that commit advancement is anchored
    /// on an entry from its own term.
    NewLeaderBarrier,
}

impl ReplicatedContent {
    pub fn data(bytes: impl Into<Bytes>) -> Self {
        ReplicatedContent::Data(bytes.into())
    }
}

/// Log entry (term + content).
///
/// The index is implied by the entry's position in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub content: ReplicatedContent,
}

impl LogEntry {
    pub fn new(term: Term, content: ReplicatedContent) -> Self {
        Self { term, content }
    }
}

/// Raft role (Follower, Candidate, or Leader).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "Follower"),
            Role::Candidate => write!(f, "Candidate"),
            Role::Leader => write!(f, "Leader"),
        }
    }
}
