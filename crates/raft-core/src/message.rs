//! Raft messages: the closed set of inputs every role handles.
//!
//! Each inbound message is a [`RaftMessage`] (sender + [`MessageKind`]).
//! Role handlers match exhaustively over `MessageKind`, so adding a kind is a
//! compile error in every role until it is handled.

use crate::types::{LogEntry, LogIndex, MemberId, ReplicatedContent, Term};
use serde::{Deserialize, Serialize};

/// RequestVote / PreVote request.
///
/// Shared shape for real votes and pre-votes; the [`MessageKind`] variant
/// tells which one it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    /// Candidate's term (the election term for real votes, the current term
    /// for pre-votes)
    pub term: Term,

    /// Candidate requesting the vote
    pub candidate: MemberId,

    /// Index of candidate's last log entry
    pub last_log_index: LogIndex,

    /// Term of candidate's last log entry
    pub last_log_term: Term,
}

/// RequestVote / PreVote response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    /// Voter's term, for candidate to update itself
    pub term: Term,

    /// True if candidate received the (pre-)vote
    pub vote_granted: bool,
}

/// AppendEntries request.
///
/// Sent by the leader (or rather its log shipper) to replicate entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    /// Leader's term
    pub leader_term: Term,

    /// Index of log entry immediately preceding new ones
    pub prev_log_index: LogIndex,

    /// Term of prev_log_index entry
    pub prev_log_term: Term,

    /// Log entries to store, the first one at `prev_log_index + 1`
    pub entries: Vec<LogEntry>,

    /// Leader's commit index
    pub leader_commit: LogIndex,
}

/// AppendEntries response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    /// Follower's term, for leader to update itself
    pub term: Term,

    /// True if follower contained entry matching prev_log_index/term
    pub success: bool,

    /// Highest index known to match the leader (`NONE` on failure)
    pub match_index: LogIndex,

    /// Follower's append index (a retry hint on failure)
    pub append_index: LogIndex,
}

/// Leader heartbeat, carrying the commit position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub leader_term: Term,
    pub commit_index: LogIndex,
    pub commit_index_term: Term,
}

/// Tells a follower the leader's log starts after `prev_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogCompactionInfo {
    pub leader_term: Term,
    pub prev_index: LogIndex,
}

/// All message kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    PreVoteRequest(VoteRequest),
    PreVoteResponse(VoteResponse),
    AppendEntriesRequest(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
    Heartbeat(Heartbeat),
    HeartbeatResponse,
    LogCompactionInfo(LogCompactionInfo),
    NewEntryRequest(ReplicatedContent),
    BatchRequest(Vec<ReplicatedContent>),
    ElectionTimeout,
    HeartbeatTimeout,
    /// Admin request to discard log entries up to and including `prune_index`.
    PruneRequest { prune_index: LogIndex },
}

impl MessageKind {
    /// Short name for logs and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::VoteRequest(_) => "vote_request",
            MessageKind::VoteResponse(_) => "vote_response",
            MessageKind::PreVoteRequest(_) => "pre_vote_request",
            MessageKind::PreVoteResponse(_) => "pre_vote_response",
            MessageKind::AppendEntriesRequest(_) => "append_entries_request",
            MessageKind::AppendEntriesResponse(_) => "append_entries_response",
            MessageKind::Heartbeat(_) => "heartbeat",
            MessageKind::HeartbeatResponse => "heartbeat_response",
            MessageKind::LogCompactionInfo(_) => "log_compaction_info",
            MessageKind::NewEntryRequest(_) => "new_entry_request",
            MessageKind::BatchRequest(_) => "batch_request",
            MessageKind::ElectionTimeout => "election_timeout",
            MessageKind::HeartbeatTimeout => "heartbeat_timeout",
            MessageKind::PruneRequest { .. } => "prune_request",
        }
    }
}

/// A message together with its sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftMessage {
    pub from: MemberId,
    pub kind: MessageKind,
}

impl RaftMessage {
    pub fn new(from: MemberId, kind: MessageKind) -> Self {
        Self { from, kind }
    }
}

/// An outgoing message addressed to one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directed {
    pub to: MemberId,
    pub message: RaftMessage,
}

impl Directed {
    pub fn new(to: MemberId, from: MemberId, kind: MessageKind) -> Self {
        Self {
            to,
            message: RaftMessage::new(from, kind),
        }
    }
}
