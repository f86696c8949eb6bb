//! Raft log collaborator interfaces and an in-memory implementation.
//!
//! The consensus core only ever reads the log through [`ReadableLog`]; every
//! change it wants is expressed as a [`LogCommand`](crate::outcome::LogCommand)
//! that the caller applies through [`RaftLog`].
//!
//! # Index layout
//!
//! ```text
//!   prev_index      first retained      append_index
//!       |                 |                   |
//!   ----+-----------------+-------------------+
//!   compacted history     retained entries (prev_index, append_index]
//! ```
//!
//! The term of `prev_index` itself is still known after compaction, so a
//! leader's `prev_log_index == prev_index` can be checked for history match.

use crate::error::{RaftError, Result};
use crate::types::{LogEntry, LogIndex, Term};
use std::collections::BTreeMap;

/// Read-only view of the replicated log.
pub trait ReadableLog {
    /// Index of the last appended entry (`LogIndex::NONE` when empty).
    fn append_index(&self) -> LogIndex;

    /// Index of the last compacted entry (`LogIndex::NONE` if nothing was compacted).
    fn prev_index(&self) -> LogIndex;

    /// Term of the entry at `index`, or `Term::NONE` when the log holds no term
    /// for it (below `prev_index` or beyond `append_index`).
    fn read_entry_term(&self, index: LogIndex) -> Result<Term>;
}

/// Writable log, driven by the caller when applying an outcome.
pub trait RaftLog: ReadableLog {
    /// Append entries at the tail. Returns the new append index.
    fn append(&mut self, entries: &[LogEntry]) -> Result<LogIndex>;

    /// Delete all entries at or after `from_index`.
    fn truncate(&mut self, from_index: LogIndex) -> Result<()>;

    /// Discard entries up to and including `up_to` (clamped to the append
    /// index). Returns the new prev index.
    fn prune(&mut self, up_to: LogIndex) -> Result<LogIndex>;

    /// Fast-forward past `index` (e.g. after installing a snapshot) so that
    /// the next append lands at `index + 1`. No-op if the log already reaches it.
    fn skip(&mut self, index: LogIndex, term: Term) -> Result<LogIndex>;

    /// Read a retained entry.
    fn read_entry(&self, index: LogIndex) -> Result<Option<LogEntry>>;
}

/// In-memory Raft log.
///
/// Entries live in a `BTreeMap` keyed by index so range removal on truncate
/// and prune is a `split_off`.
#[derive(Debug, Clone)]
pub struct InMemoryRaftLog {
    entries: BTreeMap<LogIndex, LogEntry>,
    prev_index: LogIndex,
    prev_term: Term,
    append_index: LogIndex,
}

impl Default for InMemoryRaftLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRaftLog {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            prev_index: LogIndex::NONE,
            prev_term: Term::NONE,
            append_index: LogIndex::NONE,
        }
    }

    /// Build a log holding entries with the given terms, starting at index 0.
    ///
    /// Entry `i` carries the placeholder payload `e{i}`.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn with_terms(terms: &[i64]) -> Self {
        let mut log = Self::new();
        for (i, term) in terms.iter().enumerate() {
            log.entries.insert(
                LogIndex(i as i64),
                LogEntry::new(
                    Term(*term),
                    crate::types::ReplicatedContent::data(format!("e{}", i)),
                ),
            );
        }
        log.append_index = LogIndex(terms.len() as i64 - 1);
        log
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All retained entries in index order.
    pub fn entries(&self) -> impl Iterator<Item = (LogIndex, &LogEntry)> {
        self.entries.iter().map(|(index, entry)| (*index, entry))
    }
}

impl ReadableLog for InMemoryRaftLog {
    fn append_index(&self) -> LogIndex {
        self.append_index
    }

    fn prev_index(&self) -> LogIndex {
        self.prev_index
    }

    fn read_entry_term(&self, index: LogIndex) -> Result<Term> {
        if index == self.prev_index {
            return Ok(self.prev_term);
        }
        if index < self.prev_index || index > self.append_index {
            return Ok(Term::NONE);
        }
        Ok(self
            .entries
            .get(&index)
            .map(|entry| entry.term)
            .unwrap_or(Term::NONE))
    }
}

impl RaftLog for InMemoryRaftLog {
    fn append(&mut self, entries: &[LogEntry]) -> Result<LogIndex> {
        for entry in entries {
            self.append_index = self.append_index.next();
            self.entries.insert(self.append_index, entry.clone());
        }
        Ok(self.append_index)
    }

    fn truncate(&mut self, from_index: LogIndex) -> Result<()> {
        if from_index <= self.prev_index {
            return Err(RaftError::IndexBeforeLog {
                index: from_index,
                prev_index: self.prev_index,
            });
        }
        if from_index > self.append_index {
            return Ok(());
        }
        self.entries.split_off(&from_index);
        self.append_index = from_index.prev();
        Ok(())
    }

    fn prune(&mut self, up_to: LogIndex) -> Result<LogIndex> {
        let new_prev = up_to.min(self.append_index);
        if new_prev <= self.prev_index {
            return Ok(self.prev_index);
        }
        let new_prev_term = self.read_entry_term(new_prev)?;
        self.entries = self.entries.split_off(&new_prev.next());
        self.prev_index = new_prev;
        self.prev_term = new_prev_term;
        Ok(self.prev_index)
    }

    fn skip(&mut self, index: LogIndex, term: Term) -> Result<LogIndex> {
        if index > self.append_index {
            self.entries.clear();
            self.prev_index = index;
            self.prev_term = term;
            self.append_index = index;
        }
        Ok(self.append_index)
    }

    fn read_entry(&self, index: LogIndex) -> Result<Option<LogEntry>> {
        if index <= self.prev_index && !self.prev_index.is_none() {
            return Err(RaftError::IndexBeforeLog {
                index,
                prev_index: self.prev_index,
            });
        }
        Ok(self.entries.get(&index).cloned())
    }
}
