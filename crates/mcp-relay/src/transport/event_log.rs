//! Per-session record of server-to-client messages.
use crate::model::ServerJsonRpcMessage;

/// One logged message together with its sequence id.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub sequence_id: u64,
    pub message: ServerJsonRpcMessage,
}

/// Append-only message log backing stream resumption.
///
/// Sequence ids start at 1 and increase by one per append, so an entry's
/// id doubles as its position. Entries are never mutated or reordered,
/// and the log is only discarded when its session closes. History is
/// retained for the whole session lifetime; sessions are expected to be
/// short-lived relative to available memory.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Vec<LogEntry>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message and return the sequence id assigned to it.
    pub fn append(&mut self, message: ServerJsonRpcMessage) -> u64 {
        let sequence_id = self.entries.len() as u64 + 1;
        self.entries.push(LogEntry {
            sequence_id,
            message,
        });
        sequence_id
    }

    /// Every entry with a sequence id greater than `cursor`, in
    /// ascending order. A cursor of 0 replays the whole log, a cursor at
    /// or past the newest entry replays nothing. Replaying does not
    /// consume: the same cursor always yields the same entries.
    pub fn replay_after(&self, cursor: u64) -> Vec<LogEntry> {
        let start = cursor.min(self.entries.len() as u64) as usize;
        self.entries[start..].to_vec()
    }

    pub fn last_sequence_id(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Drop all history. Only called when the session closes; a log is
    /// never appended to again afterwards.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
