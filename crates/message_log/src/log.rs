use std::collections::HashMap;
use std::time::Duration;

use session_backend::{ConnectionState, Message, SessionId};
use tracing::debug;

use crate::dedup::{DedupKey, DEFAULT_BUCKET_WIDTH};
use crate::error::MessageLogError;

/// One appended message and its sequence position (starting at 1).
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub seq: u64,
    pub message: Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(u64),
    /// The dedup key was already present; carries the existing position.
    Duplicate(u64),
}

impl AppendOutcome {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Appended(seq) | Self::Duplicate(seq) => *seq,
        }
    }

    pub fn is_appended(&self) -> bool {
        matches!(self, Self::Appended(_))
    }
}

/// Ordered, append-only message store for the active session.
///
/// Sequence positions are dense and strictly increasing; entries are never
/// mutated once appended.
#[derive(Debug, Clone)]
pub struct MessageLog {
    session_id: Option<SessionId>,
    entries: Vec<LogEntry>,
    index_by_key: HashMap<DedupKey, u64>,
    bucket_width: Duration,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MessageLog {
    pub fn new(session_id: Option<SessionId>) -> Self {
        Self {
            session_id,
            entries: Vec::new(),
            index_by_key: HashMap::new(),
            bucket_width: DEFAULT_BUCKET_WIDTH,
        }
    }

    pub fn with_bucket_width(mut self, bucket_width: Duration) -> Self {
        self.bucket_width = bucket_width;
        self
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> + '_ {
        self.entries.iter().map(|entry| &entry.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_seq(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn get(&self, seq: u64) -> Option<&LogEntry> {
        let index = usize::try_from(seq).ok()?.checked_sub(1)?;
        self.entries.get(index)
    }

    pub fn key_for(&self, message: &Message) -> DedupKey {
        DedupKey::derive(self.session_id.as_ref(), message, self.bucket_width)
    }

    /// Append at the end unless the message's dedup key was already seen.
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        let key = self.key_for(&message);
        if let Some(existing) = self.index_by_key.get(&key) {
            debug!(seq = *existing, role = message.role.as_str(), "duplicate message ignored");
            return AppendOutcome::Duplicate(*existing);
        }

        let seq = self.push(message);
        self.index_by_key.insert(key, seq);
        AppendOutcome::Appended(seq)
    }

    /// Append at the end even when the dedup key was already seen. Used for
    /// locally generated messages that repeat on purpose. The key is indexed
    /// so a later echo of the message is still suppressed.
    pub fn append_distinct(&mut self, message: Message) -> u64 {
        let key = self.key_for(&message);
        let seq = self.push(message);
        self.index_by_key.insert(key, seq);
        seq
    }

    /// Load persisted history verbatim, duplicates included. Only the first
    /// occurrence of a key is indexed for later dedup.
    pub fn seed(&mut self, messages: Vec<Message>) -> Result<usize, MessageLogError> {
        if !self.entries.is_empty() {
            return Err(MessageLogError::NotEmpty {
                len: self.entries.len(),
            });
        }

        let count = messages.len();
        for message in messages {
            let key = self.key_for(&message);
            let seq = self.push(message);
            self.index_by_key.entry(key).or_insert(seq);
        }
        Ok(count)
    }

    /// Empty the log and restart numbering. Refused while a connection exists
    /// or is scheduled.
    pub fn clear(&mut self, connection: ConnectionState) -> Result<(), MessageLogError> {
        if !connection.is_quiescent() {
            return Err(MessageLogError::TransportActive { state: connection });
        }
        self.entries.clear();
        self.index_by_key.clear();
        Ok(())
    }

    /// Clear and rebind to another session under the same precondition as
    /// [`MessageLog::clear`].
    pub fn reset(
        &mut self,
        session_id: Option<SessionId>,
        connection: ConnectionState,
    ) -> Result<(), MessageLogError> {
        self.clear(connection)?;
        self.session_id = session_id;
        Ok(())
    }

    fn push(&mut self, message: Message) -> u64 {
        let seq = self.last_seq() + 1;
        self.entries.push(LogEntry { seq, message });
        seq
    }
}
