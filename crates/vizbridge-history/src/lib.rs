//! Vizbridge History -- append-only command log with opaque state snapshots.
//!
//! Every dispatched command is logged. Mutating commands carry a snapshot of
//! the host state taken immediately before they ran; read-only commands carry
//! none and exist for audit only. Restoring an entry replays its snapshot and
//! truncates the log to everything strictly before it.
//!
//! Snapshots are opaque bytes: this crate stores and hands them back, it
//! never looks inside.

use chrono::{DateTime, Utc};
use serde_json::Value;
use vizbridge_protocol::{EntryStatus, HistoryRecord, RestoreReport};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("no history entry with id {0}")]
    NotFound(u64),
    #[error("history entry {0} has no snapshot (read-only command)")]
    NoSnapshot(u64),
    #[error("failed to restore snapshot of entry {entry_id}: {fault}")]
    Replay { entry_id: u64, fault: ReplayFault },
    #[error("history storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// Failure reported by whoever replays a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ReplayFault {
    pub message: String,
    /// Full trace text, when the replayer has one.
    pub diagnostic: Option<String>,
}

impl ReplayFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            diagnostic: None,
        }
    }
}

/// Opaque capture of external state.
#[derive(Clone, PartialEq, Eq)]
pub struct Snapshot(Vec<u8>);

impl Snapshot {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self(payload.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Snapshot({} bytes)", self.0.len())
    }
}

/// One logged command.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: u64,
    pub command: String,
    pub code: Option<String>,
    pub snapshot: Option<Snapshot>,
    /// Short summary of what the command produced.
    pub result: Value,
    pub status: EntryStatus,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Wire view: the snapshot is replaced by a flag.
    pub fn record(&self) -> HistoryRecord {
        HistoryRecord {
            id: self.id,
            command: self.command.clone(),
            code: self.code.clone(),
            result: self.result.clone(),
            status: self.status,
            timestamp: self.timestamp.to_rfc3339(),
            has_snapshot: self.has_snapshot(),
        }
    }
}

/// The history log for one bridge session.
#[derive(Debug)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    next_id: u64,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    /// Append a command record under the next id.
    ///
    /// Fails only when the id space is exhausted, which callers treat as a
    /// storage fault rather than a command outcome.
    pub fn append(
        &mut self,
        command: &str,
        code: Option<String>,
        snapshot: Option<Snapshot>,
        result: Value,
        ok: bool,
    ) -> Result<&HistoryEntry> {
        let id = self.next_id;
        let next_id = id
            .checked_add(1)
            .ok_or_else(|| HistoryError::Storage("history id space exhausted".into()))?;

        let index = self.entries.len();
        self.entries.push(HistoryEntry {
            id,
            command: command.to_string(),
            code,
            snapshot,
            result,
            status: if ok { EntryStatus::Ok } else { EntryStatus::Error },
            timestamp: Utc::now(),
        });
        self.next_id = next_id;

        tracing::debug!(id, command, "history: appended entry");
        Ok(&self.entries[index])
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn get(&self, id: u64) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries in order, snapshots hidden behind `has_snapshot`.
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.entries.iter().map(HistoryEntry::record).collect()
    }

    /// Id the next appended entry will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Roll back to the state captured before entry `entry_id` ran.
    ///
    /// `replay` receives the stored snapshot and must reconstruct the live
    /// state from it; whatever it returns is handed back to the caller (the
    /// host uses this to prepare its fresh execution environment before
    /// anything is committed). The log is only truncated after `replay`
    /// succeeds, so a failed replay leaves it untouched.
    pub fn restore<T, F>(&mut self, entry_id: u64, replay: F) -> Result<(RestoreReport, T)>
    where
        F: FnOnce(&Snapshot) -> std::result::Result<T, ReplayFault>,
    {
        let index = self
            .entries
            .iter()
            .position(|e| e.id == entry_id)
            .ok_or(HistoryError::NotFound(entry_id))?;

        let snapshot = self.entries[index]
            .snapshot
            .as_ref()
            .ok_or(HistoryError::NoSnapshot(entry_id))?;

        let replayed =
            replay(snapshot).map_err(|fault| HistoryError::Replay { entry_id, fault })?;

        self.entries.truncate(index);
        self.next_id = self.entries.last().map_or(1, |e| e.id + 1);

        tracing::info!(
            entry_id,
            remaining = self.entries.len(),
            next_id = self.next_id,
            "history: restored snapshot"
        );

        Ok((
            RestoreReport {
                restored_entry: entry_id,
                next_id: self.next_id,
            },
            replayed,
        ))
    }
}
