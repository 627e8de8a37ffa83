//! Session history.
//!
//! Finished sessions are appended to a JSON-lines log, one
//! [`SessionRecord`] per line, and indexed in memory by room code.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::player::PlayerId;

/// A player's score, as reported at round and session end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerScore {
    /// Player id.
    pub player_id: PlayerId,
    /// Nickname at the time.
    pub nickname: String,
    /// Score.
    pub score: u32,
}

/// One finished session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Room the session was played in.
    pub room_code: String,
    /// Session identifier.
    pub session_id: Uuid,
    /// When the session ended.
    pub ended_at: DateTime<Utc>,
    /// Winner, if any.
    pub winner: Option<PlayerScore>,
    /// Final scores in roster order.
    pub per_player_scores: Vec<PlayerScore>,
    /// Rounds resolved or timed out.
    pub rounds_played: u32,
}

/// History store errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// File could not be read or written.
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded.
    #[error("history encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// A line of the log is not a record.
    #[error("corrupt history line {line}: {source}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Cut the log back to `len` bytes.
async fn truncate(path: &Path, len: u64) -> Result<(), HistoryError> {
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(len).await?;
    Ok(())
}

/// Append-only session log.
#[derive(Debug)]
pub struct HistoryStore {
    path: Option<PathBuf>,
    by_room: RwLock<BTreeMap<String, Vec<SessionRecord>>>,
}

impl HistoryStore {
    /// Store that keeps records in memory only.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            by_room: RwLock::new(BTreeMap::new()),
        }
    }

    /// Open (or create) a log file and index its records.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        let mut by_room: BTreeMap<String, Vec<SessionRecord>> = BTreeMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let mut offset = 0;
                let mut lines = contents.split_inclusive('\n').enumerate().peekable();
                while let Some((i, raw)) = lines.next() {
                    let start = offset;
                    offset += raw.len();
                    let line = raw.trim_end_matches(['\n', '\r']);
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<SessionRecord>(line) {
                        Ok(record) => by_room.entry(record.room_code.clone()).or_default().push(record),
                        // An unterminated last line is an interrupted append.
                        Err(e) if lines.peek().is_none() && !raw.ends_with('\n') => {
                            warn!("History: dropping torn record at line {}: {}", i + 1, e);
                            truncate(&path, start as u64).await?;
                        }
                        Err(source) => return Err(HistoryError::Corrupt { line: i + 1, source }),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let total: usize = by_room.values().map(Vec::len).sum();
        info!("History loaded from {}: {} sessions", path.display(), total);

        Ok(Self {
            path: Some(path),
            by_room: RwLock::new(by_room),
        })
    }

    /// Append a record.
    pub async fn append(&self, record: SessionRecord) -> Result<(), HistoryError> {
        // Holding the write lock serializes appends from concurrent rooms.
        let mut by_room = self.by_room.write().await;

        if let Some(path) = &self.path {
            let mut line = serde_json::to_vec(&record)?;
            line.push(b'\n');
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(&line).await?;
            file.flush().await?;
        }

        debug!("History: room {} session {}", record.room_code, record.session_id);
        by_room.entry(record.room_code.clone()).or_default().push(record);
        Ok(())
    }

    /// All records of a room, oldest first.
    pub async fn records_for_room(&self, code: &str) -> Vec<SessionRecord> {
        let by_room = self.by_room.read().await;
        by_room.get(code).cloned().unwrap_or_default()
    }

    /// Whether any session was recorded under this code.
    pub async fn has_room(&self, code: &str) -> bool {
        let by_room = self.by_room.read().await;
        by_room.contains_key(code)
    }

    /// Total number of records.
    pub async fn len(&self) -> usize {
        let by_room = self.by_room.read().await;
        by_room.values().map(Vec::len).sum()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
