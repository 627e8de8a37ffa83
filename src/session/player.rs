//! Room members.

use std::fmt;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

/// Connection-scoped player identifier.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    /// Fresh random id for a new connection.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form for logs.
        write!(f, "{}", &hex::encode(self.as_bytes())[..8])
    }
}

/// Longest accepted nickname, in characters.
pub const MAX_NICKNAME_CHARS: usize = 24;

/// Trim a nickname and check its length.
pub fn clean_nickname(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > MAX_NICKNAME_CHARS || trimmed.chars().any(char::is_control) {
        return None;
    }
    Some(trimmed.to_owned())
}

/// A player in a room roster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Player {
    /// Player id.
    pub id: PlayerId,
    /// Display name.
    pub nickname: String,
    /// Ready flag (lobby only).
    pub ready: bool,
    /// Score in the current session.
    pub score: u32,
    /// Score sequence number at which the current score was reached.
    /// Lower means earlier; used for tie-breaking.
    pub scored_at: u64,
}

impl Player {
    /// New roster entry.
    pub fn new(id: PlayerId, nickname: String) -> Self {
        Self {
            id,
            nickname,
            ready: false,
            score: 0,
            scored_at: 0,
        }
    }
}
