//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Messages are JSON objects tagged by a dotted `type` (`room.join`,
//! `round.start`, ...). Flat payloads also have bincode helpers.
//!
//! Rendered content never crosses the wire: a round is announced as
//! `(seed, templateRef, roundIndex)` and every client computes the board.

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::catalog::FilterConfig;
use crate::engine::template::ZoneId;
use crate::session::{JoinError, PlayerId, PlayerScore, RoomStatus, RoundLimit, SessionRecord};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Create a room and join it as host.
    #[serde(rename = "room.create")]
    CreateRoom {
        /// Display name in the new room.
        nickname: String,
    },

    /// Join an existing room by code.
    #[serde(rename = "room.join")]
    JoinRoom {
        /// Room code, any case.
        code: String,
        /// Display name in the room.
        nickname: String,
    },

    /// Set own ready flag.
    #[serde(rename = "ready.toggle")]
    ToggleReady {
        /// New ready flag.
        ready: bool,
    },

    /// Host: start the session.
    #[serde(rename = "room.start")]
    Start,

    /// Host: change the number of rounds.
    #[serde(rename = "room.setRounds")]
    SetRounds(SetRounds),

    /// Host: change the content filter.
    #[serde(rename = "room.setFilter")]
    SetFilter {
        /// Filter for the next rounds.
        filter: FilterConfig,
    },

    /// Claim a pair of zones as the round's correct pair.
    #[serde(rename = "attempt.pair", rename_all = "camelCase")]
    AttemptPair {
        /// First zone of the claim.
        zone_a: ZoneId,
        /// Second zone of the claim.
        zone_b: ZoneId,
        /// Round the client believes is active.
        #[serde(default)]
        round_index: Option<u32>,
    },

    /// Host: end the session now.
    #[serde(rename = "session.end")]
    EndSession,

    /// Leave the room.
    #[serde(rename = "room.leave")]
    Leave,

    /// Request current room state (after a missed broadcast).
    #[serde(rename = "sync.request")]
    SyncRequest,

    /// Request the room's session history.
    #[serde(rename = "history.request")]
    HistoryRequest,

    /// Ping for latency measurement.
    #[serde(rename = "ping")]
    Ping {
        /// Client clock, echoed back.
        timestamp: u64,
    },
}

/// `room.setRounds` payload: `{"count": 5}` or `{"infinite": true}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRounds {
    /// Finite round count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Play until the host ends the session.
    #[serde(default)]
    pub infinite: bool,
}

impl SetRounds {
    /// The requested limit, if well-formed.
    pub fn limit(&self) -> Option<RoundLimit> {
        match (self.infinite, self.count) {
            (true, None) => Some(RoundLimit::Infinite),
            (false, Some(n)) if n > 0 => Some(RoundLimit::Finite(n)),
            _ => None,
        }
    }
}

impl From<RoundLimit> for SetRounds {
    fn from(limit: RoundLimit) -> Self {
        match limit {
            RoundLimit::Finite(n) => Self { count: Some(n), infinite: false },
            RoundLimit::Infinite => Self { count: None, infinite: true },
        }
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Join accepted.
    #[serde(rename = "room.joined", rename_all = "camelCase")]
    RoomJoined {
        /// Canonical room code.
        code: String,
        /// Id assigned to this connection.
        player_id: PlayerId,
    },

    /// Full room snapshot.
    #[serde(rename = "room.state")]
    RoomState(RoomSnapshot),

    /// Countdown tick before the first round.
    #[serde(rename = "round.countdown", rename_all = "camelCase")]
    Countdown {
        /// Seconds until the first round.
        seconds_remaining: u32,
    },

    /// A round begins; clients compute the board from this.
    #[serde(rename = "round.start")]
    RoundStart(RoundStart),

    /// Someone found the correct pair.
    #[serde(rename = "round.result", rename_all = "camelCase")]
    RoundResult {
        /// Round that was won.
        round_index: u32,
        /// Winner's id.
        winner_id: PlayerId,
        /// Winner's nickname.
        winner_name: String,
    },

    /// Nobody found the pair in time.
    #[serde(rename = "round.timeout", rename_all = "camelCase")]
    RoundTimeout {
        /// Round that ran out.
        round_index: u32,
        /// `None` for an endless session.
        rounds_total: Option<u32>,
    },

    /// Scores of every player in the room.
    #[serde(rename = "score.update")]
    ScoreUpdate {
        /// Scores in roster order.
        scores: Vec<PlayerScore>,
    },

    /// Session finished.
    #[serde(rename = "session.end", rename_all = "camelCase")]
    SessionEnd {
        /// Winner, if anyone scored.
        winner: Option<PlayerScore>,
        /// Final scores in roster order.
        per_player_scores: Vec<PlayerScore>,
        /// Session identifier.
        session_id: Uuid,
    },

    /// Past sessions of this room.
    #[serde(rename = "session.history")]
    SessionHistory {
        /// Finished sessions, oldest first.
        records: Vec<SessionRecord>,
    },

    /// Request failed.
    #[serde(rename = "error")]
    Error(ServerError),

    /// Pong response.
    #[serde(rename = "pong", rename_all = "camelCase")]
    Pong {
        /// Timestamp from the ping.
        timestamp: u64,
        /// Server clock in milliseconds.
        server_time: u64,
    },

    /// Server is shutting down.
    #[serde(rename = "shutdown")]
    Shutdown {
        /// Why the server is going away.
        reason: String,
    },
}

/// Player as listed in `room.state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    /// Connection-scoped player id.
    pub id: PlayerId,
    /// Display name.
    pub nickname: String,
    /// Ready flag.
    pub ready: bool,
    /// Score in the current session.
    pub score: u32,
    /// Whether this player is the host.
    pub is_host: bool,
}

/// `room.state` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    /// Room code.
    pub code: String,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Players in join order.
    pub players: Vec<PlayerInfo>,
    /// `None` for an endless session.
    pub rounds_per_session: Option<u32>,
    /// Rounds resolved or timed out this session.
    pub rounds_played: u32,
    /// Content filter clients must apply locally.
    pub filter: FilterConfig,
    /// Catalog version the server computes boards against.
    pub catalog_version: String,
}

impl RoomSnapshot {
    /// The host, if any.
    pub fn host(&self) -> Option<&PlayerInfo> {
        self.players.iter().find(|p| p.is_host)
    }
}

/// `round.start` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStart {
    /// Board seed.
    pub seed: u32,
    /// Template to compute the board on.
    pub template_ref: String,
    /// Round index within the session (0-based).
    pub round_index: u32,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No room with that code.
    RoomNotFound,
    /// Room roster is full.
    RoomFull,
    /// Nickname empty or too long.
    InvalidNickname,
    /// Nickname already used in the room.
    NicknameTaken,
    /// Host-only request.
    NotHost,
    /// Not enough players, or not all ready.
    NotReady,
    /// Request not valid in the current room status.
    InvalidState,
    /// Message could not be parsed or is malformed.
    InvalidInput,
    /// Connection has not joined a room.
    NotInRoom,
    /// Already in a room.
    AlreadyInRoom,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl From<&JoinError> for ErrorCode {
    fn from(err: &JoinError) -> Self {
        match err {
            JoinError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            JoinError::RoomFull => ErrorCode::RoomFull,
            JoinError::InvalidNickname => ErrorCode::InvalidNickname,
            JoinError::NicknameTaken(_) => ErrorCode::NicknameTaken,
        }
    }
}

impl ServerMessage {
    /// Build an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl RoundStart {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
