//! Network Layer
//!
//! WebSocket server, room actors and the wire protocol.
//! This layer is **non-deterministic**; all round logic runs through
//! `session/` and `engine/`.

pub mod protocol;
pub mod actor;
pub mod manager;
pub mod server;

pub use protocol::{
    ClientMessage, ServerMessage, ErrorCode, ServerError, PlayerInfo, RoomSnapshot,
    RoundStart, SetRounds,
};
pub use actor::{RoomActor, RoomCommand, RoomHandle};
pub use manager::{generate_code, normalize_code, RoomManager};
pub use server::{GameServer, ServerConfig, GameServerError};
