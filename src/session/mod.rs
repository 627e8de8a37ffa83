//! Session Coordination
//!
//! Rooms, players, rounds and session history. Everything here is
//! synchronous and clock-free: a [`Room`] turns [`RoomEvent`]s into
//! [`Effect`]s, and the network layer carries the effects out.

pub mod player;
pub mod scoring;
pub mod seed;
pub mod history;
pub mod events;
pub mod room;

pub use player::{Player, PlayerId};
pub use scoring::{pick_winner, TieBreakPolicy};
pub use seed::{FixedEntropy, OsSeedSource, SeedError, SeedSource};
pub use history::{HistoryError, HistoryStore, PlayerScore, SessionRecord};
pub use events::{Effect, RoomEvent, TimerKind, TimerToken};
pub use room::{transition, JoinError, Room, RoomStatus, RoundLimit, SessionConfig};
