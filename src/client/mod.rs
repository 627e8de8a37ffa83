//! Client Adapter
//!
//! What a game client needs to stay in step with its room: it computes
//! boards locally from `round.start` and asks for a resync when it notices
//! a missed broadcast.

pub mod sync;

pub use sync::{ClientSync, LocalRound, SyncOutcome};
