//! Core deterministic primitives.
//!
//! Everything in this module behaves identically on every platform, so a
//! client and the server holding the same seed always agree.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::{SeededRng, derive_round_seed};
pub use hash::{StateHash, StateHasher};
