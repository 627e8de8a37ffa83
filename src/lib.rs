//! # Matchboard
//!
//! Deterministic pairing boards and the multiplayer rounds played on them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MATCHBOARD SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── rng.rs      - Mulberry32 PRNG, round seed derivation    │
//! │  └── hash.rs     - Board and catalog hashing                 │
//! │                                                              │
//! │  catalog/        - Content (read-only snapshot)              │
//! │  ├── item.rs     - Items, associations, tags                 │
//! │  ├── filter.rs   - Grade/theme filters                       │
//! │  ├── index.rs    - Global association lookup                 │
//! │  └── normalize.rs- Content normalization                     │
//! │                                                              │
//! │  engine/         - Board assignment (deterministic)          │
//! │  ├── template.rs - Board layouts                             │
//! │  ├── assign.rs   - Correct pair and distractor placement     │
//! │  ├── sanitize.rs - Accidental pair removal                   │
//! │  ├── numeric.rs  - Expression evaluation and perturbation    │
//! │  ├── fallback.rs - Synthetic pair when content runs out      │
//! │  └── library.rs  - Catalog + templates, refreshable          │
//! │                                                              │
//! │  session/        - Room state machine (clock-free)           │
//! │  network/        - WebSocket server and room actors          │
//! │  client/         - Client-side round synchronization         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! `core/`, `catalog/` and `engine/` are deterministic: given the same
//! catalog snapshot, filter, template and seed, [`engine::compute_board`]
//! returns the same board on every platform. Only the seed travels over the
//! wire; every client computes its own board.
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from one seeded Mulberry32 stream per board

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod catalog;
pub mod engine;
pub mod session;
pub mod network;
pub mod client;

// Re-export commonly used types
pub use core::rng::SeededRng;
pub use catalog::{Catalog, FilterConfig};
pub use engine::{compute_board, Board, BoardTemplate};
pub use session::{Room, RoomEvent, Effect};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
