//! Assignment Engine
//!
//! Pure, synchronous board computation shared by server and clients.
//!
//! ## Module Structure
//!
//! - `template`: Board layouts and the template registry
//! - `board`: Populated boards, zones and quality flags
//! - `assign`: Pair-kind selection, correct pair and distractor placement
//! - `sanitize`: Duplicate, accidental-pair and numeric collision removal
//! - `numeric`: Expression evaluation and operand perturbation
//! - `fallback`: Degraded boards when no association is usable
//! - `library`: Catalog + templates snapshot and refresh
//!
//! ## Determinism Guarantee
//!
//! `compute_board` depends only on its arguments. Given the same seed,
//! template and filtered catalog it returns a bit-identical [`Board`] on
//! every platform, so a client that reconnects can rebuild the round
//! without asking the server for content.

pub mod template;
pub mod board;
pub mod assign;
pub mod numeric;
pub mod library;
mod sanitize;
mod fallback;

pub use template::{BoardTemplate, TemplateError, TemplateRegistry, ZoneGeometry, ZoneId, ZoneTemplate};
pub use board::{AssignmentIssue, Board, BoardStatus, CommittedPair, Zone, ZoneContent};
pub use assign::{compute_board, compute_board_with, EngineConfig};
pub use library::{ContentLibrary, ContentStore, LibraryError};
