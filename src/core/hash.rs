//! Content Hashing for Verification
//!
//! Provides deterministic hashing for:
//! - Board fingerprints (client/server agreement on a round)
//! - Catalog snapshot versions
//! - Reconnect resynchronization checks

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for engine state.
///
/// Wraps SHA-256 with length-prefixed helpers so adjacent fields can never
/// alias. Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for a populated board.
    pub fn for_board() -> Self {
        Self::new(b"MATCHBOARD_BOARD_V1")
    }

    /// Create hasher for a catalog snapshot.
    pub fn for_catalog() -> Self {
        Self::new(b"MATCHBOARD_CATALOG_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with a length-prefixed string.
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Update with an optional u64 (presence byte first).
    #[inline]
    pub fn update_opt_u64(&mut self, value: Option<u64>) {
        match value {
            Some(v) => {
                self.update_u8(1);
                self.update_u64(v);
            }
            None => self.update_u8(0),
        }
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

// =============================================================================
// TESTS
// =============================================================================
