//! Seeded Random Number Generator
//!
//! Uses the Mulberry32 mixer: a 32-bit state advanced and scrambled with
//! integer-only operations. Given the same seed, produces an identical
//! float sequence on every platform and every client.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Mulberry32 state increment (Weyl sequence constant).
const MULBERRY_INCREMENT: u32 = 0x6D2B_79F5;

/// 2^32 as f64, used to map a u32 into [0, 1).
const U32_RANGE: f64 = 4_294_967_296.0;

/// Deterministic PRNG driving every random choice of the assignment engine.
///
/// # Determinism Guarantee
///
/// The float stream is derived from the integer stream by a single exact
/// division, so two clients seeded identically draw identical floats.
///
/// # Example
///
/// ```
/// use matchboard::core::rng::SeededRng;
///
/// let mut rng = SeededRng::new(42);
/// assert_eq!(rng.next_u32(), 2581720956); // Always the same!
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeededRng {
    seed: u32,
    state: u32,
}

impl Default for SeededRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SeededRng {
    /// Create a new RNG from a 32-bit seed.
    pub fn new(seed: u32) -> Self {
        Self { seed, state: seed }
    }

    /// Create an RNG whose seed comes from a non-deterministic source.
    ///
    /// Only valid where no cross-client synchronization is required
    /// (local/solo play). The chosen seed stays available through [`seed`].
    ///
    /// [`seed`]: SeededRng::seed
    pub fn unseeded() -> Self {
        Self::new(rand::random::<u32>())
    }

    /// The seed this generator was created from.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Generate the next 32-bit random value.
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_add(MULBERRY_INCREMENT);
        let mut t = self.state;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }

    /// Generate a float in [0, 1).
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / U32_RANGE
    }

    /// Generate a random integer in range [0, max).
    ///
    /// Computed as `floor(next_f64() * max)` so every client scales
    /// identically.
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        let scaled = (self.next_f64() * max as f64) as u32;
        scaled.min(max - 1)
    }

    /// Generate a random integer in range [min, max].
    #[inline]
    pub fn next_int_range(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        let range = (max as i64 - min as i64 + 1) as u32;
        (min as i64 + self.next_int(range) as i64) as i32
    }

    /// Generate a random boolean that is true with the given probability.
    #[inline]
    pub fn next_bool(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }

    /// Shuffle a slice in place using Fisher-Yates algorithm.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        for i in (1..len).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            Some(&slice[idx])
        }
    }

    /// Get current state (for checkpointing/debugging).
    pub fn state(&self) -> u32 {
        self.state
    }

    /// Restore from saved state.
    pub fn set_state(&mut self, state: u32) {
        self.state = state;
    }
}

/// Derive a round seed from session parameters.
///
/// The session id and round index make every round distinct; `entropy`
/// makes seeds unpredictable to clients before the round starts.
pub fn derive_round_seed(session_id: &[u8; 16], round_index: u32, entropy: &[u8]) -> u32 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"MATCHBOARD_ROUND_SEED_V1");
    hasher.update(session_id);
    hasher.update(round_index.to_le_bytes());
    hasher.update(entropy);

    let hash = hasher.finalize();
    u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]])
}

// =============================================================================
// TESTS
// =============================================================================
