//! Round seed entropy.
//!
//! Seeds are derived from `(session id, round index, entropy)`. The entropy
//! keeps upcoming seeds unpredictable to clients; if the source fails the
//! round still starts, with entropy taken from the clock.

use rand::RngCore;
use thiserror::Error;
use tracing::warn;

use crate::core::rng::derive_round_seed;

/// Entropy source errors.
#[derive(Debug, Error)]
pub enum SeedError {
    /// The source could not produce bytes.
    #[error("entropy source unavailable: {0}")]
    Unavailable(String),
}

/// Where round entropy comes from.
pub trait SeedSource: Send {
    /// 32 bytes of entropy.
    fn entropy(&mut self) -> Result<[u8; 32], SeedError>;
}

/// Operating system randomness.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSeedSource;

impl SeedSource for OsSeedSource {
    fn entropy(&mut self) -> Result<[u8; 32], SeedError> {
        let mut buf = [0u8; 32];
        rand::rngs::OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| SeedError::Unavailable(e.to_string()))?;
        Ok(buf)
    }
}

/// Always the same entropy. Makes round seeds reproducible in tests and
/// replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedEntropy(pub [u8; 32]);

impl SeedSource for FixedEntropy {
    fn entropy(&mut self) -> Result<[u8; 32], SeedError> {
        Ok(self.0)
    }
}

/// Entropy from the wall clock.
pub fn clock_entropy() -> [u8; 32] {
    let now = chrono::Utc::now();
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));
    let mut buf = [0u8; 32];
    buf[..8].copy_from_slice(&nanos.to_le_bytes());
    buf
}

/// Seed for a round; never fails.
pub fn round_seed(
    source: &mut dyn SeedSource,
    session_id: &[u8; 16],
    round_index: u32,
) -> u32 {
    let entropy = match source.entropy() {
        Ok(entropy) => entropy,
        Err(e) => {
            warn!("Seed source failed ({}); using clock entropy for round {}", e, round_index);
            clock_entropy()
        }
    };
    derive_round_seed(session_id, round_index, &entropy)
}
