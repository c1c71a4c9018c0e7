//! Deterministic match-seed derivation.
//!
//! Every source of randomness in a match flows from one 64-bit seed derived
//! from the tournament seed and the match coordinates. HMAC gives a uniform
//! mapping that is stable under schedule edits: adding, removing or
//! reordering other matches never shifts an existing match's seed.

use hmac::{Hmac, Mac};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy)]
pub struct SeedManager {
    tournament_seed: u64,
}

impl SeedManager {
    pub fn new(tournament_seed: u64) -> Self {
        Self { tournament_seed }
    }

    /// Derive the seed for `(event, round, match_index)`.
    ///
    /// HMAC-SHA-256 keyed on the tournament seed (8 big-endian bytes) over
    /// the ASCII string `"{event}:{round}:{match}"`, truncated to the
    /// leading 8 digest bytes, interpreted big-endian as a signed 64-bit
    /// integer.
    pub fn match_seed(&self, event: &str, round: u32, match_index: u32) -> i64 {
        let mut mac = HmacSha256::new_from_slice(&self.tournament_seed.to_be_bytes())
            .expect("HMAC-SHA256 accepts keys of any length");
        mac.update(format!("{}:{}:{}", event, round, match_index).as_bytes());
        let digest = mac.finalize().into_bytes();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(head)
    }

    /// An isolated generator for one match. Shares no state with any other
    /// generator or with the process-global RNG.
    pub fn rng_for(seed: i64) -> StdRng {
        StdRng::seed_from_u64(seed as u64)
    }
}
