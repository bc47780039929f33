//! Provably fair crash points.
//!
//! Each round is driven by a secret seed. Before the round runs, only the
//! commitment `sha256(seed)` is published. The crash point is derived from
//! `HMAC-SHA256(key = seed, message = round_id)`, so once the seed is revealed
//! anyone can check both the commitment and the crash point.

use crate::errors::{EngineError, EngineResult};
use crate::games::types::Multiplier;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Random bytes per seed (hex-encoded to 32 characters)
pub const SEED_BYTES: usize = 16;

const TWO_POW_32: u64 = 1 << 32;

/// Source of per-round secret seeds
pub trait SeedGenerator: Send + Sync {
    fn next_seed(&self) -> EngineResult<String>;
}

/// Seeds drawn from the operating system RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSeedGenerator;

impl SeedGenerator for OsSeedGenerator {
    fn next_seed(&self) -> EngineResult<String> {
        generate_seed()
    }
}

impl<F> SeedGenerator for F
where
    F: Fn() -> EngineResult<String> + Send + Sync,
{
    fn next_seed(&self) -> EngineResult<String> {
        self()
    }
}

pub fn generate_seed() -> EngineResult<String> {
    let mut bytes = [0u8; SEED_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| EngineError::Fairness(format!("OS RNG failure: {}", e)))?;
    Ok(hex::encode(bytes))
}

/// Commitment published when the round starts
pub fn commit(seed: &str) -> String {
    hex::encode(Sha256::digest(seed.as_bytes()))
}

/// HMAC-SHA256 of the decimal round id, keyed by the seed
pub fn round_digest(seed: &str, round_id: u64) -> EngineResult<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(seed.as_bytes())
        .map_err(|e| EngineError::Fairness(format!("invalid seed key: {}", e)))?;
    mac.update(round_id.to_string().as_bytes());
    Ok(mac.finalize().into_bytes().into())
}

/// Crash point for a round, recomputable by anyone holding the seed
pub fn reveal(seed: &str, round_id: u64) -> EngineResult<Multiplier> {
    Ok(crash_point_from_digest(&round_digest(seed, round_id)?))
}

/// `floor((100 * 2^32 - X) / (2^32 - X)) / 100`, clamped to 1.00, where `X` is
/// the first four digest bytes read big-endian.
pub fn crash_point_from_digest(digest: &[u8; 32]) -> Multiplier {
    let x = u64::from(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]));
    let denominator = TWO_POW_32 - x;
    assert!(denominator > 0, "X is a 32-bit value, so 2^32 - X >= 1");

    let hundredths = (100 * TWO_POW_32 - x) / denominator;
    Multiplier::from_hundredths(hundredths.max(Multiplier::ONE.hundredths()))
}

/// Outcome of checking a revealed round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verification {
    pub round_id: u64,
    pub seed: String,
    pub public_hash: String,
    pub commitment_valid: bool,
    pub claimed_crash_point: Multiplier,
    pub computed_crash_point: Multiplier,
    pub crash_point_valid: bool,
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        self.commitment_valid && self.crash_point_valid
    }
}

pub fn verify(
    seed: &str,
    round_id: u64,
    public_hash: &str,
    claimed_crash_point: Multiplier,
) -> EngineResult<Verification> {
    let computed_crash_point = reveal(seed, round_id)?;
    Ok(Verification {
        round_id,
        seed: seed.to_string(),
        public_hash: public_hash.to_string(),
        commitment_valid: commit(seed).eq_ignore_ascii_case(public_hash),
        claimed_crash_point,
        computed_crash_point,
        crash_point_valid: computed_crash_point == claimed_crash_point,
    })
}
