//! Per-phase RNG seeding with ChaCha8.
//!
//! Every randomized phase draws from its own ChaCha8Rng seeded from
//! `(seed + stream)`, so adding draws to one phase never shifts another.
//! Same seed, same choices.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Stream used for structural and constant mutations.
pub const MUTATION_STREAM: u64 = 1;
/// Stream used to pick restart points.
pub const RESTART_STREAM: u64 = 2;
/// Stream used by the fuzz generator.
pub const FUZZ_STREAM: u64 = 3;

/// Deterministic RNG for a global seed and stream id.
pub fn stream_rng(seed: u64, stream: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
}
