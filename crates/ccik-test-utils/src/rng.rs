//! Deterministic RNG utilities for reproducible tests.

use std::ops::Range;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Create a deterministic `ChaCha8Rng` from a seed.
///
/// All test randomization should go through this to ensure reproducibility.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Generate a deterministic `Vec<f64>` of length `dim` from a seed, each
/// value drawn uniformly from `range`.
///
/// Useful for joint configurations and target offsets.
pub fn deterministic_vec(dim: usize, range: Range<f64>, seed: u64) -> Vec<f64> {
    let mut rng = seeded_rng(seed);
    (0..dim).map(|_| rng.gen_range(range.clone())).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
