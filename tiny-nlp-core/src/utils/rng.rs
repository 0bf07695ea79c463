//! Random number sources for the decoding loop.
//!
//! Seeded draws are keyed on the step index rather than on a stream that is
//! advanced across steps. A row's token at position `i` therefore only depends
//! on `(seed, i, logits)`, so exiting the loop early never shifts a later
//! draw.

use rand::rngs::StdRng;
use rand::SeedableRng;
use xxhash_rust::xxh64::Xxh64;

/// Derive the seed for step `index` from the configured sampler seed.
pub fn step_seed(seed: u64, index: usize) -> u64 {
    let mut hasher = Xxh64::new(seed);
    hasher.update(&(index as u64).to_le_bytes());
    hasher.digest()
}

/// Generator for one decoding step.
pub fn step_rng(seed: Option<u64>, index: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(step_seed(seed, index)),
        None => StdRng::from_entropy(),
    }
}
