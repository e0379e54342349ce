//! Deterministic random number generation for parameter fillers.
//!
//! A lightweight xorshift PRNG keeps filler output reproducible across runs and
//! platforms, which the gradient-check tests rely on.

use std::f32::consts::PI;

/// Seed used when a caller passes zero (xorshift state must be non-zero).
const FALLBACK_SEED: u64 = 0x9e3779b97f4a7c15;

/// Xorshift-based RNG with uniform, Gaussian and Bernoulli sampling.
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    /// Create a new RNG with explicit seed (if zero, use a fixed value).
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 { FALLBACK_SEED } else { seed };
        Self { state }
    }

    /// Basic xorshift to generate u32.
    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 32) as u32
    }

    /// Uniform sample in [0, 1) with 24 bits of precision.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Uniform sample in [low, high).
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    /// Normal sample with the given mean and standard deviation (Box-Muller).
    pub fn gen_gaussian(&mut self, mean: f32, std: f32) -> f32 {
        // 1 - u keeps the log argument in (0, 1]
        let u1 = 1.0 - self.next_f32();
        let u2 = self.next_f32();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        mean + std * z
    }

    /// Returns true with probability `p`.
    pub fn gen_bernoulli(&mut self, p: f32) -> bool {
        self.next_f32() < p
    }
}
