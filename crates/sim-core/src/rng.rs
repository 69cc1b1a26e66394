//! Injectable randomness for customer generation and stochastic failures.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;

/// Source of every random outcome in the engine.
pub trait RandomSource: Send {
    /// Returns `true` with the given probability. Values outside `(0, 1)`
    /// saturate; non-finite values never succeed.
    fn chance(&mut self, probability: f64) -> bool;

    /// Uniform integer in `lo..=hi`; `lo` when the range is empty.
    fn range_inclusive(&mut self, lo: u32, hi: u32) -> u32;
}

/// Seeded ChaCha generator; the same seed replays the same simulation.
#[derive(Clone, Debug)]
pub struct SeededRandom {
    rng: ChaCha8Rng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandom {
    fn chance(&mut self, probability: f64) -> bool {
        if !probability.is_finite() || probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }
        self.rng.gen_bool(probability)
    }

    fn range_inclusive(&mut self, lo: u32, hi: u32) -> u32 {
        if hi <= lo {
            return lo;
        }
        self.rng.gen_range(lo..=hi)
    }
}

/// Replays scripted outcomes. Once a script runs out, rolls fail and ranges
/// return their lower bound, so unscripted randomness is inert.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRandom {
    chances: VecDeque<bool>,
    values: VecDeque<u32>,
}

impl ScriptedRandom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes returned by successive [`RandomSource::chance`] calls.
    pub fn with_chances(mut self, outcomes: impl IntoIterator<Item = bool>) -> Self {
        self.chances.extend(outcomes);
        self
    }

    /// Values returned by successive [`RandomSource::range_inclusive`] calls,
    /// clamped into the requested range.
    pub fn with_values(mut self, values: impl IntoIterator<Item = u32>) -> Self {
        self.values.extend(values);
        self
    }
}

impl RandomSource for ScriptedRandom {
    fn chance(&mut self, _probability: f64) -> bool {
        self.chances.pop_front().unwrap_or(false)
    }

    fn range_inclusive(&mut self, lo: u32, hi: u32) -> u32 {
        match self.values.pop_front() {
            Some(v) => v.clamp(lo, hi.max(lo)),
            None => lo,
        }
    }
}
