//! Random number sources for the wait-event workflow.
//!
//! Workflows never call an RNG directly; the draw happens inside an
//! operation, which is handed one of these.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniformly distributed integers.
pub trait RandomSource: Send + Sync {
    /// Returns a value in `0..bound`. `bound` must be positive.
    fn next_below(&self, bound: u32) -> u32;
}

/// Draws from the thread-local generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_below(&self, bound: u32) -> u32 {
        rand::thread_rng().gen_range(0..bound)
    }
}

/// A reproducible generator seeded up front.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_below(&self, bound: u32) -> u32 {
        self.rng
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .gen_range(0..bound)
    }
}

/// Always returns the same value, clamped below the bound.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub u32);

impl RandomSource for FixedRandom {
    fn next_below(&self, bound: u32) -> u32 {
        self.0.min(bound.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_stay_below_bound() {
        let sources: Vec<Box<dyn RandomSource>> = vec![
            Box::new(ThreadRandom),
            Box::new(SeededRandom::new(7)),
            Box::new(FixedRandom(500)),
        ];
        for source in &sources {
            for _ in 0..200 {
                assert!(source.next_below(99) < 99);
            }
        }
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let a = SeededRandom::new(42);
        let b = SeededRandom::new(42);
        let xs: Vec<u32> = (0..10).map(|_| a.next_below(99)).collect();
        let ys: Vec<u32> = (0..10).map(|_| b.next_below(99)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_fixed_value() {
        assert_eq!(FixedRandom(42).next_below(99), 42);
        assert_eq!(FixedRandom(500).next_below(99), 98);
    }
}
