//! Thermal noise realizations
//!
//! One realization is the full sequence of standard-normal draws consumed by
//! a single run, generated up front. Realizations of an ensemble share a seed
//! and differ by ChaCha stream, so realization `i` is the same no matter
//! which worker produces it.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

/// Standard-normal draws for one run, scaled by the caller at use time
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseRealization {
    draws: Vec<f64>,
}

impl NoiseRealization {
    /// Draw `len` samples from stream `stream` of the generator seeded with `seed`
    pub fn generate(seed: u64, stream: u64, len: usize) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(stream);
        let draws = Distribution::<f64>::sample_iter(StandardNormal, &mut rng)
            .take(len)
            .collect();
        Self { draws }
    }

    /// Wrap an externally produced sequence (e.g. a recorded one)
    pub fn from_draws(draws: Vec<f64>) -> Self {
        Self { draws }
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn draws(&self) -> &[f64] {
        &self.draws
    }
}
