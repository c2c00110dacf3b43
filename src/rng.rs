//! Per-worker random number generation.
//!
//! Every worker owns one `Rng`, seeded with its own integer so the
//! streams are independent and a run is reproducible from its seeds.

use rand::{Rng as _, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::Error;

/// A seedable generator with the draw set the sampler needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rng {
    engine: Xoshiro256PlusPlus,
}

impl Rng {
    /// Create a generator from an integer seed. The same seed always
    /// produces the same stream.
    pub fn with_seed(seed: i64) -> Self {
        Self {
            engine: Xoshiro256PlusPlus::seed_from_u64(seed as u64),
        }
    }

    /// Uniform draw from the open interval (0, 1).
    ///
    /// Values are odd multiples of 2^-53, so neither endpoint can occur.
    pub fn rand(&mut self) -> f64 {
        (((self.engine.gen::<u64>() >> 11) | 1) as f64) * 2f64.powi(-53)
    }

    /// Standard normal draw.
    pub fn randn(&mut self) -> f64 {
        StandardNormal.sample(&mut self.engine)
    }

    /// Standard Cauchy draw.
    pub fn randc(&mut self) -> f64 {
        (PI * (self.rand() - 0.5)).tan()
    }

    /// Heavy-tailed proposal scale: `10^(1 - |randc|) * randn`.
    ///
    /// Spans many orders of magnitude, so a single proposal distribution
    /// serves steps of very different sizes.
    pub fn randh(&mut self) -> f64 {
        10f64.powf(1.0 - self.randc().abs()) * self.randn()
    }

    /// Uniform integer from `[0, n)`.
    pub fn rand_int(&mut self, n: usize) -> usize {
        self.engine.gen_range(0..n)
    }

    /// Serialize the engine state to a byte blob.
    pub fn to_blob(&self) -> Vec<u8> {
        serde_json::to_vec(&self.engine).expect("engine state serialises")
    }

    /// Restore a generator from a state blob written by [`Rng::to_blob`].
    pub fn from_blob(blob: &[u8]) -> Result<Self, Error> {
        let engine = serde_json::from_slice(blob)?;
        Ok(Self { engine })
    }
}
