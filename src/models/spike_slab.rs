//! The spike-and-slab test density in 20 dimensions.

use std::f64::consts::PI;

use crate::model::{params_from_blob, params_to_blob, params_to_csv_row, Model};
use crate::models::ParameterNames;
use crate::rng::Rng;
use crate::utils::{logsumexp, wrap};
use crate::Result;

const NUM_PARAMS: usize = 20;
const U: f64 = 0.1;
const V: f64 = 0.01;
const SHIFT: f64 = 0.031;

/// A narrow Gaussian "spike" carrying 100 times the mass of a wider
/// "slab", both near the centre of the unit hypercube. The analytic
/// evidence makes it a standard correctness check.
#[derive(Clone, Debug)]
pub struct SpikeSlab {
    xs: Vec<f64>,
}

impl Model for SpikeSlab {
    fn from_prior(rng: &mut Rng) -> Self {
        Self {
            xs: (0..NUM_PARAMS).map(|_| rng.rand()).collect(),
        }
    }

    fn perturb(&mut self, rng: &mut Rng) -> f64 {
        let mut num = 1;
        if rng.rand() <= 0.5 {
            num = (self.xs.len() as f64).powf(rng.rand()) as usize;
        }

        for _ in 0..num {
            let k = rng.rand_int(self.xs.len());
            self.xs[k] = wrap(self.xs[k] + rng.randh(), 0.0, 1.0);
        }

        0.0
    }

    fn log_likelihood(&self) -> f64 {
        let c1 = -0.5 * (2.0 * PI * U * U).ln();
        let c2 = -0.5 * (2.0 * PI * V * V).ln();
        let tau1 = 1.0 / (U * U);
        let tau2 = 1.0 / (V * V);

        let mut logl1 = 0.0;
        let mut logl2 = 0.0;
        for x in &self.xs {
            logl1 += c1 - 0.5 * tau1 * (x - 0.5).powi(2);
            logl2 += c2 - 0.5 * tau2 * (x - 0.5 - SHIFT).powi(2);
        }
        logsumexp(&[logl1, 100f64.ln() + logl2])
    }

    fn to_blob(&self) -> Vec<u8> {
        params_to_blob(&self.xs)
    }

    fn from_blob(blob: &[u8]) -> Result<Self> {
        Ok(Self {
            xs: params_from_blob(blob, NUM_PARAMS)?,
        })
    }

    fn parameter_names() -> ParameterNames {
        ParameterNames::numbered(NUM_PARAMS)
    }

    fn csv_row(&self) -> String {
        params_to_csv_row(&self.xs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn blob_round_trip_preserves_rendering() {
        let mut rng = Rng::with_seed(11);
        let model = SpikeSlab::from_prior(&mut rng);
        let restored = SpikeSlab::from_blob(&model.to_blob()).unwrap();
        assert_eq!(model.csv_row(), restored.csv_row());
    }

    #[test]
    fn likelihood_peaks_between_spike_and_slab_centres() {
        let at = |value: f64| SpikeSlab {
            xs: vec![value; NUM_PARAMS],
        };
        assert!(at(0.52).log_likelihood() > at(0.9).log_likelihood());
        assert!(at(0.52).log_likelihood() > at(0.1).log_likelihood());
    }

    #[test]
    fn slab_dominates_away_from_the_spike() {
        let xs = vec![0.5; NUM_PARAMS];
        let model = SpikeSlab { xs };
        let c1 = -0.5 * (2.0 * PI * U * U).ln();
        // At the exact slab centre the narrow spike term is negligible
        assert_relative_eq!(
            model.log_likelihood(),
            NUM_PARAMS as f64 * c1,
            epsilon = 1e-6
        );
    }

    #[test]
    fn perturb_stays_in_the_unit_cube() {
        let mut rng = Rng::with_seed(12);
        let mut model = SpikeSlab::from_prior(&mut rng);
        for _ in 0..500 {
            model.perturb(&mut rng);
            assert!(model.xs.iter().all(|&x| (0.0..1.0).contains(&x)));
        }
    }
}
