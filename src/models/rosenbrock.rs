//! A 50-dimensional doubled Rosenbrock density.

use crate::model::{params_from_blob, params_to_blob, params_to_csv_row, Model};
use crate::models::ParameterNames;
use crate::rng::Rng;
use crate::utils::wrap;
use crate::Result;

const NUM_PARAMS: usize = 50;
const X_MIN: f64 = -10.0;
const X_MAX: f64 = 10.0;

/// The classic banana-shaped valley, chained over 50 coordinates with
/// the log-density doubled. A hard multimodal stress test for the level
/// ladder.
#[derive(Clone, Debug)]
pub struct Rosenbrock {
    xs: Vec<f64>,
}

impl Model for Rosenbrock {
    fn from_prior(rng: &mut Rng) -> Self {
        Self {
            xs: (0..NUM_PARAMS)
                .map(|_| X_MIN + (X_MAX - X_MIN) * rng.rand())
                .collect(),
        }
    }

    fn perturb(&mut self, rng: &mut Rng) -> f64 {
        let mut num = 1;
        if rng.rand() <= 0.5 {
            num = (self.xs.len() as f64).powf(rng.rand()) as usize;
        }

        for _ in 0..num {
            let k = rng.rand_int(self.xs.len());
            self.xs[k] =
                wrap(self.xs[k] + (X_MAX - X_MIN) * rng.randh(), X_MIN, X_MAX);
        }

        0.0
    }

    fn log_likelihood(&self) -> f64 {
        let mut logl = 0.0;
        for i in 0..(self.xs.len() - 1) {
            logl -= 100.0 * (self.xs[i + 1] - self.xs[i] * self.xs[i]).powi(2);
            logl -= (1.0 - self.xs[i]).powi(2);
        }
        2.0 * logl
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
