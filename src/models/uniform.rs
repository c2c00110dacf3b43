//! Unit-coordinate helper for models with Uniform(0, 1) priors.

use crate::rng::Rng;
use crate::utils::wrap;

/// A vector of coordinates on the unit hypercube with the standard
/// multi-site heavy-tailed perturbation.
///
/// Models built on this keep their parameters as transforms of the
/// coordinates: perturb the coordinates, then re-derive the parameters.
#[derive(Clone, Debug)]
pub struct UniformCoords {
    us: Vec<f64>,
}

impl UniformCoords {
    /// Draw `num` coordinates from the prior.
    pub fn from_prior(rng: &mut Rng, num: usize) -> Self {
        Self {
            us: (0..num).map(|_| rng.rand()).collect(),
        }
    }

    /// All coordinates set to zero; the placeholder used when a model is
    /// rebuilt from a parameter blob.
    pub fn zeroed(num: usize) -> Self {
        Self { us: vec![0.0; num] }
    }

    /// Move one coordinate, or a heavy-tailed number of them, each by a
    /// `randh` step with wraparound. Returns the log proposal
    /// correction, which is zero for this symmetric move.
    pub fn perturb(&mut self, rng: &mut Rng) -> f64 {
        let mut num = 1;
        if rng.rand() <= 0.5 {
            num = (self.us.len() as f64).powf(rng.rand()) as usize;
        }

        for _ in 0..num {
            let k = rng.rand_int(self.us.len());
            self.us[k] = wrap(self.us[k] + rng.randh(), 0.0, 1.0);
        }

        0.0
    }

    pub fn us(&self) -> &[f64] {
        &self.us
    }

    pub fn len(&self) -> usize {
        self.us.len()
    }

    pub fn is_empty(&self) -> bool {
        self.us.is_empty()
    }
}
