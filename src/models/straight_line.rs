//! Straight-line regression with unknown noise, on file-loaded data.

use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use log::info;
use statrs::function::erf::erf_inv;

use crate::model::{params_from_blob, params_to_blob, params_to_csv_row, Model};
use crate::models::{ParameterNames, UniformCoords};
use crate::rng::Rng;
use crate::Result;

static DATA: OnceLock<Vec<(f64, f64)>> = OnceLock::new();
static NAMES: OnceLock<ParameterNames> = OnceLock::new();

/// `y = m*x + b` with Gaussian noise of unknown scale `sigma`.
///
/// Built on [`UniformCoords`]: three unit coordinates are transformed
/// into the named parameters, with broad priors on the slope and
/// intercept and a log-uniform prior on the noise. Call
/// [`StraightLine::load_data`] before drawing the first particle.
#[derive(Clone, Debug)]
pub struct StraightLine {
    coords: UniformCoords,
    params: Vec<f64>,
}

impl StraightLine {
    /// Load whitespace-separated `(x, y)` rows. Must run before workers
    /// are spawned; later calls are ignored.
    pub fn load_data<P: AsRef<Path>>(path: P) -> Result<usize> {
        let text = fs::read_to_string(&path)?;
        let values: Vec<f64> = text
            .split_whitespace()
            .filter_map(|token| token.parse().ok())
            .collect();
        let rows: Vec<(f64, f64)> = values
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();
        info!(
            "Loaded {} data points from {}.",
            rows.len(),
            path.as_ref().display()
        );
        let _ = DATA.set(rows);
        Ok(DATA.get().map_or(0, Vec::len))
    }

    fn data() -> &'static [(f64, f64)] {
        DATA.get().map_or(&[], Vec::as_slice)
    }

    fn names() -> &'static ParameterNames {
        NAMES.get_or_init(|| ParameterNames::named(["m", "b", "sigma"]))
    }

    /// Quantile function of the standard normal.
    fn qnorm(p: f64) -> f64 {
        2f64.sqrt() * erf_inv(2.0 * p - 1.0)
    }

    fn derive_params(coords: &UniformCoords) -> Vec<f64> {
        let us = coords.us();
        vec![
            1000.0 * Self::qnorm(us[0]),
            1000.0 * Self::qnorm(us[1]),
            (5.0 * us[2]).exp(),
        ]
    }
}

impl Model for StraightLine {
    fn from_prior(rng: &mut Rng) -> Self {
        let coords = UniformCoords::from_prior(rng, 3);
        let params = Self::derive_params(&coords);
        Self { coords, params }
    }

    fn perturb(&mut self, rng: &mut Rng) -> f64 {
        let logh = self.coords.perturb(rng);
        self.params = Self::derive_params(&self.coords);
        logh
    }

    fn log_likelihood(&self) -> f64 {
        let names = Self::names();
        let m = self.params[names.index("m").unwrap()];
        let b = self.params[names.index("b").unwrap()];
        let sigma = self.params[names.index("sigma").unwrap()];

        let var = sigma * sigma;
        let tau = 1.0 / var;
        let c = -0.5 * (2.0 * PI * var).ln();
        Self::data()
            .iter()
            .map(|&(x, y)| {
                let mu = m * x + b;
                c - 0.5 * tau * (y - mu).powi(2)
            })
            .sum()
    }

    fn to_blob(&self) -> Vec<u8> {
        params_to_blob(&self.params)
    }

    fn from_blob(blob: &[u8]) -> Result<Self> {
        Ok(Self {
            coords: UniformCoords::zeroed(3),
            params: params_from_blob(blob, 3)?,
        })
    }

    fn parameter_names() -> ParameterNames {
        Self::names().clone()
    }

    fn csv_row(&self) -> String {
        params_to_csv_row(&self.params)
    }
}
