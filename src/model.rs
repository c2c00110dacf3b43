//! The capability a probability model must provide to the sampler.

use crate::models::ParameterNames;
use crate::rng::Rng;
use crate::{Error, Result};

/// A user-supplied probability model.
///
/// The sampler is generic over this trait so that `log_likelihood` can
/// be inlined into the hot loop. Implementations must be cheap to clone;
/// every Metropolis step clones the state for its proposal.
pub trait Model: Clone + Send + Sync {
    /// Draw a fresh state from the prior. Deterministic given the
    /// generator state.
    fn from_prior(rng: &mut Rng) -> Self;

    /// Mutate the state by one proposal and return the log of the
    /// proposal correction; acceptance uses `min(1, exp(logh))` before
    /// the likelihood is consulted.
    fn perturb(&mut self, rng: &mut Rng) -> f64;

    /// Log-likelihood of the current state. May be `-inf`; a NaN is
    /// treated like `-inf` because it never exceeds a threshold.
    fn log_likelihood(&self) -> f64;

    /// Serialize the parameters to little-endian doubles in name order.
    fn to_blob(&self) -> Vec<u8>;

    /// Rebuild a state from a blob written by [`Model::to_blob`].
    fn from_blob(blob: &[u8]) -> Result<Self>;

    /// Ordered, human-readable parameter names for CSV headers.
    fn parameter_names() -> ParameterNames;

    /// Comma-separated parameter values matching the name order.
    fn csv_row(&self) -> String;
}

/// Encode a parameter vector as concatenated little-endian doubles.
pub fn params_to_blob(xs: &[f64]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(8 * xs.len());
    for x in xs {
        blob.extend_from_slice(&x.to_le_bytes());
    }
    blob
}

/// Decode a blob of `num_params` little-endian doubles.
pub fn params_from_blob(blob: &[u8], num_params: usize) -> Result<Vec<f64>> {
    if blob.len() != 8 * num_params {
        return Err(Error::BadBlob {
            expected: 8 * num_params,
            actual: blob.len(),
        });
    }
    Ok(blob
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        })
        .collect())
}

/// Render parameter values the way [`Model::csv_row`] expects.
pub fn params_to_csv_row(xs: &[f64]) -> String {
    xs.iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let xs = vec![0.0, -1.5, 3.25, f64::MIN_POSITIVE];
        let blob = params_to_blob(&xs);
        assert_eq!(blob.len(), 32);
        assert_eq!(params_from_blob(&blob, 4).unwrap(), xs);
    }

    #[test]
    fn wrong_length_blob_is_rejected() {
        let blob = params_to_blob(&[1.0, 2.0]);
        match params_from_blob(&blob, 3) {
            Err(Error::BadBlob { expected, actual }) => {
                assert_eq!(expected, 24);
                assert_eq!(actual, 16);
            }
            other => panic!("expected BadBlob, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn csv_row_matches_value_order() {
        assert_eq!(params_to_csv_row(&[1.0, -0.5]), "1,-0.5");
    }
}
