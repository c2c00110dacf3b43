//! RDNest implements Diffusive Nested Sampling: a Markov-chain Monte
//! Carlo algorithm that explores a probability model across a sequence
//! of likelihood-bounded levels, persists every level and saved
//! particle into an embedded SQLite store, and reweights the result
//! offline into the marginal likelihood, the posterior, and the
//! prior-to-posterior information.

use std::path::PathBuf;
use thiserror::Error as ThisError;

pub mod database;
pub mod levels;
pub mod model;
pub mod models;
pub mod options;
pub mod particle;
pub mod postprocess;
pub mod rng;
pub mod sampler;
pub mod utils;

pub use crate::database::{clear_output_dir, Database};
pub use crate::levels::Levels;
pub use crate::model::Model;
pub use crate::options::Options;
pub use crate::particle::{Pair, Particle};
pub use crate::postprocess::{postprocess, PostprocessOptions, Results};
pub use crate::rng::Rng;
pub use crate::sampler::Sampler;

/// Everything that can go wrong outside the hot loop.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("no sampler database at {0}")]
    MissingStore(PathBuf),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("RNG state blob error: {0}")]
    RngBlob(#[from] serde_json::Error),
    #[error("parameter blob has {actual} bytes, expected {expected}")]
    BadBlob { expected: usize, actual: usize },
    #[error("{0}")]
    Empty(&'static str),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
