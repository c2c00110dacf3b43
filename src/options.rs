//! Run configuration.

use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, Result};

/// The parameters of a sampler run.
///
/// Loaded from a YAML options file or constructed directly; either way
/// [`Options::validate`] must pass before a sampler accepts it.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    /// Total number of walkers.
    pub num_particles: usize,
    /// Number of worker threads.
    pub num_threads: usize,
    /// Stash size required before a new level is created.
    pub new_level_interval: usize,
    /// Exploration steps per round; one particle is saved per round.
    pub save_interval: usize,
    /// Probability that a saved particle keeps its parameter blob.
    pub thin: f64,
    /// Cap on the number of levels. Unset means the ladder stops growing
    /// when the likelihood stops improving.
    #[serde(default)]
    pub max_num_levels: Option<usize>,
    /// Width of the Gaussian push profile.
    pub lambda: f64,
    /// Weight of the equal-visits steering term once push is inactive.
    pub beta: f64,
    /// Stop after this many particles have been saved.
    pub max_num_saves: u64,
    /// Seed hint; worker seeds count down from here. Unset means the
    /// wall clock chooses.
    #[serde(default)]
    pub rng_seed: Option<i64>,
    /// Persist level rows every this many full saves.
    #[serde(default = "default_level_save_gap")]
    pub level_save_gap: u64,
}

fn default_level_save_gap() -> u64 {
    10
}

impl Options {
    /// Gap between consecutive derived worker seeds.
    pub const RNG_SEED_GAP: i64 = 123;

    /// Load options from a YAML file and validate them.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let options: Options = serde_yaml::from_reader(file)?;
        options.validate()?;
        Ok(options)
    }

    /// Check the divisibility and range requirements.
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(Error::Config("num_threads must be positive".into()));
        }
        if self.num_particles == 0 {
            return Err(Error::Config("num_particles must be positive".into()));
        }
        if self.num_particles % self.num_threads != 0 {
            return Err(Error::Config(format!(
                "num_particles ({}) must be a multiple of num_threads ({})",
                self.num_particles, self.num_threads
            )));
        }
        if self.save_interval % self.num_threads != 0 {
            return Err(Error::Config(format!(
                "save_interval ({}) must be a multiple of num_threads ({})",
                self.save_interval, self.num_threads
            )));
        }
        if self.max_num_saves % self.num_threads as u64 != 0 {
            return Err(Error::Config(format!(
                "max_num_saves ({}) must be a multiple of num_threads ({})",
                self.max_num_saves, self.num_threads
            )));
        }
        if !(self.thin > 0.0 && self.thin <= 1.0) {
            return Err(Error::Config(format!(
                "thin ({}) must lie in (0, 1]",
                self.thin
            )));
        }
        if self.lambda <= 0.0 {
            return Err(Error::Config(format!(
                "lambda ({}) must be positive",
                self.lambda
            )));
        }
        if self.max_num_levels == Some(0) {
            return Err(Error::Config("max_num_levels must be positive".into()));
        }
        if self.level_save_gap == 0 {
            return Err(Error::Config("level_save_gap must be positive".into()));
        }
        Ok(())
    }

    /// The starting seed: the configured hint, or the wall clock.
    pub fn seed_hint(&self) -> i64 {
        self.rng_seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0)
        })
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            num_particles: 5,
            num_threads: 5,
            new_level_interval: 10_000,
            save_interval: 1000,
            thin: 0.1,
            max_num_levels: Some(100),
            lambda: 10.0,
            beta: 100.0,
            max_num_saves: 100_000,
            rng_seed: None,
            level_save_gap: default_level_save_gap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        Options::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_divisible_particles() {
        let options = Options {
            num_particles: 7,
            num_threads: 2,
            ..Options::default()
        };
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_non_divisible_save_interval() {
        let options = Options {
            num_particles: 10,
            num_threads: 2,
            save_interval: 11,
            ..Options::default()
        };
        assert!(matches!(options.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn loads_yaml_with_optional_keys_absent() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "num_particles: 10\n\
             num_threads: 2\n\
             new_level_interval: 100\n\
             save_interval: 20\n\
             thin: 0.5\n\
             lambda: 10.0\n\
             beta: 100.0\n\
             max_num_saves: 1000"
        )
        .unwrap();
        let options = Options::load(file.path()).unwrap();
        assert_eq!(options.max_num_levels, None);
        assert_eq!(options.rng_seed, None);
        assert_eq!(options.level_save_gap, 10);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Options::load("no/such/options.yaml").is_err());
    }

    #[test]
    fn seed_hint_prefers_configured_seed() {
        let options = Options {
            rng_seed: Some(42),
            ..Options::default()
        };
        assert_eq!(options.seed_hint(), 42);
    }
}
