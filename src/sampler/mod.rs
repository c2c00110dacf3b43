//! The concurrent Diffusive Nested Sampler.

use log::{debug, info};
use rayon::prelude::*;

use crate::database::Database;
use crate::levels::Levels;
use crate::model::Model;
use crate::options::Options;
use crate::particle::Particle;
use crate::rng::Rng;
use crate::utils::wrap;
use crate::{Error, Result};

/// A full sampler run: particles, the master level ladder, one ladder
/// copy and one RNG per worker, and the store connection.
///
/// Each round the workers explore disjoint particle slices against
/// their own ladder copies; the orchestrator then merges counters and
/// stashes back into the master, saves a particle, attempts a level,
/// revises the mass estimates, and commits.
pub struct Sampler<M: Model> {
    sampler_id: i64,
    database: Database,
    options: Options,
    rngs: Vec<Rng>,
    particles: Vec<Particle<M>>,
    levels: Levels,
    copies: Vec<Levels>,
    work: u64,
    saved_particles: u64,
    saved_full_particles: u64,
    done: bool,
    pruned: u64,
}

impl<M: Model> Sampler<M> {
    /// Initialise a run: pick a sampler id, derive and persist the
    /// worker seeds, persist the configuration and the initial level,
    /// and draw the particles from the prior.
    ///
    /// Particles are drawn serially with the first worker's generator,
    /// so models may lazily initialise shared state in `from_prior`.
    pub fn new(options: Options, database: Database) -> Result<Self> {
        options.validate()?;

        database.begin()?;

        info!("Initialising sampler:");
        let sampler_id = database.max_sampler_id()? + 1;
        info!("    Sampler ID = {}.", sampler_id);
        database.insert_sampler(sampler_id, &options)?;

        // Starting with the hint, derive a seed per worker, skipping
        // any seed some earlier run has already recorded.
        let mut rngs = Vec::with_capacity(options.num_threads);
        let mut seeds = Vec::with_capacity(options.num_threads);
        let mut seed = options.seed_hint();
        while rngs.len() < options.num_threads {
            if !database.seed_exists(seed)? {
                database.insert_rng_seed(seed, sampler_id)?;
                rngs.push(Rng::with_seed(seed));
                seeds.push(seed);
            }
            seed -= Options::RNG_SEED_GAP;
        }
        info!("    RNG seeds = {:?}.", seeds);

        let levels = Levels::new(&options);
        let copies = vec![levels.clone(); options.num_threads];

        let mut sampler = Self {
            sampler_id,
            database,
            options,
            rngs,
            particles: Vec::new(),
            levels,
            copies,
            work: 0,
            saved_particles: 0,
            saved_full_particles: 0,
            done: false,
            pruned: 0,
        };
        sampler.save_levels()?;

        info!(
            "    Generating {} particles from the prior...",
            sampler.options.num_particles
        );
        sampler.particles.reserve(sampler.options.num_particles);
        for _ in 0..sampler.options.num_particles {
            let t = M::from_prior(&mut sampler.rngs[0]);
            let logl = t.log_likelihood();
            let tb = sampler.rngs[0].rand();
            sampler.particles.push(Particle::new(t, logl, tb, 0));
        }
        info!("    done.");

        sampler.database.commit()?;
        Ok(sampler)
    }

    /// Run rounds until the save budget is reached, then persist the
    /// levels one last time.
    pub fn run(&mut self) -> Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.num_threads)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        let particles_per_thread =
            self.options.num_particles / self.options.num_threads;

        while !self.done {
            info!(
                "Exploring [{} levels, highest logl = {}]...",
                self.levels.num_levels(),
                self.levels.top().logl
            );

            for copy in self.copies.iter_mut() {
                *copy = self.levels.clone();
                copy.clear_stash();
            }

            self.database.begin()?;

            {
                let particles = &mut self.particles;
                let copies = &mut self.copies;
                let rngs = &mut self.rngs;
                pool.install(|| {
                    particles
                        .par_chunks_mut(particles_per_thread)
                        .zip(copies.par_iter_mut())
                        .zip(rngs.par_iter_mut())
                        .for_each(|((slice, copy), rng)| {
                            explore(slice, copy, rng)
                        });
                });
            }
            info!("done.");

            self.work += self.options.save_interval as u64;

            // Save one particle, with its blob at probability `thin`
            let k = self.rngs[0].rand_int(self.options.num_particles);
            let full = self.rngs[0].rand() <= self.options.thin;
            self.saved_particles += 1;
            if full {
                self.saved_full_particles += 1;
            }
            self.save_particle(k, full)?;
            self.done = self.saved_particles >= self.options.max_num_saves;

            // Merge level data from the worker copies
            let backup = self.levels.clone();
            for copy in &self.copies {
                for j in 0..copy.num_levels() {
                    self.levels.adjust(
                        j,
                        copy.exceeds(j) - backup.exceeds(j),
                        copy.visits(j) - backup.visits(j),
                        copy.accepts(j) - backup.accepts(j),
                        copy.tries(j) - backup.tries(j),
                    );
                }
                self.levels.import_stash_from(copy);
            }
            let created_level = self.levels.create_level();

            self.levels.revise();
            if created_level
                || self.saved_full_particles % self.options.level_save_gap == 0
            {
                self.save_levels()?;
            }
            self.database.commit()?;

            self.prune_laggards();

            debug!("Work done = {:.3e}.", self.work as f64);
        }

        self.database.begin()?;
        self.save_levels()?;
        self.database.commit()?;

        Ok(())
    }

    fn save_particle(&mut self, k: usize, with_params: bool) -> Result<()> {
        let particle = &self.particles[k];
        let blob = if with_params {
            Some(particle.t.to_blob())
        } else {
            None
        };
        self.database.insert_particle(
            self.sampler_id,
            particle.level as i64,
            blob.as_deref(),
            particle.logl,
            particle.tb,
        )?;
        info!(
            "Saved particle {} [{} full particles].",
            self.saved_particles, self.saved_full_particles
        );
        Ok(())
    }

    fn save_levels(&self) -> Result<()> {
        for i in 0..self.levels.num_levels() {
            self.database.upsert_level(
                i as i64,
                self.levels.logx(i),
                self.levels.pair(i),
                self.levels.exceeds(i),
                self.levels.visits(i),
                self.levels.accepts(i),
                self.levels.tries(i),
            )?;
        }
        Ok(())
    }

    /// Replace every particle stuck far below the push bell with a copy
    /// of a uniformly chosen sibling.
    fn prune_laggards(&mut self) {
        let snapshot = self.particles.clone();
        let mut pruned_now = 0u64;
        for i in 0..self.particles.len() {
            if self.levels.log_push(self.particles[i].level) < -10.0 {
                let j = self.rngs[0].rand_int(snapshot.len());
                self.particles[i] = snapshot[j].clone();
                pruned_now += 1;
            }
        }
        self.pruned += pruned_now;
        if pruned_now > 0 {
            info!(
                "{} lagging particle(s) pruned ({} so far).",
                pruned_now, self.pruned
            );
        }
    }

    pub fn sampler_id(&self) -> i64 {
        self.sampler_id
    }

    pub fn particles(&self) -> &[Particle<M>] {
        &self.particles
    }

    pub fn levels(&self) -> &Levels {
        &self.levels
    }

    pub fn saved_particles(&self) -> u64 {
        self.saved_particles
    }

    pub fn pruned(&self) -> u64 {
        self.pruned
    }
}

/// One worker's share of a round: `save_interval / num_threads` steps
/// over its own particle slice, ladder copy, and RNG stream.
fn explore<M: Model>(particles: &mut [Particle<M>], copy: &mut Levels, rng: &mut Rng) {
    let steps = copy.options().save_interval / copy.options().num_threads;
    for _ in 0..steps {
        let k = rng.rand_int(particles.len());
        metropolis_step(&mut particles[k], copy, rng);
        let pair = particles[k].pair();
        copy.add_to_stash(pair);
    }
}

/// The double Metropolis step: a parameter move and a level move, in
/// random order. Returns whether the parameter move was accepted.
fn metropolis_step<M: Model>(
    particle: &mut Particle<M>,
    copy: &mut Levels,
    rng: &mut Rng,
) -> bool {
    let level_first = rng.rand() <= 0.5;
    if level_first {
        metropolis_step_level(particle, copy, rng);
    }

    let mut accepted = false;
    let mut proposal = particle.clone();
    let logh = proposal.t.perturb(rng);

    // Pre-reject on the proposal correction alone
    if rng.rand() <= logh.exp() {
        proposal.logl = proposal.t.log_likelihood();
        proposal.tb = wrap(particle.tb + rng.randh(), 0.0, 1.0);
        if copy.pair(particle.level) < proposal.pair() {
            accepted = true;
            *particle = proposal;
        }
    }

    copy.record_stats(particle.pair(), particle.level, accepted);

    if !level_first {
        metropolis_step_level(particle, copy, rng);
    }

    accepted
}

/// Propose moving the particle to another level, a heavy-tailed number
/// of rungs away.
fn metropolis_step_level<M: Model>(
    particle: &mut Particle<M>,
    copy: &mut Levels,
    rng: &mut Rng,
) {
    let level = particle.level;
    let mag = 1i64.saturating_add(rng.randc().abs() as i64);
    let sign: i64 = if rng.rand() <= 0.5 { -1 } else { 1 };
    let proposed = (level as i64).saturating_add(mag.saturating_mul(sign));
    if proposed < 0
        || proposed >= copy.num_levels() as i64
        || particle.pair() < copy.pair(proposed as usize)
    {
        return;
    }
    let proposed = proposed as usize;

    // Acceptance probability
    let mut loga = copy.log_push(proposed) - copy.log_push(level);

    // Prior-mass correction for downward moves
    if proposed < level {
        loga += copy.logx(level) - copy.logx(proposed);
    }

    // Equal-visits steering once the ladder has stopped growing
    if !copy.push_is_active() {
        let beta = copy.options().beta;
        loga += beta
            * ((100.0 + copy.tries(level) as f64).ln()
                - (100.0 + copy.tries(proposed) as f64).ln());
    }

    if rng.rand() <= loga.exp() {
        particle.level = proposed;
    }
}
