//! The level ladder: thresholds, counters, stash, and push profile.

use log::info;

use crate::options::Options;
use crate::particle::Pair;

/// The ordered set of likelihood thresholds and their statistics.
///
/// The sampler owns one master `Levels` plus one copy per worker. Copies
/// accumulate counters and stash entries during exploration and are
/// merged back into the master between rounds; only the master ever
/// creates levels or revises `logx`.
#[derive(Clone, Debug)]
pub struct Levels {
    options: Options,

    // Parallel arrays, one entry per level
    logxs: Vec<f64>,
    pairs: Vec<Pair>,
    log_push: Vec<f64>,
    push_is_active: bool,

    // Statistics
    exceeds: Vec<u64>,
    visits: Vec<u64>,
    accepts: Vec<u64>,
    tries: Vec<u64>,

    // Pairs above the current top, from which the next level is cut
    stash: Vec<Pair>,
}

impl Levels {
    /// Start a ladder with the single all-encompassing level.
    pub fn new(options: &Options) -> Self {
        let mut levels = Self {
            options: options.clone(),
            logxs: vec![0.0],
            pairs: vec![Pair::MINIMUM],
            log_push: vec![0.0],
            push_is_active: true,
            exceeds: vec![0],
            visits: vec![0],
            accepts: vec![0],
            tries: vec![0],
            stash: Vec::new(),
        };
        if let Some(max) = options.max_num_levels {
            levels.logxs.reserve(max);
            levels.pairs.reserve(max);
            levels.log_push.reserve(max);
            levels.exceeds.reserve(max);
            levels.visits.reserve(max);
            levels.accepts.reserve(max);
            levels.tries.reserve(max);
        }
        levels.stash.reserve(3 * options.new_level_interval / 2);
        levels
    }

    /// Offer a pair for the next level's stash.
    ///
    /// Pairs are kept only while the ladder is still growing and only if
    /// they lie strictly above the current top; once growth has stopped
    /// the stash is discarded.
    pub fn add_to_stash(&mut self, pair: Pair) {
        let budget_reached = self
            .options
            .max_num_levels
            .map_or(false, |max| self.logxs.len() >= max);
        if budget_reached || !self.push_is_active {
            if !self.stash.is_empty() {
                self.stash.clear();
            }
            return;
        }

        if *self.pairs.last().unwrap() < pair {
            self.stash.push(pair);
        }
    }

    /// Cut a new level from the stash, if the stash is large enough.
    ///
    /// The new threshold is the 1 - 1/e quantile of the stash, so each
    /// level encloses roughly e times less prior mass than the one
    /// below. Returns whether a level was created.
    pub fn create_level(&mut self) -> bool {
        if self.stash.len() < self.options.new_level_interval {
            return false;
        }

        self.stash.sort_unstable_by(|a, b| a.total_cmp(b));
        let idx = (0.632_120_6 * self.stash.len() as f64) as usize;
        self.logxs.push(self.logxs.last().unwrap() - 1.0);
        self.pairs.push(self.stash[idx]);
        self.exceeds.push(0);
        self.visits.push(0);
        self.accepts.push(0);
        self.tries.push(0);
        self.log_push.push(0.0);
        self.stash.clear();

        // See if push should be disabled
        match self.options.max_num_levels {
            Some(max) => {
                if self.logxs.len() >= max {
                    self.push_is_active = false;
                }
            }
            None => {
                if self.recent_logl_changes() <= 0.5 {
                    self.push_is_active = false;
                }
            }
        }
        if !self.push_is_active {
            info!("Done creating levels.");
        }

        self.recompute_log_push();

        info!(
            "Created level {} with logl = {}.",
            self.logxs.len(),
            self.pairs.last().unwrap().logl
        );

        true
    }

    fn recompute_log_push(&mut self) {
        let num_levels = self.logxs.len();
        for (i, lp) in self.log_push.iter_mut().enumerate() {
            *lp = if self.push_is_active {
                let dist = (num_levels - 1 - i) as f64;
                -0.5 * (dist / self.options.lambda).powi(2)
            } else {
                0.0
            };
        }
    }

    /// Record a completed step of a particle sitting at `level`.
    ///
    /// Walks up the ladder counting a visit for every level whose
    /// successor threshold the particle clears, and a try (plus an
    /// accept when `accepted`) at the particle's own level.
    pub fn record_stats(&mut self, pair: Pair, level: usize, accepted: bool) {
        for i in level..self.logxs.len().saturating_sub(1) {
            self.visits[i] += 1;
            if self.pairs[i + 1] < pair {
                self.exceeds[i] += 1;
            } else {
                break;
            }
        }

        if accepted {
            self.accepts[level] += 1;
        }
        self.tries[level] += 1;
    }

    /// Refine every `logx` from the observed exceed/visit counts.
    pub fn revise(&mut self) {
        for i in 1..self.logxs.len() {
            let e = self.exceeds[i - 1] as f64;
            let v = self.visits[i - 1] as f64;
            let numerator = e + 100.0 * (-1.0f64).exp();
            let denominator = v + 100.0;
            self.logxs[i] = self.logxs[i - 1] + (numerator / denominator).ln();
        }
    }

    /// Add counter deltas to the given level. Indices beyond the ladder
    /// are ignored.
    pub fn adjust(&mut self, level: usize, de: u64, dv: u64, da: u64, dt: u64) {
        if level >= self.logxs.len() {
            return;
        }
        self.exceeds[level] += de;
        self.visits[level] += dv;
        self.accepts[level] += da;
        self.tries[level] += dt;
    }

    pub fn clear_stash(&mut self) {
        self.stash.clear();
    }

    /// Copy another ladder's stash entries into this one. Assumes both
    /// ladders share the same thresholds.
    pub fn import_stash_from(&mut self, other: &Levels) {
        self.stash.extend_from_slice(&other.stash);
    }

    /// Weighted average of the last up-to-20 gaps between level
    /// log-likelihoods, weighting recent gaps more. Small values mean
    /// new levels are no longer gaining likelihood.
    pub fn recent_logl_changes(&self) -> f64 {
        let end = self.logxs.len();
        let start = end.saturating_sub(20).max(1);
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for i in start..end {
            let weight = (i - start + 1) as f64;
            numerator += weight * (self.pairs[i].logl - self.pairs[i - 1].logl);
            denominator += weight;
        }
        numerator / denominator
    }

    pub fn num_levels(&self) -> usize {
        self.logxs.len()
    }

    pub fn logx(&self, level: usize) -> f64 {
        self.logxs[level]
    }

    pub fn pair(&self, level: usize) -> Pair {
        self.pairs[level]
    }

    pub fn top(&self) -> Pair {
        *self.pairs.last().unwrap()
    }

    pub fn log_push(&self, level: usize) -> f64 {
        self.log_push[level]
    }

    pub fn exceeds(&self, level: usize) -> u64 {
        self.exceeds[level]
    }

    pub fn visits(&self, level: usize) -> u64 {
        self.visits[level]
    }

    pub fn accepts(&self, level: usize) -> u64 {
        self.accepts[level]
    }

    pub fn tries(&self, level: usize) -> u64 {
        self.tries[level]
    }

    pub fn push_is_active(&self) -> bool {
        self.push_is_active
    }

    pub fn stash_len(&self) -> usize {
        self.stash.len()
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_options(new_level_interval: usize) -> Options {
        Options {
            num_particles: 4,
            num_threads: 1,
            new_level_interval,
            save_interval: 4,
            thin: 1.0,
            max_num_levels: None,
            lambda: 10.0,
            beta: 100.0,
            max_num_saves: 4,
            rng_seed: Some(0),
            level_save_gap: 10,
        }
    }

    fn fill_stash(levels: &mut Levels, base: f64, count: usize) {
        for i in 0..count {
            levels.add_to_stash(Pair::new(base + i as f64, 0.5));
        }
    }

    #[test]
    fn starts_with_the_minimum_level() {
        let levels = Levels::new(&test_options(10));
        assert_eq!(levels.num_levels(), 1);
        assert_eq!(levels.logx(0), 0.0);
        assert_eq!(levels.pair(0), Pair::MINIMUM);
        assert!(levels.push_is_active());
    }

    #[test]
    fn create_level_needs_a_full_stash() {
        let mut levels = Levels::new(&test_options(10));
        fill_stash(&mut levels, 0.0, 9);
        assert!(!levels.create_level());
        assert_eq!(levels.num_levels(), 1);
        levels.add_to_stash(Pair::new(100.0, 0.5));
        assert!(levels.create_level());
        assert_eq!(levels.num_levels(), 2);
        assert_eq!(levels.stash_len(), 0);
    }

    #[test]
    fn new_level_sits_at_the_quantile() {
        let mut levels = Levels::new(&test_options(100));
        fill_stash(&mut levels, 0.0, 100);
        assert!(levels.create_level());
        // 1 - 1/e quantile of 0..100
        assert_relative_eq!(levels.pair(1).logl, 63.0);
        assert_relative_eq!(levels.logx(1), -1.0);
    }

    #[test]
    fn pairs_stay_strictly_increasing() {
        let mut levels = Levels::new(&test_options(10));
        for round in 0..5 {
            fill_stash(&mut levels, 100.0 * round as f64, 10);
            levels.create_level();
        }
        for i in 1..levels.num_levels() {
            assert!(levels.pair(i - 1) < levels.pair(i));
        }
    }

    #[test]
    fn level_creation_cadence() {
        // 10 * new_level_interval pairs above the top yield exactly 10
        // levels, with an empty stash between creations.
        let interval = 10;
        let mut levels = Levels::new(&test_options(interval));
        let mut created = 0;
        for i in 0..(10 * interval) {
            levels.add_to_stash(Pair::new(i as f64, 0.5));
            if levels.create_level() {
                created += 1;
                assert_eq!(levels.stash_len(), 0);
            }
        }
        assert_eq!(created, 10);
        assert_eq!(levels.num_levels(), 11);
    }

    #[test]
    fn below_top_pairs_are_not_stashed() {
        let mut levels = Levels::new(&test_options(10));
        fill_stash(&mut levels, 0.0, 10);
        levels.create_level();
        let top = levels.top();
        levels.add_to_stash(Pair::new(top.logl - 1.0, 0.5));
        assert_eq!(levels.stash_len(), 0);
        levels.add_to_stash(Pair::new(top.logl + 1.0, 0.5));
        assert_eq!(levels.stash_len(), 1);
    }

    #[test]
    fn push_deactivates_at_the_level_budget() {
        let mut options = test_options(10);
        options.max_num_levels = Some(3);
        let mut levels = Levels::new(&options);
        for round in 0..2 {
            fill_stash(&mut levels, 100.0 * round as f64, 10);
            levels.create_level();
        }
        assert_eq!(levels.num_levels(), 3);
        assert!(!levels.push_is_active());
        for i in 0..levels.num_levels() {
            assert_eq!(levels.log_push(i), 0.0);
        }
        // Ladder is capped now; nothing more enters the stash
        levels.add_to_stash(Pair::new(1e6, 0.5));
        assert_eq!(levels.stash_len(), 0);
        assert!(!levels.create_level());
    }

    #[test]
    fn push_profile_is_a_bell_toward_the_top() {
        let mut levels = Levels::new(&test_options(10));
        for round in 0..4 {
            fill_stash(&mut levels, 100.0 * round as f64, 10);
            levels.create_level();
        }
        let num = levels.num_levels();
        assert_eq!(levels.log_push(num - 1), 0.0);
        for i in 1..num {
            assert!(levels.log_push(i - 1) < levels.log_push(i));
            let dist = (num - 1 - (i - 1)) as f64;
            assert_relative_eq!(
                levels.log_push(i - 1),
                -0.5 * (dist / 10.0).powi(2)
            );
        }
    }

    #[test]
    fn record_stats_counts_exceeds_and_visits() {
        let mut levels = Levels::new(&test_options(10));
        for round in 0..3 {
            fill_stash(&mut levels, 100.0 * round as f64, 10);
            levels.create_level();
        }
        // A pair above every threshold: visits and exceeds all the way up
        let high = Pair::new(1e6, 0.5);
        levels.record_stats(high, 0, true);
        assert_eq!(levels.visits(0), 1);
        assert_eq!(levels.exceeds(0), 1);
        assert_eq!(levels.visits(2), 1);
        assert_eq!(levels.exceeds(2), 1);
        assert_eq!(levels.tries(0), 1);
        assert_eq!(levels.accepts(0), 1);

        // A pair below the next threshold: one visit, no exceed, then stop
        let low = Pair::new(levels.pair(1).logl - 1.0, 0.5);
        levels.record_stats(low, 0, false);
        assert_eq!(levels.visits(0), 2);
        assert_eq!(levels.exceeds(0), 1);
        assert_eq!(levels.visits(1), 1);
        assert_eq!(levels.tries(0), 2);
        assert_eq!(levels.accepts(0), 1);
    }

    #[test]
    fn exceeds_never_outnumber_visits() {
        let mut levels = Levels::new(&test_options(10));
        for round in 0..3 {
            fill_stash(&mut levels, 100.0 * round as f64, 10);
            levels.create_level();
        }
        let mut rng = crate::rng::Rng::with_seed(5);
        for _ in 0..1000 {
            let pair = Pair::new(300.0 * rng.rand(), rng.rand());
            let level = rng.rand_int(levels.num_levels());
            if levels.pair(level) < pair {
                levels.record_stats(pair, level, rng.rand() < 0.5);
            }
        }
        for i in 0..levels.num_levels() {
            assert!(levels.exceeds(i) <= levels.visits(i));
        }
    }

    #[test]
    fn revise_keeps_logx_non_increasing() {
        let mut levels = Levels::new(&test_options(10));
        for round in 0..4 {
            fill_stash(&mut levels, 100.0 * round as f64, 10);
            levels.create_level();
        }
        let mut rng = crate::rng::Rng::with_seed(6);
        for _ in 0..500 {
            let pair = Pair::new(500.0 * rng.rand(), rng.rand());
            let level = rng.rand_int(levels.num_levels());
            if levels.pair(level) < pair {
                levels.record_stats(pair, level, true);
            }
        }
        levels.revise();
        assert_eq!(levels.logx(0), 0.0);
        for i in 1..levels.num_levels() {
            assert!(levels.logx(i) <= levels.logx(i - 1));
        }
    }

    #[test]
    fn merging_counters_is_commutative() {
        let options = test_options(10);
        let mut base = Levels::new(&options);
        fill_stash(&mut base, 0.0, 10);
        base.create_level();

        let mut copy_a = base.clone();
        let mut copy_b = base.clone();
        copy_a.record_stats(Pair::new(50.0, 0.5), 0, true);
        copy_a.record_stats(Pair::new(2.0, 0.5), 0, false);
        copy_b.record_stats(Pair::new(70.0, 0.5), 1, true);
        copy_b.record_stats(Pair::new(80.0, 0.5), 1, true);

        let merge = |order: [&Levels; 2]| {
            let mut master = base.clone();
            let backup = master.clone();
            for copy in order.iter() {
                for j in 0..copy.num_levels() {
                    master.adjust(
                        j,
                        copy.exceeds(j) - backup.exceeds(j),
                        copy.visits(j) - backup.visits(j),
                        copy.accepts(j) - backup.accepts(j),
                        copy.tries(j) - backup.tries(j),
                    );
                }
            }
            master
        };

        let ab = merge([&copy_a, &copy_b]);
        let ba = merge([&copy_b, &copy_a]);
        for j in 0..ab.num_levels() {
            assert_eq!(ab.exceeds(j), ba.exceeds(j));
            assert_eq!(ab.visits(j), ba.visits(j));
            assert_eq!(ab.accepts(j), ba.accepts(j));
            assert_eq!(ab.tries(j), ba.tries(j));
        }
    }

    #[test]
    fn recent_logl_changes_is_infinite_while_level_zero_is_in_window() {
        let mut levels = Levels::new(&test_options(10));
        fill_stash(&mut levels, 0.0, 10);
        levels.create_level();
        fill_stash(&mut levels, 100.0, 10);
        levels.create_level();
        // The gap up from level 0 is infinite, so the ladder keeps
        // growing until level 0 leaves the 20-gap window.
        assert_eq!(levels.recent_logl_changes(), f64::INFINITY);
        assert!(levels.push_is_active());
    }

    #[test]
    fn push_deactivates_when_likelihood_gains_flatten() {
        let mut levels = Levels::new(&test_options(10));
        let mut round = 0;
        while levels.push_is_active() && round < 100 {
            let base = 0.01 * (round + 1) as f64;
            for i in 0..10 {
                levels.add_to_stash(Pair::new(base + 0.0001 * i as f64, 0.5));
            }
            levels.create_level();
            round += 1;
        }
        assert!(!levels.push_is_active());
        assert!(levels.num_levels() >= 22);
    }

    #[test]
    fn imported_stash_entries_accumulate() {
        let options = test_options(10);
        let mut master = Levels::new(&options);
        let mut copy_a = master.clone();
        let mut copy_b = master.clone();
        fill_stash(&mut copy_a, 0.0, 4);
        fill_stash(&mut copy_b, 50.0, 5);
        master.import_stash_from(&copy_a);
        master.import_stash_from(&copy_b);
        assert_eq!(master.stash_len(), 9);
    }
}
