//! Seed derivation across repeated runs against one store.

use rdnest::models::SpikeSlab;
use rdnest::{Database, Options, Sampler};

fn options_with_hint(rng_seed: i64) -> Options {
    Options {
        num_particles: 4,
        num_threads: 2,
        new_level_interval: 50,
        save_interval: 20,
        thin: 1.0,
        max_num_levels: Some(5),
        lambda: 10.0,
        beta: 100.0,
        max_num_saves: 20,
        rng_seed: Some(rng_seed),
        level_save_gap: 10,
    }
}

#[test]
fn second_run_skips_seeds_already_in_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let gap = Options::RNG_SEED_GAP;

    {
        let database = Database::create(dir.path()).unwrap();
        let sampler =
            Sampler::<SpikeSlab>::new(options_with_hint(1000), database)
                .unwrap();
        assert_eq!(sampler.sampler_id(), 1);
    }

    // Same hint again: both candidate seeds are taken, so the second
    // run shifts down by the smallest multiple of the gap that frees
    // them all
    let database = Database::create(dir.path()).unwrap();
    let sampler =
        Sampler::<SpikeSlab>::new(options_with_hint(1000), database).unwrap();
    assert_eq!(sampler.sampler_id(), 2);

    let reader = Database::open_readonly(dir.path()).unwrap();
    assert_eq!(reader.rng_seeds(1).unwrap(), vec![1000, 1000 - gap]);
    assert_eq!(
        reader.rng_seeds(2).unwrap(),
        vec![1000 - 2 * gap, 1000 - 3 * gap]
    );
}

#[test]
fn all_recorded_seeds_are_unique() {
    let dir = tempfile::tempdir().unwrap();
    for _ in 0..3 {
        let database = Database::create(dir.path()).unwrap();
        Sampler::<SpikeSlab>::new(options_with_hint(500), database).unwrap();
    }
    let reader = Database::open_readonly(dir.path()).unwrap();
    let mut all_seeds = Vec::new();
    for sampler_id in 1..=3 {
        let seeds = reader.rng_seeds(sampler_id).unwrap();
        assert_eq!(seeds.len(), 2);
        all_seeds.extend(seeds);
    }
    let distinct: std::collections::HashSet<i64> =
        all_seeds.iter().copied().collect();
    assert_eq!(distinct.len(), all_seeds.len());
}
