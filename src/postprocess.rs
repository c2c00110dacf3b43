//! Offline reweighting: evidence, posterior weights, and resampling.

use csv::Writer;
use itertools::{izip, Itertools};
use log::{info, warn};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::database::{Database, POSTERIOR_DB_FILENAME};
use crate::model::Model;
use crate::rng::Rng;
use crate::utils::{logdiffexp, logsumexp, normalise_logps};
use crate::{Error, Result};

/// Settings for a postprocessing pass.
#[derive(Clone, Debug)]
pub struct PostprocessOptions {
    /// Likelihood temperature; ignored in ABC mode.
    pub temperature: f64,
    /// Replace the likelihood with an indicator above a mass quantile.
    pub abc: bool,
    /// Fraction of particles discarded in ABC mode.
    pub abc_fraction: f64,
}

impl Default for PostprocessOptions {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            abc: false,
            abc_fraction: 0.8,
        }
    }
}

/// The summary numbers of a run, all in nats.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct Results {
    /// Log marginal likelihood.
    pub logz: f64,
    /// Prior-to-posterior Kullback-Leibler divergence.
    pub info: f64,
    /// Effective sample size over the full particles.
    pub ess: f64,
}

/// Reweight a finished run.
///
/// Reads the store read-only, assigns every saved particle a prior mass
/// and posterior weight, and writes `posterior.db`, `posterior.csv`,
/// and `results.yaml` into the output directory.
pub fn postprocess<M, P>(dir: P, options: &PostprocessOptions) -> Result<Results>
where
    M: Model,
    P: AsRef<Path>,
{
    let dir = dir.as_ref();
    let reader = Database::open_readonly(dir)?;
    let conn = reader.conn();

    let max_particle_id: Option<i64> =
        conn.query_row("SELECT MAX(id) FROM particles;", [], |row| row.get(0))?;
    let max_particle_id =
        max_particle_id.ok_or(Error::Empty("no saved particles in the store"))?;
    let num_levels: i64 =
        conn.query_row("SELECT COUNT(id) FROM levels;", [], |row| row.get(0))?;
    if num_levels == 0 {
        return Err(Error::Empty("no levels in the store"));
    }

    // Level masses; a left join keeps levels no particle landed in
    let mut level_logxs: Vec<f64> = Vec::new();
    let mut level_counts: Vec<f64> = Vec::new();
    {
        let mut statement = conn.prepare(
            "SELECT l.logx, COALESCE(ppl.num_particles, 0)
                FROM levels l LEFT JOIN particles_per_level ppl
                ON l.id = ppl.level
                ORDER BY l.id;",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, f64>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (logx, count) = row?;
            level_logxs.push(logx);
            level_counts.push(count as f64);
        }
    }

    // m_i = X_i - X_{i+1}, with X_L = 0 beyond the top level
    let mut level_logms: Vec<f64> = level_logxs
        .iter()
        .tuple_windows()
        .map(|(a, b)| logdiffexp(*a, *b))
        .collect();
    level_logms
        .push(logdiffexp(*level_logxs.last().unwrap(), f64::NEG_INFINITY));

    // Walk the particles in (level, logl, tb) order; each takes the
    // rank-midpoint slice of its level's mass
    let mut ids: Vec<i64> = Vec::new();
    let mut logxs: Vec<f64> = Vec::new();
    let mut logms: Vec<f64> = Vec::new();
    let mut logls: Vec<f64> = Vec::new();
    let mut fulls: Vec<bool> = Vec::new();
    {
        let mut statement = conn.prepare(
            "SELECT p.id, llp.level, p.logl, p.params IS NOT NULL
                FROM particles p INNER JOIN levels_leq_particles llp
                ON p.id = llp.particle
                WHERE p.id <= ? AND llp.level < ?
                ORDER BY llp.level, p.logl, p.tb;",
        )?;
        let mut rank = 0u64;
        let mut old_level = 0i64;
        let rows =
            statement.query_map(params![max_particle_id, num_levels], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, bool>(3)?,
                ))
            })?;
        for row in rows {
            let (id, level, logl, full) = row?;
            if level != old_level {
                rank = 0;
                old_level = level;
            }
            let level = level as usize;
            let logm = level_logms[level] - level_counts[level].ln();
            let logx = logdiffexp(
                level_logxs[level],
                (rank as f64 + 0.5).ln() + logm,
            );
            ids.push(id);
            logms.push(logm);
            logls.push(logl);
            logxs.push(logx);
            fulls.push(full);
            rank += 1;
        }
    }

    // ABC flattens the likelihood above a mass quantile; otherwise the
    // likelihood is tempered
    if options.abc {
        let cutoff = (options.abc_fraction * ids.len() as f64) as usize;
        for (i, logl) in logls.iter_mut().enumerate() {
            *logl = if i < cutoff {
                f64::NEG_INFINITY
            } else {
                -logms[i]
            };
        }
    } else {
        for logl in logls.iter_mut() {
            *logl /= options.temperature;
        }
    }

    // Prior mass times likelihood, evidence, posterior, information
    let loghs: Vec<f64> =
        izip!(&logms, &logls).map(|(logm, logl)| logm + logl).collect();
    let logz = logsumexp(&loghs);
    if logz == f64::NEG_INFINITY {
        return Err(Error::Empty("posterior has zero mass"));
    }
    let logps: Vec<f64> = loghs.iter().map(|logh| logh - logz).collect();
    let mut information = 0.0;
    for (logp, logm) in izip!(&logps, &logms) {
        let p = logp.exp();
        if p > 0.0 {
            information += p * (logp - logm);
        }
    }

    // Weights over the blob-carrying particles, for resampling
    let mut fp_ids: Vec<i64> = Vec::new();
    let mut fp_logps: Vec<f64> = Vec::new();
    for (id, logp, full) in izip!(&ids, &logps, &fulls) {
        if *full {
            fp_ids.push(*id);
            fp_logps.push(*logp);
        }
    }
    if fp_ids.is_empty() {
        return Err(Error::Empty("no full particles in the store"));
    }
    normalise_logps(&mut fp_logps);
    let mut entropy = 0.0;
    for logp in &fp_logps {
        let p = logp.exp();
        if p > 0.0 {
            entropy -= p * logp;
        }
    }
    let ess = entropy.exp();
    let top = fp_logps.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let results = Results {
        logz,
        info: information,
        ess,
    };
    info!(
        "logz = {}, info = {} nats, ess = {}.",
        results.logz, results.info, results.ess
    );

    write_posterior::<M>(
        dir, &reader, &results, &ids, &logxs, &logms, &logls, &logps, &fp_ids,
        &fp_logps, top,
    )?;

    let file = File::create(dir.join("results.yaml"))?;
    serde_yaml::to_writer(file, &results)?;

    Ok(results)
}

/// Write the per-particle weights, the resampled posterior blobs, and
/// the decoded CSV.
#[allow(clippy::too_many_arguments)]
fn write_posterior<M: Model>(
    dir: &Path,
    reader: &Database,
    results: &Results,
    ids: &[i64],
    logxs: &[f64],
    logms: &[f64],
    logls: &[f64],
    logps: &[f64],
    fp_ids: &[i64],
    fp_logps: &[f64],
    top: f64,
) -> Result<()> {
    let conn = Connection::open(dir.join(POSTERIOR_DB_FILENAME))?;
    conn.pragma_update(None, "synchronous", 0)?;
    let _mode: String =
        conn.query_row("PRAGMA journal_mode = OFF;", [], |row| row.get(0))?;
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS particles
            (id     INTEGER NOT NULL PRIMARY KEY,
             params BLOB NOT NULL);
         CREATE TABLE IF NOT EXISTS weights
            (particle INTEGER NOT NULL PRIMARY KEY,
             logx     REAL NOT NULL,
             logm     REAL NOT NULL,
             logl     REAL NOT NULL,
             logp     REAL NOT NULL);
         DELETE FROM particles;
         DELETE FROM weights;
         COMMIT;",
    )?;

    conn.execute_batch("BEGIN;")?;
    {
        let mut statement = conn.prepare(
            "INSERT INTO weights (particle, logx, logm, logl, logp)
                VALUES (?, ?, ?, ?, ?);",
        )?;
        for (id, logx, logm, logl, logp) in
            izip!(ids, logxs, logms, logls, logps)
        {
            statement.execute(params![*id, *logx, *logm, *logl, *logp])?;
        }
    }

    let names = M::parameter_names();
    let mut writer = Writer::from_path(dir.join("posterior.csv"))?;
    writer.write_record(names.names())?;

    // Rejection sampling against the top weight, seeded from the run's
    // recorded first seed so the resample is reproducible
    let mut saved = 0u64;
    if !top.is_finite() {
        warn!("All full-particle weights are zero; skipping resampling.");
    } else {
        let mut rng = Rng::with_seed(resample_seed(reader)?);
        let target = results.ess as u64 + 1;
        let mut insert =
            conn.prepare("INSERT INTO particles (params) VALUES (?);")?;
        while saved < target {
            let k = rng.rand_int(fp_ids.len());
            if rng.rand() <= (fp_logps[k] - top).exp() {
                let blob = reader
                    .particle_blob(fp_ids[k])?
                    .ok_or(Error::Empty("full particle lost its blob"))?;
                insert.execute(params![blob])?;
                let model = M::from_blob(&blob)?;
                writer.write_record(model.csv_row().split(','))?;
                saved += 1;
            }
        }
    }
    conn.execute_batch("COMMIT;")?;
    writer.flush()?;
    info!("Wrote {} posterior samples.", saved);
    Ok(())
}

fn resample_seed(reader: &Database) -> Result<i64> {
    let seed: Option<i64> = reader.conn().query_row(
        "SELECT MAX(seed) FROM rngs
            WHERE sampler = (SELECT MAX(id) FROM samplers);",
        [],
        |row| row.get(0),
    )?;
    Ok(seed.unwrap_or(0))
}
