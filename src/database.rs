//! The embedded SQLite store for samplers, seeds, particles, and levels.

use log::{debug, info};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

use crate::options::Options;
use crate::particle::Pair;
use crate::{Error, Result};

/// File name of the sampler database inside the output directory.
pub const DB_FILENAME: &str = "rdnest.db";

/// File name of the postprocessor's posterior database.
pub const POSTERIOR_DB_FILENAME: &str = "posterior.db";

/// Create and manage the output database.
///
/// Durability pragmas are relaxed; the store is regenerated on every
/// run, so a crash can only cost the run in progress.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create (or reopen) the store inside `dir` and install the schema.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        info!("Initialising database.");
        let conn = Connection::open(dir.as_ref().join(DB_FILENAME))?;
        let db = Self { conn };
        db.pragmas()?;
        db.conn.execute_batch("BEGIN;")?;
        db.create_tables()?;
        db.create_indexes()?;
        db.create_views()?;
        db.conn.execute_batch("COMMIT;")?;
        Ok(db)
    }

    /// Open an existing store read-only, as the postprocessor does.
    pub fn open_readonly<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(DB_FILENAME);
        if !path.exists() {
            return Err(Error::MissingStore(path));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    fn pragmas(&self) -> Result<()> {
        self.conn.pragma_update(None, "synchronous", 0)?;
        let mode: String = self.conn.query_row(
            "PRAGMA journal_mode = WAL;",
            [],
            |row| row.get(0),
        )?;
        debug!("Journal mode = {}.", mode);
        Ok(())
    }

    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS samplers
                (id                 INTEGER NOT NULL PRIMARY KEY,
                 num_particles      INTEGER NOT NULL,
                 num_threads        INTEGER NOT NULL,
                 new_level_interval INTEGER NOT NULL,
                 save_interval      INTEGER NOT NULL,
                 thin               REAL NOT NULL,
                 max_num_levels     INTEGER,
                 lambda             REAL NOT NULL,
                 beta               REAL NOT NULL,
                 max_num_saves      INTEGER NOT NULL);

             CREATE TABLE IF NOT EXISTS rngs
                (seed    INTEGER NOT NULL PRIMARY KEY,
                 sampler INTEGER NOT NULL,
                 FOREIGN KEY (sampler) REFERENCES samplers (id));

             CREATE TABLE IF NOT EXISTS particles
                (id      INTEGER NOT NULL PRIMARY KEY,
                 sampler INTEGER NOT NULL,
                 level   INTEGER NOT NULL,
                 params  BLOB,
                 logl    REAL NOT NULL,
                 tb      REAL NOT NULL,
                 FOREIGN KEY (sampler) REFERENCES samplers (id),
                 FOREIGN KEY (level) REFERENCES levels (id));

             CREATE TABLE IF NOT EXISTS levels
                (id      INTEGER NOT NULL PRIMARY KEY,
                 logx    REAL NOT NULL,
                 logl    REAL NOT NULL,
                 tb      REAL NOT NULL,
                 exceeds INTEGER NOT NULL DEFAULT 0,
                 visits  INTEGER NOT NULL DEFAULT 0,
                 accepts INTEGER NOT NULL DEFAULT 0,
                 tries   INTEGER NOT NULL DEFAULT 0);",
        )?;
        Ok(())
    }

    fn create_indexes(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS particle_logl_tb_idx
                ON particles (logl, tb);
             CREATE INDEX IF NOT EXISTS level_logl_tb_idx
                ON levels (logl, tb);",
        )?;
        Ok(())
    }

    fn create_views(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE VIEW IF NOT EXISTS levels_leq_particles AS
                SELECT p.id particle,
                       (SELECT id FROM levels l
                            WHERE (l.logl, l.tb) <= (p.logl, p.tb)
                            ORDER BY l.logl DESC, l.tb DESC
                            LIMIT 1) AS level
                FROM particles p;

             CREATE VIEW IF NOT EXISTS particles_per_level AS
                SELECT level, COUNT(*) num_particles
                FROM levels_leq_particles
                GROUP BY level;",
        )?;
        Ok(())
    }

    pub fn begin(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN;")?;
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    /// Highest sampler id in the store, or zero when there is none.
    pub fn max_sampler_id(&self) -> Result<i64> {
        let max: Option<i64> =
            self.conn
                .query_row("SELECT MAX(id) FROM samplers;", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0))
    }

    pub fn insert_sampler(&self, id: i64, options: &Options) -> Result<()> {
        self.conn.execute(
            "INSERT INTO samplers VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?);",
            params![
                id,
                options.num_particles as i64,
                options.num_threads as i64,
                options.new_level_interval as i64,
                options.save_interval as i64,
                options.thin,
                options.max_num_levels.map(|max| max as i64),
                options.lambda,
                options.beta,
                options.max_num_saves as i64,
            ],
        )?;
        Ok(())
    }

    pub fn seed_exists(&self, seed: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM rngs WHERE seed = ?;",
            params![seed],
            |row| row.get(0),
        )?;
        Ok(count != 0)
    }

    pub fn insert_rng_seed(&self, seed: i64, sampler_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO rngs VALUES (?, ?);",
            params![seed, sampler_id],
        )?;
        Ok(())
    }

    /// Seeds recorded for the given sampler, in insertion order.
    pub fn rng_seeds(&self, sampler_id: i64) -> Result<Vec<i64>> {
        let mut statement = self.conn.prepare(
            "SELECT seed FROM rngs WHERE sampler = ? ORDER BY seed DESC;",
        )?;
        let seeds = statement
            .query_map(params![sampler_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(seeds)
    }

    pub fn insert_particle(
        &self,
        sampler_id: i64,
        level: i64,
        blob: Option<&[u8]>,
        logl: f64,
        tb: f64,
    ) -> Result<()> {
        let mut statement = self.conn.prepare_cached(
            "INSERT INTO particles (sampler, level, params, logl, tb)
                VALUES (?, ?, ?, ?, ?);",
        )?;
        statement.execute(params![sampler_id, level, blob, logl, tb])?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn upsert_level(
        &self,
        id: i64,
        logx: f64,
        pair: Pair,
        exceeds: u64,
        visits: u64,
        accepts: u64,
        tries: u64,
    ) -> Result<()> {
        let mut statement = self.conn.prepare_cached(
            "INSERT INTO levels
                (id, logx, logl, tb, exceeds, visits, accepts, tries)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE
                SET (logx, exceeds, visits, accepts, tries) =
                (excluded.logx, excluded.exceeds, excluded.visits,
                 excluded.accepts, excluded.tries);",
        )?;
        statement.execute(params![
            id,
            logx,
            pair.logl,
            pair.tb,
            exceeds as i64,
            visits as i64,
            accepts as i64,
            tries as i64,
        ])?;
        Ok(())
    }

    /// Count of saved particles across all samplers.
    pub fn num_particles(&self) -> Result<i64> {
        let num = self.conn.query_row(
            "SELECT COUNT(*) FROM particles;",
            [],
            |row| row.get(0),
        )?;
        Ok(num)
    }

    /// The persisted level thresholds, in ladder order.
    pub fn level_pairs(&self) -> Result<Vec<Pair>> {
        let mut statement = self
            .conn
            .prepare("SELECT logl, tb FROM levels ORDER BY id;")?;
        let pairs = statement
            .query_map([], |row| {
                Ok(Pair::new(row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<Pair>>>()?;
        Ok(pairs)
    }

    /// Count of saved particles that kept their parameter blob.
    pub fn num_full_particles(&self, sampler_id: i64) -> Result<i64> {
        let num = self.conn.query_row(
            "SELECT COUNT(params) FROM particles WHERE sampler = ?;",
            params![sampler_id],
            |row| row.get(0),
        )?;
        Ok(num)
    }

    /// Fetch one particle's parameter blob.
    pub fn particle_blob(&self, particle_id: i64) -> Result<Option<Vec<u8>>> {
        let blob = self
            .conn
            .query_row(
                "SELECT params FROM particles WHERE id = ?;",
                params![particle_id],
                |row| row.get::<_, Option<Vec<u8>>>(0),
            )
            .optional()?;
        Ok(blob.flatten())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Read-only connections will simply fail here, which is fine
        let _ = self.conn.execute_batch(
            "VACUUM; PRAGMA wal_checkpoint(TRUNCATE);",
        );
    }
}

/// Remove the known output files so a fresh run starts clean.
pub fn clear_output_dir<P: AsRef<Path>>(dir: P) -> Result<()> {
    const FILES: [&str; 8] = [
        DB_FILENAME,
        "rdnest.db-shm",
        "rdnest.db-wal",
        POSTERIOR_DB_FILENAME,
        "posterior.db-shm",
        "posterior.db-wal",
        "posterior.csv",
        "results.yaml",
    ];
    info!("Clearing output directory.");
    for file in FILES.iter() {
        let path: PathBuf = dir.as_ref().join(file);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
