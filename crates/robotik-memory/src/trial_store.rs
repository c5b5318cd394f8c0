//! Trial Store.
//!
//! Durable record of every reported trial and every theta handed out by the
//! optimizer, in a local SQLite database running in write-ahead-log mode so
//! that exploit-path reads never wait behind an explore-path write.
//!
//! # Storage layout
//!
//! | table        | key        | columns                                                                 |
//! |--------------|------------|-------------------------------------------------------------------------|
//! | `trials`     | `trial_id` | ts, context, theta_id, theta_json, outcome, metrics_json, failure_code  |
//! | `theta_sets` | `theta_id` | context, theta_json, created_ts, notes, performance_json                |
//!
//! `context` is always the canonical key of a [`Context`].
//!
//! # Concurrency
//!
//! One writer connection sits behind a mutex. Reads check out a connection
//! from a small pool of read-only connections to the same file, so they run
//! alongside an in-flight write. In-memory stores have no second connection
//! and serve reads from the writer.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use robotik_types::{Context, FailureCode, Theta};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bad timestamp '{0}' in store")]
    Timestamp(String),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// Derived performance of one theta within one context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThetaPerformance {
    pub successes: u64,
    pub trials: u64,
    pub success_rate: f64,
}

/// A persisted, named theta tied to a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThetaSet {
    pub theta_id: String,
    pub context: Context,
    pub theta: Theta,
    pub created_at: DateTime<Utc>,
    pub notes: String,
    pub performance: Option<ThetaPerformance>,
}

impl ThetaSet {
    pub fn new(context: Context, theta: Theta, notes: impl Into<String>) -> Self {
        Self {
            theta_id: Uuid::new_v4().to_string(),
            context,
            theta,
            created_at: Utc::now(),
            notes: notes.into(),
            performance: None,
        }
    }
}

/// One immutable trial row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub trial_id: String,
    pub timestamp: DateTime<Utc>,
    pub context: Context,
    pub theta_id: String,
    pub theta: Theta,
    pub outcome: bool,
    pub metrics: Map<String, Value>,
    pub failure_code: Option<FailureCode>,
}

impl Trial {
    pub fn new(
        context: Context,
        theta_id: impl Into<String>,
        theta: Theta,
        outcome: bool,
        metrics: Map<String, Value>,
        failure_code: Option<FailureCode>,
    ) -> Self {
        Self {
            trial_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            context,
            theta_id: theta_id.into(),
            theta,
            outcome,
            metrics,
            failure_code,
        }
    }
}

/// Aggregate over every theta tried in a context.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrialStats {
    pub trials: u64,
    pub success_rate: f64,
}

/// Historically best theta in a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestTheta {
    pub theta_id: String,
    pub theta: Theta,
    pub performance: ThetaPerformance,
}

fn performance(successes: u64, trials: u64) -> ThetaPerformance {
    ThetaPerformance {
        successes,
        trials,
        success_rate: if trials == 0 { 0.0 } else { successes as f64 / trials as f64 },
    }
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp(raw.to_string()))
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────────────────────
// TrialStore
// ─────────────────────────────────────────────────────────────────────────────

pub struct TrialStore {
    path: Option<PathBuf>,
    writer: Mutex<Connection>,
    readers: Mutex<Vec<Connection>>,
}

impl TrialStore {
    /// Open (or create) the database at `path` in WAL mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        info!(path = %path.display(), journal_mode = %mode, "trial store opened");
        let store = Self {
            path: Some(path.to_path_buf()),
            writer: Mutex::new(conn),
            readers: Mutex::new(Vec::new()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            path: None,
            writer: Mutex::new(Connection::open_in_memory()?),
            readers: Mutex::new(Vec::new()),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        lock(&self.writer).execute_batch(
            "CREATE TABLE IF NOT EXISTS trials (
                trial_id     TEXT NOT NULL PRIMARY KEY,
                ts           TEXT NOT NULL,
                context      TEXT NOT NULL,
                theta_id     TEXT NOT NULL,
                theta_json   TEXT NOT NULL,
                outcome      INTEGER NOT NULL,
                metrics_json TEXT NOT NULL,
                failure_code TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_trials_context_theta
                ON trials (context, theta_id);
            CREATE TABLE IF NOT EXISTS theta_sets (
                theta_id         TEXT NOT NULL PRIMARY KEY,
                context          TEXT NOT NULL,
                theta_json       TEXT NOT NULL,
                created_ts       TEXT NOT NULL,
                notes            TEXT NOT NULL DEFAULT '',
                performance_json TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_theta_sets_context
                ON theta_sets (context, created_ts);",
        )?;
        Ok(())
    }

    /// Current journal mode, e.g. `"wal"`.
    pub fn journal_mode(&self) -> Result<String, StoreError> {
        Ok(lock(&self.writer).query_row("PRAGMA journal_mode", [], |r| r.get(0))?)
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let Some(path) = &self.path else {
            return f(&lock(&self.writer));
        };
        let pooled = lock(&self.readers).pop();
        let conn = match pooled {
            Some(conn) => conn,
            None => {
                let conn = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                conn
            }
        };
        let result = f(&conn);
        lock(&self.readers).push(conn);
        result
    }

    /// Insert or replace a theta set.
    pub fn create_theta_set(&self, set: &ThetaSet) -> Result<(), StoreError> {
        let performance = set.performance.map(|p| serde_json::to_string(&p)).transpose()?;
        lock(&self.writer).execute(
            "INSERT OR REPLACE INTO theta_sets
                 (theta_id, context, theta_json, created_ts, notes, performance_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                set.theta_id,
                set.context.canonical_key(),
                serde_json::to_string(&set.theta)?,
                ts(&set.created_at),
                set.notes,
                performance,
            ],
        )?;
        debug!(theta_id = %set.theta_id, notes = %set.notes, "theta set stored");
        Ok(())
    }

    /// Persist `trial` and refresh the performance summary of its theta set
    /// within the same transaction.
    pub fn record_trial(&self, trial: &Trial) -> Result<ThetaPerformance, StoreError> {
        let context = trial.context.canonical_key();
        let mut conn = lock(&self.writer);
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO trials
                 (trial_id, ts, context, theta_id, theta_json, outcome, metrics_json, failure_code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                trial.trial_id,
                ts(&trial.timestamp),
                context,
                trial.theta_id,
                serde_json::to_string(&trial.theta)?,
                trial.outcome,
                serde_json::to_string(&trial.metrics)?,
                trial.failure_code.map(|c| c.as_str()),
            ],
        )?;
        let (successes, trials): (i64, i64) = tx.query_row(
            "SELECT COALESCE(SUM(outcome), 0), COUNT(*) FROM trials
             WHERE theta_id = ?1 AND context = ?2",
            params![trial.theta_id, context],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let perf = performance(successes as u64, trials as u64);
        tx.execute(
            "UPDATE theta_sets SET performance_json = ?1 WHERE theta_id = ?2",
            params![serde_json::to_string(&perf)?, trial.theta_id],
        )?;
        tx.commit()?;
        debug!(trial_id = %trial.trial_id, theta_id = %trial.theta_id, outcome = trial.outcome, "trial recorded");
        Ok(perf)
    }

    /// Trial count and success rate across every theta in `context`.
    pub fn get_trial_stats(&self, context: &Context) -> Result<TrialStats, StoreError> {
        let key = context.canonical_key();
        self.read(|conn| {
            let (successes, trials): (i64, i64) = conn.query_row(
                "SELECT COALESCE(SUM(outcome), 0), COUNT(*) FROM trials WHERE context = ?1",
                params![key],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            let p = performance(successes as u64, trials as u64);
            Ok(TrialStats {
                trials: p.trials,
                success_rate: p.success_rate,
            })
        })
    }

    /// Theta id with the highest success rate in `context`, ties broken by
    /// the larger trial count.
    pub fn get_best_theta(&self, context: &Context) -> Result<Option<BestTheta>, StoreError> {
        let key = context.canonical_key();
        self.read(|conn| {
            let row = conn
                .query_row(
                    "SELECT theta_id, MIN(theta_json), SUM(outcome), COUNT(*) FROM trials
                     WHERE context = ?1
                     GROUP BY theta_id
                     ORDER BY CAST(SUM(outcome) AS REAL) / COUNT(*) DESC,
                              COUNT(*) DESC,
                              theta_id ASC
                     LIMIT 1",
                    params![key],
                    |r| {
                        Ok((
                            r.get::<_, String>(0)?,
                            r.get::<_, String>(1)?,
                            r.get::<_, i64>(2)?,
                            r.get::<_, i64>(3)?,
                        ))
                    },
                )
                .optional()?;
            row.map(|(theta_id, theta_json, successes, trials)| {
                Ok(BestTheta {
                    theta_id,
                    theta: serde_json::from_str(&theta_json)?,
                    performance: performance(successes as u64, trials as u64),
                })
            })
            .transpose()
        })
    }

    /// Most recently created theta set in `context`.
    pub fn get_latest_theta(&self, context: &Context) -> Result<Option<ThetaSet>, StoreError> {
        let key = context.canonical_key();
        self.read(|conn| {
            query_theta_set(
                conn,
                "SELECT theta_id, context, theta_json, created_ts, notes, performance_json
                 FROM theta_sets WHERE context = ?1
                 ORDER BY created_ts DESC, rowid DESC LIMIT 1",
                &key,
            )
        })
    }

    pub fn get_theta_set(&self, theta_id: &str) -> Result<Option<ThetaSet>, StoreError> {
        self.read(|conn| {
            query_theta_set(
                conn,
                "SELECT theta_id, context, theta_json, created_ts, notes, performance_json
                 FROM theta_sets WHERE theta_id = ?1",
                theta_id,
            )
        })
    }

    pub fn count_theta_sets(&self, context: &Context) -> Result<u64, StoreError> {
        let key = context.canonical_key();
        self.read(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM theta_sets WHERE context = ?1",
                params![key],
                |r| r.get(0),
            )?;
            Ok(n as u64)
        })
    }
}

fn query_theta_set(conn: &Connection, sql: &str, arg: &str) -> Result<Option<ThetaSet>, StoreError> {
    let row = conn
        .query_row(sql, params![arg], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
            ))
        })
        .optional()?;
    let Some((theta_id, context, theta_json, created, notes, perf)) = row else {
        return Ok(None);
    };
    Ok(Some(ThetaSet {
        theta_id,
        context: serde_json::from_str(&context)?,
        theta: serde_json::from_str(&theta_json)?,
        created_at: parse_ts(&created)?,
        notes,
        performance: perf.map(|p| serde_json::from_str(&p)).transpose()?,
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use robotik_types::{RetryableFailure, Square};
    use std::sync::Arc;

    fn ctx(square: &str) -> Context {
        Context::for_square(square.parse::<Square>().unwrap())
    }

    fn record(store: &TrialStore, context: &Context, theta_id: &str, outcome: bool) {
        let code = (!outcome).then_some(RetryableFailure::PickNoChange.into());
        let trial = Trial::new(context.clone(), theta_id, Theta::default(), outcome, Map::new(), code);
        store.record_trial(&trial).unwrap();
    }

    #[test]
    fn file_store_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrialStore::open(dir.path().join("db").join("agent.sqlite")).unwrap();
        assert_eq!(store.journal_mode().unwrap(), "wal");
    }

    #[test]
    fn theta_set_roundtrip_and_performance_update() {
        let store = TrialStore::open_in_memory().unwrap();
        let c = ctx("a2");
        let set = ThetaSet::new(c.clone(), Theta { dx_mm: 1.25, ..Theta::default() }, "sampled");
        store.create_theta_set(&set).unwrap();

        record(&store, &c, &set.theta_id, true);
        record(&store, &c, &set.theta_id, false);

        let loaded = store.get_theta_set(&set.theta_id).unwrap().unwrap();
        assert_eq!(loaded.theta.dx_mm, 1.25);
        assert_eq!(loaded.notes, "sampled");
        let perf = loaded.performance.unwrap();
        assert_eq!((perf.successes, perf.trials), (1, 2));
        assert_eq!(perf.success_rate, 0.5);
    }

    #[test]
    fn stats_aggregate_across_thetas_and_isolate_contexts() {
        let store = TrialStore::open_in_memory().unwrap();
        let (a, b) = (ctx("a2"), ctx("h7"));
        record(&store, &a, "t1", true);
        record(&store, &a, "t2", false);
        record(&store, &a, "t2", true);
        record(&store, &b, "t1", false);

        let stats = store.get_trial_stats(&a).unwrap();
        assert_eq!(stats.trials, 3);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(store.get_trial_stats(&b).unwrap().trials, 1);
        assert_eq!(store.get_trial_stats(&ctx("d4")).unwrap(), TrialStats::default());
    }

    #[test]
    fn best_theta_ranks_by_rate_then_count() {
        let store = TrialStore::open_in_memory().unwrap();
        let c = ctx("a2");
        // t1: 1/1, t2: 2/2, t3: 2/3
        record(&store, &c, "t1", true);
        record(&store, &c, "t2", true);
        record(&store, &c, "t2", true);
        record(&store, &c, "t3", true);
        record(&store, &c, "t3", true);
        record(&store, &c, "t3", false);

        let best = store.get_best_theta(&c).unwrap().unwrap();
        assert_eq!(best.theta_id, "t2");
        assert_eq!(best.performance.trials, 2);
        assert!(store.get_best_theta(&ctx("b1")).unwrap().is_none());
    }

    #[test]
    fn latest_theta_is_newest_in_context() {
        let store = TrialStore::open_in_memory().unwrap();
        let c = ctx("a2");
        let mut first = ThetaSet::new(c.clone(), Theta::default(), "sampled");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = ThetaSet::new(c.clone(), Theta::default(), "sampled");
        store.create_theta_set(&second).unwrap();
        store.create_theta_set(&first).unwrap();
        store
            .create_theta_set(&ThetaSet::new(ctx("b1"), Theta::default(), "other"))
            .unwrap();

        let latest = store.get_latest_theta(&c).unwrap().unwrap();
        assert_eq!(latest.theta_id, second.theta_id);
        assert_eq!(store.count_theta_sets(&c).unwrap(), 2);
    }

    #[test]
    fn readers_and_writer_run_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TrialStore::open(dir.path().join("agent.sqlite")).unwrap());
        let c = ctx("a2");
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = Arc::clone(&store);
                let c = c.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        if i % 2 == 0 {
                            record(&store, &c, "t1", true);
                        } else {
                            store.get_trial_stats(&c).unwrap();
                            store.get_best_theta(&c).unwrap();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.get_trial_stats(&c).unwrap().trials, 20);
    }
}
