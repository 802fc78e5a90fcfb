//! SQLite history of comparison runs and their per-symbol results.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::model::{ResultKind, Statistics, Symbol, SymbolKind, SymbolResult};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },

    #[error("run {0} does not exist")]
    UnknownRun(i64),

    #[error("stored {column} '{value}' is not recognized")]
    Corrupt { column: &'static str, value: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What is known about a run when it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub old_snapshot: PathBuf,
    pub new_snapshot: PathBuf,
    pub checker: String,
    /// Comma-separated enabled pattern names.
    pub patterns: String,
}

/// A stored run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub old_snapshot: PathBuf,
    pub new_snapshot: PathBuf,
    pub checker: String,
    pub patterns: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    /// Present once the run has finished.
    pub statistics: Option<Statistics>,
    pub cancelled: bool,
}

/// SQLite-backed result store.
#[derive(Debug)]
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    /// Open (or create) a store at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// A store that lives only as long as the value.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn schema_version(&self) -> StoreResult<i32> {
        current_schema_version(&self.conn)
    }

    /// Record the start of a run and return its id.
    pub fn insert_run(&self, run: &NewRun) -> StoreResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO runs (old_snapshot, new_snapshot, checker, patterns, started_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                run.old_snapshot.to_string_lossy(),
                run.new_snapshot.to_string_lossy(),
                run.checker,
                run.patterns,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Store results for `run_id` in request order.
    pub fn insert_results(&self, run_id: i64, results: &[SymbolResult]) -> StoreResult<()> {
        self.ensure_run(run_id)?;
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO results
                    (run_id, position, name, symbol_kind, hint, result, detail, diff, artifacts)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for (position, result) in results.iter().enumerate() {
                let artifacts = result
                    .artifacts
                    .iter()
                    .map(|p| p.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("\n");
                stmt.execute(params![
                    run_id,
                    position as i64,
                    result.symbol.name,
                    result.symbol.kind.as_str(),
                    result.symbol.hint,
                    result.kind.as_str(),
                    result.detail,
                    result.diff,
                    artifacts,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Mark a run finished with its final counts.
    pub fn finish_run(
        &self,
        run_id: i64,
        statistics: &Statistics,
        cancelled: bool,
    ) -> StoreResult<()> {
        let affected = self.conn.execute(
            r#"
            UPDATE runs
            SET finished_at = ?1, equal = ?2, not_equal = ?3, unknown = ?4,
                error = ?5, timeout = ?6, cancelled = ?7
            WHERE id = ?8
            "#,
            params![
                Utc::now().to_rfc3339(),
                statistics.equal as i64,
                statistics.not_equal as i64,
                statistics.unknown as i64,
                statistics.error as i64,
                statistics.timeout as i64,
                cancelled,
                run_id,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::UnknownRun(run_id));
        }
        Ok(())
    }

    /// All runs, oldest first.
    pub fn list_runs(&self) -> StoreResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, old_snapshot, new_snapshot, checker, patterns, started_at, finished_at,
                   equal, not_equal, unknown, error, timeout, cancelled
            FROM runs
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let finished_at: Option<String> = row.get(6)?;
            let count = |i: usize| -> rusqlite::Result<usize> {
                Ok(row.get::<_, Option<i64>>(i)?.unwrap_or(0) as usize)
            };
            let statistics = match finished_at {
                Some(_) => Some(Statistics {
                    equal: count(7)?,
                    not_equal: count(8)?,
                    unknown: count(9)?,
                    error: count(10)?,
                    timeout: count(11)?,
                }),
                None => None,
            };
            Ok(RunRecord {
                id: row.get(0)?,
                old_snapshot: PathBuf::from(row.get::<_, String>(1)?),
                new_snapshot: PathBuf::from(row.get::<_, String>(2)?),
                checker: row.get(3)?,
                patterns: row.get(4)?,
                started_at: row.get(5)?,
                finished_at,
                statistics,
                cancelled: row.get(12)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Results of one run in request order.
    pub fn list_results(&self, run_id: i64) -> StoreResult<Vec<SymbolResult>> {
        self.ensure_run(run_id)?;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT name, symbol_kind, hint, result, detail, diff, artifacts
            FROM results
            WHERE run_id = ?1
            ORDER BY position
            "#,
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(StoredResult {
                name: row.get(0)?,
                symbol_kind: row.get(1)?,
                hint: row.get(2)?,
                result: row.get(3)?,
                detail: row.get(4)?,
                diff: row.get(5)?,
                artifacts: row.get(6)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_result()?);
        }
        Ok(out)
    }

    fn ensure_run(&self, run_id: i64) -> StoreResult<()> {
        let found: Option<i64> = self
            .conn
            .query_row("SELECT id FROM runs WHERE id = ?1", params![run_id], |row| row.get(0))
            .optional()?;
        found.map(|_| ()).ok_or(StoreError::UnknownRun(run_id))
    }
}

struct StoredResult {
    name: String,
    symbol_kind: String,
    hint: Option<String>,
    result: String,
    detail: Option<String>,
    diff: Option<String>,
    artifacts: String,
}

impl StoredResult {
    fn into_result(self) -> StoreResult<SymbolResult> {
        let kind = SymbolKind::parse(&self.symbol_kind)
            .ok_or(StoreError::Corrupt { column: "symbol_kind", value: self.symbol_kind.clone() })?;
        let result = ResultKind::parse(&self.result)
            .ok_or(StoreError::Corrupt { column: "result", value: self.result.clone() })?;
        Ok(SymbolResult {
            symbol: Symbol { name: self.name, kind, hint: self.hint },
            kind: result,
            diff: self.diff,
            detail: self.detail,
            artifacts: self.artifacts.lines().map(PathBuf::from).collect(),
        })
    }
}

fn apply_migrations(conn: &Connection) -> StoreResult<()> {
    let mut current_version = current_schema_version(conn)?;

    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS runs (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                old_snapshot TEXT NOT NULL,
                new_snapshot TEXT NOT NULL,
                checker      TEXT NOT NULL,
                patterns     TEXT NOT NULL,
                started_at   TEXT NOT NULL,
                finished_at  TEXT,
                equal        INTEGER,
                not_equal    INTEGER,
                unknown      INTEGER,
                error        INTEGER,
                timeout      INTEGER
            );

            CREATE TABLE IF NOT EXISTS results (
                run_id      INTEGER NOT NULL REFERENCES runs(id),
                position    INTEGER NOT NULL,
                name        TEXT NOT NULL,
                symbol_kind TEXT NOT NULL,
                hint        TEXT,
                result      TEXT NOT NULL,
                detail      TEXT,
                diff        TEXT,
                PRIMARY KEY (run_id, position)
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
        current_version = 1;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            ALTER TABLE runs ADD COLUMN cancelled INTEGER NOT NULL DEFAULT 0;
            ALTER TABLE results ADD COLUMN artifacts TEXT NOT NULL DEFAULT '';
            CREATE INDEX IF NOT EXISTS results_by_name ON results (name);

            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

fn current_schema_version(conn: &Connection) -> StoreResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}
