//! SQLite database for run results.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use examcheck_core::coverage::{Coverage, CoverageTuple};
use examcheck_core::traits::{ResultStore, RunRecord};

/// Database wrapper for run persistence.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// Coverage of one question across all stored runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionCoverage {
    pub question: String,
    pub cases: usize,
    pub occurred: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub questions: Vec<QuestionCoverage>,
    /// Covered cases over all cases, in percent.
    pub percentage: f64,
}

/// A stored run without its files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunDetail {
    pub created: String,
    pub batch: String,
    pub success: String,
    pub nusers: usize,
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LongtermRow {
    pub created: String,
    pub success: bool,
    pub detail: String,
    pub nusers: usize,
}

impl Store {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open database {}", path.as_ref().display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;

        info!("opened database at {:?}", path.as_ref());
        Ok(store)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS results (
                created TEXT NOT NULL,
                batch TEXT PRIMARY KEY,
                success TEXT NOT NULL,
                files BLOB NOT NULL,
                nusers INTEGER NOT NULL,
                elapsed INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_results_created ON results(created);

            -- timing samples in milliseconds
            CREATE TABLE IF NOT EXISTS performance (
                id INTEGER PRIMARY KEY,
                dt INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS coverage_cases (
                id INTEGER PRIMARY KEY,
                question TEXT NOT NULL,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS coverage_occurrences (
                id INTEGER PRIMARY KEY,
                question TEXT NOT NULL,
                name TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS longterm (
                created TEXT NOT NULL,
                success INTEGER NOT NULL,
                detail TEXT NOT NULL,
                nusers INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // queries
    // -----------------------------------------------------------------------

    pub fn coverage(&self) -> Result<CoverageReport> {
        let conn = self.conn.lock();
        let mut cases: BTreeMap<String, usize> = BTreeMap::new();
        let mut stmt =
            conn.prepare("SELECT question, COUNT(*) FROM coverage_cases GROUP BY question")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (question, count) = row?;
            cases.insert(question, count as usize);
        }

        let mut occurred: BTreeMap<String, usize> = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT c.question, COUNT(*) FROM coverage_cases c \
             JOIN coverage_occurrences o ON o.name = c.name GROUP BY c.question",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (question, count) = row?;
            occurred.insert(question, count as usize);
        }

        let total: usize = cases.values().sum();
        let hit: usize = occurred.values().sum();
        let percentage = if total == 0 {
            0.0
        } else {
            hit as f64 * 100.0 / total as f64
        };
        let questions = cases
            .into_iter()
            .map(|(question, cases)| QuestionCoverage {
                occurred: occurred.get(&question).copied().unwrap_or(0),
                question,
                cases,
            })
            .collect();
        Ok(CoverageReport {
            questions,
            percentage,
        })
    }

    /// Number of runs per status code.
    pub fn counts(&self) -> Result<BTreeMap<String, usize>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT success, COUNT(*) FROM results GROUP BY success")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (success, count) = row?;
            counts.insert(success, count as usize);
        }
        Ok(counts)
    }

    /// All runs, newest first.
    pub fn details(&self) -> Result<Vec<RunDetail>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT created, batch, success, nusers, elapsed FROM results ORDER BY created DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RunDetail {
                created: row.get(0)?,
                batch: row.get(1)?,
                success: row.get(2)?,
                nusers: row.get::<_, i64>(3)? as usize,
                elapsed_secs: row.get::<_, i64>(4)? as u64,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Timing samples in milliseconds, oldest first.
    pub fn performance(&self) -> Result<Vec<u64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT dt FROM performance ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut samples = Vec::new();
        for row in rows {
            samples.push(row?.max(0) as u64);
        }
        Ok(samples)
    }

    pub fn longterm(&self) -> Result<Vec<LongtermRow>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT created, success, detail, nusers FROM longterm ORDER BY created")?;
        let rows = stmt.query_map([], |row| {
            Ok(LongtermRow {
                created: row.get(0)?,
                success: row.get::<_, i64>(1)? == 1,
                detail: row.get(2)?,
                nusers: row.get::<_, i64>(3)? as usize,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The file bundle of one run.
    pub fn files(&self, batch: &str) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        let conn = self.conn.lock();
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT files FROM results WHERE batch = ?1",
                params![batch],
                |row| row.get(0),
            )
            .optional()?;
        blob.map(|blob| decode_files(&blob)).transpose()
    }

    /// Delete everything except the long-term history.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "DELETE FROM results; DELETE FROM performance; \
             DELETE FROM coverage_cases; DELETE FROM coverage_occurrences;",
        )?;
        debug!("cleared results database");
        Ok(())
    }
}

fn encode_files(files: &BTreeMap<String, Vec<u8>>) -> Result<Vec<u8>> {
    let encoded: BTreeMap<&str, String> = files
        .iter()
        .map(|(name, content)| (name.as_str(), STANDARD.encode(content)))
        .collect();
    Ok(serde_json::to_vec(&encoded)?)
}

fn decode_files(blob: &[u8]) -> Result<BTreeMap<String, Vec<u8>>> {
    let encoded: BTreeMap<String, String> =
        serde_json::from_slice(blob).context("corrupt file bundle")?;
    encoded
        .into_iter()
        .map(|(name, data)| {
            let content = STANDARD
                .decode(data.as_bytes())
                .with_context(|| format!("corrupt file {name} in bundle"))?;
            Ok((name, content))
        })
        .collect()
}

/// Question title and JSON name of a coverage tuple.
fn coverage_row(tuple: &CoverageTuple) -> Result<(String, String)> {
    let question = tuple.first().cloned().unwrap_or_default();
    Ok((question, serde_json::to_string(tuple)?))
}

impl ResultStore for Store {
    fn put_run(&self, record: &RunRecord) -> Result<()> {
        let files = encode_files(&record.files)?;
        let created = record.created.to_rfc3339();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO results (created, batch, success, files, nusers, elapsed) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                created,
                record.batch,
                record.success,
                files,
                record.nusers as i64,
                record.elapsed_secs as i64
            ],
        )?;
        conn.execute(
            "INSERT INTO longterm (created, success, detail, nusers) VALUES (?1, ?2, ?3, ?4)",
            params![
                created,
                i64::from(record.success == "OK"),
                record.success,
                record.nusers as i64
            ],
        )?;
        debug!(batch = %record.batch, success = %record.success, "stored run");
        Ok(())
    }

    fn put_performance(&self, samples: &[f64]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("INSERT INTO performance (dt) VALUES (?1)")?;
            for seconds in samples {
                stmt.execute(params![(seconds * 1000.0).round() as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn put_coverage(&self, coverage: &Coverage) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut cases =
                tx.prepare("INSERT OR IGNORE INTO coverage_cases (question, name) VALUES (?1, ?2)")?;
            for tuple in coverage.cases() {
                let (question, name) = coverage_row(tuple)?;
                cases.execute(params![question, name])?;
            }
            let mut occurrences = tx.prepare(
                "INSERT OR IGNORE INTO coverage_occurrences (question, name) VALUES (?1, ?2)",
            )?;
            for tuple in coverage.occurrences() {
                let (question, name) = coverage_row(tuple)?;
                occurrences.execute(params![question, name])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}
