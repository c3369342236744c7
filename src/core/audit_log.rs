//! Append-only audit persistence.
//!
//! Two logical tables, `decision_records` and `weight_evolution`. Rows are
//! never updated or deleted. Backends:
//! - `JsonlAuditLog`: one JSONL file per table under a directory
//! - `SqliteAuditLog`: one SQLite database with two tables
//! - `MemoryAuditLog`: in-process, with injectable write failures for tests

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, warn};

use super::retry::RetryPolicy;
use crate::domain::{DecisionRecord, SignalType, VerificationStatus, WeightMutation};

pub const DECISIONS_FILE: &str = "decision_records.jsonl";
pub const EVOLUTION_FILE: &str = "weight_evolution.jsonl";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("audit database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt audit row in {path} at line {line}: {message}")]
    Corrupt {
        path: String,
        line: usize,
        message: String,
    },

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Append-only store for decisions and weight mutations
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    async fn append_decision(&self, record: &DecisionRecord) -> Result<(), AuditError>;

    async fn append_mutation(&self, mutation: &WeightMutation) -> Result<(), AuditError>;

    /// All decisions in append order
    async fn decisions(&self) -> Result<Vec<DecisionRecord>, AuditError>;

    /// All mutations in append order
    async fn mutations(&self) -> Result<Vec<WeightMutation>, AuditError>;
}

/// Write a decision, retrying once on failure
pub async fn append_decision_with_retry(sink: &dyn AuditSink, record: &DecisionRecord) -> Result<(), AuditError> {
    let result = RetryPolicy::immediate(2)
        .run("audit.append_decision", |_| sink.append_decision(record), |_| true)
        .await;
    if let Err(e) = &result {
        error!(sink = sink.name(), candidate = %record.candidate_name, error = %e, "Decision not persisted");
    }
    result
}

/// Write a batch of mutations, retrying each once on failure
pub async fn append_mutations_with_retry(
    sink: &dyn AuditSink,
    mutations: &[WeightMutation],
) -> Result<(), AuditError> {
    for mutation in mutations {
        RetryPolicy::immediate(2)
            .run("audit.append_mutation", |_| sink.append_mutation(mutation), |_| true)
            .await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// JSONL

/// Directory of JSONL tables
#[derive(Debug, Clone)]
pub struct JsonlAuditLog {
    dir: PathBuf,
    decisions_path: PathBuf,
    evolution_path: PathBuf,
}

impl JsonlAuditLog {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, AuditError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        Ok(Self {
            decisions_path: dir.join(DECISIONS_FILE),
            evolution_path: dir.join(EVOLUTION_FILE),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn decisions_path(&self) -> &Path {
        &self.decisions_path
    }

    pub fn evolution_path(&self) -> &Path {
        &self.evolution_path
    }

    /// Append one row while holding an exclusive lock on the file
    async fn append_line<T: Serialize + Sync>(path: &Path, row: &T) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(row)?;
        line.push('\n');
        let path = path.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<(), AuditError> {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&path)?;
            file.lock_exclusive()?;
            repair_tail(&mut file, &path)?;
            file.write_all(line.as_bytes())?;
            file.flush()?;
            // Lock is released when file is dropped
            Ok(())
        })
        .await
        .map_err(|e| AuditError::Unavailable(format!("append task failed: {}", e)))?
    }

    /// Read every row. A malformed final line is an interrupted append and is
    /// skipped; a malformed line followed by valid rows is corruption.
    async fn read_all<T: DeserializeOwned + Send>(path: &Path) -> Result<Vec<T>, AuditError> {
        if !fs::try_exists(path).await? {
            return Ok(Vec::new());
        }

        let file = File::open(path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut rows = Vec::new();
        let mut line_no = 0;
        let mut malformed: Option<AuditError> = None;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(err) = malformed.take() {
                return Err(err);
            }
            match serde_json::from_str(&line) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    malformed = Some(AuditError::Corrupt {
                        path: path.display().to_string(),
                        line: line_no,
                        message: e.to_string(),
                    })
                }
            }
        }

        if let Some(err) = malformed {
            warn!(error = %err, "Skipping partial final audit row");
        }
        Ok(rows)
    }
}

/// Make sure the file ends on a row boundary before appending.
///
/// A complete row missing only its newline is terminated; a partial row is
/// truncated away.
fn repair_tail(file: &mut std::fs::File, path: &Path) -> Result<(), AuditError> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut contents)?;
    let keep = contents.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);

    if serde_json::from_slice::<serde_json::Value>(&contents[keep..]).is_ok() {
        file.write_all(b"\n")?;
    } else {
        warn!(path = %path.display(), bytes = contents.len() - keep, "Discarding partial audit row");
        file.set_len(keep as u64)?;
    }
    Ok(())
}

#[async_trait]
impl AuditSink for JsonlAuditLog {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn append_decision(&self, record: &DecisionRecord) -> Result<(), AuditError> {
        Self::append_line(&self.decisions_path, record).await
    }

    async fn append_mutation(&self, mutation: &WeightMutation) -> Result<(), AuditError> {
        Self::append_line(&self.evolution_path, mutation).await
    }

    async fn decisions(&self) -> Result<Vec<DecisionRecord>, AuditError> {
        Self::read_all(&self.decisions_path).await
    }

    async fn mutations(&self) -> Result<Vec<WeightMutation>, AuditError> {
        Self::read_all(&self.evolution_path).await
    }
}

// ---------------------------------------------------------------------------
// SQLite

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS decision_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    candidate_name TEXT NOT NULL,
    weight_version INTEGER NOT NULL,
    authenticity_score REAL NOT NULL,
    status TEXT NOT NULL,
    feedback_score REAL,
    timestamp TEXT NOT NULL,
    signal_types TEXT NOT NULL,
    weights TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS weight_evolution (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parameter TEXT NOT NULL,
    old_value REAL NOT NULL,
    new_value REAL NOT NULL,
    "trigger" TEXT NOT NULL,
    version INTEGER NOT NULL,
    timestamp TEXT NOT NULL
);
"#;

/// SQLite-backed audit log; queries run on the blocking pool
#[derive(Debug, Clone)]
pub struct SqliteAuditLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, AuditError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, AuditError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AuditError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| AuditError::Unavailable(format!("sqlite task failed: {}", e)))?
    }
}

fn parse_time(raw: &str, line: usize) -> Result<DateTime<Utc>, AuditError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt_row(line, e.to_string()))
}

fn corrupt_row(line: usize, message: String) -> AuditError {
    AuditError::Corrupt {
        path: "sqlite".to_string(),
        line,
        message,
    }
}

#[async_trait]
impl AuditSink for SqliteAuditLog {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append_decision(&self, record: &DecisionRecord) -> Result<(), AuditError> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO decision_records
                 (candidate_name, weight_version, authenticity_score, status, feedback_score, timestamp, signal_types, weights)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.candidate_name,
                    record.weight_version as i64,
                    record.authenticity_score,
                    record.status.as_str(),
                    record.feedback_score,
                    record.timestamp.to_rfc3339(),
                    serde_json::to_string(&record.signal_types)?,
                    serde_json::to_string(&record.weights)?,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_mutation(&self, mutation: &WeightMutation) -> Result<(), AuditError> {
        let mutation = mutation.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO weight_evolution (parameter, old_value, new_value, \"trigger\", version, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    mutation.parameter.as_str(),
                    mutation.old_value,
                    mutation.new_value,
                    mutation.trigger,
                    mutation.version as i64,
                    mutation.timestamp.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn decisions(&self) -> Result<Vec<DecisionRecord>, AuditError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, candidate_name, weight_version, authenticity_score, status, feedback_score,
                        timestamp, signal_types, weights
                 FROM decision_records ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, candidate_name, weight_version, authenticity_score, status, feedback_score, ts, types, weights) =
                    row?;
                let line = id as usize;
                records.push(DecisionRecord {
                    candidate_name,
                    weight_version: weight_version as u64,
                    authenticity_score,
                    status: VerificationStatus::parse(&status)
                        .ok_or_else(|| corrupt_row(line, format!("unknown status '{}'", status)))?,
                    feedback_score,
                    timestamp: parse_time(&ts, line)?,
                    signal_types: serde_json::from_str(&types)?,
                    weights: serde_json::from_str(&weights)?,
                });
            }
            Ok(records)
        })
        .await
    }

    async fn mutations(&self) -> Result<Vec<WeightMutation>, AuditError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, parameter, old_value, new_value, \"trigger\", version, timestamp
                 FROM weight_evolution ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut mutations = Vec::new();
            for row in rows {
                let (id, parameter, old_value, new_value, trigger, version, ts) = row?;
                let line = id as usize;
                mutations.push(WeightMutation {
                    parameter: SignalType::parse(&parameter)
                        .ok_or_else(|| corrupt_row(line, format!("unknown parameter '{}'", parameter)))?,
                    old_value,
                    new_value,
                    trigger,
                    version: version as u64,
                    timestamp: parse_time(&ts, line)?,
                });
            }
            Ok(mutations)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Memory

/// In-process audit log
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    decisions: Mutex<Vec<DecisionRecord>>,
    mutations: Mutex<Vec<WeightMutation>>,
    failures_remaining: AtomicU32,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` writes fail
    pub fn fail_next_writes(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> Result<(), AuditError> {
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            warn!("Injected audit write failure");
            return Err(AuditError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append_decision(&self, record: &DecisionRecord) -> Result<(), AuditError> {
        self.take_failure()?;
        self.decisions.lock().push(record.clone());
        Ok(())
    }

    async fn append_mutation(&self, mutation: &WeightMutation) -> Result<(), AuditError> {
        self.take_failure()?;
        self.mutations.lock().push(mutation.clone());
        Ok(())
    }

    async fn decisions(&self) -> Result<Vec<DecisionRecord>, AuditError> {
        Ok(self.decisions.lock().clone())
    }

    async fn mutations(&self) -> Result<Vec<WeightMutation>, AuditError> {
        Ok(self.mutations.lock().clone())
    }
}
