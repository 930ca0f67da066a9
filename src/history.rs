//! Durable per-file import history: the record the orchestrator consults
//! to decide import, skip, or retry, and updates after every attempt.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension, params};

use crate::data::CANONICAL_DATETIME_FORMAT;

pub const ATTEMPTS_LIMIT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Success,
    Failed,
}

impl ImportStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            ImportStatus::Success => 0,
            ImportStatus::Failed => 1,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        if value == 0 {
            ImportStatus::Success
        } else {
            ImportStatus::Failed
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ImportStatus::Success => "success",
            ImportStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub id: i64,
    pub source_name: String,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_modification_time: i64,
    pub file_processing_time: f64,
    pub attempts: i64,
    pub status: ImportStatus,
    pub meta: Option<String>,
    pub errors: Option<String>,
}

/// Everything one import attempt leaves behind.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub source_name: String,
    pub file_name: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_modification_time: i64,
    pub file_processing_time: f64,
    pub status: ImportStatus,
    pub meta: Option<String>,
    pub errors: Option<String>,
}

pub struct HistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl HistoryStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        let store = Self { conn };
        store.ensure_table()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    fn ensure_table(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS import_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_name TEXT NOT NULL,
                file_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                file_modification_time INTEGER NOT NULL DEFAULT 0,
                file_processing_time REAL NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 1,
                meta TEXT,
                errors TEXT,
                status INTEGER NOT NULL DEFAULT 1,
                created_at TIMESTAMP,
                updated_at TIMESTAMP,
                UNIQUE (source_name, file_path)
            );
            CREATE INDEX IF NOT EXISTS idx_import_history_source
                ON import_history (source_name);",
        )
        .context("Creating import_history table")?;
        Ok(())
    }

    pub fn find(&self, source_name: &str, file_path: &str) -> Result<Option<HistoryRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT id, source_name, file_name, file_path, file_size,
                        file_modification_time, file_processing_time, attempts,
                        status, meta, errors
                 FROM import_history
                 WHERE source_name = ?1 AND file_path = ?2",
                params![source_name, file_path],
                |row| {
                    Ok(HistoryRecord {
                        id: row.get(0)?,
                        source_name: row.get(1)?,
                        file_name: row.get(2)?,
                        file_path: row.get(3)?,
                        file_size: row.get(4)?,
                        file_modification_time: row.get(5)?,
                        file_processing_time: row.get(6)?,
                        attempts: row.get(7)?,
                        status: ImportStatus::from_i64(row.get(8)?),
                        meta: row.get(9)?,
                        errors: row.get(10)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Looking up history for '{file_path}'"))?;
        Ok(record)
    }

    /// Persists one attempt. A first attempt creates the record with
    /// attempts = 1; re-imports increment the counter, and a fresh success
    /// resets it to 1.
    pub fn record_attempt(&self, outcome: &AttemptOutcome) -> Result<i64> {
        let existing = self.find(&outcome.source_name, &outcome.file_path)?;
        let attempts = match &existing {
            None => 1,
            Some(_) if outcome.status == ImportStatus::Success => 1,
            Some(record) => record.attempts + 1,
        };

        let now = Local::now()
            .naive_local()
            .format(CANONICAL_DATETIME_FORMAT)
            .to_string();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO import_history (
                source_name, file_name, file_path, file_size,
                file_modification_time, file_processing_time, attempts,
                meta, errors, status, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
             ON CONFLICT (source_name, file_path) DO UPDATE SET
                file_name = excluded.file_name,
                file_size = excluded.file_size,
                file_modification_time = excluded.file_modification_time,
                file_processing_time = excluded.file_processing_time,
                attempts = excluded.attempts,
                meta = excluded.meta,
                errors = excluded.errors,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                outcome.source_name,
                outcome.file_name,
                outcome.file_path,
                outcome.file_size,
                outcome.file_modification_time,
                outcome.file_processing_time,
                attempts,
                outcome.meta,
                outcome.errors,
                outcome.status.as_i64(),
                now,
            ],
        )
        .with_context(|| format!("Recording import attempt for '{}'", outcome.file_path))?;
        Ok(attempts)
    }

    pub fn list(&self, source_name: Option<&str>, failed_only: bool) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn()?;
        let mut sql = String::from(
            "SELECT id, source_name, file_name, file_path, file_size,
                    file_modification_time, file_processing_time, attempts,
                    status, meta, errors
             FROM import_history WHERE 1 = 1",
        );
        let mut params_vec: Vec<String> = Vec::new();
        if let Some(source) = source_name {
            sql.push_str(" AND source_name = ?1");
            params_vec.push(source.to_string());
        }
        if failed_only {
            sql.push_str(" AND status != 0");
        }
        sql.push_str(" ORDER BY source_name, file_path");

        let mut stmt = conn.prepare(&sql).context("Preparing history query")?;
        let records = stmt
            .query_map(rusqlite::params_from_iter(params_vec.iter()), |row| {
                Ok(HistoryRecord {
                    id: row.get(0)?,
                    source_name: row.get(1)?,
                    file_name: row.get(2)?,
                    file_path: row.get(3)?,
                    file_size: row.get(4)?,
                    file_modification_time: row.get(5)?,
                    file_processing_time: row.get(6)?,
                    attempts: row.get(7)?,
                    status: ImportStatus::from_i64(row.get(8)?),
                    meta: row.get(9)?,
                    errors: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}
