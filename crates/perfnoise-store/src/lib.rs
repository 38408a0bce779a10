mod query;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use perfnoise_core::{SignatureId, SummaryRecord};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use thiserror::Error;

pub use query::{CompareOp, Document, Filter, Sort, SortDirection, SummaryField};

pub const SUMMARY_TABLE: &str = "perf_summary";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record id {record} does not match key {key}")]
    KeyMismatch { key: SignatureId, record: SignatureId },
    #[error("summary cache lock poisoned")]
    Poisoned,
}

/// Keyed table holding one [`SummaryRecord`] per signal. Writes replace the
/// whole record; there is no partial update.
pub trait SummaryCache: Send + Sync {
    fn upsert(&self, key: SignatureId, record: &SummaryRecord) -> Result<(), StoreError>;

    fn get(&self, key: SignatureId) -> Result<Option<SummaryRecord>, StoreError>;

    fn query(
        &self,
        fields: &[SummaryField],
        filter: &Filter,
        sort: Option<&Sort>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError>;
}

pub struct SqliteSummaryCache {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteSummaryCache {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl SummaryCache for SqliteSummaryCache {
    fn upsert(&self, key: SignatureId, record: &SummaryRecord) -> Result<(), StoreError> {
        if record.id != key {
            return Err(StoreError::KeyMismatch {
                key,
                record: record.id,
            });
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO perf_summary (
                id, title, num_pushes, is_diff, max_diff, num_new_segments,
                num_old_segments, relative_noise, dev_status, dev_score, last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                num_pushes = excluded.num_pushes,
                is_diff = excluded.is_diff,
                max_diff = excluded.max_diff,
                num_new_segments = excluded.num_new_segments,
                num_old_segments = excluded.num_old_segments,
                relative_noise = excluded.relative_noise,
                dev_status = excluded.dev_status,
                dev_score = excluded.dev_score,
                last_updated = excluded.last_updated
            "#,
            params![
                key.get(),
                record.title,
                record.num_pushes as i64,
                record.is_diff,
                record.max_diff,
                record.num_new_segments as i64,
                record.num_old_segments as i64,
                record.relative_noise,
                record.dev_status,
                record.dev_score,
                record.last_updated,
            ],
        )?;

        tracing::debug!(id = key.get(), "upserted summary record");
        Ok(())
    }

    fn get(&self, key: SignatureId) -> Result<Option<SummaryRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, title, num_pushes, is_diff, max_diff, num_new_segments,
                   num_old_segments, relative_noise, dev_status, dev_score, last_updated
            FROM perf_summary
            WHERE id = ?1
            "#,
        )?;

        let record = stmt
            .query_row(params![key.get()], |row| {
                Ok(SummaryRecord {
                    id: SignatureId(row.get(0)?),
                    title: row.get(1)?,
                    num_pushes: row.get::<_, Option<i64>>(2)?.unwrap_or(0).max(0) as usize,
                    is_diff: row.get(3)?,
                    max_diff: row.get(4)?,
                    num_new_segments: row.get::<_, i64>(5)?.max(0) as usize,
                    num_old_segments: row.get::<_, i64>(6)?.max(0) as usize,
                    relative_noise: row.get(7)?,
                    dev_status: row.get(8)?,
                    dev_score: row.get(9)?,
                    last_updated: row.get(10)?,
                })
            })
            .optional()?;

        Ok(record)
    }

    fn query(
        &self,
        fields: &[SummaryField],
        filter: &Filter,
        sort: Option<&Sort>,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let fields = if fields.is_empty() {
            SummaryField::ALL
        } else {
            fields
        };
        let compiled = query::compile(fields, filter, sort, limit)?;

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&compiled.sql)?;
        let rows = stmt.query_map(params_from_iter(compiled.params.iter()), |row| {
            query::read_document(row, fields)
        })?;

        let documents = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(documents)
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS perf_summary (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            num_pushes INTEGER,
            is_diff INTEGER NOT NULL,
            max_diff REAL,
            num_new_segments INTEGER NOT NULL,
            num_old_segments INTEGER NOT NULL,
            relative_noise REAL,
            dev_status TEXT,
            dev_score REAL,
            last_updated INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS perf_summary_last_updated
            ON perf_summary (last_updated);
        "#,
    )?;

    Ok(())
}
