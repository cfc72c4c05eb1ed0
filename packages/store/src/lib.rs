//! libSQL storage layer for tracked records.
//!
//! The [`RecordStore`] struct wraps a local libSQL database holding the
//! records the pipeline re-harvests, plus batch run history. Fan-out
//! pipelines open a second `RecordStore` for child records; the page cache
//! lives in its own database (see [`PageCache`]).

mod cache;
mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use recrawl_shared::{RecrawlError, Result, Status, TrackedRecord};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use cache::PageCache;

/// Storage handle for tracked records, wrapping a libSQL database.
pub struct RecordStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl RecordStore {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RecrawlError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    RecrawlError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Record operations
    // -----------------------------------------------------------------------

    /// Insert a record, or replace its status, timestamp, and fields if the
    /// key already exists.
    pub async fn upsert_record(&self, record: &TrackedRecord) -> Result<()> {
        let fields_json = serde_json::to_string(&record.fields)
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO records (id, status, edited_at, fields)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                   status = excluded.status,
                   edited_at = excluded.edited_at,
                   fields = excluded.fields",
                params![
                    record.id.as_str(),
                    record.status,
                    record.edited_at.to_rfc3339(),
                    fields_json.as_str(),
                ],
            )
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Bulk-insert records, silently skipping keys that already exist.
    /// Returns the number of rows actually inserted.
    pub async fn insert_records(&self, records: &[TrackedRecord]) -> Result<u64> {
        let mut inserted = 0;
        for record in records {
            let fields_json = serde_json::to_string(&record.fields)
                .map_err(|e| RecrawlError::Storage(e.to_string()))?;
            inserted += self
                .conn
                .execute(
                    "INSERT OR IGNORE INTO records (id, status, edited_at, fields)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        record.id.as_str(),
                        record.status,
                        record.edited_at.to_rfc3339(),
                        fields_json.as_str(),
                    ],
                )
                .await
                .map_err(|e| RecrawlError::Storage(e.to_string()))?;
        }
        Ok(inserted)
    }

    /// Get a record by ID.
    pub async fn get_record(&self, id: &str) -> Result<Option<TrackedRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, status, edited_at, fields FROM records WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(RecrawlError::Storage(e.to_string())),
        }
    }

    /// List all records, ordered by ID.
    pub async fn list_records(&self) -> Result<Vec<TrackedRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, status, edited_at, fields FROM records ORDER BY id",
                params![],
            )
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }

    /// Select records due for processing: status below `threshold` and not
    /// touched since `cutoff`. Oldest first. `limit = None` means all.
    pub async fn due_records(
        &self,
        threshold: Status,
        cutoff: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<TrackedRecord>> {
        let limit = limit.map(i64::from).unwrap_or(-1);
        let mut rows = self
            .conn
            .query(
                "SELECT id, status, edited_at, fields FROM records
                 WHERE status < ?1 AND edited_at < ?2
                 ORDER BY edited_at ASC
                 LIMIT ?3",
                params![threshold.code(), cutoff.to_rfc3339(), limit],
            )
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }

    /// Apply a reconciliation write: set status and timestamp, and assign
    /// each `patch` entry into the stored fields, all in one statement.
    /// Every key is assigned wholesale: an object value replaces the stored
    /// value instead of deep-merging into it, and an explicit null is stored
    /// as null rather than deleting the key. An empty patch leaves the
    /// fields untouched.
    pub async fn update_record(
        &self,
        id: &str,
        status: Status,
        edited_at: DateTime<Utc>,
        patch: &Map<String, Value>,
    ) -> Result<()> {
        if patch.is_empty() {
            self.conn
                .execute(
                    "UPDATE records SET status = ?1, edited_at = ?2 WHERE id = ?3",
                    params![status.code(), edited_at.to_rfc3339(), id],
                )
                .await
                .map_err(|e| RecrawlError::Storage(e.to_string()))?;
            return Ok(());
        }

        // One json_set path/value pair per key; json(?) parses the bound
        // text so structured values land structured, not as strings.
        let mut sql =
            String::from("UPDATE records SET status = ?, edited_at = ?, fields = json_set(fields");
        let mut args: Vec<libsql::Value> = vec![
            libsql::Value::Integer(status.code()),
            libsql::Value::Text(edited_at.to_rfc3339()),
        ];
        for (key, value) in patch {
            sql.push_str(", ?, json(?)");
            args.push(libsql::Value::Text(format!(
                "$.\"{}\"",
                key.replace('"', "\\\"")
            )));
            args.push(libsql::Value::Text(value.to_string()));
        }
        sql.push_str(") WHERE id = ?");
        args.push(libsql::Value::Text(id.to_string()));

        self.conn
            .execute(&sql, args)
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Total record count.
    pub async fn count_records(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM records", params![])
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<u64>(0)
                .map_err(|e| RecrawlError::Storage(e.to_string())),
            Ok(None) => Ok(0),
            Err(e) => Err(RecrawlError::Storage(e.to_string())),
        }
    }

    /// Record counts grouped by raw status code, ascending.
    pub async fn count_by_status(&self) -> Result<Vec<(i64, u64)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, COUNT(*) FROM records GROUP BY status ORDER BY status",
                params![],
            )
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push((
                row.get::<i64>(0)
                    .map_err(|e| RecrawlError::Storage(e.to_string()))?,
                row.get::<u64>(1)
                    .map_err(|e| RecrawlError::Storage(e.to_string()))?,
            ));
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Batch run history
    // -----------------------------------------------------------------------

    /// Insert a new batch run. Returns the generated run ID.
    pub async fn insert_batch_run(&self) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO batch_runs (id, started_at) VALUES (?1, ?2)",
                params![id.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Finalize a batch run with completion stats.
    pub async fn finish_batch_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE batch_runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Most recent batch runs, newest first.
    pub async fn list_batch_runs(&self, limit: Option<u32>) -> Result<Vec<BatchRun>> {
        let limit = limit.map(i64::from).unwrap_or(-1);
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, stats_json FROM batch_runs
                 ORDER BY started_at DESC
                 LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row
                .get(0)
                .map_err(|e| RecrawlError::Storage(e.to_string()))?;
            let started: String = row
                .get(1)
                .map_err(|e| RecrawlError::Storage(e.to_string()))?;
            let finished: Option<String> = row.get(2).ok();
            let stats_json: Option<String> = row.get(3).ok();
            results.push(BatchRun {
                id,
                started_at: parse_rfc3339(&started)?,
                finished_at: finished.map(|s| parse_rfc3339(&s)).transpose()?,
                stats_json,
            });
        }
        Ok(results)
    }
}

/// One recorded batch run.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    /// `None` while the run is still going (or was interrupted).
    pub finished_at: Option<DateTime<Utc>>,
    pub stats_json: Option<String>,
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RecrawlError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`TrackedRecord`].
fn row_to_record(row: &libsql::Row) -> Result<TrackedRecord> {
    let fields_json: String = row
        .get(3)
        .map_err(|e| RecrawlError::Storage(e.to_string()))?;
    Ok(TrackedRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| RecrawlError::Storage(e.to_string()))?,
        status: row
            .get::<i64>(1)
            .map_err(|e| RecrawlError::Storage(e.to_string()))?,
        edited_at: {
            let s: String = row
                .get(2)
                .map_err(|e| RecrawlError::Storage(e.to_string()))?;
            parse_rfc3339(&s)?
        },
        fields: serde_json::from_str(&fields_json)
            .map_err(|e| RecrawlError::Storage(format!("invalid fields JSON: {e}")))?,
    })
}
