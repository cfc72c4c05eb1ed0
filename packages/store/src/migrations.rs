//! SQL migration definitions for the record store database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: records, batch_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Tracked records processed by the pipeline
CREATE TABLE IF NOT EXISTS records (
    id        TEXT PRIMARY KEY,
    status    INTEGER NOT NULL DEFAULT 0,
    edited_at TEXT NOT NULL,
    fields    TEXT NOT NULL DEFAULT '{}'
);

-- The due-record query filters on status and edited_at together
CREATE INDEX IF NOT EXISTS idx_records_due ON records(status, edited_at);

-- Batch run history
CREATE TABLE IF NOT EXISTS batch_runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
