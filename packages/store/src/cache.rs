//! Fetched-page cache keyed by URL.
//!
//! A small libSQL database separate from the record store. Entries carry an
//! expiry timestamp; an expired entry behaves exactly like a miss and is
//! deleted on the way out.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use libsql::{Connection, Database, params};
use recrawl_shared::{RecrawlError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    url        TEXT PRIMARY KEY,
    body       TEXT NOT NULL,
    stored_at  TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entries_expires ON entries(expires_at);
"#;

/// Cache handle wrapping a libSQL database.
pub struct PageCache {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl PageCache {
    /// Open or create a cache database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
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

        conn.execute_batch(SCHEMA)
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;

        Ok(Self { db, conn })
    }

    /// Get the cached body for `url`, or `None` on a miss or an expired
    /// entry. Expired entries are deleted before returning.
    pub async fn get(&self, url: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT body, expires_at FROM entries WHERE url = ?1",
                params![url],
            )
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(RecrawlError::Storage(e.to_string())),
        };

        let body: String = row
            .get(0)
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;
        let expires_at = parse_timestamp(&row, 1)?;

        if expires_at <= Utc::now() {
            self.conn
                .execute("DELETE FROM entries WHERE url = ?1", params![url])
                .await
                .map_err(|e| RecrawlError::Storage(e.to_string()))?;
            return Ok(None);
        }

        Ok(Some(body))
    }

    /// Store a body for `url` with the given lifetime, replacing any
    /// previous entry.
    pub async fn set(&self, url: &str, body: &str, ttl: Duration) -> Result<()> {
        let now = Utc::now();
        let expires_at = now + ttl;
        self.conn
            .execute(
                "INSERT INTO entries (url, body, stored_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(url) DO UPDATE SET
                   body = excluded.body,
                   stored_at = excluded.stored_at,
                   expires_at = excluded.expires_at",
                params![
                    url,
                    body,
                    now.to_rfc3339(),
                    expires_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Whether a non-expired entry exists for `url`.
    pub async fn contains(&self, url: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT expires_at FROM entries WHERE url = ?1",
                params![url],
            )
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(parse_timestamp(&row, 0)? > Utc::now()),
            Ok(None) => Ok(false),
            Err(e) => Err(RecrawlError::Storage(e.to_string())),
        }
    }

    /// Delete all expired entries. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.conn
            .execute(
                "DELETE FROM entries WHERE expires_at <= ?1",
                params![Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| RecrawlError::Storage(e.to_string()))
    }
}

fn parse_timestamp(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>> {
    let s: String = row
        .get(idx)
        .map_err(|e| RecrawlError::Storage(e.to_string()))?;
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RecrawlError::Storage(format!("invalid date: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn test_cache() -> PageCache {
        let tmp = std::env::temp_dir().join(format!("recrawl_cache_{}.db", Uuid::now_v7()));
        PageCache::open(&tmp).await.expect("open test cache")
    }

    #[tokio::test]
    async fn miss_on_empty_cache() {
        let cache = test_cache().await;
        let body = cache.get("https://example.com/a").await.expect("get");
        assert!(body.is_none());
        assert!(!cache.contains("https://example.com/a").await.unwrap());
    }

    #[tokio::test]
    async fn set_then_get_within_ttl() {
        let cache = test_cache().await;
        cache
            .set("https://example.com/a", "<html>A</html>", Duration::hours(1))
            .await
            .expect("set");

        let body = cache.get("https://example.com/a").await.expect("get");
        assert_eq!(body.as_deref(), Some("<html>A</html>"));
        assert!(cache.contains("https://example.com/a").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entry_behaves_like_miss() {
        let cache = test_cache().await;
        cache
            .set("https://example.com/a", "old", Duration::zero())
            .await
            .unwrap();

        assert!(!cache.contains("https://example.com/a").await.unwrap());
        let body = cache.get("https://example.com/a").await.expect("get");
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn set_overwrites_previous_body() {
        let cache = test_cache().await;
        cache
            .set("https://example.com/a", "first", Duration::hours(1))
            .await
            .unwrap();
        cache
            .set("https://example.com/a", "second", Duration::hours(1))
            .await
            .unwrap();

        let body = cache.get("https://example.com/a").await.unwrap();
        assert_eq!(body.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let cache = test_cache().await;
        cache
            .set("https://example.com/stale", "x", Duration::zero())
            .await
            .unwrap();
        cache
            .set("https://example.com/fresh", "y", Duration::hours(1))
            .await
            .unwrap();

        let removed = cache.purge_expired().await.expect("purge");
        assert_eq!(removed, 1);
        assert!(cache.contains("https://example.com/fresh").await.unwrap());
    }
}
