//! SQLite-backed state store.
//!
//! Persists the counters and markers the action gate depends on: day-keyed
//! post/comment counts, the last-post timestamp, the handled-post set, and
//! community insights. Schema is initialized on open.

use chrono::{DateTime, NaiveDate, Utc};
use murmur_common::{Error, Result};
use murmur_core::{Insight, StateStore};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS post_stats (
    source TEXT NOT NULL,
    day    TEXT NOT NULL,
    count  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (source, day)
);
CREATE TABLE IF NOT EXISTS post_meta (
    source       TEXT PRIMARY KEY,
    last_post_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS comment_stats (
    source TEXT NOT NULL,
    day    TEXT NOT NULL,
    count  INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (source, day)
);
CREATE TABLE IF NOT EXISTS handled_posts (
    source     TEXT NOT NULL,
    post_id    TEXT NOT NULL,
    handled_at TEXT NOT NULL,
    PRIMARY KEY (source, post_id)
);
CREATE TABLE IF NOT EXISTS insights (
    source     TEXT NOT NULL,
    post_id    TEXT NOT NULL,
    topic      TEXT NOT NULL,
    content    TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (source, post_id)
);
";

/// SQLite store shared across workflow tasks.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn day_count(&self, table: &str, source: &str, day: NaiveDate) -> Result<u32> {
        let conn = self.lock();
        let query = format!("SELECT count FROM {table} WHERE source = ?1 AND day = ?2");
        conn.query_row(&query, params![source, day.to_string()], |row| row.get(0))
            .optional()
            .map_err(db_err)
            .map(|count| count.unwrap_or(0))
    }

    fn bump_day_count(&self, table: &str, source: &str, day: NaiveDate) -> Result<()> {
        let conn = self.lock();
        let query = format!(
            "INSERT INTO {table} (source, day, count) VALUES (?1, ?2, 1)
             ON CONFLICT(source, day) DO UPDATE SET count = count + 1"
        );
        conn.execute(&query, params![source, day.to_string()])
            .map_err(db_err)?;
        Ok(())
    }
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

impl StateStore for SqliteStore {
    fn post_count(&self, source: &str, day: NaiveDate) -> Result<u32> {
        self.day_count("post_stats", source, day)
    }

    fn last_post_at(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self
            .lock()
            .query_row(
                "SELECT last_post_at FROM post_meta WHERE source = ?1",
                params![source],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match raw {
            Some(raw) => {
                let parsed = DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| Error::Storage(format!("bad last_post_at timestamp: {e}")))?;
                Ok(Some(parsed.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    fn record_post(&self, source: &str, at: DateTime<Utc>) -> Result<()> {
        self.bump_day_count("post_stats", source, at.date_naive())?;
        self.lock()
            .execute(
                "INSERT INTO post_meta (source, last_post_at) VALUES (?1, ?2)
                 ON CONFLICT(source) DO UPDATE SET last_post_at = ?2",
                params![source, at.to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn comment_count(&self, source: &str, day: NaiveDate) -> Result<u32> {
        self.day_count("comment_stats", source, day)
    }

    fn record_comment(&self, source: &str, day: NaiveDate) -> Result<()> {
        self.bump_day_count("comment_stats", source, day)
    }

    fn is_handled(&self, source: &str, post_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .lock()
            .query_row(
                "SELECT 1 FROM handled_posts WHERE source = ?1 AND post_id = ?2",
                params![source, post_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    fn mark_handled(&self, source: &str, post_id: &str) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR IGNORE INTO handled_posts (source, post_id, handled_at)
                 VALUES (?1, ?2, ?3)",
                params![source, post_id, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn save_insight(&self, insight: &Insight) -> Result<()> {
        self.lock()
            .execute(
                "INSERT OR REPLACE INTO insights (source, post_id, topic, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    insight.source,
                    insight.post_id,
                    insight.topic,
                    insight.content,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
