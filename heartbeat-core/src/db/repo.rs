//! SQLite-backed record store
//!
//! The project state lives in the `records` table as one JSON value keyed by
//! [`STATE_RECORD_KEY`](crate::types::STATE_RECORD_KEY). Exports written by
//! the CLI are tracked in `exports`.

use crate::error::Result;
use crate::store::StateStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// One recorded transcript export
#[derive(Debug, Clone)]
pub struct ExportRecord {
    pub session_id: String,
    pub chunk_count: i64,
    pub exported_at: DateTime<Utc>,
    /// Output file, `None` for stdout
    pub target: Option<String>,
}

/// SQLite database handle
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        super::schema::run_migrations(&conn)
    }

    // ============================================
    // Record operations
    // ============================================

    /// Fetch a record value
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM records WHERE key = ?1", [key], |r| {
                r.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Insert or replace a record value
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO records (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// When a record was last written
    pub fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let ts: Option<String> = conn
            .query_row("SELECT updated_at FROM records WHERE key = ?1", [key], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(ts.and_then(|s| parse_datetime(&s)))
    }

    // ============================================
    // Export history
    // ============================================

    /// Record that a session transcript was exported
    pub fn record_export(&self, export: &ExportRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO exports (session_id, chunk_count, exported_at, target)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                export.session_id,
                export.chunk_count,
                export.exported_at.to_rfc3339(),
                export.target,
            ],
        )?;
        Ok(())
    }

    /// Exports of a session, newest first
    pub fn list_exports(&self, session_id: &str) -> Result<Vec<ExportRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT session_id, chunk_count, exported_at, target
            FROM exports
            WHERE session_id = ?1
            ORDER BY exported_at DESC, id DESC
            "#,
        )?;

        let rows = stmt
            .query_map([session_id], |row| {
                let exported_at: String = row.get(2)?;
                Ok(ExportRecord {
                    session_id: row.get(0)?,
                    chunk_count: row.get(1)?,
                    exported_at: parse_datetime(&exported_at).unwrap_or_else(Utc::now),
                    target: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Total number of recorded exports
    pub fn export_count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let n = conn.query_row("SELECT COUNT(*) FROM exports", [], |r| r.get(0))?;
        Ok(n)
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl StateStore for Database {
    async fn get_record(&self, key: &str) -> Result<Option<String>> {
        self.get(key)
    }

    async fn set_record(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProjectState, Session, UserSettings, STATE_RECORD_KEY};

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    #[test]
    fn test_put_get() {
        let db = test_db();
        assert!(db.get("k").unwrap().is_none());

        db.put("k", "{\"a\":1}").unwrap();
        db.put("k", "{\"a\":2}").unwrap();
        assert_eq!(db.get("k").unwrap().as_deref(), Some("{\"a\":2}"));
        assert!(db.updated_at("k").unwrap().is_some());
        assert!(db.updated_at("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let db = test_db();
        let mut state = db.load(&UserSettings::default()).await.unwrap();
        assert!(state.sessions.is_empty());
        assert!(db.get(STATE_RECORD_KEY).unwrap().is_some());

        let session = Session::new("s1".into(), "manual", None, Utc::now());
        state.sessions.insert("s1".into(), session);
        state.current_session_id = Some("s1".into());
        db.save(&state).await.unwrap();

        let loaded: ProjectState = db.load(&UserSettings::default()).await.unwrap();
        assert_eq!(loaded.current_session_id.as_deref(), Some("s1"));
        assert_eq!(loaded.sessions.len(), 1);
    }

    #[test]
    fn test_export_history() {
        let db = test_db();
        db.record_export(&ExportRecord {
            session_id: "s1".into(),
            chunk_count: 3,
            exported_at: Utc::now(),
            target: Some("/tmp/s1.txt".into()),
        })
        .unwrap();
        db.record_export(&ExportRecord {
            session_id: "s2".into(),
            chunk_count: 0,
            exported_at: Utc::now(),
            target: None,
        })
        .unwrap();

        let exports = db.list_exports("s1").unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].chunk_count, 3);
        assert_eq!(db.export_count().unwrap(), 2);
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("heartbeat.db");
        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        assert!(path.exists());
    }
}
