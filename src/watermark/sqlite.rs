// ABOUTME: SQLite-file watermark backend for running without warehouse write access
// ABOUTME: Keeps one row per object type in a local sync_state table

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use super::{Watermark, WatermarkBackend};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_state (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    object_type     TEXT NOT NULL UNIQUE,
    last_sync_time  TEXT NOT NULL,
    sync_cursor     TEXT,
    updated_at      TEXT NOT NULL
);
"#;

pub struct SqliteWatermarkBackend {
    conn: Mutex<Connection>,
}

impl SqliteWatermarkBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory {}", parent.display())
            })?;
            #[cfg(unix)]
            set_owner_perms(parent)?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open state database {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "wal")
            .context("Failed to enable WAL for state database")?;
        Self::init(conn)
    }

    /// Non-persistent store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory state")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize state schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("State database lock poisoned"))?;
        f(&conn).map_err(Into::into)
    }
}

fn row_to_watermark(row: &rusqlite::Row<'_>) -> rusqlite::Result<Watermark> {
    Ok(Watermark {
        object_type: row.get(0)?,
        last_sync_time: row.get::<_, DateTime<Utc>>(1)?,
        cursor: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        updated_at: row.get::<_, DateTime<Utc>>(3)?,
    })
}

#[async_trait]
impl WatermarkBackend for SqliteWatermarkBackend {
    async fn load(&self, object_type: &str) -> Result<Option<Watermark>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT object_type, last_sync_time, sync_cursor, updated_at
                 FROM sync_state WHERE object_type = ?1
                 ORDER BY last_sync_time DESC LIMIT 1",
                [object_type],
                row_to_watermark,
            )
            .optional()
        })
        .with_context(|| format!("Failed to load watermark for {}", object_type))
    }

    async fn save(&self, watermark: &Watermark) -> Result<bool> {
        // Timestamps are stored as UTC text, whose ordering matches time order.
        let changed = self
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO sync_state (object_type, last_sync_time, sync_cursor, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(object_type) DO UPDATE SET
                        last_sync_time = excluded.last_sync_time,
                        sync_cursor = excluded.sync_cursor,
                        updated_at = excluded.updated_at
                     WHERE sync_state.last_sync_time <= excluded.last_sync_time",
                    params![
                        watermark.object_type,
                        watermark.last_sync_time,
                        watermark.cursor,
                        watermark.updated_at,
                    ],
                )
            })
            .with_context(|| format!("Failed to save watermark for {}", watermark.object_type))?;
        Ok(changed > 0)
    }

    async fn list(&self) -> Result<Vec<Watermark>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT object_type, last_sync_time, sync_cursor, updated_at
                 FROM sync_state ORDER BY object_type",
            )?;
            let rows = stmt.query_map([], row_to_watermark)?;
            rows.collect()
        })
        .context("Failed to list watermarks")
    }

    async fn delete(&self, object_type: &str) -> Result<bool> {
        let deleted = self
            .with_conn(|conn| {
                conn.execute("DELETE FROM sync_state WHERE object_type = ?1", [object_type])
            })
            .with_context(|| format!("Failed to delete watermark for {}", object_type))?;
        Ok(deleted > 0)
    }
}

#[cfg(unix)]
fn set_owner_perms(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o700);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn watermark(object_type: &str, time: DateTime<Utc>, cursor: &str) -> Watermark {
        Watermark {
            object_type: object_type.to_string(),
            last_sync_time: time,
            cursor: cursor.to_string(),
            updated_at: time,
        }
    }

    #[tokio::test]
    async fn test_file_backend_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("watermarks.db");
        let t = Utc.with_ymd_and_hms(2024, 7, 4, 12, 0, 0).unwrap();

        {
            let backend = SqliteWatermarkBackend::open(&path).unwrap();
            assert!(backend.save(&watermark("contacts", t, "abc")).await.unwrap());
        }

        let backend = SqliteWatermarkBackend::open(&path).unwrap();
        let loaded = backend.load("contacts").await.unwrap().unwrap();
        assert_eq!(loaded.last_sync_time, t);
        assert_eq!(loaded.cursor, "abc");
        assert!(backend.load("deals").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_keeps_later_time() {
        let backend = SqliteWatermarkBackend::open_in_memory().unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();

        assert!(backend.save(&watermark("deals", t2, "new")).await.unwrap());
        assert!(!backend.save(&watermark("deals", t1, "old")).await.unwrap());
        assert!(backend.save(&watermark("deals", t2, "same-time")).await.unwrap());

        let loaded = backend.load("deals").await.unwrap().unwrap();
        assert_eq!(loaded.last_sync_time, t2);
        assert_eq!(loaded.cursor, "same-time");
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let backend = SqliteWatermarkBackend::open_in_memory().unwrap();
        let t = Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap();
        backend.save(&watermark("deals", t, "")).await.unwrap();
        backend.save(&watermark("contacts", t, "")).await.unwrap();

        let names: Vec<_> = backend
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.object_type)
            .collect();
        assert_eq!(names, vec!["contacts", "deals"]);

        assert!(backend.delete("deals").await.unwrap());
        assert!(!backend.delete("deals").await.unwrap());
        assert_eq!(backend.list().await.unwrap().len(), 1);
    }
}
