use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use gatehouse_core::{CacheEntry, Identity, PermissionError, Snapshot};
use rusqlite::{Connection, OptionalExtension};

use super::{CACHE_FORMAT_VERSION, SnapshotPersistence};

/// Persisted cache tier in a SQLite file, one row per identity.
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
}

const MIGRATE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS permission_cache (
    identity TEXT PRIMARY KEY,
    format_version INTEGER NOT NULL,
    snapshot TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
"#;

impl SqliteSnapshotStore {
    pub fn new(conn: Connection) -> Result<Self, PermissionError> {
        conn.execute_batch(MIGRATE_SQL).map_err(write_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &str) -> Result<Self, PermissionError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PermissionError::CacheWrite(e.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(write_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(write_err)?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self, PermissionError> {
        Self::new(Connection::open_in_memory().map_err(write_err)?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PermissionError> {
        self.conn
            .lock()
            .map_err(|_| PermissionError::CacheRead("cache lock poisoned".into()))
    }
}

fn write_err(e: rusqlite::Error) -> PermissionError {
    PermissionError::CacheWrite(e.to_string())
}

fn read_err(e: rusqlite::Error) -> PermissionError {
    PermissionError::CacheRead(e.to_string())
}

fn decode(snapshot: &str, expires_at: &str) -> Result<CacheEntry, PermissionError> {
    let snapshot: Snapshot = serde_json::from_str(snapshot)
        .map_err(|e| PermissionError::CacheRead(format!("bad snapshot: {e}")))?;
    let expires_at = DateTime::parse_from_rfc3339(expires_at)
        .map_err(|e| PermissionError::CacheRead(format!("bad expiry: {e}")))?
        .with_timezone(&Utc);
    Ok(CacheEntry::new(Arc::new(snapshot), expires_at))
}

impl SnapshotPersistence for SqliteSnapshotStore {
    fn load_all(&self) -> Result<Vec<CacheEntry>, PermissionError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT snapshot, expires_at FROM permission_cache WHERE format_version = ?1")
            .map_err(read_err)?;
        let rows = stmt
            .query_map([CACHE_FORMAT_VERSION], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(read_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_err)?;

        let mut entries = Vec::with_capacity(rows.len());
        for (snapshot, expires_at) in rows {
            match decode(&snapshot, &expires_at) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable cache row"),
            }
        }
        Ok(entries)
    }

    fn load(&self, identity: &Identity) -> Result<Option<CacheEntry>, PermissionError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT snapshot, expires_at FROM permission_cache
                 WHERE identity = ?1 AND format_version = ?2",
                rusqlite::params![identity.as_str(), CACHE_FORMAT_VERSION],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(read_err)?;
        row.map(|(snapshot, expires_at)| decode(&snapshot, &expires_at))
            .transpose()
    }

    fn store(&self, entry: &CacheEntry) -> Result<(), PermissionError> {
        let snapshot = serde_json::to_string(entry.snapshot.as_ref())
            .map_err(|e| PermissionError::CacheWrite(e.to_string()))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO permission_cache (identity, format_version, snapshot, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(identity) DO UPDATE SET
                format_version = excluded.format_version,
                snapshot = excluded.snapshot,
                expires_at = excluded.expires_at",
            rusqlite::params![
                entry.snapshot.identity().as_str(),
                CACHE_FORMAT_VERSION,
                snapshot,
                entry.expires_at.to_rfc3339(),
            ],
        )
        .map_err(write_err)?;
        Ok(())
    }

    fn remove(&self, identity: &Identity) -> Result<(), PermissionError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM permission_cache WHERE identity = ?1",
            [identity.as_str()],
        )
        .map_err(write_err)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), PermissionError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM permission_cache", [])
            .map_err(write_err)?;
        Ok(())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, PermissionError> {
        let conn = self.conn()?;
        // Compare parsed instants rather than strings: rows may carry different offsets.
        let mut stmt = conn
            .prepare("SELECT identity, format_version, expires_at FROM permission_cache")
            .map_err(read_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(read_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_err)?;

        let mut purged = 0;
        for (identity, version, expires_at) in rows {
            let expired = DateTime::parse_from_rfc3339(&expires_at)
                .map(|t| t.with_timezone(&Utc) <= now)
                .unwrap_or(true);
            if version != CACHE_FORMAT_VERSION || expired {
                purged += conn
                    .execute(
                        "DELETE FROM permission_cache WHERE identity = ?1",
                        [identity],
                    )
                    .map_err(write_err)?;
            }
        }
        Ok(purged)
    }
}
