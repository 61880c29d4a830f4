use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use gatehouse_core::{Group, Identity, Permission, PermissionError};
use rusqlite::{Connection, OptionalExtension};

use super::PermissionSource;

/// Local stand-in for the hosted permission backend.
pub struct SqlitePermissionSource {
    conn: Mutex<Connection>,
}

impl SqlitePermissionSource {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &str) -> Result<Self, PermissionError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(db_err)?;
        let source = Self::new(conn);
        source.migrate()?;
        Ok(source)
    }

    pub fn open_in_memory() -> Result<Self, PermissionError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;
        let source = Self::new(conn);
        source.migrate()?;
        Ok(source)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PermissionError> {
        self.conn
            .lock()
            .map_err(|_| PermissionError::Fetch("connection lock poisoned".into()))
    }

    pub fn migrate(&self) -> Result<(), PermissionError> {
        self.conn()?.execute_batch(MIGRATE_SQL).map_err(db_err)
    }

    // --- Groups ---

    pub fn create_group(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Group, PermissionError> {
        let conn = self.conn()?;
        let id = uuid::Uuid::now_v7().to_string();
        conn.execute(
            "INSERT INTO auth_groups (id, name, description) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, name, description],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 2067 {
                    return PermissionError::InvalidInput(format!(
                        "group '{name}' already exists"
                    ));
                }
            }
            db_err(e)
        })?;
        Ok(Group {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
        })
    }

    pub fn get_group_by_name(&self, name: &str) -> Result<Option<Group>, PermissionError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, description FROM auth_groups WHERE name = ?1",
            [name],
            |row| {
                Ok(Group {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    pub fn list_groups(&self) -> Result<Vec<Group>, PermissionError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, name, description FROM auth_groups ORDER BY name")
            .map_err(db_err)?;
        let groups = stmt
            .query_map([], |row| {
                Ok(Group {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(groups)
    }

    // --- Permissions ---

    /// Idempotent on `(resource, action)`: returns the existing row if present.
    pub fn create_permission(
        &self,
        resource: &str,
        action: &str,
        name: Option<&str>,
    ) -> Result<Permission, PermissionError> {
        if resource.is_empty() || action.is_empty() {
            return Err(PermissionError::InvalidInput(
                "resource and action must be non-empty".into(),
            ));
        }
        let conn = self.conn()?;
        let id = uuid::Uuid::now_v7().to_string();
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{resource}.{action}"));
        conn.execute(
            "INSERT OR IGNORE INTO auth_permissions (id, name, resource, action) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, name, resource, action],
        )
        .map_err(db_err)?;
        // Return existing or new
        conn.query_row(
            "SELECT id, name, resource, action FROM auth_permissions WHERE resource = ?1 AND action = ?2",
            [resource, action],
            row_to_permission,
        )
        .map_err(db_err)
    }

    pub fn add_group_permission(
        &self,
        group_id: &str,
        permission_id: &str,
    ) -> Result<(), PermissionError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO auth_group_permissions (group_id, permission_id) VALUES (?1, ?2)",
            rusqlite::params![group_id, permission_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // --- Memberships ---

    pub fn add_user_group(&self, user_id: &str, group_id: &str) -> Result<(), PermissionError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO auth_user_groups (user_id, group_id) VALUES (?1, ?2)",
            rusqlite::params![user_id, group_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn remove_user_group(&self, user_id: &str, group_id: &str) -> Result<(), PermissionError> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM auth_user_groups WHERE user_id = ?1 AND group_id = ?2",
            rusqlite::params![user_id, group_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn set_administrator(&self, user_id: &str, is_admin: bool) -> Result<(), PermissionError> {
        let conn = self.conn()?;
        let sql = if is_admin {
            "INSERT OR IGNORE INTO auth_admins (user_id) VALUES (?1)"
        } else {
            "DELETE FROM auth_admins WHERE user_id = ?1"
        };
        conn.execute(sql, [user_id]).map_err(db_err)?;
        Ok(())
    }
}

const MIGRATE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS auth_groups (
    id TEXT PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS auth_permissions (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    resource TEXT NOT NULL,
    action TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (resource, action)
);

CREATE TABLE IF NOT EXISTS auth_group_permissions (
    group_id TEXT NOT NULL REFERENCES auth_groups(id) ON DELETE CASCADE,
    permission_id TEXT NOT NULL REFERENCES auth_permissions(id) ON DELETE CASCADE,
    PRIMARY KEY (group_id, permission_id)
);

CREATE TABLE IF NOT EXISTS auth_user_groups (
    user_id TEXT NOT NULL,
    group_id TEXT NOT NULL REFERENCES auth_groups(id) ON DELETE CASCADE,
    PRIMARY KEY (user_id, group_id)
);

CREATE TABLE IF NOT EXISTS auth_admins (
    user_id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

fn db_err(e: rusqlite::Error) -> PermissionError {
    PermissionError::Fetch(format!("database error: {e}"))
}

fn row_to_permission(row: &rusqlite::Row<'_>) -> rusqlite::Result<Permission> {
    Ok(Permission {
        id: row.get(0)?,
        name: row.get(1)?,
        resource: row.get(2)?,
        action: row.get(3)?,
    })
}

#[async_trait]
impl PermissionSource for SqlitePermissionSource {
    async fn is_administrator(&self, identity: &Identity) -> Result<bool, PermissionError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM auth_admins WHERE user_id = ?1",
                [identity.as_str()],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    async fn groups_for_identity(
        &self,
        identity: &Identity,
    ) -> Result<Vec<Group>, PermissionError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT g.id, g.name, g.description
                 FROM auth_groups g
                 JOIN auth_user_groups ug ON ug.group_id = g.id
                 WHERE ug.user_id = ?1
                 ORDER BY g.name",
            )
            .map_err(db_err)?;
        let groups = stmt
            .query_map([identity.as_str()], |row| {
                Ok(Group {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                })
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(groups)
    }

    async fn permissions_for_groups(
        &self,
        group_ids: &[String],
    ) -> Result<Vec<Permission>, PermissionError> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=group_ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT p.id, p.name, p.resource, p.action
             FROM auth_permissions p
             JOIN auth_group_permissions gp ON gp.permission_id = p.id
             WHERE gp.group_id IN ({placeholders})
             ORDER BY p.resource, p.action"
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let perms = stmt
            .query_map(rusqlite::params_from_iter(group_ids.iter()), row_to_permission)
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(perms)
    }
}
