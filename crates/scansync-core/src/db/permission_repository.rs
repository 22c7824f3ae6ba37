//! Permission grants consulted by the sync endpoints

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::Permission;
use crate::util::to_millis;

/// Boundary for `hasPermission(user, key)` checks
pub trait PermissionRepository {
    fn has_permission(&self, user_id: &str, permission: Permission) -> Result<bool>;

    /// Grant a permission; granting twice is a no-op
    fn grant(&self, user_id: &str, permission: Permission) -> Result<()>;

    /// Revoke a permission; returns whether it was held
    fn revoke(&self, user_id: &str, permission: Permission) -> Result<bool>;

    fn list(&self, user_id: &str) -> Result<Vec<Permission>>;
}

pub struct SqlitePermissionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePermissionRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl PermissionRepository for SqlitePermissionRepository<'_> {
    fn has_permission(&self, user_id: &str, permission: Permission) -> Result<bool> {
        let granted = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM user_permissions WHERE user_id = ? AND permission = ?)",
            params![user_id, permission.as_str()],
            |row| row.get(0),
        )?;
        Ok(granted)
    }

    fn grant(&self, user_id: &str, permission: Permission) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_permissions (user_id, permission, granted_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, permission) DO NOTHING",
            params![user_id, permission.as_str(), to_millis(Utc::now())],
        )?;
        Ok(())
    }

    fn revoke(&self, user_id: &str, permission: Permission) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM user_permissions WHERE user_id = ? AND permission = ?",
            params![user_id, permission.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn list(&self, user_id: &str) -> Result<Vec<Permission>> {
        let mut stmt = self.conn.prepare(
            "SELECT permission FROM user_permissions WHERE user_id = ? ORDER BY permission",
        )?;
        let permissions = stmt
            .query_map(params![user_id], |row| {
                let raw: String = row.get(0)?;
                super::parse_text_column(0, &raw)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(permissions)
    }
}
