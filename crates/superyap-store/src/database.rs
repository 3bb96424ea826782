//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Path of the default application database.
    ///
    /// The file lives in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/superyap/superyap.db`
    /// - macOS:   `~/Library/Application Support/com.superyap.superyap/superyap.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\superyap\superyap\data\superyap.db`
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "superyap", "superyap").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        Ok(data_dir.join("superyap.db"))
    }

    /// Open (or create) the default application database.
    pub fn open_default() -> Result<Self> {
        let db_path = Self::default_path()?;

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // other processes may hold the write lock briefly
        conn.busy_timeout(Duration::from_secs(5))?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Private in-memory database, discarded on drop.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Changes whenever another connection commits to the same file.
    pub(crate) fn data_version(&self) -> Result<i64> {
        Ok(self
            .conn
            .pragma_query_value(None, "data_version", |row| row.get(0))?)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
        assert!(path.exists());

        let version: u32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }

    #[test]
    fn reopen_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        drop(Database::open_at(&path).unwrap());
        let db = Database::open_at(&path).expect("migrations are idempotent");
        let tables: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('nodes', 'session_cache')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
