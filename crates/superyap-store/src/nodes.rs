use chrono::Utc;
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;

/// A persisted top-level subtree.
pub(crate) struct StoredRoot {
    pub root: String,
    pub json: String,
    pub bytes: u64,
}

impl Database {
    pub(crate) fn load_roots(&self) -> Result<Vec<StoredRoot>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT root, json, bytes FROM nodes ORDER BY root ASC")?;

        let rows = stmt.query_map([], |row| {
            let bytes: i64 = row.get(2)?;
            Ok(StoredRoot {
                root: row.get(0)?,
                json: row.get(1)?,
                bytes: bytes.max(0) as u64,
            })
        })?;

        let mut roots = Vec::new();
        for row in rows {
            roots.push(row?);
        }
        Ok(roots)
    }

    pub(crate) fn save_root(&self, root: &str, json: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO nodes (root, json, bytes, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(root) DO UPDATE SET json = excluded.json, bytes = excluded.bytes,
                                             updated_at = excluded.updated_at",
            params![root, json, json.len() as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub(crate) fn delete_root(&self, root: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM nodes WHERE root = ?1", params![root])?;
        Ok(affected > 0)
    }
}
