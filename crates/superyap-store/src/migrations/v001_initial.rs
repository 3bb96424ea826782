//! v001 -- Initial schema creation.
//!
//! One row per top-level root of the key-value tree (`users`, `chats`, ...).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    root       TEXT PRIMARY KEY NOT NULL,   -- first path segment
    json       TEXT NOT NULL,               -- serialized subtree
    bytes      INTEGER NOT NULL,            -- length of json, counted against the quota
    updated_at TEXT NOT NULL                -- RFC-3339
);
"#;

/// Apply the initial schema.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
