//! v002 -- Warm-start cache for the signed-in session.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS session_cache (
    key        TEXT PRIMARY KEY NOT NULL,   -- super_chat_user, super_chat_contacts
    json       TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}
