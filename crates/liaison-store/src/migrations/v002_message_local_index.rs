use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Lookups by local event id (replies, redactions, placeholder rebinds)
CREATE INDEX IF NOT EXISTS idx_messages_room_local ON messages(room_id, local_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
