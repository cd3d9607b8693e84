//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `portals`, `messages` and `bot_chats`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Portals (one row per bridged conversation)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS portals (
    chat_id    INTEGER NOT NULL,            -- remote conversation id
    receiver   INTEGER NOT NULL,            -- account id for direct chats, else chat_id
    kind       TEXT NOT NULL,               -- direct / basic-group / broadcast-group
    room_id    TEXT UNIQUE,                 -- local room, NULL until created
    username   TEXT,                        -- public handle
    title      TEXT,
    about      TEXT,
    photo_id   TEXT,                        -- avatar content hash
    created_at TEXT NOT NULL,               -- RFC-3339

    PRIMARY KEY (chat_id, receiver)
);

-- ----------------------------------------------------------------
-- Message correlations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    remote_id INTEGER NOT NULL,
    id_space  INTEGER NOT NULL,             -- chat id or account id, see IdSpace
    local_id  TEXT NOT NULL,                -- local event id or placeholder
    room_id   TEXT NOT NULL,

    PRIMARY KEY (remote_id, id_space)
);

-- ----------------------------------------------------------------
-- Conversations the relay bot participates in
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS bot_chats (
    chat_id INTEGER PRIMARY KEY NOT NULL,
    kind    TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
