//! CRUD operations for [`PortalRecord`] rows.

use chrono::{DateTime, Utc};
use liaison_shared::{ConversationKind, IdSpace, PortalKey, RemoteChatId, RoomId};
use rusqlite::params;

use crate::database::Database;
use crate::error::{conversion_error, not_found, Result};
use crate::models::PortalRecord;

const PORTAL_COLUMNS: &str =
    "chat_id, receiver, kind, room_id, username, title, about, photo_id, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert a portal, or update every mutable column if it already exists.
    pub fn save_portal(&self, portal: &PortalRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO portals (chat_id, receiver, kind, room_id, username, title, about, photo_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT (chat_id, receiver) DO UPDATE SET
                kind = excluded.kind,
                room_id = excluded.room_id,
                username = excluded.username,
                title = excluded.title,
                about = excluded.about,
                photo_id = excluded.photo_id",
            params![
                portal.key.chat_id.0,
                portal.key.receiver,
                portal.kind.as_str(),
                portal.room_id.as_ref().map(|r| r.0.as_str()),
                portal.username,
                portal.title,
                portal.about,
                portal.photo_id,
                portal.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Move a portal to a new identity in one transaction.
    ///
    /// The row under `old_key` is deleted and `portal` is written under its
    /// own key. When `id_space` is given, message correlations recorded in
    /// the old space are moved to the new one as part of the same
    /// transaction.
    pub fn relocate_portal(
        &self,
        old_key: PortalKey,
        portal: &PortalRecord,
        id_space: Option<(IdSpace, IdSpace)>,
    ) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        tx.execute(
            "DELETE FROM portals WHERE chat_id = ?1 AND receiver = ?2",
            params![old_key.chat_id.0, old_key.receiver],
        )?;
        self.save_portal(portal)?;

        if let Some((old_space, new_space)) = id_space {
            tx.execute(
                "UPDATE OR REPLACE messages SET id_space = ?2 WHERE id_space = ?1",
                params![old_space.0, new_space.0],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single portal by identity.
    pub fn get_portal(&self, key: PortalKey) -> Result<PortalRecord> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {PORTAL_COLUMNS} FROM portals WHERE chat_id = ?1 AND receiver = ?2"
                ),
                params![key.chat_id.0, key.receiver],
                row_to_portal,
            )
            .map_err(not_found)
    }

    /// Fetch the portal bridged to a local room.
    pub fn get_portal_by_room(&self, room_id: &RoomId) -> Result<PortalRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {PORTAL_COLUMNS} FROM portals WHERE room_id = ?1"),
                params![room_id.0],
                row_to_portal,
            )
            .map_err(not_found)
    }

    /// Fetch the portal with the given public handle (case-insensitive).
    pub fn find_portal_by_username(&self, username: &str) -> Result<PortalRecord> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {PORTAL_COLUMNS} FROM portals WHERE lower(username) = lower(?1)"
                ),
                params![username],
                row_to_portal,
            )
            .map_err(not_found)
    }

    /// List every portal that has a local room.
    pub fn list_bridged_portals(&self) -> Result<Vec<PortalRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {PORTAL_COLUMNS} FROM portals WHERE room_id IS NOT NULL ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map([], row_to_portal)?;

        let mut portals = Vec::new();
        for row in rows {
            portals.push(row?);
        }
        Ok(portals)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a portal.  Returns `true` if a row was deleted.
    pub fn delete_portal(&self, key: PortalKey) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM portals WHERE chat_id = ?1 AND receiver = ?2",
            params![key.chat_id.0, key.receiver],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`PortalRecord`].
fn row_to_portal(row: &rusqlite::Row<'_>) -> rusqlite::Result<PortalRecord> {
    let chat_id: i64 = row.get(0)?;
    let receiver: i64 = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let room_id: Option<String> = row.get(3)?;
    let created_str: String = row.get(8)?;

    let kind = kind_str
        .parse::<ConversationKind>()
        .map_err(|e| conversion_error(2, e))?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(8, e))?;

    Ok(PortalRecord {
        key: PortalKey {
            chat_id: RemoteChatId(chat_id),
            receiver,
        },
        kind,
        room_id: room_id.map(RoomId),
        username: row.get(4)?,
        title: row.get(5)?,
        about: row.get(6)?,
        photo_id: row.get(7)?,
        created_at,
    })
}
