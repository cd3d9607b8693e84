use liaison_shared::{IdSpace, LocalMessageId, RemoteMessageId, RoomId};
use rusqlite::params;

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::MessageRecord;

impl Database {
    /// Record a correlation, replacing any previous one for the same key.
    pub fn put_message(&self, message: &MessageRecord) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO messages (remote_id, id_space, local_id, room_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                message.remote_id.0,
                message.space.0,
                message.local_id.0,
                message.room_id.0,
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, remote_id: RemoteMessageId, space: IdSpace) -> Result<MessageRecord> {
        self.conn()
            .query_row(
                "SELECT remote_id, id_space, local_id, room_id
                 FROM messages WHERE remote_id = ?1 AND id_space = ?2",
                params![remote_id.0, space.0],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Find the correlation of a local event within one id space.
    pub fn get_message_by_local(
        &self,
        room_id: &RoomId,
        local_id: &LocalMessageId,
        space: IdSpace,
    ) -> Result<MessageRecord> {
        self.conn()
            .query_row(
                "SELECT remote_id, id_space, local_id, room_id
                 FROM messages WHERE room_id = ?1 AND local_id = ?2 AND id_space = ?3",
                params![room_id.0, local_id.0, space.0],
                row_to_message,
            )
            .map_err(not_found)
    }

    /// Replace `old` with `new` in every correlation of the room.
    /// Returns the number of rows rewritten.
    pub fn rebind_local_id(
        &self,
        room_id: &RoomId,
        old: &LocalMessageId,
        new: &LocalMessageId,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET local_id = ?3 WHERE room_id = ?1 AND local_id = ?2",
            params![room_id.0, old.0, new.0],
        )?;
        Ok(affected)
    }

    /// Delete every correlation of the room pointing at `local_id`.
    pub fn delete_messages_by_local(
        &self,
        room_id: &RoomId,
        local_id: &LocalMessageId,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM messages WHERE room_id = ?1 AND local_id = ?2",
            params![room_id.0, local_id.0],
        )?;
        Ok(affected)
    }

    pub fn delete_messages_for_room(&self, room_id: &RoomId) -> Result<usize> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE room_id = ?1", params![room_id.0])?;
        Ok(affected)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        remote_id: RemoteMessageId(row.get(0)?),
        space: IdSpace(row.get(1)?),
        local_id: LocalMessageId(row.get(2)?),
        room_id: RoomId(row.get(3)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    fn record(remote: i64, space: i64, local: &LocalMessageId) -> MessageRecord {
        MessageRecord {
            remote_id: RemoteMessageId(remote),
            space: IdSpace(space),
            local_id: local.clone(),
            room_id: RoomId::new("!room:example.org"),
        }
    }

    #[test]
    fn put_replaces_existing_key() {
        let db = Database::open_in_memory().unwrap();
        db.put_message(&record(1, 10, &LocalMessageId::new("$a"))).unwrap();
        db.put_message(&record(1, 10, &LocalMessageId::new("$b"))).unwrap();

        let loaded = db.get_message(RemoteMessageId(1), IdSpace(10)).unwrap();
        assert_eq!(loaded.local_id, LocalMessageId::new("$b"));
        assert!(matches!(
            db.get_message(RemoteMessageId(1), IdSpace(11)),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn rebind_rewrites_every_row_with_placeholder() {
        let db = Database::open_in_memory().unwrap();
        let placeholder = LocalMessageId::placeholder();
        let room = RoomId::new("!room:example.org");
        // Same message seen by two accounts with per-account numbering.
        db.put_message(&record(1, 10, &placeholder)).unwrap();
        db.put_message(&record(7, 20, &placeholder)).unwrap();
        db.put_message(&record(2, 10, &LocalMessageId::new("$other"))).unwrap();

        let final_id = LocalMessageId::new("$final");
        assert_eq!(db.rebind_local_id(&room, &placeholder, &final_id).unwrap(), 2);

        assert_eq!(
            db.get_message(RemoteMessageId(7), IdSpace(20)).unwrap().local_id,
            final_id
        );
        assert_eq!(
            db.get_message_by_local(&room, &final_id, IdSpace(10))
                .unwrap()
                .remote_id,
            RemoteMessageId(1)
        );
    }

    #[test]
    fn delete_helpers() {
        let db = Database::open_in_memory().unwrap();
        let room = RoomId::new("!room:example.org");
        let placeholder = LocalMessageId::placeholder();
        db.put_message(&record(1, 10, &placeholder)).unwrap();
        db.put_message(&record(2, 10, &LocalMessageId::new("$kept"))).unwrap();

        assert_eq!(db.delete_messages_by_local(&room, &placeholder).unwrap(), 1);
        assert_eq!(db.delete_messages_for_room(&room).unwrap(), 1);
        assert!(db.get_message(RemoteMessageId(2), IdSpace(10)).is_err());
    }
}
