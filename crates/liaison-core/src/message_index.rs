//! Durable correlation between remote messages and their local mirrors.
//!
//! Rows are written before a mirrored send completes, holding a placeholder
//! local id. Edits, deletions and pins that resolve to a placeholder are
//! parked in a per-message queue and handed back by [`MessageIndex::rebind`]
//! once the real id is known. Queueing and rebinding share one lock, so an
//! operation can never slip between the two.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use liaison_shared::events::RemoteMessage;
use liaison_shared::{IdSpace, LocalMessageId, RemoteMessageId, RoomId};
use liaison_store::MessageRecord;

use crate::db::SharedDatabase;
use crate::error::{Result, StoreResultExt};

/// A remote edit waiting for its target's real local id.
#[derive(Debug, Clone)]
pub struct QueuedEdit {
    pub edit: RemoteMessage,
    pub space: IdSpace,
    /// Placeholder the edit's own mirror is tracked under in the dedup cache.
    pub placeholder: LocalMessageId,
}

/// A remote operation parked behind an in-flight message.
#[derive(Debug, Clone)]
pub enum PendingOp {
    Edit(QueuedEdit),
    /// The message was deleted remotely.
    Delete,
    /// The message became the room's pinned message.
    Pin,
}

impl PendingOp {
    fn is_pin(&self) -> bool {
        matches!(self, PendingOp::Pin)
    }
}

/// Outcome of [`MessageIndex::resolve_or_queue`].
#[derive(Debug)]
pub enum Resolution {
    /// The target has a final local id.
    Ready(MessageRecord),
    /// The target is still in flight; the operation will be returned by
    /// `rebind`.
    Queued,
    /// No correlation is known.
    Missing,
}

type PendingKey = (RoomId, LocalMessageId);

pub struct MessageIndex {
    db: SharedDatabase,
    pending: Mutex<HashMap<PendingKey, Vec<PendingOp>>>,
}

impl MessageIndex {
    pub fn new(db: SharedDatabase) -> Self {
        Self {
            db,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn put(
        &self,
        remote_id: RemoteMessageId,
        space: IdSpace,
        local_id: &LocalMessageId,
        room_id: &RoomId,
    ) -> Result<()> {
        self.db.lock().put_message(&MessageRecord {
            remote_id,
            space,
            local_id: local_id.clone(),
            room_id: room_id.clone(),
        })?;
        Ok(())
    }

    pub fn get(&self, remote_id: RemoteMessageId, space: IdSpace) -> Result<Option<MessageRecord>> {
        self.db.lock().get_message(remote_id, space).optional()
    }

    pub fn get_by_local(
        &self,
        room_id: &RoomId,
        local_id: &LocalMessageId,
        space: IdSpace,
    ) -> Result<Option<MessageRecord>> {
        self.db
            .lock()
            .get_message_by_local(room_id, local_id, space)
            .optional()
    }

    /// Look up the target of `op`, parking it if the target is still a
    /// placeholder.
    ///
    /// A room has at most one parked pin: queueing a pin replaces any
    /// earlier one.
    pub fn resolve_or_queue(
        &self,
        remote_id: RemoteMessageId,
        space: IdSpace,
        op: PendingOp,
    ) -> Result<Resolution> {
        let mut pending = self.pending();
        let record = self.db.lock().get_message(remote_id, space).optional()?;

        match record {
            None => Ok(Resolution::Missing),
            Some(record) if record.local_id.is_placeholder() => {
                tracing::debug!(
                    %remote_id,
                    placeholder = %record.local_id,
                    ?op,
                    "queueing operation behind in-flight message"
                );
                if op.is_pin() {
                    drop_pins(&mut pending, &record.room_id);
                }
                pending
                    .entry((record.room_id, record.local_id))
                    .or_default()
                    .push(op);
                Ok(Resolution::Queued)
            }
            Some(record) => Ok(Resolution::Ready(record)),
        }
    }

    /// Forget parked pins of the room, which a newer pin state supersedes.
    pub fn drop_pending_pins(&self, room_id: &RoomId) {
        drop_pins(&mut self.pending(), room_id);
    }

    /// Replace a placeholder with the final local id in every row of the
    /// room, returning the operations that were waiting for it in arrival
    /// order.
    pub fn rebind(
        &self,
        room_id: &RoomId,
        placeholder: &LocalMessageId,
        final_id: &LocalMessageId,
    ) -> Result<Vec<PendingOp>> {
        let mut pending = self.pending();
        let rows = self
            .db
            .lock()
            .rebind_local_id(room_id, placeholder, final_id)?;
        let queued = pending
            .remove(&(room_id.clone(), placeholder.clone()))
            .unwrap_or_default();

        tracing::debug!(
            room = %room_id,
            local_id = %final_id,
            rows,
            queued = queued.len(),
            "rebound placeholder"
        );
        Ok(queued)
    }

    /// Drop the rows and queued operations of a send that produced no local
    /// event.
    pub fn discard(&self, room_id: &RoomId, placeholder: &LocalMessageId) -> Result<usize> {
        let mut pending = self.pending();
        self.db.lock().delete_messages_by_local(room_id, placeholder)?;
        let dropped = pending
            .remove(&(room_id.clone(), placeholder.clone()))
            .map_or(0, |ops| ops.len());
        Ok(dropped)
    }

    /// Delete every correlation of a torn-down room.
    pub fn forget_room(&self, room_id: &RoomId) -> Result<usize> {
        let mut pending = self.pending();
        pending.retain(|(room, _), _| room != room_id);
        let rows = self.db.lock().delete_messages_for_room(room_id)?;
        Ok(rows)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<PendingKey, Vec<PendingOp>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn drop_pins(pending: &mut HashMap<PendingKey, Vec<PendingOp>>, room_id: &RoomId) {
    pending
        .iter_mut()
        .filter(|((room, _), _)| room == room_id)
        .for_each(|(_, ops)| ops.retain(|op| !op.is_pin()));
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use liaison_store::Database;

    use super::*;

    fn index() -> MessageIndex {
        MessageIndex::new(SharedDatabase::new(Database::open_in_memory().unwrap()))
    }

    fn edit(id: i64, space: IdSpace) -> PendingOp {
        PendingOp::Edit(QueuedEdit {
            edit: RemoteMessage {
                id: RemoteMessageId(id),
                date: Utc::now(),
                sender: None,
                text: "edited".into(),
                html: None,
                forward: None,
                media: None,
                reply_to: None,
            },
            space,
            placeholder: LocalMessageId::placeholder(),
        })
    }

    #[test]
    fn test_edit_behind_placeholder_is_returned_by_rebind() {
        let index = index();
        let room = RoomId::new("!room:localhost");
        let space = IdSpace(7);
        let placeholder = LocalMessageId::placeholder();
        index.put(RemoteMessageId(1), space, &placeholder, &room).unwrap();

        assert!(matches!(
            index
                .resolve_or_queue(RemoteMessageId(1), space, edit(1, space))
                .unwrap(),
            Resolution::Queued
        ));

        let real = LocalMessageId::new("$real");
        let queued = index.rebind(&room, &placeholder, &real).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(index.get(RemoteMessageId(1), space).unwrap().unwrap().local_id, real);

        match index
            .resolve_or_queue(RemoteMessageId(1), space, edit(1, space))
            .unwrap()
        {
            Resolution::Ready(record) => assert_eq!(record.local_id, real),
            other => panic!("expected ready record, got {other:?}"),
        }
        // Nothing is left behind for a second rebind.
        assert!(index.rebind(&room, &placeholder, &real).unwrap().is_empty());
    }

    #[test]
    fn test_operations_replay_in_arrival_order() {
        let index = index();
        let room = RoomId::new("!room:localhost");
        let space = IdSpace(7);
        let placeholder = LocalMessageId::placeholder();
        index.put(RemoteMessageId(1), space, &placeholder, &room).unwrap();

        for op in [edit(1, space), PendingOp::Pin, PendingOp::Delete] {
            assert!(matches!(
                index.resolve_or_queue(RemoteMessageId(1), space, op).unwrap(),
                Resolution::Queued
            ));
        }

        let queued = index
            .rebind(&room, &placeholder, &LocalMessageId::new("$real"))
            .unwrap();
        assert!(matches!(
            queued.as_slice(),
            [PendingOp::Edit(_), PendingOp::Pin, PendingOp::Delete]
        ));
    }

    #[test]
    fn test_newer_pin_supersedes_parked_pin() {
        let index = index();
        let room = RoomId::new("!room:localhost");
        let space = IdSpace(7);
        let first = LocalMessageId::placeholder();
        let second = LocalMessageId::placeholder();
        index.put(RemoteMessageId(1), space, &first, &room).unwrap();
        index.put(RemoteMessageId(2), space, &second, &room).unwrap();

        index
            .resolve_or_queue(RemoteMessageId(1), space, PendingOp::Pin)
            .unwrap();
        index
            .resolve_or_queue(RemoteMessageId(1), space, PendingOp::Delete)
            .unwrap();
        index
            .resolve_or_queue(RemoteMessageId(2), space, PendingOp::Pin)
            .unwrap();

        let first_ops = index
            .rebind(&room, &first, &LocalMessageId::new("$first"))
            .unwrap();
        assert!(matches!(first_ops.as_slice(), [PendingOp::Delete]));

        index.drop_pending_pins(&room);
        assert!(index
            .rebind(&room, &second, &LocalMessageId::new("$second"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_unknown_target_is_missing() {
        let index = index();
        assert!(matches!(
            index
                .resolve_or_queue(RemoteMessageId(3), IdSpace(1), PendingOp::Delete)
                .unwrap(),
            Resolution::Missing
        ));
    }

    #[test]
    fn test_discard_drops_rows_and_queue() {
        let index = index();
        let room = RoomId::new("!room:localhost");
        let placeholder = LocalMessageId::placeholder();
        index.put(RemoteMessageId(1), IdSpace(1), &placeholder, &room).unwrap();
        index.put(RemoteMessageId(8), IdSpace(2), &placeholder, &room).unwrap();
        index
            .resolve_or_queue(RemoteMessageId(1), IdSpace(1), edit(1, IdSpace(1)))
            .unwrap();
        index
            .resolve_or_queue(RemoteMessageId(8), IdSpace(2), PendingOp::Delete)
            .unwrap();

        assert_eq!(index.discard(&room, &placeholder).unwrap(), 2);
        assert!(index.get(RemoteMessageId(1), IdSpace(1)).unwrap().is_none());
        assert!(index.get(RemoteMessageId(8), IdSpace(2)).unwrap().is_none());
    }

    #[test]
    fn test_local_lookup_and_forget_room() {
        let index = index();
        let room = RoomId::new("!room:localhost");
        let local = LocalMessageId::new("$abc");
        index.put(RemoteMessageId(4), IdSpace(9), &local, &room).unwrap();

        let record = index.get_by_local(&room, &local, IdSpace(9)).unwrap().unwrap();
        assert_eq!(record.remote_id, RemoteMessageId(4));
        assert!(index.get_by_local(&room, &local, IdSpace(1)).unwrap().is_none());

        assert_eq!(index.forget_room(&room).unwrap(), 1);
        assert!(index.get(RemoteMessageId(4), IdSpace(9)).unwrap().is_none());
    }
}
