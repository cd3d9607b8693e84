//! CRUD operations for [`BotChat`] rows.

use liaison_shared::{ConversationKind, RemoteChatId};
use rusqlite::params;

use crate::database::Database;
use crate::error::{conversion_error, Result};
use crate::models::BotChat;

impl Database {
    pub fn add_bot_chat(&self, chat: &BotChat) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO bot_chats (chat_id, kind) VALUES (?1, ?2)",
            params![chat.chat_id.0, chat.kind.as_str()],
        )?;
        Ok(())
    }

    /// Returns `true` if a row was deleted.
    pub fn remove_bot_chat(&self, chat_id: RemoteChatId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM bot_chats WHERE chat_id = ?1", params![chat_id.0])?;
        Ok(affected > 0)
    }

    pub fn list_bot_chats(&self) -> Result<Vec<BotChat>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT chat_id, kind FROM bot_chats ORDER BY chat_id ASC")?;

        let rows = stmt.query_map([], |row| {
            let chat_id: i64 = row.get(0)?;
            let kind_str: String = row.get(1)?;
            let kind = kind_str
                .parse::<ConversationKind>()
                .map_err(|e| conversion_error(1, e))?;
            Ok(BotChat {
                chat_id: RemoteChatId(chat_id),
                kind,
            })
        })?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_list_remove() {
        let db = Database::open_in_memory().unwrap();
        let chat = BotChat {
            chat_id: RemoteChatId(42),
            kind: ConversationKind::BroadcastGroup,
        };
        db.add_bot_chat(&chat).unwrap();
        db.add_bot_chat(&chat).unwrap();

        assert_eq!(db.list_bot_chats().unwrap(), vec![chat]);
        assert!(db.remove_bot_chat(RemoteChatId(42)).unwrap());
        assert!(!db.remove_bot_chat(RemoteChatId(42)).unwrap());
        assert!(db.list_bot_chats().unwrap().is_empty());
    }
}
