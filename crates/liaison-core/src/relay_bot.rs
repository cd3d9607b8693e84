//! The relay bot: a remote account the bridge controls.
//!
//! It relays messages of local users without a remote login and lets those
//! users stay in rooms of conversations the bot is a member of.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use liaison_shared::{ConversationKind, RemoteChatId, RemoteUserId};
use liaison_store::BotChat;

use crate::db::SharedDatabase;
use crate::error::Result;
use crate::remote::RemoteClient;

pub struct RelayBot {
    client: Arc<dyn RemoteClient>,
    chats: Mutex<HashMap<RemoteChatId, ConversationKind>>,
    db: SharedDatabase,
}

impl RelayBot {
    /// Load the bot's conversation memberships from the store.
    pub fn load(client: Arc<dyn RemoteClient>, db: SharedDatabase) -> Result<Self> {
        let chats = db
            .lock()
            .list_bot_chats()?
            .into_iter()
            .map(|chat| (chat.chat_id, chat.kind))
            .collect::<HashMap<_, _>>();

        tracing::info!(chats = chats.len(), "relay bot loaded");

        Ok(Self {
            client,
            chats: Mutex::new(chats),
            db,
        })
    }

    pub fn client(&self) -> &Arc<dyn RemoteClient> {
        &self.client
    }

    pub fn account_id(&self) -> RemoteUserId {
        self.client.account_id()
    }

    pub fn is_in_chat(&self, chat_id: RemoteChatId) -> bool {
        self.chats().contains_key(&chat_id)
    }

    pub fn add_chat(&self, chat_id: RemoteChatId, kind: ConversationKind) -> Result<()> {
        if self.chats().get(&chat_id) == Some(&kind) {
            return Ok(());
        }
        self.db.lock().add_bot_chat(&BotChat { chat_id, kind })?;
        self.chats().insert(chat_id, kind);
        tracing::debug!(chat = %chat_id, "relay bot joined chat");
        Ok(())
    }

    pub fn remove_chat(&self, chat_id: RemoteChatId) -> Result<()> {
        if self.db.lock().remove_bot_chat(chat_id)? {
            tracing::debug!(chat = %chat_id, "relay bot left chat");
        }
        self.chats().remove(&chat_id);
        Ok(())
    }

    fn chats(&self) -> MutexGuard<'_, HashMap<RemoteChatId, ConversationKind>> {
        self.chats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
