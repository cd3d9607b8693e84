//! A portal mirrors one remote conversation into one local room.
//!
//! The portal's metadata lives behind a `std::sync::RwLock` that is never
//! held across an `.await`. Whether the portal has a room is published
//! through a `OnceLock`, which is only ever set while holding the
//! per-portal creation mutex.

mod commands;
mod creation;
mod local_events;
mod metadata;
mod remote_events;


use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use liaison_shared::{
    ConversationKind, IdSpace, LocalMessageId, LocalUserId, PortalKey, RemotePeer, RemoteUserId,
    RoomId,
};
use liaison_store::PortalRecord;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::dedup::{ActionDedup, Fingerprint, Lookup, MessageDedup, MirrorRef};
use crate::error::{BridgeError, Result};
use crate::tasks::BackgroundTasks;

pub use creation::EnsureRoom;
pub use local_events::LocalSender;

/// Where a portal is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No local room yet.
    Unbridged,
    /// Room creation in progress.
    Bridging,
    Bridged,
    /// Moved to a broadcast identity, metadata still being re-applied.
    Upgraded,
    /// Deleted. Terminal.
    TornDown,
}

struct PortalState {
    key: PortalKey,
    kind: ConversationKind,
    username: Option<String>,
    title: Option<String>,
    about: Option<String>,
    photo_id: Option<String>,
    created_at: DateTime<Utc>,
    lifecycle: Lifecycle,
}

pub struct Portal {
    state: RwLock<PortalState>,
    room_id: OnceLock<RoomId>,
    create_lock: tokio::sync::Mutex<()>,
    dedup: Mutex<MessageDedup>,
    action_dedup: Mutex<ActionDedup>,
    tasks: BackgroundTasks,
}

impl Portal {
    pub fn new(key: PortalKey, kind: ConversationKind) -> Self {
        Self::from_record(PortalRecord::new(key, kind))
    }

    pub fn from_record(record: PortalRecord) -> Self {
        let room_id = OnceLock::new();
        let lifecycle = match record.room_id {
            Some(room) => {
                let _ = room_id.set(room);
                Lifecycle::Bridged
            }
            None => Lifecycle::Unbridged,
        };

        Self {
            state: RwLock::new(PortalState {
                key: record.key,
                kind: record.kind,
                username: record.username,
                title: record.title,
                about: record.about,
                photo_id: record.photo_id,
                created_at: record.created_at,
                lifecycle,
            }),
            room_id,
            create_lock: tokio::sync::Mutex::new(()),
            dedup: Mutex::new(MessageDedup::default()),
            action_dedup: Mutex::new(ActionDedup::default()),
            tasks: BackgroundTasks::default(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn key(&self) -> PortalKey {
        self.state().key
    }

    pub fn kind(&self) -> ConversationKind {
        self.state().kind
    }

    /// The remote conversation as the remote client addresses it.
    pub fn peer(&self) -> RemotePeer {
        let state = self.state();
        RemotePeer::from_parts(state.kind, state.key.chat_id)
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.room_id.get().cloned()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state().lifecycle
    }

    pub fn title(&self) -> Option<String> {
        self.state().title.clone()
    }

    pub fn username(&self) -> Option<String> {
        self.state().username.clone()
    }

    pub fn about(&self) -> Option<String> {
        self.state().about.clone()
    }

    pub fn photo_id(&self) -> Option<String> {
        self.state().photo_id.clone()
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Id space of messages seen by `account` in this conversation.
    pub fn id_space(&self, account: RemoteUserId) -> IdSpace {
        let state = self.state();
        if state.kind.has_global_id_space() {
            IdSpace(state.key.chat_id.0)
        } else {
            IdSpace(account.0)
        }
    }

    /// The local user that owns the room: the peer's puppet for direct
    /// chats, the bridge bot otherwise.
    pub fn main_user(&self, config: &BridgeConfig) -> LocalUserId {
        let state = self.state();
        match state.kind {
            ConversationKind::Direct => config.puppet_user(RemoteUserId(state.key.chat_id.0)),
            _ => config.bot_user(),
        }
    }

    /// Local user acting for a remote sender, falling back to the owner.
    pub(crate) fn intent_for(&self, config: &BridgeConfig, sender: Option<RemoteUserId>) -> LocalUserId {
        match sender {
            Some(user) => config.puppet_user(user),
            None => self.main_user(config),
        }
    }

    /// Whether the relay bot is a member of the remote conversation.
    pub fn has_bot(&self, bridge: &Bridge) -> bool {
        bridge
            .relay
            .as_ref()
            .is_some_and(|bot| bot.is_in_chat(self.key().chat_id))
    }

    pub(crate) fn require_room(&self) -> Result<RoomId> {
        self.room_id().ok_or_else(|| BridgeError::NotBridged(self.key()))
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    pub(crate) fn to_record(&self) -> PortalRecord {
        let state = self.state();
        PortalRecord {
            key: state.key,
            kind: state.kind,
            room_id: self.room_id(),
            username: state.username.clone(),
            title: state.title.clone(),
            about: state.about.clone(),
            photo_id: state.photo_id.clone(),
            created_at: state.created_at,
        }
    }

    /// Persist the current metadata.
    pub(crate) fn save(&self, bridge: &Bridge) -> Result<()> {
        let record = self.to_record();
        bridge.db.lock().save_portal(&record)?;
        Ok(())
    }

    fn update_state<F>(&self, f: F)
    where
        F: FnOnce(&mut PortalState),
    {
        f(&mut self.state.write().unwrap_or_else(PoisonError::into_inner));
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.update_state(|state| state.lifecycle = lifecycle);
    }

    fn set_identity(&self, key: PortalKey, kind: ConversationKind) {
        self.update_state(|state| {
            state.key = key;
            state.kind = kind;
        });
    }

    fn state(&self) -> RwLockReadGuard<'_, PortalState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Dedup
    // ------------------------------------------------------------------

    fn check_message(&self, fingerprint: Fingerprint, value: Option<MirrorRef>) -> Lookup<Option<MirrorRef>> {
        lock(&self.dedup).check_and_record(fingerprint, value)
    }

    /// Record an action fingerprint, returning `true` if it was already known.
    fn is_duplicate_action(&self, fingerprint: Fingerprint) -> bool {
        matches!(
            lock(&self.action_dedup).check_and_record(fingerprint, ()),
            Lookup::Duplicate(())
        )
    }

    fn rebind_dedup(&self, old: &LocalMessageId, new: &LocalMessageId) {
        lock(&self.dedup).rebind_local_id(old, new);
    }

    fn clear_dedup(&self, old: &LocalMessageId) {
        lock(&self.dedup).clear_local_id(old);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
