//! Lazy, exactly-once creation of a portal's local room.

use std::sync::Arc;

use liaison_shared::{ConversationKind, LocalUserId, RoomId};

use super::{Lifecycle, Portal};
use crate::bridge::Bridge;
use crate::error::{ignore_transient, BridgeError, Result};
use crate::power_levels::PowerLevels;
use crate::remote::{ChatInfo, Participant, RemoteClient};
use crate::room_api::{CreateRoomRequest, StateEvent};

/// Options for [`Portal::ensure_room`].
#[derive(Debug, Clone, Default)]
pub struct EnsureRoom {
    /// Local users to invite into the room.
    pub invites: Vec<LocalUserId>,
    /// Re-sync metadata in the background if the room already exists.
    pub refresh: bool,
    /// Metadata the caller already fetched.
    pub info: Option<ChatInfo>,
}

impl EnsureRoom {
    pub fn inviting(user: LocalUserId) -> Self {
        Self {
            invites: vec![user],
            ..Self::default()
        }
    }

    pub fn with_refresh(mut self) -> Self {
        self.refresh = true;
        self
    }
}

impl Portal {
    /// Return the portal's room, creating it first if needed.
    ///
    /// Concurrent callers wait on the portal's creation lock, so the room is
    /// created at most once. A failed attempt persists nothing and leaves
    /// the portal unbridged for a later retry.
    pub async fn ensure_room(
        self: &Arc<Self>,
        bridge: &Arc<Bridge>,
        source: &Arc<dyn RemoteClient>,
        request: EnsureRoom,
    ) -> Result<RoomId> {
        self.check_not_torn_down()?;
        if let Some(room) = self.room_id() {
            if request.refresh {
                self.schedule_refresh(bridge, source, request.info);
                self.invite_all(bridge, &room, &request.invites).await?;
            }
            return Ok(room);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(room) = self.room_id() {
            return Ok(room);
        }
        self.check_not_torn_down()?;

        self.set_lifecycle(Lifecycle::Bridging);
        match self.create_room(bridge, source, request).await {
            Ok(room) => Ok(room),
            Err(e) => {
                self.set_lifecycle(Lifecycle::Unbridged);
                tracing::warn!(portal = %self.key(), error = %e, "room creation failed");
                Err(e)
            }
        }
    }

    async fn create_room(
        self: &Arc<Self>,
        bridge: &Arc<Bridge>,
        source: &Arc<dyn RemoteClient>,
        request: EnsureRoom,
    ) -> Result<RoomId> {
        let key = self.key();
        let kind = self.kind();
        let direct = kind == ConversationKind::Direct;

        let info = match request.info {
            Some(info) => info,
            None => source.get_chat(self.peer()).await?,
        };
        let owner = self.main_user(&bridge.config);
        let participants = if direct {
            Vec::new()
        } else {
            self.fetch_participants(source).await?
        };

        let mut levels = PowerLevels::default();
        levels.apply_base(kind, &owner, info.admins_enabled, info.megagroup);
        let levels = levels
            .reconcile(kind, self.participant_targets(bridge, &participants))
            .levels;

        let (title, username, about) = match kind {
            ConversationKind::Direct => (None, None, None),
            ConversationKind::BasicGroup => (info.title.clone(), None, None),
            ConversationKind::BroadcastGroup => (
                info.title.clone(),
                info.username.clone(),
                info.about.clone(),
            ),
        };
        let alias = username
            .as_deref()
            .map(|name| bridge.config.alias_localpart(name));
        if let Some(alias) = &alias {
            ignore_transient(bridge.rooms.remove_alias(alias).await, "stale alias removal");
        }

        let create = CreateRoomRequest {
            alias_localpart: alias,
            public: username.is_some(),
            direct,
            invitees: request.invites,
            name: title.clone(),
            topic: about.clone(),
            initial_state: vec![StateEvent::power_levels(&levels)?],
        };
        tracing::debug!(portal = %key, kind = %kind, "creating room");
        let room = bridge
            .rooms
            .create_room(&owner, create)
            .await?
            .ok_or(BridgeError::CreationFailed(key))?;

        let mut record = self.to_record();
        record.room_id = Some(room.clone());
        record.title = title.clone();
        record.username = username.clone();
        record.about = about.clone();
        bridge.db.lock().save_portal(&record)?;

        self.update_state(|state| {
            state.title = title;
            state.username = username;
            state.about = about;
        });
        if self.room_id.set(room.clone()).is_err() {
            tracing::warn!(portal = %key, "room id was already set");
        }
        bridge.registry.publish_room(&room, self);
        self.set_lifecycle(Lifecycle::Bridged);
        tracing::info!(portal = %key, room = %room, "created room");

        let portal = self.clone();
        let bridge = bridge.clone();
        let source = source.clone();
        let synced_room = room.clone();
        self.tasks.spawn("post-create sync", key, async move {
            portal
                .sync_after_create(&bridge, &source, &synced_room, info, participants, levels)
                .await
        });

        Ok(room)
    }

    /// Best-effort follow-up to room creation: avatar, membership and
    /// levels of anyone the initial state did not cover.
    async fn sync_after_create(
        &self,
        bridge: &Bridge,
        source: &Arc<dyn RemoteClient>,
        room: &RoomId,
        info: ChatInfo,
        participants: Vec<Participant>,
        levels: PowerLevels,
    ) -> Result<()> {
        if self.kind() == ConversationKind::Direct {
            return Ok(());
        }

        self.update_info(bridge, source, Some(info)).await?;
        let users: Vec<_> = participants.iter().map(|p| p.user_id).collect();
        self.sync_remote_users(bridge, room, &users).await?;
        self.update_participant_levels(bridge, room, &participants, Some(levels))
            .await?;
        Ok(())
    }

    fn check_not_torn_down(&self) -> Result<()> {
        if self.lifecycle() == Lifecycle::TornDown {
            return Err(BridgeError::InvalidOperation(format!(
                "portal {} was deleted",
                self.key()
            )));
        }
        Ok(())
    }

    pub(crate) async fn invite_all(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        users: &[LocalUserId],
    ) -> Result<()> {
        let owner = self.main_user(&bridge.config);
        for user in users {
            bridge.rooms.invite(&owner, room, user).await?;
        }
        Ok(())
    }
}
