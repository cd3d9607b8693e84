//! Room metadata and membership sync from the remote side.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use liaison_shared::constants::PARTICIPANT_PAGE_SIZE;
use liaison_shared::events::{FileLocation, MediaRef};
use liaison_shared::{ConversationKind, LocalUserId, RemoteUserId, RoomId};

use super::Portal;
use crate::bridge::Bridge;
use crate::error::{ignore_transient, Result};
use crate::power_levels::{role_level, PowerLevels};
use crate::remote::{ChatInfo, Participant, ParticipantRole, RemoteClient, RemoteError};
use crate::room_api::{JoinRule, Membership};

const AVATAR_MIME: &str = "image/jpeg";

impl Portal {
    /// Run [`update_room`](Self::update_room) in the background.
    pub(crate) fn schedule_refresh(
        self: &Arc<Self>,
        bridge: &Arc<Bridge>,
        source: &Arc<dyn RemoteClient>,
        info: Option<ChatInfo>,
    ) {
        let portal = self.clone();
        let bridge = bridge.clone();
        let source = source.clone();
        self.tasks.spawn("room refresh", self.key(), async move {
            portal.update_room(&bridge, &source, info).await
        });
    }

    /// Re-sync metadata, membership and power levels of an existing room.
    pub async fn update_room(
        &self,
        bridge: &Bridge,
        source: &Arc<dyn RemoteClient>,
        info: Option<ChatInfo>,
    ) -> Result<()> {
        let room = self.require_room()?;

        if self.kind() == ConversationKind::Direct {
            let puppet = self.main_user(&bridge.config);
            bridge.rooms.join(&puppet, &room).await?;
            return Ok(());
        }

        self.update_info(bridge, source, info).await?;
        let participants = self.fetch_participants(source).await?;
        let users: Vec<_> = participants.iter().map(|p| p.user_id).collect();
        self.sync_remote_users(bridge, &room, &users).await?;
        self.update_participant_levels(bridge, &room, &participants, None)
            .await?;
        Ok(())
    }

    /// Apply title, avatar, public handle and description. Persists the
    /// portal if anything changed.
    pub async fn update_info(
        &self,
        bridge: &Bridge,
        source: &Arc<dyn RemoteClient>,
        info: Option<ChatInfo>,
    ) -> Result<bool> {
        if self.kind() == ConversationKind::Direct {
            return Ok(false);
        }
        let room = self.require_room()?;
        let info = match info {
            Some(info) => info,
            None => source.get_chat(self.peer()).await?,
        };

        let mut changed = false;
        if self.kind() == ConversationKind::BroadcastGroup {
            changed |= self.update_username(bridge, &room, info.username).await?;
            changed |= self.update_about(bridge, &room, info.about).await?;
        }
        if let Some(title) = info.title {
            changed |= self.update_title(bridge, &room, title).await?;
        }
        if let Some(photo) = info.photo {
            changed |= self.update_avatar(bridge, source, &room, photo).await?;
        }

        if changed {
            self.save(bridge)?;
            tracing::debug!(portal = %self.key(), "room info updated");
        }
        Ok(changed)
    }

    pub(crate) async fn update_username(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        username: Option<String>,
    ) -> Result<bool> {
        let current = self.username();
        if current == username {
            return Ok(false);
        }

        let owner = self.main_user(&bridge.config);
        if let Some(old) = current {
            let alias = bridge.config.alias_localpart(&old);
            ignore_transient(bridge.rooms.remove_alias(&alias).await, "old alias removal");
        }
        match &username {
            Some(name) => {
                let alias = bridge.config.alias_localpart(name);
                bridge.rooms.add_alias(room, &alias).await?;
                bridge
                    .rooms
                    .set_join_rule(&owner, room, JoinRule::Public)
                    .await?;
            }
            None => {
                bridge
                    .rooms
                    .set_join_rule(&owner, room, JoinRule::Invite)
                    .await?;
            }
        }

        self.update_state(|state| state.username = username);
        Ok(true)
    }

    async fn update_about(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        about: Option<String>,
    ) -> Result<bool> {
        if self.about() == about {
            return Ok(false);
        }
        let owner = self.main_user(&bridge.config);
        bridge
            .rooms
            .set_topic(&owner, room, about.as_deref().unwrap_or_default())
            .await?;
        self.update_state(|state| state.about = about);
        Ok(true)
    }

    pub(crate) async fn update_title(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        title: String,
    ) -> Result<bool> {
        if self.title().as_deref() == Some(title.as_str()) {
            return Ok(false);
        }
        let owner = self.main_user(&bridge.config);
        bridge.rooms.set_name(&owner, room, &title).await?;
        self.update_state(|state| state.title = Some(title));
        Ok(true)
    }

    pub(crate) async fn update_avatar(
        &self,
        bridge: &Bridge,
        source: &Arc<dyn RemoteClient>,
        room: &RoomId,
        location: FileLocation,
    ) -> Result<bool> {
        let photo_id = location.photo_id();
        if self.photo_id().as_deref() == Some(photo_id.as_str()) {
            return Ok(false);
        }

        let owner = self.main_user(&bridge.config);
        let data = source.download(MediaRef::Location(location)).await?;
        let url = bridge.rooms.upload(&owner, data, AVATAR_MIME).await?;
        bridge.rooms.set_avatar(&owner, room, &url).await?;
        self.update_state(|state| state.photo_id = Some(photo_id));
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Current remote participants. Broadcast conversations are fetched
    /// page by page; lacking admin rights there yields an empty list.
    pub(crate) async fn fetch_participants(
        &self,
        source: &Arc<dyn RemoteClient>,
    ) -> Result<Vec<Participant>> {
        let chat = self.key().chat_id;
        match self.kind() {
            ConversationKind::Direct => Ok(vec![Participant {
                user_id: RemoteUserId(chat.0),
                role: ParticipantRole::Member,
            }]),
            ConversationKind::BasicGroup => Ok(source.get_chat_participants(chat).await?),
            ConversationKind::BroadcastGroup => {
                let mut all = Vec::new();
                loop {
                    let page = match source
                        .get_channel_participants(chat, all.len(), PARTICIPANT_PAGE_SIZE)
                        .await
                    {
                        Ok(page) => page,
                        Err(RemoteError::AdminRequired) => {
                            tracing::debug!(portal = %self.key(), "participant list requires admin");
                            return Ok(Vec::new());
                        }
                        Err(e) => return Err(e.into()),
                    };
                    let last_page = page.len() < PARTICIPANT_PAGE_SIZE;
                    all.extend(page);
                    if last_page {
                        return Ok(all);
                    }
                }
            }
        }
    }

    /// Target level of every local identity of the participants: the
    /// puppet, plus the logged-in account if there is one.
    pub(crate) fn participant_targets(
        &self,
        bridge: &Bridge,
        participants: &[Participant],
    ) -> Vec<(LocalUserId, i64)> {
        let kind = self.kind();
        let mut targets = Vec::with_capacity(participants.len());
        for participant in participants {
            let level = role_level(participant.role, kind);
            targets.push((bridge.config.puppet_user(participant.user_id), level));
            if let Some(account) = bridge.directory.account_for_remote(participant.user_id) {
                targets.push((account, level));
            }
        }
        targets
    }

    /// Join the puppets of `participants` and kick puppets and accounts of
    /// users that are no longer in the remote conversation.
    pub async fn sync_remote_users(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        participants: &[RemoteUserId],
    ) -> Result<()> {
        let chat = self.key().chat_id;
        let bot_account = bridge.relay.as_ref().map(|bot| bot.account_id());
        let allowed: HashSet<RemoteUserId> = participants.iter().copied().collect();

        if let Some(bot) = &bridge.relay {
            if bot_account.is_some_and(|account| allowed.contains(&account)) {
                bot.add_chat(chat, self.kind())?;
            }
        }
        let puppets: Vec<_> = participants
            .iter()
            .map(|&user| bridge.config.puppet_user(user))
            .collect();
        try_join_all(puppets.iter().map(|puppet| bridge.rooms.join(puppet, room))).await?;

        let owner = self.main_user(&bridge.config);
        let bot_user = bridge.config.bot_user();
        let has_bot = self.has_bot(bridge);
        let members = bridge.rooms.members(room, &[Membership::Join]).await?;

        for member in members {
            if member == bot_user || member == owner {
                continue;
            }
            if let Some(puppet_of) = bridge.config.puppet_remote_id(&member) {
                if !allowed.contains(&puppet_of) {
                    if Some(puppet_of) == bot_account {
                        if let Some(bot) = &bridge.relay {
                            bot.remove_chat(chat)?;
                        }
                    }
                    ignore_transient(
                        bridge
                            .rooms
                            .kick(&owner, room, &member, "User had left this chat.")
                            .await,
                        "departed puppet kick",
                    );
                }
                continue;
            }
            let Some(account) = bridge.directory.remote_for_account(&member) else {
                continue;
            };
            if !has_bot && !allowed.contains(&account) {
                ignore_transient(
                    bridge
                        .rooms
                        .kick(&owner, room, &member, "You had left this chat.")
                        .await,
                    "departed user kick",
                );
            }
        }
        Ok(())
    }

    /// Reconcile room power levels with remote roles, writing only if
    /// something changed. `levels` skips fetching the current map.
    pub async fn update_participant_levels(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        participants: &[Participant],
        levels: Option<PowerLevels>,
    ) -> Result<bool> {
        let current = match levels {
            Some(levels) => levels,
            None => bridge.rooms.power_levels(room).await?,
        };
        let reconciled = current.reconcile(self.kind(), self.participant_targets(bridge, participants));
        if !reconciled.changed {
            return Ok(false);
        }

        let owner = self.main_user(&bridge.config);
        bridge
            .rooms
            .set_power_levels(&owner, room, &reconciled.levels)
            .await?;
        tracing::debug!(
            portal = %self.key(),
            changes = reconciled.diff.len(),
            "power levels reconciled"
        );
        Ok(true)
    }

    /// Mirror the remote "only admins may edit" toggle.
    pub async fn set_admins_enabled(&self, bridge: &Bridge, room: &RoomId, enabled: bool) -> Result<()> {
        let mut levels = bridge.rooms.power_levels(room).await?;
        if levels.set_admins_enabled(enabled) {
            let owner = self.main_user(&bridge.config);
            bridge.rooms.set_power_levels(&owner, room, &levels).await?;
        }
        Ok(())
    }

    pub(crate) async fn add_remote_user(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        user: RemoteUserId,
    ) -> Result<()> {
        if let Some(bot) = &bridge.relay {
            if bot.account_id() == user {
                bot.add_chat(self.key().chat_id, self.kind())?;
            }
        }

        bridge
            .rooms
            .join(&bridge.config.puppet_user(user), room)
            .await?;

        if let Some(account) = bridge.directory.account_for_remote(user) {
            let owner = self.main_user(&bridge.config);
            bridge.rooms.invite(&owner, room, &account).await?;
        }
        Ok(())
    }

    /// Mirror a participant leaving or being kicked by `remover`.
    pub(crate) async fn remove_remote_user(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        user: RemoteUserId,
        remover: RemoteUserId,
    ) -> Result<()> {
        let owner = self.main_user(&bridge.config);
        let puppet = bridge.config.puppet_user(user);
        let kicked = remover != user;
        let reason = if kicked {
            let name = bridge
                .directory
                .remote_display_name(remover)
                .unwrap_or_else(|| remover.to_string());
            format!("Kicked by {name}")
        } else {
            "Left the chat".to_string()
        };

        if kicked {
            bridge.rooms.kick(&owner, room, &puppet, &reason).await?;
        } else {
            bridge.rooms.leave(&puppet, room).await?;
        }

        if let Some(bot) = &bridge.relay {
            if bot.account_id() == user {
                bot.remove_chat(self.key().chat_id)?;
            }
        }

        if let Some(account) = bridge.directory.account_for_remote(user) {
            ignore_transient(
                bridge.rooms.kick(&owner, room, &account, &reason).await,
                "logged-in user kick",
            );
        }
        Ok(())
    }
}
