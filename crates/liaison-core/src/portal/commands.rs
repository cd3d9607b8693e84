//! Explicit bridge commands, kind upgrades and teardown.

use std::sync::Arc;

use liaison_shared::{ConversationKind, IdSpace, PortalKey, RemoteChatId, RemoteUserId, RoomId};

use super::{Lifecycle, Portal};
use crate::bridge::Bridge;
use crate::error::{ignore_transient, BridgeError, Result};
use crate::remote::RemoteClient;
use crate::room_api::Membership;

impl Portal {
    /// Upgrade the remote basic group to a broadcast group and follow it.
    pub async fn upgrade_remote_chat(
        self: &Arc<Self>,
        bridge: &Bridge,
        source: &Arc<dyn RemoteClient>,
    ) -> Result<()> {
        if self.kind() != ConversationKind::BasicGroup {
            return Err(BridgeError::InvalidOperation(
                "Only basic groups can be upgraded".into(),
            ));
        }

        let info = source.migrate_chat(self.key().chat_id).await?.ok_or_else(|| {
            BridgeError::InvalidOperation(
                "Upgrade may have failed: new conversation not found".into(),
            )
        })?;
        self.relocate_to_broadcast(bridge, info.peer.chat_id())?;
        self.finish_upgrade(bridge, source, Some(info)).await
    }

    /// Move the portal to the identity of the broadcast group it became.
    ///
    /// The registry entry, the stored row and (for kinds with a global id
    /// space) the message correlations move in one step. Basic groups number
    /// messages per account, so their correlations stay where they are.
    pub(crate) fn relocate_to_broadcast(
        self: &Arc<Self>,
        bridge: &Bridge,
        channel: RemoteChatId,
    ) -> Result<()> {
        let old_key = self.key();
        let old_kind = self.kind();
        if old_kind != ConversationKind::BasicGroup {
            return Err(BridgeError::InvalidOperation(format!(
                "portal {old_key} is not a basic group"
            )));
        }

        let new_key = PortalKey::group(channel);
        let new_kind = ConversationKind::BroadcastGroup;
        let id_space = old_kind
            .has_global_id_space()
            .then_some((IdSpace(old_key.chat_id.0), IdSpace(channel.0)));

        bridge.registry.relocate(self, new_key, || {
            let mut record = self.to_record();
            record.key = new_key;
            record.kind = new_kind;
            bridge.db.lock().relocate_portal(old_key, &record, id_space)?;

            self.set_identity(new_key, new_kind);
            if self.room_id().is_some() {
                self.set_lifecycle(Lifecycle::Upgraded);
            }
            Ok(())
        })?;

        tracing::info!(old = %old_key, new = %new_key, "portal upgraded");
        Ok(())
    }

    /// Set or clear the public handle of a broadcast group.
    pub async fn set_remote_username(
        &self,
        bridge: &Bridge,
        source: &Arc<dyn RemoteClient>,
        username: &str,
    ) -> Result<()> {
        if self.kind() != ConversationKind::BroadcastGroup {
            return Err(BridgeError::InvalidOperation(
                "Only broadcast groups can have a public username".into(),
            ));
        }
        let room = self.require_room()?;

        source.set_username(self.peer(), username).await?;
        let username = (!username.is_empty()).then(|| username.to_string());
        if self.update_username(bridge, &room, username).await? {
            self.save(bridge)?;
        }
        Ok(())
    }

    pub async fn invite_remote_user(
        &self,
        source: &Arc<dyn RemoteClient>,
        user: RemoteUserId,
    ) -> Result<()> {
        if self.kind() == ConversationKind::Direct {
            return Err(BridgeError::InvalidOperation(
                "You can't invite additional users to direct chats".into(),
            ));
        }
        source.invite(self.peer(), user).await?;
        Ok(())
    }

    pub async fn invite_link(&self, source: &Arc<dyn RemoteClient>) -> Result<String> {
        if self.kind() == ConversationKind::Direct {
            return Err(BridgeError::InvalidOperation(
                "You can't get invite links for direct chats".into(),
            ));
        }
        source
            .export_invite_link(self.peer())
            .await?
            .ok_or_else(|| BridgeError::InvalidOperation("Failed to get invite link".into()))
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Stop bridging: puppets leave, real users stay in the room.
    pub async fn unbridge(self: &Arc<Self>, bridge: &Bridge) -> Result<()> {
        let room = self.require_room()?;
        self.cleanup_room(bridge, &room, "Room unbridged", true).await;
        self.delete(bridge)
    }

    /// Empty the room completely and delete the portal.
    pub async fn cleanup_and_delete(self: &Arc<Self>, bridge: &Bridge) -> Result<()> {
        if let Some(room) = self.room_id() {
            self.cleanup_room(bridge, &room, "Portal deleted", false).await;
        }
        self.delete(bridge)
    }

    async fn cleanup_room(&self, bridge: &Bridge, room: &RoomId, reason: &str, puppets_only: bool) {
        let owner = self.main_user(&bridge.config);
        let members = ignore_transient(
            bridge
                .rooms
                .members(room, &[Membership::Join, Membership::Invite])
                .await,
            "member listing",
        )
        .unwrap_or_default();

        for user in members {
            if user == owner {
                continue;
            }
            if bridge.config.puppet_remote_id(&user).is_some() {
                ignore_transient(bridge.rooms.leave(&user, room).await, "puppet leave");
            } else if !puppets_only {
                ignore_transient(
                    bridge.rooms.kick(&owner, room, &user, reason).await,
                    "user kick",
                );
            }
        }
        ignore_transient(bridge.rooms.leave(&owner, room).await, "owner leave");
    }

    /// Forget the portal: stored row, correlations, registry entries and
    /// background work.
    pub(crate) fn delete(self: &Arc<Self>, bridge: &Bridge) -> Result<()> {
        let key = self.key();
        self.set_lifecycle(Lifecycle::TornDown);
        self.tasks.abort_all();

        bridge.db.lock().delete_portal(key)?;
        if let Some(room) = self.room_id() {
            bridge.index.forget_room(&room)?;
        }
        bridge.registry.remove(self);

        tracing::info!(portal = %key, "portal deleted");
        Ok(())
    }
}
