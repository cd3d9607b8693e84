//! Remote → local event handling.

use std::sync::Arc;

use liaison_shared::events::{
    DocumentAttribute, GeoPoint, MediaKind, MediaRef, RemoteAction, RemoteDocument, RemoteEvent,
    RemoteMedia, RemoteMessage, RemotePhoto, ServiceAction,
};
use liaison_shared::{
    ConversationKind, IdSpace, LocalMessageId, LocalUserId, RemoteMessageId, RemoteUserId, RoomId,
};

use super::{EnsureRoom, Lifecycle, Portal};
use crate::bridge::Bridge;
use crate::dedup::{action_fingerprint, edit_fingerprint, message_fingerprint, Lookup, MirrorRef};
use crate::error::{ignore_transient, Result};
use crate::message_index::{PendingOp, QueuedEdit, Resolution};
use crate::remote::{ChatInfo, RemoteClient};
use crate::room_api::{MediaInfo, OutgoingContent, OutgoingMessage, Thumbnail};

const PHOTO_MIME: &str = "image/jpeg";
const FALLBACK_MIME: &str = "application/octet-stream";

impl Portal {
    pub async fn handle_remote_event(
        self: &Arc<Self>,
        bridge: &Arc<Bridge>,
        source: &Arc<dyn RemoteClient>,
        event: RemoteEvent,
    ) -> Result<()> {
        match event {
            RemoteEvent::Message(message) => self.handle_remote_message(bridge, source, message).await,
            RemoteEvent::Edit(edit) => self.handle_remote_edit(bridge, source, edit).await,
            RemoteEvent::Action(action) => self.handle_remote_action(bridge, source, action).await,
            RemoteEvent::Deleted(ids) => self.handle_remote_deletion(bridge, source, &ids).await,
            RemoteEvent::Pinned(id) => self.handle_remote_pin(bridge, source, id).await,
            RemoteEvent::Typing(user) => self.handle_remote_typing(bridge, user).await,
        }
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Mirror a new remote message, creating the room if needed.
    ///
    /// The correlation row is written under a placeholder before sending, so
    /// edits, deletions and pins arriving while the send is in flight find it
    /// and queue up. They are replayed against the final id once it is known.
    pub async fn handle_remote_message(
        self: &Arc<Self>,
        bridge: &Arc<Bridge>,
        source: &Arc<dyn RemoteClient>,
        message: RemoteMessage,
    ) -> Result<()> {
        let room = match self.room_id() {
            Some(room) => room,
            None => {
                self.ensure_room(bridge, source, EnsureRoom::inviting(source.local_user()))
                    .await?
            }
        };
        let space = self.id_space(source.account_id());
        let placeholder = LocalMessageId::placeholder();
        let fingerprint = message_fingerprint(&message, self.kind().has_global_id_space());

        let mirror = MirrorRef {
            local_id: placeholder.clone(),
            space,
        };
        let lookup = self.check_message(fingerprint, Some(mirror));
        if !self.absorb_echo(bridge, &room, message.id, space, lookup)? {
            return Ok(());
        }

        bridge.index.put(message.id, space, &placeholder, &room)?;

        let intent = self.intent_for(&bridge.config, message.sender);
        let local_id = match self
            .mirror_content(bridge, source, &room, &intent, &message, space)
            .await
        {
            Ok(Some(local_id)) => local_id,
            Ok(None) => {
                self.discard_placeholder(bridge, &room, &placeholder)?;
                return Ok(());
            }
            Err(e) => {
                if let Err(discard) = self.discard_placeholder(bridge, &room, &placeholder) {
                    tracing::warn!(error = %discard, "failed to discard placeholder");
                }
                return Err(e);
            }
        };

        let queued = bridge.index.rebind(&room, &placeholder, &local_id)?;
        self.rebind_dedup(&placeholder, &local_id);
        tracing::debug!(
            portal = %self.key(),
            remote_id = %message.id,
            local_id = %local_id,
            "mirrored remote message"
        );

        self.replay_pending(bridge, &room, &local_id, queued).await
    }

    async fn replay_pending(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        local_id: &LocalMessageId,
        queued: Vec<PendingOp>,
    ) -> Result<()> {
        let owner = self.main_user(&bridge.config);
        for op in queued {
            match op {
                PendingOp::Edit(edit) => match bridge.index.get(edit.edit.id, edit.space)? {
                    Some(target) => self.mirror_edit(bridge, room, edit, target.local_id).await?,
                    None => self.clear_dedup(&edit.placeholder),
                },
                PendingOp::Delete => bridge.rooms.redact(&owner, room, local_id).await?,
                PendingOp::Pin => {
                    bridge
                        .rooms
                        .set_pinned(&owner, room, vec![local_id.clone()])
                        .await?
                }
            }
        }
        Ok(())
    }

    /// Mirror an edit as a reply to the edited message.
    pub async fn handle_remote_edit(
        self: &Arc<Self>,
        bridge: &Arc<Bridge>,
        source: &Arc<dyn RemoteClient>,
        edit: RemoteMessage,
    ) -> Result<()> {
        if !bridge.config.edits_as_replies {
            tracing::debug!(remote_id = %edit.id, "ignoring edit");
            return Ok(());
        }
        let Some(room) = self.room_id() else {
            return Ok(());
        };
        let space = self.id_space(source.account_id());
        let placeholder = LocalMessageId::placeholder();

        let mirror = MirrorRef {
            local_id: placeholder.clone(),
            space,
        };
        let lookup = self.check_message(edit_fingerprint(&edit), Some(mirror));
        if !self.absorb_echo(bridge, &room, edit.id, space, lookup)? {
            return Ok(());
        }

        let queued = QueuedEdit {
            edit,
            space,
            placeholder,
        };
        let placeholder = queued.placeholder.clone();
        let op = PendingOp::Edit(queued.clone());
        match bridge.index.resolve_or_queue(queued.edit.id, space, op)? {
            Resolution::Ready(target) => {
                self.mirror_edit(bridge, &room, queued, target.local_id).await
            }
            Resolution::Queued => Ok(()),
            Resolution::Missing => {
                tracing::debug!(remote_id = %queued.edit.id, "edited message is not bridged");
                self.clear_dedup(&placeholder);
                Ok(())
            }
        }
    }

    async fn mirror_edit(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        queued: QueuedEdit,
        target: LocalMessageId,
    ) -> Result<()> {
        let QueuedEdit {
            edit,
            space,
            placeholder,
        } = queued;
        let intent = self.intent_for(&bridge.config, edit.sender);
        let content = OutgoingContent::Text {
            body: format!("Edit: {}", edit.text),
            html: edit.html.as_ref().map(|html| format!("<u>Edit:</u> {html}")),
        };

        ignore_transient(bridge.rooms.set_typing(&intent, room, false).await, "typing reset");
        let sent = bridge
            .rooms
            .send_message(
                &intent,
                room,
                OutgoingMessage {
                    content,
                    reply_to: Some(target),
                },
            )
            .await;
        let local_id = match sent {
            Ok(local_id) => local_id,
            Err(e) => {
                self.clear_dedup(&placeholder);
                return Err(e.into());
            }
        };

        bridge.index.put(edit.id, space, &local_id, room)?;
        self.rebind_dedup(&placeholder, &local_id);
        Ok(())
    }

    /// Decide what to do with a dedup lookup. Returns `true` if the event is
    /// new and should be mirrored.
    ///
    /// A duplicate seen through another account's id space is correlated to
    /// the existing mirror instead.
    fn absorb_echo(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        remote_id: RemoteMessageId,
        space: IdSpace,
        lookup: Lookup<Option<MirrorRef>>,
    ) -> Result<bool> {
        match lookup {
            Lookup::Fresh => Ok(true),
            Lookup::Duplicate(Some(mirror)) if mirror.space != space => {
                bridge.index.put(remote_id, space, &mirror.local_id, room)?;
                tracing::debug!(remote_id = %remote_id, space = %space, "correlated duplicate");
                Ok(false)
            }
            Lookup::Duplicate(_) => {
                tracing::debug!(remote_id = %remote_id, "ignoring duplicate message");
                Ok(false)
            }
        }
    }

    fn discard_placeholder(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        placeholder: &LocalMessageId,
    ) -> Result<()> {
        let dropped = bridge.index.discard(room, placeholder)?;
        self.clear_dedup(placeholder);
        if dropped > 0 {
            tracing::debug!(dropped, "dropped queued operations of unsent message");
        }
        Ok(())
    }

    async fn mirror_content(
        &self,
        bridge: &Bridge,
        source: &Arc<dyn RemoteClient>,
        room: &RoomId,
        intent: &LocalUserId,
        message: &RemoteMessage,
        space: IdSpace,
    ) -> Result<Option<LocalMessageId>> {
        let reply_to = match message.reply_to {
            Some(id) => bridge
                .index
                .get(id, space)?
                .map(|record| record.local_id)
                .filter(|local_id| !local_id.is_placeholder()),
            None => None,
        };

        let content = match &message.media {
            None if message.text.is_empty() => {
                tracing::debug!(remote_id = %message.id, "skipping empty message");
                return Ok(None);
            }
            None => OutgoingContent::Text {
                body: message.text.clone(),
                html: message.html.clone(),
            },
            Some(RemoteMedia::Photo(photo)) => {
                match self.photo_content(bridge, source, intent, message, photo).await? {
                    Some(content) => content,
                    None => return Ok(None),
                }
            }
            Some(RemoteMedia::Document(document)) => {
                self.document_content(bridge, source, intent, message, document)
                    .await?
            }
            Some(RemoteMedia::Geo(point)) => location_content(point),
            Some(RemoteMedia::Contact { .. }) | Some(RemoteMedia::Unsupported(_)) => {
                tracing::debug!(remote_id = %message.id, "skipping unsupported media");
                return Ok(None);
            }
        };

        ignore_transient(bridge.rooms.set_typing(intent, room, false).await, "typing reset");
        let local_id = bridge
            .rooms
            .send_message(intent, room, OutgoingMessage { content, reply_to })
            .await?;
        Ok(Some(local_id))
    }

    async fn photo_content(
        &self,
        bridge: &Bridge,
        source: &Arc<dyn RemoteClient>,
        intent: &LocalUserId,
        message: &RemoteMessage,
        photo: &RemotePhoto,
    ) -> Result<Option<OutgoingContent>> {
        let Some(largest) = photo.largest() else {
            tracing::debug!(photo = photo.id, "photo has no sizes");
            return Ok(None);
        };
        let data = source.download(MediaRef::Location(largest.location)).await?;
        let url = bridge.rooms.upload(intent, data, PHOTO_MIME).await?;

        Ok(Some(OutgoingContent::Image {
            url,
            caption: message.text.clone(),
            info: MediaInfo {
                mime: PHOTO_MIME.to_string(),
                size: Some(largest.size),
                width: Some(largest.width),
                height: Some(largest.height),
                thumbnail: None,
            },
        }))
    }

    async fn document_content(
        &self,
        bridge: &Bridge,
        source: &Arc<dyn RemoteClient>,
        intent: &LocalUserId,
        message: &RemoteMessage,
        document: &RemoteDocument,
    ) -> Result<OutgoingContent> {
        let mime = document
            .mime_type
            .clone()
            .unwrap_or_else(|| FALLBACK_MIME.to_string());
        let data = source.download(MediaRef::Document(document.id)).await?;
        let url = bridge.rooms.upload(intent, data, &mime).await?;

        let mut name = message.text.clone();
        let mut info = MediaInfo {
            mime: mime.clone(),
            size: Some(document.size),
            ..MediaInfo::default()
        };
        for attribute in &document.attributes {
            match attribute {
                DocumentAttribute::Filename(file_name) if name.is_empty() => {
                    name = file_name.clone();
                }
                DocumentAttribute::Filename(_) => {}
                DocumentAttribute::Sticker { alt } => name = format!("Sticker for {alt}"),
                DocumentAttribute::Video { width, height }
                | DocumentAttribute::ImageSize { width, height } => {
                    info.width = Some(*width);
                    info.height = Some(*height);
                }
            }
        }

        if let Some(thumb) = &document.thumb {
            let data = source.download(MediaRef::Location(thumb.location)).await?;
            let thumb_url = bridge.rooms.upload(intent, data, PHOTO_MIME).await?;
            info.thumbnail = Some(Thumbnail {
                url: thumb_url,
                mime: PHOTO_MIME.to_string(),
                width: thumb.width,
                height: thumb.height,
                size: thumb.size,
            });
        }

        Ok(OutgoingContent::File {
            kind: MediaKind::from_mime(&mime),
            url,
            name,
            info,
        })
    }

    // ------------------------------------------------------------------
    // Deletions, pins, typing
    // ------------------------------------------------------------------

    pub async fn handle_remote_deletion(
        &self,
        bridge: &Bridge,
        source: &Arc<dyn RemoteClient>,
        ids: &[RemoteMessageId],
    ) -> Result<()> {
        let Some(room) = self.room_id() else {
            return Ok(());
        };
        let space = self.id_space(source.account_id());
        let owner = self.main_user(&bridge.config);

        for &id in ids {
            match bridge.index.resolve_or_queue(id, space, PendingOp::Delete)? {
                Resolution::Ready(record) => {
                    bridge.rooms.redact(&owner, &room, &record.local_id).await?
                }
                Resolution::Queued => {}
                Resolution::Missing => {
                    tracing::debug!(remote_id = %id, "deleted message is not bridged");
                }
            }
        }
        Ok(())
    }

    pub async fn handle_remote_pin(
        &self,
        bridge: &Bridge,
        source: &Arc<dyn RemoteClient>,
        id: Option<RemoteMessageId>,
    ) -> Result<()> {
        let Some(room) = self.room_id() else {
            return Ok(());
        };
        let pinned = match id {
            None => Vec::new(),
            Some(id) => {
                let space = self.id_space(source.account_id());
                match bridge.index.resolve_or_queue(id, space, PendingOp::Pin)? {
                    Resolution::Ready(record) => vec![record.local_id],
                    Resolution::Queued => return Ok(()),
                    Resolution::Missing => {
                        tracing::debug!(remote_id = %id, "pinned message is not bridged");
                        Vec::new()
                    }
                }
            }
        };
        bridge.index.drop_pending_pins(&room);

        let owner = self.main_user(&bridge.config);
        bridge.rooms.set_pinned(&owner, &room, pinned).await?;
        Ok(())
    }

    pub async fn handle_remote_typing(&self, bridge: &Bridge, user: RemoteUserId) -> Result<()> {
        let Some(room) = self.room_id() else {
            return Ok(());
        };
        let puppet = bridge.config.puppet_user(user);
        bridge.rooms.set_typing(&puppet, &room, true).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Service actions
    // ------------------------------------------------------------------

    pub async fn handle_remote_action(
        self: &Arc<Self>,
        bridge: &Arc<Bridge>,
        source: &Arc<dyn RemoteClient>,
        action: RemoteAction,
    ) -> Result<()> {
        let room = match self.room_id() {
            Some(room) => room,
            None => {
                if !self.create_room_on_action(bridge, source, &action.action).await? {
                    return Ok(());
                }
                self.require_room()?
            }
        };

        let fingerprint = action_fingerprint(&action, self.kind().has_global_id_space());
        if self.is_duplicate_action(fingerprint) {
            tracing::debug!(action = action.action.kind(), "ignoring duplicate action");
            return Ok(());
        }

        match action.action {
            ServiceAction::TitleChanged { title } => {
                if self.update_title(bridge, &room, title).await? {
                    self.save(bridge)?;
                }
            }
            ServiceAction::PhotoChanged { photo } => {
                if let Some(largest) = photo.largest() {
                    if self
                        .update_avatar(bridge, source, &room, largest.location)
                        .await?
                    {
                        self.save(bridge)?;
                    }
                }
            }
            ServiceAction::ParticipantsAdded { users } => {
                for user in users {
                    self.add_remote_user(bridge, &room, user).await?;
                }
            }
            ServiceAction::JoinedByLink => {
                self.add_remote_user(bridge, &room, action.originator).await?;
            }
            ServiceAction::ParticipantRemoved { user } => {
                self.remove_remote_user(bridge, &room, user, action.originator)
                    .await?;
            }
            ServiceAction::MigratedTo { channel } => {
                if self.kind() != ConversationKind::BasicGroup {
                    tracing::debug!(portal = %self.key(), "already upgraded");
                    return Ok(());
                }
                self.relocate_to_broadcast(bridge, channel)?;
                let puppet = bridge.config.puppet_user(action.originator);
                bridge
                    .rooms
                    .send_message(
                        &puppet,
                        &room,
                        OutgoingMessage {
                            content: OutgoingContent::Emote {
                                body: "upgraded this group to a broadcast group.".to_string(),
                            },
                            reply_to: None,
                        },
                    )
                    .await?;
                self.finish_upgrade(bridge, source, None).await?;
            }
            ServiceAction::AdminsToggled { enabled } => {
                self.set_admins_enabled(bridge, &room, enabled).await?;
            }
            ServiceAction::ChatCreated { .. } | ServiceAction::ChannelCreated { .. } => {
                tracing::debug!(portal = %self.key(), "creation signal for bridged portal");
            }
        }
        Ok(())
    }

    /// Create the room for an unbridged portal if `action` warrants it.
    /// Returns whether the action should still be processed.
    async fn create_room_on_action(
        self: &Arc<Self>,
        bridge: &Arc<Bridge>,
        source: &Arc<dyn RemoteClient>,
        action: &ServiceAction,
    ) -> Result<bool> {
        match action {
            ServiceAction::ChatCreated { .. } | ServiceAction::ChannelCreated { .. } => {
                let request = EnsureRoom::inviting(source.local_user()).with_refresh();
                self.ensure_room(bridge, source, request).await?;
                Ok(false)
            }
            ServiceAction::ParticipantsAdded { .. } | ServiceAction::JoinedByLink => {
                self.ensure_room(bridge, source, EnsureRoom::inviting(source.local_user()))
                    .await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) async fn finish_upgrade(
        &self,
        bridge: &Bridge,
        source: &Arc<dyn RemoteClient>,
        info: Option<ChatInfo>,
    ) -> Result<()> {
        let result = self.update_info(bridge, source, info).await;
        if self.lifecycle() == Lifecycle::Upgraded {
            self.set_lifecycle(Lifecycle::Bridged);
        }
        result.map(|_| ())
    }
}

/// Render a location as text with a map link and a `geo:` URI.
fn location_content(point: &GeoPoint) -> OutgoingContent {
    let lat_dir = if point.lat > 0.0 { "N" } else { "S" };
    let long_dir = if point.long > 0.0 { "E" } else { "W" };
    let text = format!(
        "{}° {lat_dir}, {}° {long_dir}",
        GeoPoint::round(point.lat).abs(),
        GeoPoint::round(point.long).abs()
    );
    let url = format!(
        "https://www.openstreetmap.org/?mlat={}&mlon={}",
        point.lat, point.long
    );

    OutgoingContent::Location {
        body: format!("Location: {text}\n{url}"),
        html: format!("Location: <a href=\"{url}\">{text}</a>"),
        geo_uri: point.geo_uri(),
    }
}
