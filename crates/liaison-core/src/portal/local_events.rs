//! Local → remote event handling.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use liaison_shared::events::{
    GeoPoint, LocalContent, LocalEvent, LocalMessage, RemoteAction, RemoteMessage, ServiceAction,
};
use liaison_shared::{ContentUri, ConversationKind, LocalMessageId, LocalUserId, RemoteUserId, RoomId};

use super::Portal;
use crate::bridge::Bridge;
use crate::dedup::{action_fingerprint, message_fingerprint, MirrorRef};
use crate::error::{ignore_transient, Result};
use crate::power_levels::changed_levels;
use crate::remote::{AdminRights, OutgoingFile, RemoteClient, RemoteText};

const UPLOAD_NAME: &str = "liaison_upload";

/// The local user behind a local event.
#[derive(Clone)]
pub struct LocalSender {
    pub user_id: LocalUserId,
    pub display_name: String,
    /// The user's own remote client, `None` if they are not logged in.
    pub client: Option<Arc<dyn RemoteClient>>,
}

impl LocalSender {
    pub fn new(user_id: LocalUserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            client: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn RemoteClient>) -> Self {
        self.client = Some(client);
        self
    }
}

impl Portal {
    pub async fn handle_local_event(
        self: &Arc<Self>,
        bridge: &Arc<Bridge>,
        sender: &LocalSender,
        event: LocalEvent,
    ) -> Result<()> {
        match event {
            LocalEvent::Message(message) => self.handle_local_message(bridge, sender, message).await,
            LocalEvent::Redaction { redacts } => {
                self.handle_local_redaction(bridge, sender, &redacts).await
            }
            LocalEvent::PowerLevels {
                old_users,
                new_users,
            } => {
                self.handle_local_power_levels(bridge, sender, &old_users, &new_users)
                    .await
            }
            LocalEvent::Name(title) => self.handle_local_title(bridge, sender, &title).await,
            LocalEvent::Topic(topic) => self.handle_local_topic(bridge, sender, &topic).await,
            LocalEvent::Avatar { url } => self.handle_local_avatar(bridge, sender, &url).await,
            LocalEvent::Join { event_id } => self.handle_local_join(bridge, sender, &event_id).await,
            LocalEvent::Leave { event_id, user } => {
                self.handle_local_leave(bridge, sender, &user, &event_id).await
            }
        }
    }

    /// Send a local message to the remote conversation, through the relay
    /// bot when the sender has no remote login.
    pub async fn handle_local_message(
        &self,
        bridge: &Bridge,
        sender: &LocalSender,
        message: LocalMessage,
    ) -> Result<()> {
        let room = self.require_room()?;
        let (client, relayed) = match &sender.client {
            Some(client) => (client.clone(), false),
            None => match &bridge.relay {
                Some(bot) if self.has_bot(bridge) => (bot.client().clone(), true),
                _ => {
                    tracing::debug!(user = %sender.user_id, "no remote account to send as");
                    return Ok(());
                }
            },
        };

        let peer = self.peer();
        let space = self.id_space(client.account_id());
        let reply_to = match &message.reply_to {
            Some(local_id) => bridge
                .index
                .get_by_local(&room, local_id, space)?
                .map(|record| record.remote_id),
            None => None,
        };

        let response = match message.content {
            LocalContent::Text { body, html } => {
                let text = relay_text(sender, relayed, body, html);
                client.send_text(peer, text, reply_to).await?
            }
            LocalContent::Notice { body, html } => {
                if !bridge.config.bridge_notices {
                    tracing::debug!(event = %message.event_id, "not bridging notice");
                    return Ok(());
                }
                let text = relay_text(sender, relayed, body, html);
                client.send_text(peer, text, reply_to).await?
            }
            LocalContent::Emote { body, html } => {
                let name = &sender.display_name;
                let text = RemoteText {
                    text: format!("* {name} {body}"),
                    html: html.map(|html| format!("* {} {html}", escape_html(name))),
                };
                client.send_text(peer, text, reply_to).await?
            }
            LocalContent::Media(media) => {
                let data = bridge.rooms.download(&media.url).await?;
                let (file_name, caption) = file_meta(&media.body);
                let caption = if relayed {
                    Some(match caption {
                        Some(caption) => format!("<{}> {caption}", sender.display_name),
                        None => format!("<{}>", sender.display_name),
                    })
                } else {
                    caption
                };
                let file = OutgoingFile {
                    data,
                    mime: media.mime,
                    file_name,
                    caption,
                    width: media.width,
                    height: media.height,
                };
                client.send_file(peer, file, reply_to).await?
            }
            LocalContent::Location { geo_uri, .. } => {
                let point = match GeoPoint::from_geo_uri(&geo_uri) {
                    Ok(point) => point,
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring location");
                        return Ok(());
                    }
                };
                client.send_location(peer, point, reply_to).await?
            }
        };

        self.record_outgoing(bridge, &room, &response, &message.event_id, client.account_id())
    }

    /// Remember a message the bridge sent to the remote side so that its
    /// echo is recognised, and correlate it with the local event.
    fn record_outgoing(
        &self,
        bridge: &Bridge,
        room: &RoomId,
        response: &RemoteMessage,
        local_id: &LocalMessageId,
        account: RemoteUserId,
    ) -> Result<()> {
        let space = self.id_space(account);
        let fingerprint = message_fingerprint(response, self.kind().has_global_id_space());
        self.check_message(
            fingerprint,
            Some(MirrorRef {
                local_id: local_id.clone(),
                space,
            }),
        );
        bridge.index.put(response.id, space, local_id, room)?;
        Ok(())
    }

    pub async fn handle_local_redaction(
        &self,
        bridge: &Bridge,
        sender: &LocalSender,
        redacts: &LocalMessageId,
    ) -> Result<()> {
        let Some(client) = &sender.client else {
            return Ok(());
        };
        let room = self.require_room()?;
        let space = self.id_space(client.account_id());
        let Some(record) = bridge.index.get_by_local(&room, redacts, space)? else {
            tracing::debug!(event = %redacts, "redacted event is not bridged");
            return Ok(());
        };
        client.delete_messages(self.peer(), &[record.remote_id]).await?;
        Ok(())
    }

    /// Translate changed power levels into remote admin rights.
    pub async fn handle_local_power_levels(
        &self,
        bridge: &Bridge,
        sender: &LocalSender,
        old: &BTreeMap<LocalUserId, i64>,
        new: &BTreeMap<LocalUserId, i64>,
    ) -> Result<()> {
        let Some(client) = &sender.client else {
            return Ok(());
        };
        let kind = self.kind();
        let owner = self.main_user(&bridge.config);
        let sender_account = client.account_id();

        for (user, level) in changed_levels(old, new) {
            if user == owner || user == sender.user_id {
                continue;
            }
            let remote = bridge
                .config
                .puppet_remote_id(&user)
                .or_else(|| bridge.directory.remote_for_account(&user));
            let Some(remote) = remote else {
                continue;
            };
            if remote == sender_account {
                continue;
            }
            if let Some(rights) = AdminRights::for_level(kind, level) {
                client.set_admin_rights(self.peer(), remote, rights).await?;
            }
        }
        Ok(())
    }

    pub async fn handle_local_title(
        &self,
        bridge: &Bridge,
        sender: &LocalSender,
        title: &str,
    ) -> Result<()> {
        if self.kind() == ConversationKind::Direct {
            return Ok(());
        }
        let Some(client) = &sender.client else {
            return Ok(());
        };
        let actions = client.edit_title(self.peer(), title).await?;
        self.absorb_own_actions(&actions);
        self.update_state(|state| state.title = Some(title.to_string()));
        self.save(bridge)
    }

    pub async fn handle_local_topic(
        &self,
        bridge: &Bridge,
        sender: &LocalSender,
        topic: &str,
    ) -> Result<()> {
        if self.kind() != ConversationKind::BroadcastGroup {
            return Ok(());
        }
        let Some(client) = &sender.client else {
            return Ok(());
        };
        client.edit_about(self.peer(), topic).await?;
        self.update_state(|state| state.about = Some(topic.to_string()));
        self.save(bridge)
    }

    pub async fn handle_local_avatar(
        &self,
        bridge: &Bridge,
        sender: &LocalSender,
        url: &ContentUri,
    ) -> Result<()> {
        if self.kind() == ConversationKind::Direct {
            return Ok(());
        }
        let Some(client) = &sender.client else {
            return Ok(());
        };
        let data = bridge.rooms.download(url).await?;
        let actions = client.edit_photo(self.peer(), data, "avatar").await?;
        self.absorb_own_actions(&actions);

        let photo_id = actions.iter().find_map(|action| match &action.action {
            ServiceAction::PhotoChanged { photo } => {
                photo.largest().map(|size| size.location.photo_id())
            }
            _ => None,
        });
        if let Some(photo_id) = photo_id {
            self.update_state(|state| state.photo_id = Some(photo_id));
            self.save(bridge)?;
        }
        Ok(())
    }

    fn absorb_own_actions(&self, actions: &[RemoteAction]) {
        let global = self.kind().has_global_id_space();
        for action in actions {
            self.is_duplicate_action(action_fingerprint(action, global));
        }
    }

    pub async fn handle_local_join(
        &self,
        bridge: &Bridge,
        sender: &LocalSender,
        event_id: &LocalMessageId,
    ) -> Result<()> {
        match &sender.client {
            None => {
                let text = format!("{} joined the room.", sender.display_name);
                self.send_relay_notice(bridge, text, event_id).await
            }
            Some(client) if self.kind() == ConversationKind::BroadcastGroup => {
                client.join(self.peer()).await?;
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    /// Mirror `user` leaving the room. When `sender` is someone else, the
    /// user was kicked by them.
    pub async fn handle_local_leave(
        self: &Arc<Self>,
        bridge: &Arc<Bridge>,
        sender: &LocalSender,
        user: &LocalUserId,
        event_id: &LocalMessageId,
    ) -> Result<()> {
        let kicked = sender.user_id != *user;

        if let Some(puppet_of) = bridge.config.puppet_remote_id(user) {
            match &sender.client {
                Some(client) if kicked => client.kick(self.peer(), puppet_of).await?,
                _ => tracing::debug!(user = %user, "puppet left the room"),
            }
            return Ok(());
        }

        let Some(remote) = bridge.directory.remote_for_account(user) else {
            let name = bridge
                .directory
                .local_display_name(user)
                .unwrap_or_else(|| user.to_string());
            return self
                .send_relay_notice(bridge, format!("{name} left the room."), event_id)
                .await;
        };

        if self.kind() == ConversationKind::Direct {
            if let Some(room) = self.room_id() {
                let owner = self.main_user(&bridge.config);
                ignore_transient(bridge.rooms.leave(&owner, &room).await, "direct room leave");
            }
            return self.delete(bridge);
        }

        match &sender.client {
            Some(client) if kicked => client.kick(self.peer(), remote).await?,
            Some(client) => client.leave(self.peer()).await?,
            None => tracing::debug!(user = %user, "leave by user without remote account"),
        }
        Ok(())
    }

    async fn send_relay_notice(
        &self,
        bridge: &Bridge,
        text: String,
        event_id: &LocalMessageId,
    ) -> Result<()> {
        let Some(bot) = &bridge.relay else {
            return Ok(());
        };
        if !self.has_bot(bridge) {
            return Ok(());
        }
        let room = self.require_room()?;
        let html = format!("<i>{}</i>", escape_html(&text));
        let response = bot
            .client()
            .send_text(self.peer(), RemoteText { text, html: Some(html) }, None)
            .await?;
        self.record_outgoing(bridge, &room, &response, event_id, bot.account_id())
    }
}

/// Prefix relayed messages with the sender's name.
fn relay_text(sender: &LocalSender, relayed: bool, body: String, html: Option<String>) -> RemoteText {
    if !relayed {
        return RemoteText { text: body, html };
    }
    let name = &sender.display_name;
    RemoteText {
        text: format!("<{name}> {body}"),
        html: html.map(|html| format!("&lt;{}&gt; {html}", escape_html(name))),
    }
}

/// File name and caption for an uploaded file. A body that looks like a
/// file name is used as such; anything else becomes the caption.
fn file_meta(body: &str) -> (String, Option<String>) {
    let looks_like_file = !body.contains(char::is_whitespace)
        && Path::new(body).extension().is_some();
    if looks_like_file {
        (body.to_string(), None)
    } else if body.is_empty() {
        (UPLOAD_NAME.to_string(), None)
    } else {
        (UPLOAD_NAME.to_string(), Some(body.to_string()))
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
