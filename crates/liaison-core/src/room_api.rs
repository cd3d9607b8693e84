//! The local room-API collaborator.
//!
//! Every call names the local user it acts as: the bridge bot, a puppet or
//! (for joins) a logged-in account.

use async_trait::async_trait;
use bytes::Bytes;
use liaison_shared::events::MediaKind;
use liaison_shared::{ContentUri, LocalMessageId, LocalUserId, RoomId};
use serde_json::Value;
use thiserror::Error;

use crate::power_levels::{PowerLevels, EVENT_POWER_LEVELS};

#[derive(Error, Debug, Clone)]
pub enum RoomApiError {
    #[error("Request failed with status {status}: {message}")]
    Request { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

/// A state event embedded in a room at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    pub event_type: String,
    pub state_key: String,
    pub content: Value,
}

impl StateEvent {
    pub fn power_levels(levels: &PowerLevels) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_type: EVENT_POWER_LEVELS.to_string(),
            state_key: String::new(),
            content: serde_json::to_value(levels)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateRoomRequest {
    /// Alias localpart to claim. Set for public rooms only.
    pub alias_localpart: Option<String>,
    pub public: bool,
    pub direct: bool,
    pub invitees: Vec<LocalUserId>,
    pub name: Option<String>,
    pub topic: Option<String>,
    pub initial_state: Vec<StateEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRule {
    Public,
    Invite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Join,
    Invite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub url: ContentUri,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    pub mime: String,
    pub size: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub thumbnail: Option<Thumbnail>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingContent {
    Text {
        body: String,
        html: Option<String>,
    },
    Emote {
        body: String,
    },
    Image {
        url: ContentUri,
        caption: String,
        info: MediaInfo,
    },
    File {
        kind: MediaKind,
        url: ContentUri,
        name: String,
        info: MediaInfo,
    },
    Location {
        body: String,
        html: String,
        geo_uri: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: OutgoingContent,
    pub reply_to: Option<LocalMessageId>,
}

#[async_trait]
pub trait RoomApi: Send + Sync {
    /// Create a room as `creator`. `Ok(None)` means the server accepted the
    /// request but returned no room id.
    async fn create_room(
        &self,
        creator: &LocalUserId,
        request: CreateRoomRequest,
    ) -> Result<Option<RoomId>, RoomApiError>;

    async fn invite(
        &self,
        actor: &LocalUserId,
        room: &RoomId,
        user: &LocalUserId,
    ) -> Result<(), RoomApiError>;

    async fn kick(
        &self,
        actor: &LocalUserId,
        room: &RoomId,
        user: &LocalUserId,
        reason: &str,
    ) -> Result<(), RoomApiError>;

    /// Join `room` as `user`, inviting first if needed. Idempotent.
    async fn join(&self, user: &LocalUserId, room: &RoomId) -> Result<(), RoomApiError>;

    async fn leave(&self, user: &LocalUserId, room: &RoomId) -> Result<(), RoomApiError>;

    async fn members(
        &self,
        room: &RoomId,
        memberships: &[Membership],
    ) -> Result<Vec<LocalUserId>, RoomApiError>;

    async fn power_levels(&self, room: &RoomId) -> Result<PowerLevels, RoomApiError>;

    async fn set_power_levels(
        &self,
        actor: &LocalUserId,
        room: &RoomId,
        levels: &PowerLevels,
    ) -> Result<(), RoomApiError>;

    async fn set_name(
        &self,
        actor: &LocalUserId,
        room: &RoomId,
        name: &str,
    ) -> Result<(), RoomApiError>;

    async fn set_topic(
        &self,
        actor: &LocalUserId,
        room: &RoomId,
        topic: &str,
    ) -> Result<(), RoomApiError>;

    async fn set_avatar(
        &self,
        actor: &LocalUserId,
        room: &RoomId,
        url: &ContentUri,
    ) -> Result<(), RoomApiError>;

    async fn set_join_rule(
        &self,
        actor: &LocalUserId,
        room: &RoomId,
        rule: JoinRule,
    ) -> Result<(), RoomApiError>;

    async fn add_alias(&self, room: &RoomId, localpart: &str) -> Result<(), RoomApiError>;

    async fn remove_alias(&self, localpart: &str) -> Result<(), RoomApiError>;

    async fn send_message(
        &self,
        actor: &LocalUserId,
        room: &RoomId,
        message: OutgoingMessage,
    ) -> Result<LocalMessageId, RoomApiError>;

    async fn redact(
        &self,
        actor: &LocalUserId,
        room: &RoomId,
        event: &LocalMessageId,
    ) -> Result<(), RoomApiError>;

    async fn set_typing(
        &self,
        actor: &LocalUserId,
        room: &RoomId,
        typing: bool,
    ) -> Result<(), RoomApiError>;

    /// Replace the room's pinned-events list.
    async fn set_pinned(
        &self,
        actor: &LocalUserId,
        room: &RoomId,
        events: Vec<LocalMessageId>,
    ) -> Result<(), RoomApiError>;

    async fn upload(
        &self,
        actor: &LocalUserId,
        data: Bytes,
        mime: &str,
    ) -> Result<ContentUri, RoomApiError>;

    async fn download(&self, url: &ContentUri) -> Result<Bytes, RoomApiError>;
}
