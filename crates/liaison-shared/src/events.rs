//! Event families flowing into the portal orchestrator.
//!
//! Every family is a closed enum so that adding a new remote content kind or
//! service action is a compile-time checked change in the dispatcher.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::GEO_PRECISION;
use crate::error::ParseError;
use crate::types::{
    ContentUri, LocalMessageId, LocalUserId, RemoteChatId, RemoteMessageId, RemoteUserId,
};

// ---------------------------------------------------------------------------
// Remote side
// ---------------------------------------------------------------------------

/// Everything the remote client can deliver for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteEvent {
    /// A new message.
    Message(RemoteMessage),
    /// A new version of an existing message (same id).
    Edit(RemoteMessage),
    /// Service/membership action.
    Action(RemoteAction),
    /// Messages were deleted.
    Deleted(Vec<RemoteMessageId>),
    /// The pinned message changed (`None` unpins).
    Pinned(Option<RemoteMessageId>),
    /// A participant is typing.
    Typing(RemoteUserId),
}

/// A message as delivered by the remote network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: RemoteMessageId,
    /// Remote timestamps only have one-second resolution.
    pub date: DateTime<Utc>,
    /// `None` for anonymous channel posts.
    pub sender: Option<RemoteUserId>,
    /// Plain-text body (may be empty for media without caption).
    pub text: String,
    /// Rich-text rendering already converted by the remote client.
    pub html: Option<String>,
    pub forward: Option<ForwardOrigin>,
    pub media: Option<RemoteMedia>,
    pub reply_to: Option<RemoteMessageId>,
}

/// Origin of a forwarded message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForwardOrigin {
    pub from_user: Option<RemoteUserId>,
    pub from_chat: Option<RemoteChatId>,
}

/// Media attached to a remote message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteMedia {
    Photo(RemotePhoto),
    Document(RemoteDocument),
    Contact { user_id: RemoteUserId },
    Geo(GeoPoint),
    /// Media kinds the bridge cannot mirror (polls, games, ...).
    Unsupported(String),
}

/// Location of a stored remote file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FileLocation {
    pub volume_id: i64,
    pub local_id: i32,
}

impl FileLocation {
    /// Content hash used to detect avatar changes.
    pub fn photo_id(&self) -> String {
        format!("{}-{}", self.volume_id, self.local_id)
    }
}

/// Handle for downloading remote media.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaRef {
    Location(FileLocation),
    Document(i64),
}

/// One size variant of a remote photo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhotoSize {
    pub location: FileLocation,
    pub width: u32,
    pub height: u32,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePhoto {
    pub id: i64,
    pub sizes: Vec<PhotoSize>,
}

impl RemotePhoto {
    pub fn largest(&self) -> Option<&PhotoSize> {
        self.sizes.iter().max_by_key(|size| size.size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: i64,
    pub mime_type: Option<String>,
    pub size: u64,
    pub attributes: Vec<DocumentAttribute>,
    pub thumb: Option<PhotoSize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentAttribute {
    Filename(String),
    Sticker { alt: String },
    Video { width: u32, height: u32 },
    ImageSize { width: u32, height: u32 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub long: f64,
}

impl GeoPoint {
    /// Round a coordinate to [`GEO_PRECISION`] decimals.
    pub fn round(value: f64) -> f64 {
        let factor = 10f64.powi(GEO_PRECISION);
        (value * factor).round() / factor
    }

    pub fn geo_uri(&self) -> String {
        format!("geo:{},{}", self.lat, self.long)
    }

    /// Parse a `geo:lat,long[;params]` URI.
    pub fn from_geo_uri(uri: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::GeoUri(uri.to_string());
        let coords = uri.strip_prefix("geo:").ok_or_else(invalid)?;
        let coords = coords.split(';').next().unwrap_or_default();
        let mut parts = coords.split(',');
        let lat = parts
            .next()
            .and_then(|p| p.trim().parse::<f64>().ok())
            .ok_or_else(invalid)?;
        let long = parts
            .next()
            .and_then(|p| p.trim().parse::<f64>().ok())
            .ok_or_else(invalid)?;
        Ok(Self { lat, long })
    }
}

/// A service message: metadata or membership change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAction {
    pub id: RemoteMessageId,
    pub date: DateTime<Utc>,
    pub originator: RemoteUserId,
    pub action: ServiceAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServiceAction {
    ChatCreated { title: String },
    ChannelCreated { title: String },
    TitleChanged { title: String },
    PhotoChanged { photo: RemotePhoto },
    ParticipantsAdded { users: Vec<RemoteUserId> },
    JoinedByLink,
    ParticipantRemoved { user: RemoteUserId },
    /// The basic group was upgraded into the given broadcast conversation.
    MigratedTo { channel: RemoteChatId },
    /// Remote "only admins may edit" restriction toggled.
    AdminsToggled { enabled: bool },
}

impl ServiceAction {
    /// Stable name of the action kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChatCreated { .. } => "chat_created",
            Self::ChannelCreated { .. } => "channel_created",
            Self::TitleChanged { .. } => "title_changed",
            Self::PhotoChanged { .. } => "photo_changed",
            Self::ParticipantsAdded { .. } => "participants_added",
            Self::JoinedByLink => "joined_by_link",
            Self::ParticipantRemoved { .. } => "participant_removed",
            Self::MigratedTo { .. } => "migrated_to",
            Self::AdminsToggled { .. } => "admins_toggled",
        }
    }
}

// ---------------------------------------------------------------------------
// Local side
// ---------------------------------------------------------------------------

/// Events from a bridged local room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LocalEvent {
    Message(LocalMessage),
    Redaction { redacts: LocalMessageId },
    PowerLevels {
        old_users: BTreeMap<LocalUserId, i64>,
        new_users: BTreeMap<LocalUserId, i64>,
    },
    Name(String),
    Topic(String),
    Avatar { url: ContentUri },
    /// The sender joined the room.
    Join { event_id: LocalMessageId },
    /// `user` left the room; the sender is whoever caused it.
    Leave {
        event_id: LocalMessageId,
        user: LocalUserId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalMessage {
    pub event_id: LocalMessageId,
    pub content: LocalContent,
    pub reply_to: Option<LocalMessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LocalContent {
    Text { body: String, html: Option<String> },
    Notice { body: String, html: Option<String> },
    Emote { body: String, html: Option<String> },
    Media(LocalMedia),
    Location { body: String, geo_uri: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    File,
    Audio,
    Video,
}

impl MediaKind {
    /// Pick the media kind from a mime type prefix.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("video/") {
            Self::Video
        } else if mime.starts_with("audio/") {
            Self::Audio
        } else if mime.starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalMedia {
    pub kind: MediaKind,
    pub url: ContentUri,
    pub body: String,
    pub mime: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}
