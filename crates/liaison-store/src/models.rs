//! Row models persisted in the bridge database.

use chrono::{DateTime, Utc};
use liaison_shared::{
    ConversationKind, IdSpace, LocalMessageId, PortalKey, RemoteChatId, RemoteMessageId, RoomId,
};

// ---------------------------------------------------------------------------
// Portal
// ---------------------------------------------------------------------------

/// Persisted state of one bridged conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRecord {
    pub key: PortalKey,
    pub kind: ConversationKind,
    /// Local room, `None` until the room has been created.
    pub room_id: Option<RoomId>,
    /// Public handle of broadcast conversations.
    pub username: Option<String>,
    pub title: Option<String>,
    pub about: Option<String>,
    /// Content hash of the current avatar.
    pub photo_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PortalRecord {
    /// A fresh record with no room and no metadata.
    pub fn new(key: PortalKey, kind: ConversationKind) -> Self {
        Self {
            key,
            kind,
            room_id: None,
            username: None,
            title: None,
            about: None,
            photo_id: None,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Message correlation
// ---------------------------------------------------------------------------

/// Maps a remote message to the local event mirroring it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub remote_id: RemoteMessageId,
    pub space: IdSpace,
    /// Local event id, possibly still a placeholder.
    pub local_id: LocalMessageId,
    pub room_id: RoomId,
}

// ---------------------------------------------------------------------------
// Relay bot membership
// ---------------------------------------------------------------------------

/// A remote conversation the relay bot account is a member of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotChat {
    pub chat_id: RemoteChatId,
    pub kind: ConversationKind,
}
