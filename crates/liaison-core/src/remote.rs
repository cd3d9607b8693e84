//! The remote-network client collaborator.
//!
//! One client exists per logged-in account (plus one for the relay bot).
//! The wire protocol behind it is out of scope for this crate.

use async_trait::async_trait;
use bytes::Bytes;
use liaison_shared::events::{FileLocation, GeoPoint, MediaRef, RemoteAction, RemoteMessage};
use liaison_shared::{LocalUserId, RemoteChatId, RemotePeer, RemoteMessageId, RemoteUserId};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// The account lacks the admin rights the call needs.
    #[error("Admin privileges required")]
    AdminRequired,

    #[error("Remote object not found: {0}")]
    NotFound(String),
}

/// Metadata of a remote conversation.
#[derive(Debug, Clone)]
pub struct ChatInfo {
    pub peer: RemotePeer,
    pub title: Option<String>,
    /// Public handle, broadcast conversations only.
    pub username: Option<String>,
    pub about: Option<String>,
    pub photo: Option<FileLocation>,
    /// Whether editing is restricted to admins (basic groups).
    pub admins_enabled: bool,
    /// Broadcast conversation where every member may post.
    pub megagroup: bool,
}

impl ChatInfo {
    pub fn new(peer: RemotePeer) -> Self {
        Self {
            peer,
            title: None,
            username: None,
            about: None,
            photo: None,
            admins_enabled: false,
            megagroup: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRole {
    Member,
    Admin,
    Creator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    pub user_id: RemoteUserId,
    pub role: ParticipantRole,
}

/// Rights granted by [`RemoteClient::set_admin_rights`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminRights {
    /// Delete, ban, pin and edit rights.
    pub moderator: bool,
    pub add_admins: bool,
}

/// Outgoing text, already converted to the remote rich-text format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteText {
    pub text: String,
    pub html: Option<String>,
}

impl RemoteText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub data: Bytes,
    pub mime: String,
    pub file_name: String,
    pub caption: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Remote id of the account this client is logged in as.
    fn account_id(&self) -> RemoteUserId;

    /// Local user owning this client. For the relay bot this is the bridge
    /// bot user.
    fn local_user(&self) -> LocalUserId;

    async fn get_chat(&self, peer: RemotePeer) -> Result<ChatInfo, RemoteError>;

    /// Full participant list of a basic group.
    async fn get_chat_participants(&self, chat: RemoteChatId)
        -> Result<Vec<Participant>, RemoteError>;

    /// One page of a broadcast conversation's participants.
    async fn get_channel_participants(
        &self,
        channel: RemoteChatId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Participant>, RemoteError>;

    async fn send_text(
        &self,
        peer: RemotePeer,
        text: RemoteText,
        reply_to: Option<RemoteMessageId>,
    ) -> Result<RemoteMessage, RemoteError>;

    async fn send_file(
        &self,
        peer: RemotePeer,
        file: OutgoingFile,
        reply_to: Option<RemoteMessageId>,
    ) -> Result<RemoteMessage, RemoteError>;

    async fn send_location(
        &self,
        peer: RemotePeer,
        point: GeoPoint,
        reply_to: Option<RemoteMessageId>,
    ) -> Result<RemoteMessage, RemoteError>;

    async fn delete_messages(
        &self,
        peer: RemotePeer,
        ids: &[RemoteMessageId],
    ) -> Result<(), RemoteError>;

    async fn set_admin_rights(
        &self,
        peer: RemotePeer,
        user: RemoteUserId,
        rights: AdminRights,
    ) -> Result<(), RemoteError>;

    /// Returns the service actions the change produced.
    async fn edit_title(&self, peer: RemotePeer, title: &str)
        -> Result<Vec<RemoteAction>, RemoteError>;

    /// Returns the service actions the change produced.
    async fn edit_photo(
        &self,
        peer: RemotePeer,
        data: Bytes,
        file_name: &str,
    ) -> Result<Vec<RemoteAction>, RemoteError>;

    async fn edit_about(&self, peer: RemotePeer, about: &str) -> Result<(), RemoteError>;

    async fn set_username(&self, peer: RemotePeer, username: &str) -> Result<(), RemoteError>;

    /// Upgrade a basic group. Returns the new broadcast conversation, or
    /// `None` if the remote side did not report one.
    async fn migrate_chat(&self, chat: RemoteChatId) -> Result<Option<ChatInfo>, RemoteError>;

    async fn invite(&self, peer: RemotePeer, user: RemoteUserId) -> Result<(), RemoteError>;

    async fn kick(&self, peer: RemotePeer, user: RemoteUserId) -> Result<(), RemoteError>;

    async fn leave(&self, peer: RemotePeer) -> Result<(), RemoteError>;

    async fn join(&self, peer: RemotePeer) -> Result<(), RemoteError>;

    async fn export_invite_link(&self, peer: RemotePeer) -> Result<Option<String>, RemoteError>;

    async fn download(&self, media: MediaRef) -> Result<Bytes, RemoteError>;
}
