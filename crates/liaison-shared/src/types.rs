use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::PLACEHOLDER_SUFFIX;
use crate::error::ParseError;

// ---------------------------------------------------------------------------
// Remote network identifiers
// ---------------------------------------------------------------------------

/// Id of a remote chat, group or channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteChatId(pub i64);

/// Id of a remote user account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteUserId(pub i64);

/// Id of a remote message. Only unique within its [`IdSpace`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteMessageId(pub i64);

/// The scope in which a [`RemoteMessageId`] is unique.
///
/// Broadcast conversations number their messages globally, so the space is
/// the conversation id. Direct chats and basic groups number messages per
/// account, so the space is the remote id of the account that saw them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdSpace(pub i64);

macro_rules! display_inner {
    ($($ty:ty),*) => {
        $(impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        })*
    };
}

display_inner!(RemoteChatId, RemoteUserId, RemoteMessageId, IdSpace);

// ---------------------------------------------------------------------------
// Conversation kind
// ---------------------------------------------------------------------------

/// The three kinds of remote conversation the bridge understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationKind {
    /// One-to-one chat with another remote user.
    Direct,
    /// Small group with per-account message numbering.
    BasicGroup,
    /// Channel or supergroup with global message numbering.
    BroadcastGroup,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::BasicGroup => "basic-group",
            Self::BroadcastGroup => "broadcast-group",
        }
    }

    /// Whether message ids are unique across the whole conversation.
    pub fn has_global_id_space(&self) -> bool {
        matches!(self, Self::BroadcastGroup)
    }

    pub fn is_group(&self) -> bool {
        !matches!(self, Self::Direct)
    }
}

impl std::str::FromStr for ConversationKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "basic-group" => Ok(Self::BasicGroup),
            "broadcast-group" => Ok(Self::BroadcastGroup),
            other => Err(ParseError::ConversationKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to a remote conversation as the remote client addresses it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RemotePeer {
    User(RemoteUserId),
    Chat(RemoteChatId),
    Channel(RemoteChatId),
}

impl RemotePeer {
    pub fn kind(&self) -> ConversationKind {
        match self {
            Self::User(_) => ConversationKind::Direct,
            Self::Chat(_) => ConversationKind::BasicGroup,
            Self::Channel(_) => ConversationKind::BroadcastGroup,
        }
    }

    /// The conversation id this peer is stored under.
    pub fn chat_id(&self) -> RemoteChatId {
        match self {
            Self::User(user) => RemoteChatId(user.0),
            Self::Chat(chat) | Self::Channel(chat) => *chat,
        }
    }

    pub fn from_parts(kind: ConversationKind, chat: RemoteChatId) -> Self {
        match kind {
            ConversationKind::Direct => Self::User(RemoteUserId(chat.0)),
            ConversationKind::BasicGroup => Self::Chat(chat),
            ConversationKind::BroadcastGroup => Self::Channel(chat),
        }
    }
}

// ---------------------------------------------------------------------------
// Portal identity
// ---------------------------------------------------------------------------

/// Identity of a portal: the remote conversation plus the receiver scope.
///
/// Direct chats are only unique per account, so their receiver is the remote
/// id of the local user's account. Groups use their own id as receiver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortalKey {
    pub chat_id: RemoteChatId,
    pub receiver: i64,
}

impl PortalKey {
    /// Key of a group conversation.
    pub fn group(chat_id: RemoteChatId) -> Self {
        Self {
            chat_id,
            receiver: chat_id.0,
        }
    }

    /// Key of the direct chat with `peer` as seen by `account`.
    pub fn direct(peer: RemoteUserId, account: RemoteUserId) -> Self {
        Self {
            chat_id: RemoteChatId(peer.0),
            receiver: account.0,
        }
    }

    /// Key for a peer as observed by the given account.
    pub fn for_peer(peer: RemotePeer, account: RemoteUserId) -> Self {
        match peer {
            RemotePeer::User(user) => Self::direct(user, account),
            RemotePeer::Chat(chat) | RemotePeer::Channel(chat) => Self::group(chat),
        }
    }
}

impl std::fmt::Display for PortalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.chat_id.0 == self.receiver {
            write!(f, "{}", self.chat_id)
        } else {
            write!(f, "{}<->{}", self.receiver, self.chat_id)
        }
    }
}

// ---------------------------------------------------------------------------
// Local network identifiers
// ---------------------------------------------------------------------------

/// Id of a local room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomId(pub String);

/// Id of a local user (real account, puppet or bridge bot).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalUserId(pub String);

/// Id of a local message event, or a placeholder for one still in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalMessageId(pub String);

/// Content URI in the local network's media store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ContentUri(pub String);

display_inner!(RoomId, LocalUserId, LocalMessageId, ContentUri);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl LocalUserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl LocalMessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh placeholder id for a message whose real id is not
    /// known yet.
    pub fn placeholder() -> Self {
        Self(format!("${}{}", Uuid::new_v4().simple(), PLACEHOLDER_SUFFIX))
    }

    pub fn is_placeholder(&self) -> bool {
        self.0.ends_with(PLACEHOLDER_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip_through_str() {
        for kind in [
            ConversationKind::Direct,
            ConversationKind::BasicGroup,
            ConversationKind::BroadcastGroup,
        ] {
            assert_eq!(kind.as_str().parse::<ConversationKind>().unwrap(), kind);
        }
        assert!("supergroup".parse::<ConversationKind>().is_err());
    }

    #[test]
    fn test_portal_key_receiver_scope() {
        let group = PortalKey::for_peer(RemotePeer::Chat(RemoteChatId(100)), RemoteUserId(7));
        assert_eq!(group, PortalKey::group(RemoteChatId(100)));
        assert_eq!(group.to_string(), "100");

        let direct = PortalKey::for_peer(RemotePeer::User(RemoteUserId(5)), RemoteUserId(7));
        assert_eq!(direct.receiver, 7);
        assert_eq!(direct.to_string(), "7<->5");
    }

    #[test]
    fn test_placeholder_ids_are_unique_and_recognised() {
        let a = LocalMessageId::placeholder();
        let b = LocalMessageId::placeholder();
        assert_ne!(a, b);
        assert!(a.is_placeholder());
        assert!(!LocalMessageId::new("$real:example.org").is_placeholder());
    }

    #[test]
    fn test_only_broadcast_has_global_ids() {
        assert!(ConversationKind::BroadcastGroup.has_global_id_space());
        assert!(!ConversationKind::BasicGroup.has_global_id_space());
        assert!(!ConversationKind::Direct.has_global_id_space());
    }
}
