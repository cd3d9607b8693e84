//! In-memory collaborators recording every call, for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use liaison_shared::events::{GeoPoint, MediaRef, RemoteAction, RemoteMessage};
use liaison_shared::{
    ContentUri, LocalMessageId, LocalUserId, RemoteChatId, RemoteMessageId, RemotePeer,
    RemoteUserId, RoomId,
};
use liaison_store::Database;
use tokio::sync::Semaphore;

use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::directory::Directory;
use crate::power_levels::PowerLevels;
use crate::remote::{
    AdminRights, ChatInfo, OutgoingFile, Participant, RemoteClient, RemoteError, RemoteText,
};
use crate::room_api::{
    CreateRoomRequest, JoinRule, Membership, OutgoingMessage, RoomApi, RoomApiError,
};

// ---------------------------------------------------------------------------
// Remote client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    SendText(RemotePeer, RemoteText, Option<RemoteMessageId>),
    SendFile(RemotePeer, String, Option<String>),
    SendLocation(RemotePeer),
    Delete(RemotePeer, Vec<RemoteMessageId>),
    AdminRights(RemotePeer, RemoteUserId, AdminRights),
    EditTitle(RemotePeer, String),
    EditAbout(RemotePeer, String),
    SetUsername(RemotePeer, String),
    Migrate(RemoteChatId),
    Invite(RemotePeer, RemoteUserId),
    Kick(RemotePeer, RemoteUserId),
    Leave(RemotePeer),
    Join(RemotePeer),
}

pub struct MockRemote {
    account: RemoteUserId,
    local_user: LocalUserId,
    pub info: Mutex<Option<ChatInfo>>,
    pub participants: Mutex<Vec<Participant>>,
    pub migrated: Mutex<Option<ChatInfo>>,
    pub calls: Mutex<Vec<RemoteCall>>,
    /// Every message the mock reported as sent, as the remote side echoes it.
    pub outbox: Mutex<Vec<RemoteMessage>>,
    pub get_chat_calls: AtomicUsize,
    next_id: AtomicI64,
}

impl MockRemote {
    pub fn new(account: i64, local_user: &str) -> Arc<Self> {
        Arc::new(Self {
            account: RemoteUserId(account),
            local_user: LocalUserId::new(local_user),
            info: Mutex::new(None),
            participants: Mutex::new(Vec::new()),
            migrated: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            outbox: Mutex::new(Vec::new()),
            get_chat_calls: AtomicUsize::new(0),
            next_id: AtomicI64::new(1000),
        })
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: RemoteCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn echo(&self, text: &str) -> RemoteMessage {
        let message = RemoteMessage {
            id: RemoteMessageId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            date: Utc::now(),
            sender: Some(self.account),
            text: text.to_string(),
            html: None,
            forward: None,
            media: None,
            reply_to: None,
        };
        self.outbox.lock().unwrap().push(message.clone());
        message
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    fn account_id(&self) -> RemoteUserId {
        self.account
    }

    fn local_user(&self) -> LocalUserId {
        self.local_user.clone()
    }

    async fn get_chat(&self, peer: RemotePeer) -> Result<ChatInfo, RemoteError> {
        self.get_chat_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(self
            .info
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| ChatInfo::new(peer)))
    }

    async fn get_chat_participants(&self, _chat: RemoteChatId) -> Result<Vec<Participant>, RemoteError> {
        Ok(self.participants.lock().unwrap().clone())
    }

    async fn get_channel_participants(
        &self,
        _channel: RemoteChatId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Participant>, RemoteError> {
        let all = self.participants.lock().unwrap().clone();
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    async fn send_text(
        &self,
        peer: RemotePeer,
        text: RemoteText,
        reply_to: Option<RemoteMessageId>,
    ) -> Result<RemoteMessage, RemoteError> {
        let echo = self.echo(&text.text);
        self.record(RemoteCall::SendText(peer, text, reply_to));
        Ok(echo)
    }

    async fn send_file(
        &self,
        peer: RemotePeer,
        file: OutgoingFile,
        _reply_to: Option<RemoteMessageId>,
    ) -> Result<RemoteMessage, RemoteError> {
        let echo = self.echo(file.caption.as_deref().unwrap_or_default());
        self.record(RemoteCall::SendFile(peer, file.file_name, file.caption));
        Ok(echo)
    }

    async fn send_location(
        &self,
        peer: RemotePeer,
        _point: GeoPoint,
        _reply_to: Option<RemoteMessageId>,
    ) -> Result<RemoteMessage, RemoteError> {
        self.record(RemoteCall::SendLocation(peer));
        Ok(self.echo(""))
    }

    async fn delete_messages(&self, peer: RemotePeer, ids: &[RemoteMessageId]) -> Result<(), RemoteError> {
        self.record(RemoteCall::Delete(peer, ids.to_vec()));
        Ok(())
    }

    async fn set_admin_rights(
        &self,
        peer: RemotePeer,
        user: RemoteUserId,
        rights: AdminRights,
    ) -> Result<(), RemoteError> {
        self.record(RemoteCall::AdminRights(peer, user, rights));
        Ok(())
    }

    async fn edit_title(&self, peer: RemotePeer, title: &str) -> Result<Vec<RemoteAction>, RemoteError> {
        self.record(RemoteCall::EditTitle(peer, title.to_string()));
        Ok(Vec::new())
    }

    async fn edit_photo(
        &self,
        _peer: RemotePeer,
        _data: Bytes,
        _file_name: &str,
    ) -> Result<Vec<RemoteAction>, RemoteError> {
        Ok(Vec::new())
    }

    async fn edit_about(&self, peer: RemotePeer, about: &str) -> Result<(), RemoteError> {
        self.record(RemoteCall::EditAbout(peer, about.to_string()));
        Ok(())
    }

    async fn set_username(&self, peer: RemotePeer, username: &str) -> Result<(), RemoteError> {
        self.record(RemoteCall::SetUsername(peer, username.to_string()));
        Ok(())
    }

    async fn migrate_chat(&self, chat: RemoteChatId) -> Result<Option<ChatInfo>, RemoteError> {
        self.record(RemoteCall::Migrate(chat));
        Ok(self.migrated.lock().unwrap().clone())
    }

    async fn invite(&self, peer: RemotePeer, user: RemoteUserId) -> Result<(), RemoteError> {
        self.record(RemoteCall::Invite(peer, user));
        Ok(())
    }

    async fn kick(&self, peer: RemotePeer, user: RemoteUserId) -> Result<(), RemoteError> {
        self.record(RemoteCall::Kick(peer, user));
        Ok(())
    }

    async fn leave(&self, peer: RemotePeer) -> Result<(), RemoteError> {
        self.record(RemoteCall::Leave(peer));
        Ok(())
    }

    async fn join(&self, peer: RemotePeer) -> Result<(), RemoteError> {
        self.record(RemoteCall::Join(peer));
        Ok(())
    }

    async fn export_invite_link(&self, _peer: RemotePeer) -> Result<Option<String>, RemoteError> {
        Ok(Some("https://invite.example/abc".to_string()))
    }

    async fn download(&self, _media: MediaRef) -> Result<Bytes, RemoteError> {
        Ok(Bytes::from_static(b"remote-bytes"))
    }
}

// ---------------------------------------------------------------------------
// Room API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RoomCall {
    Invite(RoomId, LocalUserId),
    Kick(RoomId, LocalUserId, String),
    Leave(RoomId, LocalUserId),
    SetPowerLevels(RoomId, PowerLevels),
    SetName(RoomId, String),
    SetTopic(RoomId, String),
    SetAvatar(RoomId, ContentUri),
    SetJoinRule(RoomId, JoinRule),
    AddAlias(RoomId, String),
    RemoveAlias(String),
    Redact(RoomId, LocalMessageId),
    SetPinned(RoomId, Vec<LocalMessageId>),
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub actor: LocalUserId,
    pub room: RoomId,
    pub message: OutgoingMessage,
    pub event_id: LocalMessageId,
}

#[derive(Default)]
pub struct MockRooms {
    pub created: Mutex<Vec<CreateRoomRequest>>,
    pub calls: Mutex<Vec<RoomCall>>,
    pub sent: Mutex<Vec<SentMessage>>,
    pub members: Mutex<HashMap<RoomId, Vec<LocalUserId>>>,
    pub levels: Mutex<HashMap<RoomId, PowerLevels>>,
    /// Next `create_room` returns no room id.
    pub fail_next_create: AtomicBool,
    send_gate: Mutex<Option<Arc<Semaphore>>>,
    next_event: AtomicUsize,
}

impl MockRooms {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every `send_message` wait for a permit on the returned semaphore.
    pub fn gate_sends(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.send_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<RoomCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn create_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn members_of(&self, room: &RoomId) -> Vec<LocalUserId> {
        self.members.lock().unwrap().get(room).cloned().unwrap_or_default()
    }

    fn record(&self, call: RoomCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn remove_member(&self, room: &RoomId, user: &LocalUserId) {
        if let Some(members) = self.members.lock().unwrap().get_mut(room) {
            members.retain(|m| m != user);
        }
    }
}

#[async_trait]
impl RoomApi for MockRooms {
    async fn create_room(
        &self,
        creator: &LocalUserId,
        request: CreateRoomRequest,
    ) -> Result<Option<RoomId>, RoomApiError> {
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }

        let mut created = self.created.lock().unwrap();
        let room = RoomId::new(format!("!room{}:localhost", created.len() + 1));
        if let Some(state) = request.initial_state.first() {
            let levels: PowerLevels = serde_json::from_value(state.content.clone()).unwrap();
            self.levels.lock().unwrap().insert(room.clone(), levels);
        }
        self.members
            .lock()
            .unwrap()
            .insert(room.clone(), vec![creator.clone()]);
        created.push(request);
        Ok(Some(room))
    }

    async fn invite(&self, _actor: &LocalUserId, room: &RoomId, user: &LocalUserId) -> Result<(), RoomApiError> {
        self.record(RoomCall::Invite(room.clone(), user.clone()));
        Ok(())
    }

    async fn kick(
        &self,
        _actor: &LocalUserId,
        room: &RoomId,
        user: &LocalUserId,
        reason: &str,
    ) -> Result<(), RoomApiError> {
        self.remove_member(room, user);
        self.record(RoomCall::Kick(room.clone(), user.clone(), reason.to_string()));
        Ok(())
    }

    async fn join(&self, user: &LocalUserId, room: &RoomId) -> Result<(), RoomApiError> {
        let mut members = self.members.lock().unwrap();
        let members = members.entry(room.clone()).or_default();
        if !members.contains(user) {
            members.push(user.clone());
        }
        Ok(())
    }

    async fn leave(&self, user: &LocalUserId, room: &RoomId) -> Result<(), RoomApiError> {
        self.remove_member(room, user);
        self.record(RoomCall::Leave(room.clone(), user.clone()));
        Ok(())
    }

    async fn members(&self, room: &RoomId, _memberships: &[Membership]) -> Result<Vec<LocalUserId>, RoomApiError> {
        Ok(self.members_of(room))
    }

    async fn power_levels(&self, room: &RoomId) -> Result<PowerLevels, RoomApiError> {
        Ok(self
            .levels
            .lock()
            .unwrap()
            .get(room)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_power_levels(
        &self,
        _actor: &LocalUserId,
        room: &RoomId,
        levels: &PowerLevels,
    ) -> Result<(), RoomApiError> {
        self.levels.lock().unwrap().insert(room.clone(), levels.clone());
        self.record(RoomCall::SetPowerLevels(room.clone(), levels.clone()));
        Ok(())
    }

    async fn set_name(&self, _actor: &LocalUserId, room: &RoomId, name: &str) -> Result<(), RoomApiError> {
        self.record(RoomCall::SetName(room.clone(), name.to_string()));
        Ok(())
    }

    async fn set_topic(&self, _actor: &LocalUserId, room: &RoomId, topic: &str) -> Result<(), RoomApiError> {
        self.record(RoomCall::SetTopic(room.clone(), topic.to_string()));
        Ok(())
    }

    async fn set_avatar(&self, _actor: &LocalUserId, room: &RoomId, url: &ContentUri) -> Result<(), RoomApiError> {
        self.record(RoomCall::SetAvatar(room.clone(), url.clone()));
        Ok(())
    }

    async fn set_join_rule(&self, _actor: &LocalUserId, room: &RoomId, rule: JoinRule) -> Result<(), RoomApiError> {
        self.record(RoomCall::SetJoinRule(room.clone(), rule));
        Ok(())
    }

    async fn add_alias(&self, room: &RoomId, localpart: &str) -> Result<(), RoomApiError> {
        self.record(RoomCall::AddAlias(room.clone(), localpart.to_string()));
        Ok(())
    }

    async fn remove_alias(&self, localpart: &str) -> Result<(), RoomApiError> {
        self.record(RoomCall::RemoveAlias(localpart.to_string()));
        Ok(())
    }

    async fn send_message(
        &self,
        actor: &LocalUserId,
        room: &RoomId,
        message: OutgoingMessage,
    ) -> Result<LocalMessageId, RoomApiError> {
        let gate = self.send_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let event_id = LocalMessageId::new(format!(
            "$event{}",
            self.next_event.fetch_add(1, Ordering::SeqCst) + 1
        ));
        self.sent.lock().unwrap().push(SentMessage {
            actor: actor.clone(),
            room: room.clone(),
            message,
            event_id: event_id.clone(),
        });
        Ok(event_id)
    }

    async fn redact(&self, _actor: &LocalUserId, room: &RoomId, event: &LocalMessageId) -> Result<(), RoomApiError> {
        self.record(RoomCall::Redact(room.clone(), event.clone()));
        Ok(())
    }

    async fn set_typing(&self, _actor: &LocalUserId, _room: &RoomId, _typing: bool) -> Result<(), RoomApiError> {
        Ok(())
    }

    async fn set_pinned(
        &self,
        _actor: &LocalUserId,
        room: &RoomId,
        events: Vec<LocalMessageId>,
    ) -> Result<(), RoomApiError> {
        self.record(RoomCall::SetPinned(room.clone(), events));
        Ok(())
    }

    async fn upload(&self, _actor: &LocalUserId, _data: Bytes, _mime: &str) -> Result<ContentUri, RoomApiError> {
        Ok(ContentUri("mxc://localhost/upload".to_string()))
    }

    async fn download(&self, _url: &ContentUri) -> Result<Bytes, RoomApiError> {
        Ok(Bytes::from_static(b"local-bytes"))
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StaticDirectory {
    accounts: Mutex<HashMap<RemoteUserId, LocalUserId>>,
}

impl StaticDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, remote: i64, local: &str) {
        self.accounts
            .lock()
            .unwrap()
            .insert(RemoteUserId(remote), LocalUserId::new(local));
    }
}

impl Directory for StaticDirectory {
    fn account_for_remote(&self, remote: RemoteUserId) -> Option<LocalUserId> {
        self.accounts.lock().unwrap().get(&remote).cloned()
    }

    fn remote_for_account(&self, user: &LocalUserId) -> Option<RemoteUserId> {
        self.accounts
            .lock()
            .unwrap()
            .iter()
            .find(|(_, local)| *local == user)
            .map(|(remote, _)| *remote)
    }

    fn remote_display_name(&self, remote: RemoteUserId) -> Option<String> {
        Some(format!("User {remote}"))
    }

    fn local_display_name(&self, _user: &LocalUserId) -> Option<String> {
        None
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub bridge: Arc<Bridge>,
    pub rooms: Arc<MockRooms>,
    pub directory: Arc<StaticDirectory>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_relay(None)
    }

    pub fn with_relay(relay: Option<Arc<MockRemote>>) -> Self {
        Self::with_database(Database::open_in_memory().unwrap(), relay)
    }

    pub fn with_database(db: Database, relay: Option<Arc<MockRemote>>) -> Self {
        crate::telemetry::init();
        let rooms = MockRooms::new();
        let directory = StaticDirectory::new();
        let bridge = Bridge::new(
            BridgeConfig::default(),
            db,
            rooms.clone(),
            directory.clone(),
            relay.map(|r| r as Arc<dyn RemoteClient>),
        )
        .unwrap();
        Self {
            bridge,
            rooms,
            directory,
        }
    }
}

pub fn as_client(remote: &Arc<MockRemote>) -> Arc<dyn RemoteClient> {
    remote.clone()
}
